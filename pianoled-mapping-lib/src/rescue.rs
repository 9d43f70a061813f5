//! Rescue pass: hand orphaned LEDs to their nearest neighbouring key.

use log::debug;

use crate::geometry::{KeyboardGeometry, LedPlacement};
use crate::mapping::{CalibrationRange, LedMapping};

/// LEDs in `range` that no key claims, ascending.
#[must_use]
pub fn find_orphans(mapping: &LedMapping, range: CalibrationRange) -> Vec<usize> {
    let claimed = mapping.claimed();
    range.indices().filter(|led| !claimed.contains(led)).collect()
}

/// Assign every orphaned LED to the closer of its two neighbouring keys.
///
/// The neighbours are the last key starting at or before the LED's centre and
/// the first key starting after it. Distance is measured to the nearer exposed
/// edge; ties go to the lower key, and a missing neighbour (before the first
/// or past the last key) means the other one wins. LEDs are only ever added,
/// so no key loses LEDs, and a second pass finds nothing left to do.
///
/// `placements` must hold one entry per LED of `range`, in order.
///
/// Returns the rescued mapping and the number of LEDs reassigned.
#[must_use]
pub fn rescue_orphans(
    base: &LedMapping,
    geometry: &KeyboardGeometry,
    placements: &[LedPlacement],
    range: CalibrationRange,
) -> (LedMapping, usize) {
    let mut mapping = base.clone();
    let keys = geometry.keys();
    let orphans = find_orphans(base, range);
    if orphans.is_empty() || keys.is_empty() {
        return (mapping, 0);
    }

    let mut rescued = 0;
    for led in orphans {
        let Some(placement) = placements
            .get(led - range.start_led)
            .filter(|p| p.led_index == led)
        else {
            continue;
        };
        let pos = placement.center_position_mm;
        let split = keys.partition_point(|k| k.exposed_start_mm <= pos);
        let preceding = split.checked_sub(1).map(|i| &keys[i]);
        let following = keys.get(split);

        let target = match (preceding, following) {
            (Some(prev), Some(next)) => {
                if prev.distance_mm(pos) <= next.distance_mm(pos) {
                    prev
                } else {
                    next
                }
            }
            (Some(key), None) | (None, Some(key)) => key,
            (None, None) => continue,
        };
        mapping.insert(target.midi_note, led);
        rescued += 1;
    }

    if rescued > 0 {
        debug!("Rescued {rescued} orphaned LED(s)");
    }
    (mapping, rescued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{build_key_geometry, led_placements, LedStripSpec};
    use crate::piano::PianoSize;
    use smallvec::smallvec;

    fn setup() -> (KeyboardGeometry, Vec<LedPlacement>, CalibrationRange) {
        let geometry = build_key_geometry(PianoSize::Keys25);
        let strip = LedStripSpec::new(100).unwrap();
        let range = CalibrationRange::new(0, 39).unwrap();
        let placements = led_placements(&strip, range, 1.0);
        (geometry, placements, range)
    }

    #[test]
    fn test_orphan_goes_to_nearer_edge() {
        let (geometry, placements, range) = setup();
        // C3 exposed 0..21.3, C#3 22.3..36.0, D3 36.0..45.8
        let mut base = LedMapping::with_notes(geometry.spec.notes());
        base.set(48, smallvec![0, 1, 2]);
        base.set(49, smallvec![3]);
        base.set(50, smallvec![4]);
        let (rescued, count) = rescue_orphans(&base, &geometry, &placements, range);
        assert!(count > 0);
        // LED 5 at 50mm lies on D#3 (46.8..60.5)
        assert_eq!(rescued.leds_for_note(51).first(), Some(&5));
        assert!(find_orphans(&rescued, range).is_empty());
    }

    #[test]
    fn test_tie_goes_to_preceding_key() {
        let (geometry, _, _) = setup();
        // E3 (52) ends at 72.5 and F3 (53) starts at 73.5; 73.0mm is equidistant
        let range = CalibrationRange::new(0, 0).unwrap();
        let placements = [LedPlacement {
            led_index: 0,
            center_position_mm: 73.0,
        }];
        let base = LedMapping::with_notes(geometry.spec.notes());
        let (rescued, count) = rescue_orphans(&base, &geometry, &placements, range);
        assert_eq!(count, 1);
        assert_eq!(rescued.leds_for_note(52), &[0]);
    }

    #[test]
    fn test_no_key_loses_leds() {
        let (geometry, placements, range) = setup();
        let mut base = LedMapping::with_notes(geometry.spec.notes());
        base.set(60, smallvec![10, 11]);
        let (rescued, _) = rescue_orphans(&base, &geometry, &placements, range);
        for (note, leds) in base.iter() {
            let after = rescued.leds_for_note(note);
            assert!(leds.iter().all(|led| after.contains(led)));
        }
    }

    #[test]
    fn test_range_not_starting_at_zero() {
        let geometry = build_key_geometry(PianoSize::Keys25);
        let strip = LedStripSpec::new(100).unwrap();
        let range = CalibrationRange::new(10, 49).unwrap();
        let placements = led_placements(&strip, range, 1.0);
        let mut base = LedMapping::with_notes(geometry.spec.notes());
        base.set(48, smallvec![10, 11, 12]);
        let (rescued, count) = rescue_orphans(&base, &geometry, &placements, range);
        assert_eq!(count, 37);
        // LED 15 sits 50mm along the keybed, on D#3
        assert_eq!(rescued.leds_for_note(51).first(), Some(&15));
        let counts = rescued.claim_counts();
        assert_eq!(counts.keys().copied().collect::<Vec<_>>(), (10..=49).collect::<Vec<_>>());
        assert!(counts.values().all(|&c| c == 1));
    }

    #[test]
    fn test_rescue_is_idempotent() {
        let (geometry, placements, range) = setup();
        let base = LedMapping::with_notes(geometry.spec.notes());
        let (once, first_count) = rescue_orphans(&base, &geometry, &placements, range);
        assert_eq!(first_count, 40);
        let (twice, second_count) = rescue_orphans(&once, &geometry, &placements, range);
        assert_eq!(second_count, 0);
        assert_eq!(once, twice);
        // Every LED now belongs to exactly one key
        let counts = twice.claim_counts();
        assert_eq!(counts.len(), 40);
        assert!(counts.values().all(|&c| c == 1));
    }
}

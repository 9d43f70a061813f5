//! Offset cascade: global, per-key and joint offsets plus per-key trims.
//!
//! Per-key LED offsets and joint offsets *cascade*: an offset registered at
//! note N shifts N and every note above it, modelling a persistent shift of
//! the strip from that point on (a solder joint displaces everything
//! downstream). Offsets registered at several notes stack. Trims do not
//! cascade; they only shorten the key they are registered on.

use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::mapping::{CalibrationRange, LedList, LedMapping};

/// Largest magnitude of a per-key LED offset.
pub const MAX_KEY_OFFSET: i32 = 100;
/// Largest magnitude of a per-key joint offset, in millimetres.
pub const MAX_JOINT_OFFSET_MM: f64 = 10.0;

/// LEDs removed from either end of one key's list after shifting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedTrim {
    #[serde(default)]
    pub left: u32,
    #[serde(default)]
    pub right: u32,
}

/// All offset and trim layers. Every per-key map is keyed by MIDI note.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OffsetConfig {
    /// Shift applied to every key, in LEDs
    #[serde(default)]
    pub global_offset: i32,
    /// Cascading shift in LEDs, `-100..=100`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub key_offsets: BTreeMap<u8, i32>,
    /// Cascading shift in millimetres, `-10.0..=10.0`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub key_joint_offsets: BTreeMap<u8, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub key_led_trims: BTreeMap<u8, LedTrim>,
}

/// Convert a joint offset in millimetres to whole LEDs.
///
/// Rounds half away from zero, so exactly half a spacing moves one LED.
#[must_use]
pub fn joint_offset_to_leds(offset_mm: f64, led_spacing_mm: f64) -> i64 {
    // Joint offsets are bounded to ±10mm, far inside i64
    #[allow(clippy::cast_possible_truncation)]
    let leds = (offset_mm / led_spacing_mm).round() as i64;
    leds
}

/// Total shift for every note of `notes`, as a running sum in ascending note order.
///
/// `total(k) = global + Σ key_offsets[n ≤ k] + Σ round(joint[n ≤ k] / spacing)`
pub fn cascade_shifts(
    notes: impl IntoIterator<Item = u8>,
    offsets: &OffsetConfig,
    led_spacing_mm: f64,
) -> BTreeMap<u8, i64> {
    let mut key_offsets = offsets.key_offsets.iter().peekable();
    let mut joint_offsets = offsets.key_joint_offsets.iter().peekable();
    let mut running = i64::from(offsets.global_offset);

    notes
        .into_iter()
        .map(|note| {
            while let Some((_, &offset)) = key_offsets.next_if(|(&n, _)| n <= note) {
                running += i64::from(offset);
            }
            while let Some((_, &offset_mm)) = joint_offsets.next_if(|(&n, _)| n <= note) {
                running += joint_offset_to_leds(offset_mm, led_spacing_mm);
            }
            (note, running)
        })
        .collect()
}

/// Remove `trim.left` LEDs from the head and `trim.right` from the tail.
///
/// Trimming at least as many LEDs as the key has leaves it empty.
#[must_use]
pub fn trim_leds(leds: &[usize], trim: LedTrim) -> LedList {
    let left = usize::try_from(trim.left).unwrap_or(usize::MAX);
    let right = usize::try_from(trim.right).unwrap_or(usize::MAX);
    if left.saturating_add(right) >= leds.len() {
        return LedList::new();
    }
    LedList::from_slice(&leds[left..leds.len() - right])
}

/// Apply the offset cascade and trims to a base mapping.
///
/// Each base LED is shifted by the key's cascaded total and clamped into the
/// calibration range. Clamping can fold neighbouring LEDs onto the range
/// edge, so the shifted list is de-duplicated before the trim is applied.
#[must_use]
pub fn apply_offsets(
    base: &LedMapping,
    offsets: &OffsetConfig,
    range: CalibrationRange,
    led_spacing_mm: f64,
) -> LedMapping {
    let shifts = cascade_shifts(base.notes(), offsets, led_spacing_mm);
    let mut result = LedMapping::with_notes(base.notes());

    for (note, leds) in base.iter() {
        let shift = shifts.get(&note).copied().unwrap_or(0);
        let mut shifted: LedList = leds
            .iter()
            .map(|&led| range.shift_clamped(led, shift))
            .collect();
        shifted.dedup();

        let trimmed = match offsets.key_led_trims.get(&note) {
            Some(&trim) => trim_leds(&shifted, trim),
            None => shifted,
        };
        result.set(note, trimmed);
    }

    debug!(
        "Applied offsets: global {}, {} key offset(s), {} joint offset(s), {} trim(s)",
        offsets.global_offset,
        offsets.key_offsets.len(),
        offsets.key_joint_offsets.len(),
        offsets.key_led_trims.len()
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    const SPACING: f64 = 1000.0 / 60.0;

    fn base_mapping() -> LedMapping {
        // Three LEDs per key for notes 60..=63 starting at LED 10
        let mut base = LedMapping::with_notes(60..=63);
        for (i, note) in (60..=63).enumerate() {
            let first = 10 + i * 3;
            base.set(note, smallvec![first, first + 1, first + 2]);
        }
        base
    }

    fn range() -> CalibrationRange {
        CalibrationRange::new(0, 40).unwrap()
    }

    #[test]
    fn test_no_offsets_is_identity() {
        let base = base_mapping();
        let result = apply_offsets(&base, &OffsetConfig::default(), range(), SPACING);
        assert_eq!(result, base);
    }

    #[test]
    fn test_global_offset_shifts_everything() {
        let offsets = OffsetConfig {
            global_offset: -2,
            ..OffsetConfig::default()
        };
        let result = apply_offsets(&base_mapping(), &offsets, range(), SPACING);
        assert_eq!(result.leds_for_note(60), &[8, 9, 10]);
        assert_eq!(result.leds_for_note(63), &[17, 18, 19]);
    }

    #[test]
    fn test_key_offset_cascades_upward() {
        let mut offsets = OffsetConfig::default();
        offsets.key_offsets.insert(61, 2);
        let result = apply_offsets(&base_mapping(), &offsets, range(), SPACING);
        assert_eq!(result.leds_for_note(60), &[10, 11, 12]);
        assert_eq!(result.leds_for_note(61), &[15, 16, 17]);
        assert_eq!(result.leds_for_note(62), &[18, 19, 20]);
        assert_eq!(result.leds_for_note(63), &[21, 22, 23]);
    }

    #[test]
    fn test_offsets_stack() {
        let mut offsets = OffsetConfig {
            global_offset: 1,
            ..OffsetConfig::default()
        };
        offsets.key_offsets.insert(61, 2);
        offsets.key_offsets.insert(63, -4);
        offsets.key_joint_offsets.insert(62, SPACING);
        let shifts = cascade_shifts(60..=63, &offsets, SPACING);
        assert_eq!(shifts[&60], 1);
        assert_eq!(shifts[&61], 3);
        assert_eq!(shifts[&62], 4);
        assert_eq!(shifts[&63], 0);
    }

    #[test]
    fn test_offset_below_keyboard_still_cascades() {
        let mut offsets = OffsetConfig::default();
        offsets.key_offsets.insert(20, 1);
        let shifts = cascade_shifts(60..=61, &offsets, SPACING);
        assert_eq!(shifts[&60], 1);
        assert_eq!(shifts[&61], 1);
    }

    #[test]
    fn test_joint_offset_conversion() {
        assert_eq!(joint_offset_to_leds(SPACING, SPACING), 1);
        assert_eq!(joint_offset_to_leds(-SPACING, SPACING), -1);
        assert_eq!(joint_offset_to_leds(SPACING * 0.49, SPACING), 0);
        assert_eq!(joint_offset_to_leds(-SPACING * 0.49, SPACING), 0);
        // Half a spacing rounds away from zero
        assert_eq!(joint_offset_to_leds(5.0, 10.0), 1);
        assert_eq!(joint_offset_to_leds(-5.0, 10.0), -1);
    }

    #[test]
    fn test_clamped_to_range_and_deduplicated() {
        let offsets = OffsetConfig {
            global_offset: 30,
            ..OffsetConfig::default()
        };
        let result = apply_offsets(&base_mapping(), &offsets, range(), SPACING);
        // 19..=21 + 30 = 49..=51, all clamped to 40
        assert_eq!(result.leds_for_note(63), &[40]);
        assert_eq!(result.leds_for_note(60), &[40]);
        for (_, leds) in result.iter() {
            assert!(leds.iter().all(|&led| led <= 40));
        }
    }

    #[test]
    fn test_trim() {
        let leds = [50, 51, 52, 53];
        assert_eq!(trim_leds(&leds, LedTrim { left: 1, right: 1 }).as_slice(), &[51, 52]);
        assert!(trim_leds(&leds, LedTrim { left: 4, right: 0 }).is_empty());
        assert!(trim_leds(&leds, LedTrim { left: 9, right: 0 }).is_empty());
        assert!(trim_leds(&leds, LedTrim { left: 2, right: 2 }).is_empty());
        assert_eq!(trim_leds(&leds, LedTrim { left: 0, right: 3 }).as_slice(), &[50]);
        assert!(trim_leds(&[], LedTrim::default()).is_empty());
    }

    #[test]
    fn test_trim_does_not_cascade() {
        let mut offsets = OffsetConfig::default();
        offsets.key_led_trims.insert(61, LedTrim { left: 1, right: 1 });
        let result = apply_offsets(&base_mapping(), &offsets, range(), SPACING);
        assert_eq!(result.leds_for_note(61), &[14]);
        assert_eq!(result.leds_for_note(62), &[16, 17, 18]);
    }

    #[test]
    fn test_trim_after_shift() {
        let mut base = LedMapping::with_notes([60]);
        base.set(60, smallvec![49, 50, 51]);
        let mut offsets = OffsetConfig::default();
        offsets.key_offsets.insert(60, 0);
        offsets.key_led_trims.insert(60, LedTrim { left: 1, right: 0 });
        let result = apply_offsets(&base, &offsets, CalibrationRange::new(0, 119).unwrap(), SPACING);
        assert_eq!(result.leds_for_note(60), &[50, 51]);
    }
}

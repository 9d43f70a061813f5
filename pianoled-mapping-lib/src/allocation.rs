//! LED → key allocation strategies.
//!
//! Each [`DistributionMode`] has one [`Allocator`] implementation. Count-based
//! strategies ([`ProportionalAllocator`], [`FixedAllocator`]) hand out
//! consecutive LEDs in note order. Position-based strategies
//! ([`PhysicsAllocator`], [`PianoAllocator`]) place every LED along the keybed
//! and correlate it with the keys' exposed surfaces; their leftovers go
//! through the rescue pass.

use log::debug;
use num_integer::Integer;
use serde::{Deserialize, Serialize};

use crate::geometry::{auto_pitch_scale, led_placements, KeyboardGeometry, LedPlacement, LedStripSpec};
use crate::mapping::{CalibrationRange, LedList, LedMapping};
use crate::rescue::rescue_orphans;

/// How LEDs are distributed over the keys (persisted as an internally tagged object).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DistributionMode {
    /// Even split; the first `available % keys` keys get one extra LED
    #[default]
    Proportional,
    /// The same number of LEDs for every key; trailing keys may get none
    FixedPerKey { leds_per_key: usize },
    /// Distance correlation between LED centres and exposed key surfaces
    Physics,
    /// Keybed scaled onto the LED range; boundary LEDs shared between keys
    PianoOverlap,
    /// Keybed scaled onto the LED range; every LED belongs to exactly one key
    PianoNoOverlap,
}

/// Tuning for position-based allocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsParams {
    /// How far outside a key's exposed surface an LED centre may sit and
    /// still be given to that key.
    #[serde(default = "default_overhang_threshold_mm")]
    pub overhang_threshold_mm: f64,
    /// Stretch the calibrated LED span onto the keyboard span.
    #[serde(default = "default_auto_pitch_scale")]
    pub auto_pitch_scale: bool,
}

const fn default_overhang_threshold_mm() -> f64 {
    1.5
}

const fn default_auto_pitch_scale() -> bool {
    true
}

impl Default for PhysicsParams {
    fn default() -> Self {
        Self {
            overhang_threshold_mm: default_overhang_threshold_mm(),
            auto_pitch_scale: default_auto_pitch_scale(),
        }
    }
}

/// Inputs shared by every strategy.
#[derive(Debug, Clone, Copy)]
pub struct AllocationContext<'a> {
    pub geometry: &'a KeyboardGeometry,
    pub strip: &'a LedStripSpec,
    pub range: CalibrationRange,
}

/// Result of running a strategy (and, for position-based ones, the rescue pass).
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub mapping: LedMapping,
    /// LED centre positions the strategy used; empty for count-based strategies.
    pub placements: Vec<LedPlacement>,
    /// Factor applied to the strip's LED spacing when placing LEDs.
    pub pitch_scale_factor: f64,
    /// Orphaned LEDs reassigned by the rescue pass.
    pub rescued: usize,
}

impl Allocation {
    fn count_based(mapping: LedMapping) -> Self {
        Self {
            mapping,
            placements: Vec::new(),
            pitch_scale_factor: 1.0,
            rescued: 0,
        }
    }
}

/// A distribution strategy.
pub trait Allocator {
    fn name(&self) -> &'static str;

    /// Produce a provisional mapping. Lists must be ascending and duplicate-free.
    fn allocate(&self, ctx: &AllocationContext<'_>) -> Allocation;
}

impl DistributionMode {
    #[must_use]
    pub fn allocator(self, physics: PhysicsParams) -> Box<dyn Allocator> {
        match self {
            Self::Proportional => Box::new(ProportionalAllocator),
            Self::FixedPerKey { leds_per_key } => Box::new(FixedAllocator { leds_per_key }),
            Self::Physics => Box::new(PhysicsAllocator { params: physics }),
            Self::PianoOverlap => Box::new(PianoAllocator { overlap: true }),
            Self::PianoNoOverlap => Box::new(PianoAllocator { overlap: false }),
        }
    }

    /// Whether every LED in range belongs to at most one key.
    #[must_use]
    pub const fn is_exclusive(self) -> bool {
        !matches!(self, Self::PianoOverlap)
    }
}

/// Run the strategy for `mode`, then rescue orphaned LEDs if it is position-based.
#[must_use]
pub fn allocate(
    geometry: &KeyboardGeometry,
    strip: &LedStripSpec,
    range: CalibrationRange,
    mode: DistributionMode,
    physics: PhysicsParams,
) -> Allocation {
    let allocator = mode.allocator(physics);
    let ctx = AllocationContext {
        geometry,
        strip,
        range,
    };
    let mut allocation = allocator.allocate(&ctx);

    if !allocation.placements.is_empty() {
        let (mapping, rescued) =
            rescue_orphans(&allocation.mapping, geometry, &allocation.placements, range);
        allocation.mapping = mapping;
        allocation.rescued = rescued;
    }

    debug!(
        "{} allocation over LEDs {}..={}: {} key(s) without LEDs, {} rescued, pitch scale {:.4}",
        allocator.name(),
        range.start_led,
        range.end_led,
        allocation.mapping.empty_notes().len(),
        allocation.rescued,
        allocation.pitch_scale_factor
    );
    allocation
}

/// Consecutive LEDs `first..first + count` as a list.
fn consecutive(first: usize, count: usize) -> LedList {
    (first..first + count).collect()
}

/// Even split with the remainder going to the lowest keys.
///
/// The low keys end up one LED wider than the high keys; that unevenness is
/// accepted in exchange for a simple, deterministic layout.
#[derive(Debug, Clone, Copy)]
pub struct ProportionalAllocator;

impl Allocator for ProportionalAllocator {
    fn name(&self) -> &'static str {
        "proportional"
    }

    fn allocate(&self, ctx: &AllocationContext<'_>) -> Allocation {
        let spec = ctx.geometry.spec;
        let (per_key, extra) = ctx.range.len().div_rem(&spec.key_count);
        let mut mapping = LedMapping::with_notes(spec.notes());
        let mut next = ctx.range.start_led;

        for (i, note) in spec.notes().enumerate() {
            let count = per_key + usize::from(i < extra);
            mapping.set(note, consecutive(next, count));
            next += count;
        }
        Allocation::count_based(mapping)
    }
}

/// A fixed number of LEDs per key, truncating at the end of the range.
#[derive(Debug, Clone, Copy)]
pub struct FixedAllocator {
    pub leds_per_key: usize,
}

impl FixedAllocator {
    /// How many keys fit into `available` LEDs.
    #[must_use]
    pub fn max_mappable_keys(&self, available: usize) -> usize {
        available.checked_div(self.leds_per_key).unwrap_or(0)
    }
}

impl Allocator for FixedAllocator {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn allocate(&self, ctx: &AllocationContext<'_>) -> Allocation {
        let spec = ctx.geometry.spec;
        let mappable = self.max_mappable_keys(ctx.range.len());
        let mut mapping = LedMapping::with_notes(spec.notes());

        for (i, note) in spec.notes().enumerate().take(mappable) {
            mapping.set(note, consecutive(ctx.range.start_led + i * self.leds_per_key, self.leds_per_key));
        }
        if mappable < spec.key_count {
            debug!(
                "Fixed allocation of {} LEDs per key maps {mappable} of {} keys",
                self.leds_per_key, spec.key_count
            );
        }
        Allocation::count_based(mapping)
    }
}

/// Distance correlation between LED centres and exposed key surfaces.
///
/// An LED belongs to the key whose exposed surface contains its centre. An
/// LED in a gap goes to the nearest key when it is within the overhang
/// threshold (ties to the lower key), otherwise it is left for the rescue pass.
#[derive(Debug, Clone, Copy)]
pub struct PhysicsAllocator {
    pub params: PhysicsParams,
}

impl Allocator for PhysicsAllocator {
    fn name(&self) -> &'static str {
        "physics"
    }

    fn allocate(&self, ctx: &AllocationContext<'_>) -> Allocation {
        let pitch_scale_factor = if self.params.auto_pitch_scale {
            auto_pitch_scale(ctx.geometry, ctx.strip, ctx.range)
        } else {
            1.0
        };
        let placements = led_placements(ctx.strip, ctx.range, pitch_scale_factor);
        let keys = ctx.geometry.keys();
        let mut mapping = LedMapping::with_notes(ctx.geometry.spec.notes());

        for placement in &placements {
            let pos = placement.center_position_mm;
            let mut nearest: Option<(u8, f64)> = None;
            for key in keys {
                let distance = key.distance_mm(pos);
                if nearest.map_or(true, |(_, best)| distance < best) {
                    nearest = Some((key.midi_note, distance));
                }
            }
            if let Some((note, distance)) = nearest {
                if distance <= self.params.overhang_threshold_mm {
                    mapping.insert(note, placement.led_index);
                }
            }
        }

        Allocation {
            mapping,
            placements,
            pitch_scale_factor,
            rescued: 0,
        }
    }
}

/// Keybed-to-LED coordinate transform.
///
/// Each key owns a territory: its exposed surface widened to the midpoints of
/// the gaps on either side, so the territories tile the whole keybed. The
/// keybed is then scaled onto the LED range, one cell per LED.
#[derive(Debug, Clone, Copy)]
pub struct PianoAllocator {
    /// Give boundary LEDs to both neighbouring keys.
    pub overlap: bool,
}

impl PianoAllocator {
    /// Territory boundaries: `bounds[i]..bounds[i + 1]` belongs to key `i`.
    fn territory_bounds(geometry: &KeyboardGeometry) -> Vec<f64> {
        let keys = geometry.keys();
        let mut bounds = Vec::with_capacity(keys.len() + 1);
        if let Some(first) = keys.first() {
            bounds.push(first.exposed_start_mm);
        }
        for pair in keys.windows(2) {
            bounds.push((pair[0].exposed_end_mm + pair[1].exposed_start_mm) / 2.0);
        }
        if let Some(last) = keys.last() {
            bounds.push(last.exposed_end_mm);
        }
        bounds
    }
}

impl Allocator for PianoAllocator {
    fn name(&self) -> &'static str {
        if self.overlap {
            "piano-overlap"
        } else {
            "piano-no-overlap"
        }
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn allocate(&self, ctx: &AllocationContext<'_>) -> Allocation {
        let keys = ctx.geometry.keys();
        let mut mapping = LedMapping::with_notes(ctx.geometry.spec.notes());
        let bounds = Self::territory_bounds(ctx.geometry);
        let cells = ctx.range.len();
        let origin = bounds.first().copied().unwrap_or(0.0);
        let span = ctx.geometry.span_mm();
        if keys.is_empty() || span <= 0.0 {
            return Allocation::count_based(mapping);
        }
        let cell_mm = span / cells as f64;
        let to_cell = |mm: f64| (mm - origin) / cell_mm;

        let placements: Vec<LedPlacement> = ctx
            .range
            .indices()
            .enumerate()
            .map(|(cell, led_index)| LedPlacement {
                led_index,
                center_position_mm: origin + (cell as f64 + 0.5) * cell_mm,
            })
            .collect();

        if self.overlap {
            for (i, key) in keys.iter().enumerate() {
                // Cell j covers [j, j + 1); take every cell the territory touches
                let lo = (to_cell(bounds[i]).floor().max(0.0) as usize).min(cells - 1);
                let hi = (to_cell(bounds[i + 1]).ceil() as usize).clamp(lo + 1, cells);
                mapping.set(key.midi_note, consecutive(ctx.range.start_led + lo, hi - lo));
            }
        } else {
            // Both placements and territories ascend, so walk them together
            let mut key_idx = 0;
            for placement in &placements {
                let pos = placement.center_position_mm;
                while key_idx + 1 < keys.len() && pos >= bounds[key_idx + 1] {
                    key_idx += 1;
                }
                mapping.insert(keys[key_idx].midi_note, placement.led_index);
            }
        }

        Allocation {
            mapping,
            placements,
            pitch_scale_factor: cell_mm / ctx.strip.led_spacing_mm,
            rescued: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::build_key_geometry;
    use crate::piano::PianoSize;

    fn run(
        size: PianoSize,
        leds_per_meter: u32,
        start: usize,
        end: usize,
        mode: DistributionMode,
    ) -> Allocation {
        let geometry = build_key_geometry(size);
        let strip = LedStripSpec::new(leds_per_meter).unwrap();
        let range = CalibrationRange::new(start, end).unwrap();
        allocate(&geometry, &strip, range, mode, PhysicsParams::default())
    }

    fn assert_sorted_unique(mapping: &LedMapping) {
        for (note, leds) in mapping.iter() {
            assert!(
                leds.windows(2).all(|w| w[0] < w[1]),
                "note {note}: {leds:?} not ascending/unique"
            );
        }
    }

    #[test]
    fn test_proportional_88_keys_120_leds() {
        let allocation = run(PianoSize::Keys88, 60, 0, 119, DistributionMode::Proportional);
        let mapping = &allocation.mapping;
        let counts: Vec<usize> = mapping.iter().map(|(_, leds)| leds.len()).collect();
        assert_eq!(counts.len(), 88);
        assert!(counts[..32].iter().all(|&c| c == 2));
        assert!(counts[32..].iter().all(|&c| c == 1));
        assert_eq!(mapping.leds_for_note(21), &[0, 1]);
        assert_eq!(mapping.leds_for_note(52), &[62, 63]);
        assert_eq!(mapping.leds_for_note(53), &[64]);
        assert_eq!(mapping.leds_for_note(108), &[119]);
        assert_eq!(mapping.used_led_count(), 120);
        assert_eq!(allocation.rescued, 0);
        assert!(allocation.placements.is_empty());
    }

    #[test]
    fn test_proportional_fewer_leds_than_keys() {
        let allocation = run(PianoSize::Keys25, 60, 10, 19, DistributionMode::Proportional);
        let mapping = &allocation.mapping;
        assert_eq!(mapping.leds_for_note(48), &[10]);
        assert_eq!(mapping.leds_for_note(57), &[19]);
        assert!(mapping.leds_for_note(58).is_empty());
        assert_eq!(mapping.empty_notes().len(), 15);
    }

    #[test]
    fn test_fixed_truncates_trailing_keys() {
        let allocation = run(
            PianoSize::Keys88,
            60,
            0,
            249,
            DistributionMode::FixedPerKey { leds_per_key: 3 },
        );
        let mapping = &allocation.mapping;
        assert_eq!(mapping.leds_for_note(21), &[0, 1, 2]);
        // Key 83 (index 82) is the last mapped one
        assert_eq!(mapping.leds_for_note(21 + 82), &[246, 247, 248]);
        assert_eq!(mapping.empty_notes(), vec![104, 105, 106, 107, 108]);
        assert_eq!(FixedAllocator { leds_per_key: 3 }.max_mappable_keys(250), 83);
    }

    #[test]
    fn test_physics_covers_every_led_once() {
        for (size, lpm, end) in [
            (PianoSize::Keys88, 60, 119),
            (PianoSize::Keys88, 144, 182),
            (PianoSize::Keys61, 30, 60),
            (PianoSize::Keys25, 144, 50),
        ] {
            let allocation = run(size, lpm, 0, end, DistributionMode::Physics);
            assert_sorted_unique(&allocation.mapping);
            let counts = allocation.mapping.claim_counts();
            assert_eq!(counts.len(), end + 1, "{size}: not every LED claimed");
            assert!(counts.values().all(|&c| c == 1), "{size}: LED claimed twice");
        }
    }

    #[test]
    fn test_physics_dense_strip_reaches_every_key() {
        let allocation = run(PianoSize::Keys88, 144, 0, 182, DistributionMode::Physics);
        assert!(allocation.mapping.empty_notes().is_empty());
        // LED 0 sits on the left edge of A0, the last LED on the right edge of C8
        assert_eq!(allocation.mapping.leds_for_note(21).first(), Some(&0));
        assert_eq!(allocation.mapping.leds_for_note(108).last(), Some(&182));
    }

    #[test]
    fn test_physics_without_pitch_scale_rescues_overhang() {
        let geometry = build_key_geometry(PianoSize::Keys25);
        let strip = LedStripSpec::new(60).unwrap();
        // 60 LEDs at 16.7mm is ~983mm, far wider than the 366.5mm keybed
        let range = CalibrationRange::new(0, 59).unwrap();
        let physics = PhysicsParams {
            auto_pitch_scale: false,
            ..PhysicsParams::default()
        };
        let allocation = allocate(&geometry, &strip, range, DistributionMode::Physics, physics);
        assert!((allocation.pitch_scale_factor - 1.0).abs() < f64::EPSILON);
        assert!(allocation.rescued > 0);
        // Everything past the keybed ends up on the highest key
        let top = allocation.mapping.leds_for_note(72);
        assert_eq!(top.last(), Some(&59));
        assert_eq!(allocation.mapping.claim_counts().len(), 60);
    }

    #[test]
    fn test_piano_no_overlap_exactly_once() {
        for (size, end) in [(PianoSize::Keys88, 119), (PianoSize::Keys88, 250), (PianoSize::Keys49, 40)] {
            let allocation = run(size, 60, 5, end, DistributionMode::PianoNoOverlap);
            assert_sorted_unique(&allocation.mapping);
            let counts = allocation.mapping.claim_counts();
            assert_eq!(counts.len(), end - 5 + 1);
            assert!(counts.values().all(|&c| c == 1));
            assert_eq!(counts.keys().next(), Some(&5));
            assert_eq!(counts.keys().last(), Some(&end));
        }
    }

    #[test]
    fn test_piano_overlap_covers_and_shares() {
        let allocation = run(PianoSize::Keys88, 60, 0, 175, DistributionMode::PianoOverlap);
        assert_sorted_unique(&allocation.mapping);
        let counts = allocation.mapping.claim_counts();
        assert_eq!(counts.len(), 176);
        assert!(counts.values().any(|&c| c > 1), "expected shared boundary LEDs");
        assert!(allocation.mapping.empty_notes().is_empty());
        assert_eq!(allocation.rescued, 0);
    }

    #[test]
    fn test_exclusive_modes() {
        assert!(DistributionMode::PianoNoOverlap.is_exclusive());
        assert!(!DistributionMode::PianoOverlap.is_exclusive());
    }

    #[test]
    fn test_mode_serde() {
        let json = serde_json::to_string(&DistributionMode::FixedPerKey { leds_per_key: 3 }).unwrap();
        assert_eq!(json, r#"{"mode":"fixed_per_key","leds_per_key":3}"#);
        let mode: DistributionMode = serde_json::from_str(r#"{"mode":"piano_no_overlap"}"#).unwrap();
        assert_eq!(mode, DistributionMode::PianoNoOverlap);
    }
}

//! Physical keyboard and LED strip geometry.
//!
//! All positions are millimetres along the keybed, measured from the left
//! edge of the lowest key's exposed surface.

use log::debug;

use crate::config::ConfigError;
use crate::mapping::CalibrationRange;
use crate::piano::{is_black_key, PianoSize, PianoSpec};

/// Width of a white key, including the part hidden under black keys.
pub const WHITE_KEY_WIDTH_MM: f64 = 23.5;
/// Width of a black key.
pub const BLACK_KEY_WIDTH_MM: f64 = 13.7;
/// Gap between two neighbouring white keys.
pub const KEY_GAP_MM: f64 = 1.0;
/// Cut taken from a white key on the side facing the black key above it.
pub const BLACK_KEY_NEAR_CUT_MM: f64 = 2.2;
/// Cut taken from a white key on the side facing the black key below it.
///
/// The inter-key gap is reserved for the black key, so this is the black key
/// width minus the near cut minus the gap (10.5mm), not `width - near_cut`.
pub const BLACK_KEY_FAR_CUT_MM: f64 = BLACK_KEY_WIDTH_MM - BLACK_KEY_NEAR_CUT_MM - KEY_GAP_MM;

/// Exposed (visible, playable) extent of one key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyGeometry {
    pub midi_note: u8,
    pub is_black: bool,
    pub exposed_start_mm: f64,
    pub exposed_end_mm: f64,
}

impl KeyGeometry {
    #[must_use]
    pub fn width_mm(&self) -> f64 {
        self.exposed_end_mm - self.exposed_start_mm
    }

    #[must_use]
    pub fn center_mm(&self) -> f64 {
        (self.exposed_start_mm + self.exposed_end_mm) / 2.0
    }

    /// Whether `position_mm` lies on this key's exposed surface (edges included).
    #[must_use]
    pub fn contains(&self, position_mm: f64) -> bool {
        (self.exposed_start_mm..=self.exposed_end_mm).contains(&position_mm)
    }

    /// Distance from `position_mm` to the nearest exposed edge, 0 when inside.
    #[must_use]
    pub fn distance_mm(&self, position_mm: f64) -> f64 {
        if position_mm < self.exposed_start_mm {
            self.exposed_start_mm - position_mm
        } else if position_mm > self.exposed_end_mm {
            position_mm - self.exposed_end_mm
        } else {
            0.0
        }
    }
}

/// Geometry of every key on a keyboard, in ascending MIDI order.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyboardGeometry {
    pub piano_size: PianoSize,
    pub spec: PianoSpec,
    keys: Vec<KeyGeometry>,
}

impl KeyboardGeometry {
    #[must_use]
    pub fn keys(&self) -> &[KeyGeometry] {
        &self.keys
    }

    #[must_use]
    pub fn key(&self, midi_note: u8) -> Option<&KeyGeometry> {
        self.spec.key_index(midi_note).map(|i| &self.keys[i])
    }

    /// Distance from the lowest key's exposed start to the highest key's exposed end.
    #[must_use]
    pub fn span_mm(&self) -> f64 {
        match (self.keys.first(), self.keys.last()) {
            (Some(first), Some(last)) => last.exposed_end_mm - first.exposed_start_mm,
            _ => 0.0,
        }
    }

    /// Physical width of the keyboard: all white keys plus the gaps between them.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn physical_width_mm(&self) -> f64 {
        let whites = self.spec.white_key_count as f64;
        whites * WHITE_KEY_WIDTH_MM + (whites - 1.0).max(0.0) * KEY_GAP_MM
    }
}

/// Build the exposed-surface geometry for every key of `piano_size`.
///
/// White keys are laid out sequentially at a fixed pitch. Each black key is
/// placed one gap after the exposed end of the white key below it, and the
/// white keys flanking it are cut so that no two exposed regions overlap.
/// The lowest and highest keys are never cut on their outward side.
#[must_use]
pub fn build_key_geometry(piano_size: PianoSize) -> KeyboardGeometry {
    let spec = piano_size.spec();
    let mut keys: Vec<KeyGeometry> = Vec::with_capacity(spec.key_count);
    let mut white_physical_end: Option<f64> = None;
    let mut white_exposed_end: Option<f64> = None;

    for midi_note in spec.notes() {
        let has_prev = midi_note > spec.midi_start;
        let has_next = midi_note < spec.midi_end;
        let prev_is_black = has_prev && is_black_key(midi_note - 1);
        let next_is_black = has_next && is_black_key(midi_note + 1);

        let key = if is_black_key(midi_note) {
            let start = white_exposed_end.map_or(0.0, |end| end + KEY_GAP_MM);
            KeyGeometry {
                midi_note,
                is_black: true,
                exposed_start_mm: start,
                exposed_end_mm: start + BLACK_KEY_WIDTH_MM,
            }
        } else {
            let physical_start = white_physical_end.map_or(0.0, |end| end + KEY_GAP_MM);
            let physical_end = physical_start + WHITE_KEY_WIDTH_MM;

            let mut exposed_start = physical_start;
            if prev_is_black {
                exposed_start += BLACK_KEY_FAR_CUT_MM;
            }
            // A black key ends gap + width - near cut past this key's physical
            // start (11.5mm), beyond the far cut, so this clip always decides
            // where a white key after a black key starts
            if let Some(prev) = keys.last() {
                exposed_start = exposed_start.max(prev.exposed_end_mm);
            }
            let exposed_end = if next_is_black {
                physical_end - BLACK_KEY_NEAR_CUT_MM
            } else {
                physical_end
            };

            white_physical_end = Some(physical_end);
            white_exposed_end = Some(exposed_end);
            KeyGeometry {
                midi_note,
                is_black: false,
                exposed_start_mm: exposed_start,
                exposed_end_mm: exposed_end,
            }
        };
        keys.push(key);
    }

    debug!(
        "Built {piano_size} geometry: {} keys, exposed span {:.1}mm",
        keys.len(),
        keys.last().map_or(0.0, |k| k.exposed_end_mm)
    );

    KeyboardGeometry {
        piano_size,
        spec,
        keys,
    }
}

/// LED strip density.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedStripSpec {
    pub leds_per_meter: u32,
    /// Centre-to-centre distance between neighbouring LEDs.
    pub led_spacing_mm: f64,
}

impl LedStripSpec {
    /// # Errors
    /// Returns [`ConfigError::InvalidLedDensity`] when `leds_per_meter` is zero.
    pub fn new(leds_per_meter: u32) -> Result<Self, ConfigError> {
        if leds_per_meter == 0 {
            return Err(ConfigError::InvalidLedDensity { leds_per_meter });
        }
        Ok(Self {
            leds_per_meter,
            led_spacing_mm: 1000.0 / f64::from(leds_per_meter),
        })
    }

    /// Physical length covered by `led_count` LEDs.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn length_mm(&self, led_count: usize) -> f64 {
        led_count as f64 * self.led_spacing_mm
    }
}

/// Centre position of one LED along the keybed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedPlacement {
    pub led_index: usize,
    pub center_position_mm: f64,
}

/// Place every LED of the calibrated range along the keybed.
///
/// LED `start_led` sits at 0mm; each following LED is one (scaled) spacing further.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn led_placements(
    strip: &LedStripSpec,
    range: CalibrationRange,
    pitch_scale_factor: f64,
) -> Vec<LedPlacement> {
    let pitch = strip.led_spacing_mm * pitch_scale_factor;
    range
        .indices()
        .map(|led_index| LedPlacement {
            led_index,
            center_position_mm: (led_index - range.start_led) as f64 * pitch,
        })
        .collect()
}

/// Scale factor that stretches the calibrated LED span onto the keyboard span.
///
/// With a single LED there is no span to match, so the factor is 1.0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn auto_pitch_scale(
    geometry: &KeyboardGeometry,
    strip: &LedStripSpec,
    range: CalibrationRange,
) -> f64 {
    let intervals = range.len().saturating_sub(1);
    if intervals == 0 {
        return 1.0;
    }
    let strip_span = intervals as f64 * strip.led_spacing_mm;
    let piano_span = geometry.span_mm();
    if piano_span <= 0.0 {
        return 1.0;
    }
    piano_span / strip_span
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_far_cut_reserves_gap() {
        assert!((BLACK_KEY_FAR_CUT_MM - 10.5).abs() < EPS);
    }

    #[test]
    fn test_keys_are_ordered_and_disjoint() {
        for size in PianoSize::ALL {
            let geometry = build_key_geometry(size);
            assert_eq!(geometry.keys().len(), size.spec().key_count);
            for pair in geometry.keys().windows(2) {
                let (a, b) = (pair[0], pair[1]);
                assert_eq!(a.midi_note + 1, b.midi_note);
                assert!(a.width_mm() > 0.0, "{size}: key {} has no width", a.midi_note);
                assert!(
                    a.exposed_end_mm <= b.exposed_start_mm + EPS,
                    "{size}: keys {} and {} overlap",
                    a.midi_note,
                    b.midi_note
                );
            }
        }
    }

    #[test]
    fn test_black_key_placement() {
        let geometry = build_key_geometry(PianoSize::Keys88);
        // A0 (21) is white, A#0 (22) is black
        let a0 = geometry.key(21).unwrap();
        let a_sharp0 = geometry.key(22).unwrap();
        assert!(!a0.is_black);
        assert!(a_sharp0.is_black);
        // Lowest key is not cut on its outward side, only under A#0
        assert!(a0.exposed_start_mm.abs() < EPS);
        assert!((a0.exposed_end_mm - (WHITE_KEY_WIDTH_MM - BLACK_KEY_NEAR_CUT_MM)).abs() < EPS);
        assert!((a_sharp0.exposed_start_mm - (a0.exposed_end_mm + KEY_GAP_MM)).abs() < EPS);
        assert!((a_sharp0.width_mm() - BLACK_KEY_WIDTH_MM).abs() < EPS);
        // Black keys are narrower than a full white key's pitch
        assert!(a_sharp0.width_mm() < WHITE_KEY_WIDTH_MM);

        // B0 (23) starts where A#0 ends, past its physical start plus the far cut
        let b0 = geometry.key(23).unwrap();
        let b0_physical_start = WHITE_KEY_WIDTH_MM + KEY_GAP_MM;
        assert!((b0.exposed_start_mm - a_sharp0.exposed_end_mm).abs() < EPS);
        assert!((b0.exposed_start_mm - 36.0).abs() < EPS);
        assert!(b0.exposed_start_mm > b0_physical_start + BLACK_KEY_FAR_CUT_MM);
    }

    #[test]
    fn test_white_pair_without_black_key_keeps_gap() {
        let geometry = build_key_geometry(PianoSize::Keys88);
        // E4 (64) and F4 (65) have no black key between them
        let e4 = geometry.key(64).unwrap();
        let f4 = geometry.key(65).unwrap();
        assert!((f4.exposed_start_mm - e4.exposed_end_mm - KEY_GAP_MM).abs() < EPS);
    }

    #[test]
    fn test_highest_key_not_cut() {
        let geometry = build_key_geometry(PianoSize::Keys88);
        let c8 = geometry.key(108).unwrap();
        // C8 follows B7 (white) so it keeps its full width
        assert!((c8.width_mm() - WHITE_KEY_WIDTH_MM).abs() < EPS);
        assert!((geometry.span_mm() - geometry.physical_width_mm()).abs() < EPS);
    }

    #[test]
    fn test_physical_width() {
        let geometry = build_key_geometry(PianoSize::Keys88);
        assert!((geometry.physical_width_mm() - (52.0 * 23.5 + 51.0)).abs() < EPS);
    }

    #[test]
    fn test_distance_to_key() {
        let key = KeyGeometry {
            midi_note: 60,
            is_black: false,
            exposed_start_mm: 10.0,
            exposed_end_mm: 20.0,
        };
        assert!(key.distance_mm(15.0).abs() < EPS);
        assert!((key.distance_mm(8.5) - 1.5).abs() < EPS);
        assert!((key.distance_mm(23.0) - 3.0).abs() < EPS);
        assert!(key.contains(10.0));
        assert!(key.contains(20.0));
    }

    #[test]
    fn test_strip_spacing() {
        let strip = LedStripSpec::new(60).unwrap();
        assert!((strip.led_spacing_mm - 1000.0 / 60.0).abs() < EPS);
        assert!(LedStripSpec::new(0).is_err());
    }

    #[test]
    fn test_placements_start_at_zero() {
        let strip = LedStripSpec::new(100).unwrap();
        let range = CalibrationRange::new(10, 14).unwrap();
        let placements = led_placements(&strip, range, 1.0);
        let positions: Vec<f64> = placements.iter().map(|p| p.center_position_mm).collect();
        assert_eq!(placements[0].led_index, 10);
        assert_eq!(placements[4].led_index, 14);
        for (i, pos) in positions.iter().enumerate() {
            assert!((pos - 10.0 * i as f64).abs() < EPS);
        }
    }

    #[test]
    fn test_auto_pitch_scale_fits_span() {
        let geometry = build_key_geometry(PianoSize::Keys88);
        let strip = LedStripSpec::new(60).unwrap();
        let range = CalibrationRange::new(0, 119).unwrap();
        let scale = auto_pitch_scale(&geometry, &strip, range);
        let placements = led_placements(&strip, range, scale);
        let last = placements.last().unwrap().center_position_mm;
        assert!((last - geometry.span_mm()).abs() < 1e-6);

        let single = CalibrationRange::new(5, 5).unwrap();
        assert!((auto_pitch_scale(&geometry, &strip, single) - 1.0).abs() < EPS);
    }
}

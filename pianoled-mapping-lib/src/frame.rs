//! Per-LED frame buffers for the real-time layer.

use rgb::RGB8;

use crate::engine::MappingSnapshot;

/// One color per LED of the strip, with every LED of the held `notes` set to `color`.
///
/// The frame always has `total_led_count` entries. Notes without LEDs (not on
/// the keyboard, or trimmed to nothing) are ignored.
#[must_use]
pub fn render_key_frame(
    snapshot: &MappingSnapshot,
    notes: impl IntoIterator<Item = u8>,
    color: RGB8,
) -> Vec<RGB8> {
    let mut leds = vec![RGB8::default(); snapshot.total_led_count()];
    for index in snapshot.mapping.leds_for_notes(notes) {
        if let Some(led) = leds.get_mut(index) {
            *led = color;
        }
    }
    leds
}

/// Like [`render_key_frame`] with a color per note.
///
/// Shared LEDs (overlapping modes) take the color of the note listed last.
#[must_use]
pub fn render_colored_frame(snapshot: &MappingSnapshot, notes: &[(u8, RGB8)]) -> Vec<RGB8> {
    let mut leds = vec![RGB8::default(); snapshot.total_led_count()];
    for &(note, color) in notes {
        for &index in snapshot.leds_for_note(note) {
            if let Some(led) = leds.get_mut(index) {
                *led = color;
            }
        }
    }
    leds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MappingConfig;

    const RED: RGB8 = RGB8 { r: 255, g: 0, b: 0 };
    const BLUE: RGB8 = RGB8 { r: 0, g: 0, b: 255 };

    fn snapshot() -> MappingSnapshot {
        let mut config = MappingConfig::default();
        config.total_led_count = 130;
        config.calibration.start_led = 5;
        config.calibration.end_led = 124;
        MappingSnapshot::compute(config).unwrap()
    }

    #[test]
    fn test_frame_covers_whole_strip() {
        let snapshot = snapshot();
        let frame = render_key_frame(&snapshot, [], RED);
        assert_eq!(frame.len(), 130);
        assert!(frame.iter().all(|&led| led == RGB8::default()));
    }

    #[test]
    fn test_held_notes_lit() {
        let snapshot = snapshot();
        // A0 gets LEDs 5 and 6, C8 gets LED 124; 0 is not a key
        let frame = render_key_frame(&snapshot, [21, 108, 0], RED);
        let lit: Vec<usize> = (0..frame.len()).filter(|&i| frame[i] == RED).collect();
        assert_eq!(lit, vec![5, 6, 124]);
    }

    #[test]
    fn test_colored_frame() {
        let snapshot = snapshot();
        let frame = render_colored_frame(&snapshot, &[(21, RED), (22, BLUE)]);
        assert_eq!(frame[5], RED);
        assert_eq!(frame[6], RED);
        assert_eq!(frame[7], BLUE);
        assert_eq!(frame[9], RGB8::default());
    }
}

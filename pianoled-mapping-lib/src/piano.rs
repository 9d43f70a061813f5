//! Static piano model: supported keyboard sizes and MIDI note helpers.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Pitch classes (0 = C) that sit on black keys.
const BLACK_PITCH_CLASSES: [u8; 5] = [1, 3, 6, 8, 10];

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Supported keyboard sizes.
///
/// Persisted as the plain key count (`88`, `61`, ...). Any other count is
/// rejected when the configuration is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum PianoSize {
    Keys25,
    Keys37,
    Keys49,
    Keys61,
    Keys76,
    #[default]
    Keys88,
}

/// Immutable description of a keyboard size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PianoSpec {
    pub key_count: usize,
    pub midi_start: u8,
    pub midi_end: u8,
    pub white_key_count: usize,
}

impl PianoSize {
    pub const ALL: [Self; 6] = [
        Self::Keys25,
        Self::Keys37,
        Self::Keys49,
        Self::Keys61,
        Self::Keys76,
        Self::Keys88,
    ];

    /// Look up the keyboard size for a key count.
    ///
    /// # Errors
    /// Returns [`ConfigError::UnknownPianoSize`] for anything but 25, 37, 49,
    /// 61, 76 or 88 keys.
    pub fn from_key_count(keys: u16) -> Result<Self, ConfigError> {
        match keys {
            25 => Ok(Self::Keys25),
            37 => Ok(Self::Keys37),
            49 => Ok(Self::Keys49),
            61 => Ok(Self::Keys61),
            76 => Ok(Self::Keys76),
            88 => Ok(Self::Keys88),
            other => Err(ConfigError::UnknownPianoSize { keys: other }),
        }
    }

    #[must_use]
    pub const fn spec(self) -> PianoSpec {
        let (key_count, midi_start, midi_end, white_key_count) = match self {
            Self::Keys25 => (25, 48, 72, 15),
            Self::Keys37 => (37, 48, 84, 22),
            Self::Keys49 => (49, 36, 84, 29),
            Self::Keys61 => (61, 36, 96, 36),
            Self::Keys76 => (76, 28, 103, 45),
            Self::Keys88 => (88, 21, 108, 52),
        };
        PianoSpec {
            key_count,
            midi_start,
            midi_end,
            white_key_count,
        }
    }

    #[must_use]
    pub const fn key_count(self) -> u16 {
        // key_count is at most 88
        #[allow(clippy::cast_possible_truncation)]
        let keys = self.spec().key_count as u16;
        keys
    }
}

impl TryFrom<u16> for PianoSize {
    type Error = ConfigError;

    fn try_from(keys: u16) -> Result<Self, Self::Error> {
        Self::from_key_count(keys)
    }
}

impl From<PianoSize> for u16 {
    fn from(size: PianoSize) -> Self {
        size.key_count()
    }
}

impl std::fmt::Display for PianoSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-key", self.key_count())
    }
}

impl PianoSpec {
    /// Iterate the MIDI notes of this keyboard in ascending order.
    pub fn notes(&self) -> impl Iterator<Item = u8> {
        self.midi_start..=self.midi_end
    }

    /// Zero-based key index for a MIDI note, or `None` if the note is not on
    /// this keyboard.
    #[must_use]
    pub fn key_index(&self, midi_note: u8) -> Option<usize> {
        let index = usize::from(midi_note.checked_sub(self.midi_start)?);
        (index < self.key_count).then_some(index)
    }

    #[must_use]
    pub fn contains(&self, midi_note: u8) -> bool {
        self.key_index(midi_note).is_some()
    }
}

/// Whether a MIDI note falls on a black key.
#[must_use]
pub fn is_black_key(midi_note: u8) -> bool {
    BLACK_PITCH_CLASSES.contains(&(midi_note % 12))
}

/// Scientific pitch name for a MIDI note (`60` → `"C4"`, `21` → `"A0"`).
#[must_use]
pub fn note_name(midi_note: u8) -> String {
    let octave = i32::from(midi_note / 12) - 1;
    format!("{}{octave}", NOTE_NAMES[usize::from(midi_note % 12)])
}

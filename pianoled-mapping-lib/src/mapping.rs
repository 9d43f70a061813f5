//! Key → LED mapping containers and their invariants.

use std::collections::{BTreeMap, BTreeSet};

use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::config::ConfigError;

/// Inline capacity for a key's LED list; dense strips rarely put more than
/// eight LEDs under one key.
pub const MAX_INLINE_LEDS: usize = 8;

/// Ascending, duplicate-free LED indices assigned to one key.
pub type LedList = SmallVec<[usize; MAX_INLINE_LEDS]>;

/// The window of strip LEDs reserved for the keyboard (both ends inclusive).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CalibrationRange {
    pub start_led: usize,
    pub end_led: usize,
}

impl CalibrationRange {
    /// # Errors
    /// Returns [`ConfigError::InvertedRange`] when `start_led > end_led`.
    pub fn new(start_led: usize, end_led: usize) -> Result<Self, ConfigError> {
        if start_led > end_led {
            return Err(ConfigError::InvertedRange { start_led, end_led });
        }
        Ok(Self { start_led, end_led })
    }

    /// Number of LEDs in the range; 0 for an inverted range.
    #[must_use]
    pub const fn len(&self) -> usize {
        (self.end_led + 1).saturating_sub(self.start_led)
    }

    /// Never true for a range built through [`CalibrationRange::new`].
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end_led < self.start_led
    }

    #[must_use]
    pub const fn contains(&self, led_index: usize) -> bool {
        led_index >= self.start_led && led_index <= self.end_led
    }

    pub fn indices(&self) -> std::ops::RangeInclusive<usize> {
        self.start_led..=self.end_led
    }

    /// Shift `led_index` by `offset` LEDs and clamp the result into the range.
    #[must_use]
    pub fn shift_clamped(&self, led_index: usize, offset: i64) -> usize {
        // LED indices comfortably fit in i64; the clamp keeps the result in range
        #[allow(clippy::cast_possible_wrap)]
        let shifted = led_index as i64 + offset;
        #[allow(clippy::cast_possible_wrap)]
        let (lo, hi) = (self.start_led as i64, self.end_led as i64);
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let clamped = shifted.clamp(lo, hi) as usize;
        clamped
    }
}

/// An engine defect: a mapping that must never be published.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum InvariantViolation {
    #[display("LED {led_index} for note {midi_note} is outside {start_led}..={end_led}")]
    OutOfRange {
        midi_note: u8,
        led_index: usize,
        start_led: usize,
        end_led: usize,
    },
    #[display("LED {led_index} appears more than once for note {midi_note}")]
    Duplicate { midi_note: u8, led_index: usize },
    #[display("LEDs for note {midi_note} are not in ascending order")]
    Unsorted { midi_note: u8 },
}

/// MIDI note → LEDs, used both for the base (pre-offset) and final mapping.
///
/// Every note of the configured keyboard has an entry; an empty list is a
/// valid state (e.g. trimmed away or truncated in fixed mode).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedMapping {
    keys: BTreeMap<u8, LedList>,
}

impl LedMapping {
    /// Empty LED lists for every note in `notes`.
    pub fn with_notes(notes: impl IntoIterator<Item = u8>) -> Self {
        Self {
            keys: notes.into_iter().map(|n| (n, LedList::new())).collect(),
        }
    }

    /// LEDs for a note; notes not on the keyboard have no LEDs.
    #[must_use]
    pub fn leds_for_note(&self, midi_note: u8) -> &[usize] {
        self.keys.get(&midi_note).map_or(&[][..], SmallVec::as_slice)
    }

    /// Union of the LEDs for several notes, ascending and duplicate-free.
    pub fn leds_for_notes(&self, notes: impl IntoIterator<Item = u8>) -> Vec<usize> {
        let lit: BTreeSet<usize> = notes
            .into_iter()
            .flat_map(|n| self.leds_for_note(n).iter().copied())
            .collect();
        lit.into_iter().collect()
    }

    /// Iterate `(midi_note, leds)` in ascending note order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &[usize])> {
        self.keys.iter().map(|(&n, leds)| (n, leds.as_slice()))
    }

    pub fn notes(&self) -> impl Iterator<Item = u8> + '_ {
        self.keys.keys().copied()
    }

    #[must_use]
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Replace a note's LEDs. The list is sorted and de-duplicated.
    pub fn set(&mut self, midi_note: u8, mut leds: LedList) {
        leds.sort_unstable();
        leds.dedup();
        self.keys.insert(midi_note, leds);
    }

    /// Add one LED to a note, keeping its list ascending and unique.
    pub fn insert(&mut self, midi_note: u8, led_index: usize) {
        let leds = self.keys.entry(midi_note).or_default();
        if let Err(pos) = leds.binary_search(&led_index) {
            leds.insert(pos, led_index);
        }
    }

    /// Every LED claimed by at least one key.
    #[must_use]
    pub fn claimed(&self) -> BTreeSet<usize> {
        self.keys.values().flatten().copied().collect()
    }

    /// Number of keys claiming each LED.
    #[must_use]
    pub fn claim_counts(&self) -> BTreeMap<usize, usize> {
        let mut counts = BTreeMap::new();
        for &led in self.keys.values().flatten() {
            *counts.entry(led).or_insert(0) += 1;
        }
        counts
    }

    /// Notes whose LED list is empty.
    #[must_use]
    pub fn empty_notes(&self) -> Vec<u8> {
        self.keys
            .iter()
            .filter(|(_, leds)| leds.is_empty())
            .map(|(&n, _)| n)
            .collect()
    }

    /// Number of distinct LEDs in use.
    #[must_use]
    pub fn used_led_count(&self) -> usize {
        self.claimed().len()
    }

    /// Check that every list is ascending, duplicate-free and inside `range`.
    ///
    /// # Errors
    /// Returns the first [`InvariantViolation`] found, in note order.
    pub fn check_invariants(&self, range: CalibrationRange) -> Result<(), InvariantViolation> {
        for (&midi_note, leds) in &self.keys {
            for pair in leds.windows(2) {
                if pair[0] == pair[1] {
                    return Err(InvariantViolation::Duplicate {
                        midi_note,
                        led_index: pair[0],
                    });
                }
                if pair[0] > pair[1] {
                    return Err(InvariantViolation::Unsorted { midi_note });
                }
            }
            if let Some(&led_index) = leds.iter().find(|&&led| !range.contains(led)) {
                return Err(InvariantViolation::OutOfRange {
                    midi_note,
                    led_index,
                    start_led: range.start_led,
                    end_led: range.end_led,
                });
            }
        }
        Ok(())
    }
}

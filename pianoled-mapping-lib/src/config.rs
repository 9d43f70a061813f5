//! Persisted mapping configuration and its boundary validation.
//!
//! A [`MappingConfig`] is the complete, immutable input to the engine. It is
//! validated as a whole before anything is allocated; a configuration with
//! any error is rejected without partial application.

use std::collections::BTreeMap;

use derive_more::{Display, Error};
use log::{debug, LevelFilter};
use serde::{Deserialize, Serialize};

use crate::allocation::{DistributionMode, PhysicsParams};
use crate::mapping::CalibrationRange;
use crate::offsets::{OffsetConfig, MAX_JOINT_OFFSET_MM, MAX_KEY_OFFSET};
use crate::piano::{note_name, PianoSize, PianoSpec};
use crate::quality::QualityThresholds;

/// Configurable log level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    #[must_use]
    pub const fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::Off,
            Self::Error => LevelFilter::Error,
            Self::Warn => LevelFilter::Warn,
            Self::Info => LevelFilter::Info,
            Self::Debug => LevelFilter::Debug,
        }
    }
}

/// A single reason a configuration cannot be accepted.
#[derive(Debug, Clone, PartialEq, Display, Error)]
pub enum ConfigError {
    #[display("unknown piano size: {keys} keys (expected 25, 37, 49, 61, 76 or 88)")]
    UnknownPianoSize { keys: u16 },
    #[display("LED density must be at least 1 LED per meter (got {leds_per_meter})")]
    InvalidLedDensity { leds_per_meter: u32 },
    #[display("calibration range start {start_led} is after end {end_led}")]
    InvertedRange { start_led: usize, end_led: usize },
    #[display("calibration range end {end_led} does not fit a strip of {total_led_count} LEDs")]
    RangeExceedsStrip { end_led: usize, total_led_count: usize },
    #[display("fixed distribution needs at least 1 LED per key")]
    ZeroLedsPerKey,
    #[display(
        "fixed distribution of {leds_per_key} LEDs per key drops {dropped} of {key_count} keys (at most {max_fraction} allowed)"
    )]
    TooManyKeysDropped {
        leds_per_key: usize,
        dropped: usize,
        key_count: usize,
        max_fraction: f64,
    },
    #[display("key offset {offset} for note {midi_note} is outside -{MAX_KEY_OFFSET}..={MAX_KEY_OFFSET}")]
    KeyOffsetOutOfRange { midi_note: u8, offset: i32 },
    #[display("joint offset {offset_mm}mm for note {midi_note} is outside -{MAX_JOINT_OFFSET_MM}..={MAX_JOINT_OFFSET_MM}mm")]
    JointOffsetOutOfRange { midi_note: u8, offset_mm: f64 },
    #[display("{map} entry for note {midi_note} is not on the {piano_size} keyboard ({first}..={last})")]
    NoteNotOnKeyboard {
        map: &'static str,
        midi_note: u8,
        piano_size: PianoSize,
        first: u8,
        last: u8,
    },
    #[display(
        "{map} entry {midi_note} looks like a zero-based key index; per-key maps must be keyed by MIDI note (the {piano_size} keyboard starts at {first})"
    )]
    KeyIndexNotMidiNote {
        map: &'static str,
        midi_note: u8,
        piano_size: PianoSize,
        first: u8,
    },
    #[display("overhang threshold must be a finite, non-negative distance (got {threshold_mm}mm)")]
    InvalidOverhang { threshold_mm: f64 },
    #[display("maximum dropped key fraction must be within 0..=1 (got {fraction})")]
    InvalidDropFraction { fraction: f64 },
    #[display("quality thresholds are inconsistent: {reason}")]
    InvalidQualityThresholds { reason: &'static str },
}

/// Every error found in a rejected configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct ValidationErrors {
    errors: Vec<ConfigError>,
}

impl ValidationErrors {
    #[must_use]
    pub fn errors(&self) -> &[ConfigError] {
        &self.errors
    }
}

impl From<ConfigError> for ValidationErrors {
    fn from(e: ConfigError) -> Self {
        Self { errors: vec![e] }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

/// Outcome of validating a proposed configuration without committing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Limits the validator enforces beyond plain numeric ranges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationLimits {
    /// Largest share of keys fixed distribution may leave without LEDs.
    #[serde(default = "default_max_dropped_key_fraction")]
    pub max_dropped_key_fraction: f64,
}

const fn default_max_dropped_key_fraction() -> f64 {
    0.1
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_dropped_key_fraction: default_max_dropped_key_fraction(),
        }
    }
}

/// Complete engine input, as persisted by the configuration store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingConfig {
    #[serde(default)]
    pub piano_size: PianoSize,
    #[serde(default = "default_leds_per_meter")]
    pub leds_per_meter: u32,
    /// Number of LEDs physically present on the strip
    #[serde(default = "default_total_led_count")]
    pub total_led_count: usize,
    /// LEDs reserved for the keyboard
    #[serde(default = "default_calibration")]
    pub calibration: CalibrationRange,
    #[serde(default)]
    pub distribution_mode: DistributionMode,
    #[serde(default)]
    pub offsets: OffsetConfig,
    #[serde(default)]
    pub physics: PhysicsParams,
    #[serde(default)]
    pub quality: QualityThresholds,
    #[serde(default)]
    pub limits: ValidationLimits,
    #[serde(default)]
    pub log_level: LogLevel,
}

const fn default_leds_per_meter() -> u32 {
    60
}

const fn default_total_led_count() -> usize {
    120
}

const fn default_calibration() -> CalibrationRange {
    CalibrationRange {
        start_led: 0,
        end_led: default_total_led_count() - 1,
    }
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            piano_size: PianoSize::default(),
            leds_per_meter: default_leds_per_meter(),
            total_led_count: default_total_led_count(),
            calibration: default_calibration(),
            distribution_mode: DistributionMode::default(),
            offsets: OffsetConfig::default(),
            physics: PhysicsParams::default(),
            quality: QualityThresholds::default(),
            limits: ValidationLimits::default(),
            log_level: LogLevel::default(),
        }
    }
}

impl MappingConfig {
    /// Default configuration for a keyboard and strip, calibrated over the whole strip.
    #[must_use]
    pub fn for_strip(piano_size: PianoSize, leds_per_meter: u32, total_led_count: usize) -> Self {
        Self {
            piano_size,
            leds_per_meter,
            total_led_count,
            calibration: CalibrationRange {
                start_led: 0,
                end_led: total_led_count.saturating_sub(1),
            },
            ..Self::default()
        }
    }

    /// Collect every configuration error.
    ///
    /// # Errors
    /// Returns all problems found; the configuration must not reach the engine.
    pub fn check(&self) -> Result<(), ValidationErrors> {
        let mut errors = Vec::new();
        let spec = self.piano_size.spec();

        if self.leds_per_meter == 0 {
            errors.push(ConfigError::InvalidLedDensity {
                leds_per_meter: self.leds_per_meter,
            });
        }

        let range = self.calibration;
        if range.start_led > range.end_led {
            errors.push(ConfigError::InvertedRange {
                start_led: range.start_led,
                end_led: range.end_led,
            });
        } else if range.end_led >= self.total_led_count {
            errors.push(ConfigError::RangeExceedsStrip {
                end_led: range.end_led,
                total_led_count: self.total_led_count,
            });
        }

        if let DistributionMode::FixedPerKey { leds_per_key } = self.distribution_mode {
            self.check_fixed_mode(leds_per_key, &spec, &mut errors);
        }

        self.check_offsets(&spec, &mut errors);
        self.check_tuning(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            debug!("Configuration rejected with {} error(s)", errors.len());
            Err(ValidationErrors { errors })
        }
    }

    fn check_fixed_mode(&self, leds_per_key: usize, spec: &PianoSpec, errors: &mut Vec<ConfigError>) {
        if leds_per_key == 0 {
            errors.push(ConfigError::ZeroLedsPerKey);
            return;
        }
        let range = self.calibration;
        if range.start_led > range.end_led {
            return;
        }
        let mappable = range.len() / leds_per_key;
        let dropped = spec.key_count.saturating_sub(mappable);
        let max_fraction = self.limits.max_dropped_key_fraction;
        #[allow(clippy::cast_precision_loss)]
        let fraction = dropped as f64 / spec.key_count as f64;
        if fraction > max_fraction {
            errors.push(ConfigError::TooManyKeysDropped {
                leds_per_key,
                dropped,
                key_count: spec.key_count,
                max_fraction,
            });
        }
    }

    fn check_offsets(&self, spec: &PianoSpec, errors: &mut Vec<ConfigError>) {
        let offsets = &self.offsets;
        for (&midi_note, &offset) in &offsets.key_offsets {
            self.check_note("key_offsets", midi_note, spec, errors);
            if offset.abs() > MAX_KEY_OFFSET {
                errors.push(ConfigError::KeyOffsetOutOfRange { midi_note, offset });
            }
        }
        for (&midi_note, &offset_mm) in &offsets.key_joint_offsets {
            self.check_note("key_joint_offsets", midi_note, spec, errors);
            if !offset_mm.is_finite() || offset_mm.abs() > MAX_JOINT_OFFSET_MM {
                errors.push(ConfigError::JointOffsetOutOfRange {
                    midi_note,
                    offset_mm,
                });
            }
        }
        for &midi_note in offsets.key_led_trims.keys() {
            self.check_note("key_led_trims", midi_note, spec, errors);
        }
    }

    /// Per-key maps are keyed by MIDI note; a key that would only make sense as
    /// a zero-based index is rejected rather than reinterpreted.
    fn check_note(&self, map: &'static str, midi_note: u8, spec: &PianoSpec, errors: &mut Vec<ConfigError>) {
        if spec.contains(midi_note) {
            return;
        }
        if midi_note < spec.midi_start && usize::from(midi_note) < spec.key_count {
            errors.push(ConfigError::KeyIndexNotMidiNote {
                map,
                midi_note,
                piano_size: self.piano_size,
                first: spec.midi_start,
            });
        } else {
            errors.push(ConfigError::NoteNotOnKeyboard {
                map,
                midi_note,
                piano_size: self.piano_size,
                first: spec.midi_start,
                last: spec.midi_end,
            });
        }
    }

    fn check_tuning(&self, errors: &mut Vec<ConfigError>) {
        let threshold_mm = self.physics.overhang_threshold_mm;
        if !threshold_mm.is_finite() || threshold_mm < 0.0 {
            errors.push(ConfigError::InvalidOverhang { threshold_mm });
        }
        let fraction = self.limits.max_dropped_key_fraction;
        if !(0.0..=1.0).contains(&fraction) {
            errors.push(ConfigError::InvalidDropFraction { fraction });
        }
        if let Err(reason) = self.quality.check() {
            errors.push(ConfigError::InvalidQualityThresholds { reason });
        }
    }
}

/// Validate a proposed configuration without committing it.
///
/// Advisory only: nothing is mutated, allocated, or persisted.
#[must_use]
pub fn validate(proposed: &MappingConfig) -> ValidationReport {
    match proposed.check() {
        Ok(()) => ValidationReport {
            valid: true,
            errors: Vec::new(),
        },
        Err(e) => ValidationReport {
            valid: false,
            errors: e.errors.iter().map(ToString::to_string).collect(),
        },
    }
}

/// Human-readable summary of which notes a sparse per-key map touches.
#[must_use]
pub fn describe_notes<V>(map: &BTreeMap<u8, V>) -> String {
    map.keys().map(|&n| note_name(n)).collect::<Vec<_>>().join(", ")
}

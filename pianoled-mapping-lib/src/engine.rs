//! Pipeline from a validated configuration to a published mapping snapshot.
//!
//! `config → geometry → allocation (+ rescue) → base mapping → offsets/trims
//! → final mapping → invariant check → quality report`.
//!
//! The base mapping only depends on a subset of the configuration
//! ([`BaseKey`]), so callers holding a previous snapshot can skip allocation
//! when only offsets or trims changed.

use std::sync::Arc;

use derive_more::{Display, Error, From};
use log::{debug, error};

use crate::allocation::{allocate, DistributionMode, PhysicsParams};
use crate::config::{MappingConfig, ValidationErrors};
use crate::geometry::{build_key_geometry, LedStripSpec};
use crate::mapping::{CalibrationRange, InvariantViolation, LedMapping};
use crate::offsets::apply_offsets;
use crate::piano::PianoSize;
use crate::quality::{score, MappingStats, QualityReport};

#[derive(Debug, Display, Error, From)]
pub enum MappingError {
    #[display("invalid configuration: {_0}")]
    Config(ValidationErrors),
    #[display("mapping invariant violated: {_0}")]
    Invariant(InvariantViolation),
}

/// The configuration fields a base mapping depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaseKey {
    pub piano_size: PianoSize,
    pub leds_per_meter: u32,
    pub calibration: CalibrationRange,
    pub distribution_mode: DistributionMode,
    pub physics: PhysicsParams,
}

impl BaseKey {
    #[must_use]
    pub fn of(config: &MappingConfig) -> Self {
        Self {
            piano_size: config.piano_size,
            leds_per_meter: config.leds_per_meter,
            calibration: config.calibration,
            distribution_mode: config.distribution_mode,
            physics: config.physics,
        }
    }
}

/// Allocation output before any offsets or trims.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseMapping {
    pub key: BaseKey,
    pub mapping: LedMapping,
    pub pitch_scale_factor: f64,
    pub rescued: usize,
}

/// Run allocation for an already validated configuration.
///
/// # Errors
/// Fails if the LED density is invalid.
pub fn compute_base(config: &MappingConfig) -> Result<BaseMapping, MappingError> {
    let key = BaseKey::of(config);
    let geometry = build_key_geometry(key.piano_size);
    let strip = LedStripSpec::new(key.leds_per_meter).map_err(ValidationErrors::from)?;
    let allocation = allocate(&geometry, &strip, key.calibration, key.distribution_mode, key.physics);
    Ok(BaseMapping {
        key,
        mapping: allocation.mapping,
        pitch_scale_factor: allocation.pitch_scale_factor,
        rescued: allocation.rescued,
    })
}

/// Immutable result of one recomputation, shared with readers via `Arc`.
#[derive(Debug, Clone)]
pub struct MappingSnapshot {
    pub config: MappingConfig,
    pub base: Arc<BaseMapping>,
    /// Base mapping after offsets and trims
    pub mapping: LedMapping,
    pub quality: QualityReport,
}

impl MappingSnapshot {
    /// Validate `config` and compute its mapping from scratch.
    ///
    /// # Errors
    /// Returns every configuration error, or the invariant the result broke.
    pub fn compute(config: MappingConfig) -> Result<Self, MappingError> {
        Self::compute_reusing(config, None)
    }

    /// Like [`compute`](Self::compute), but reuses `cached` when its base key
    /// matches the new configuration.
    ///
    /// # Errors
    /// Returns every configuration error, or the invariant the result broke.
    pub fn compute_reusing(config: MappingConfig, cached: Option<&Arc<BaseMapping>>) -> Result<Self, MappingError> {
        config.check()?;
        let key = BaseKey::of(&config);
        let base = match cached {
            Some(base) if base.key == key => {
                debug!("Reusing base mapping");
                Arc::clone(base)
            }
            _ => Arc::new(compute_base(&config)?),
        };

        let geometry = build_key_geometry(config.piano_size);
        let strip = LedStripSpec::new(config.leds_per_meter).map_err(ValidationErrors::from)?;
        let mapping = apply_offsets(&base.mapping, &config.offsets, config.calibration, strip.led_spacing_mm);

        if let Err(violation) = mapping.check_invariants(config.calibration) {
            error!("Mapping rejected: {violation}");
            return Err(violation.into());
        }

        let stats = MappingStats::collect(
            &geometry,
            &strip,
            config.calibration,
            config.distribution_mode,
            &mapping,
        );
        let quality = score(&stats, &config.quality);
        debug!(
            "Mapping computed: {} LEDs used, quality {} ({})",
            mapping.used_led_count(),
            quality.score,
            quality.level
        );

        Ok(Self {
            config,
            base,
            mapping,
            quality,
        })
    }

    #[must_use]
    pub fn leds_for_note(&self, midi_note: u8) -> &[usize] {
        self.mapping.leds_for_note(midi_note)
    }

    #[must_use]
    pub const fn total_led_count(&self) -> usize {
        self.config.total_led_count
    }

    #[must_use]
    pub fn pitch_scale_factor(&self) -> f64 {
        self.base.pitch_scale_factor
    }
}

/// Quality report for a committed or hypothetical configuration.
///
/// # Errors
/// Fails like [`MappingSnapshot::compute`].
pub fn quality_report(config: &MappingConfig) -> Result<QualityReport, MappingError> {
    MappingSnapshot::compute(config.clone()).map(|snapshot| snapshot.quality)
}

//! Mapping quality score, warnings and recommendations.

use serde::{Deserialize, Serialize};

use crate::allocation::{DistributionMode, FixedAllocator};
use crate::geometry::{KeyboardGeometry, LedStripSpec};
use crate::mapping::{CalibrationRange, LedMapping};
use crate::piano::note_name;

/// Most empty keys listed by name in a warning.
const MAX_LISTED_NOTES: usize = 8;

/// Score bucket boundaries. Empirically tuned defaults, not derived values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityThresholds {
    #[serde(default = "default_min_coverage_ratio")]
    pub min_coverage_ratio: f64,
    #[serde(default = "default_ideal_coverage_ratio")]
    pub ideal_coverage_ratio: f64,
    #[serde(default = "default_max_coverage_ratio")]
    pub max_coverage_ratio: f64,
    #[serde(default = "default_min_leds_per_key")]
    pub min_leds_per_key: f64,
    #[serde(default = "default_ideal_leds_per_key")]
    pub ideal_leds_per_key: f64,
    #[serde(default = "default_max_leds_per_key")]
    pub max_leds_per_key: f64,
    /// Lowest score rated excellent
    #[serde(default = "default_excellent_score")]
    pub excellent_score: u8,
}

const fn default_min_coverage_ratio() -> f64 {
    0.5
}

const fn default_ideal_coverage_ratio() -> f64 {
    1.0
}

const fn default_max_coverage_ratio() -> f64 {
    1.5
}

const fn default_min_leds_per_key() -> f64 {
    1.0
}

const fn default_ideal_leds_per_key() -> f64 {
    2.0
}

const fn default_max_leds_per_key() -> f64 {
    3.0
}

const fn default_excellent_score() -> u8 {
    76
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_coverage_ratio: default_min_coverage_ratio(),
            ideal_coverage_ratio: default_ideal_coverage_ratio(),
            max_coverage_ratio: default_max_coverage_ratio(),
            min_leds_per_key: default_min_leds_per_key(),
            ideal_leds_per_key: default_ideal_leds_per_key(),
            max_leds_per_key: default_max_leds_per_key(),
            excellent_score: default_excellent_score(),
        }
    }
}

impl QualityThresholds {
    /// # Errors
    /// Describes the first inconsistency found.
    pub fn check(&self) -> Result<(), &'static str> {
        let ordered = |lo: f64, ideal: f64, hi: f64| {
            lo.is_finite() && hi.is_finite() && lo >= 0.0 && lo < hi && (lo..=hi).contains(&ideal)
        };
        if !ordered(self.min_coverage_ratio, self.ideal_coverage_ratio, self.max_coverage_ratio) {
            return Err("coverage ratio bounds must satisfy 0 <= min <= ideal <= max, min < max");
        }
        if !ordered(self.min_leds_per_key, self.ideal_leds_per_key, self.max_leds_per_key) {
            return Err("LEDs-per-key bounds must satisfy 0 <= min <= ideal <= max, min < max");
        }
        if !(51..=100).contains(&self.excellent_score) {
            return Err("excellent score must be within 51..=100");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Poor,
    Ok,
    Good,
    Excellent,
}

impl std::fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Poor => "poor",
            Self::Ok => "ok",
            Self::Good => "good",
            Self::Excellent => "excellent",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub score: u8,
    pub level: QualityLevel,
    pub leds_per_key: f64,
    pub coverage_ratio: f64,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Figures the scorer works from, gathered from a final mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingStats {
    pub key_count: usize,
    /// LEDs in the calibration range
    pub usable_led_count: usize,
    pub strip_length_mm: f64,
    pub piano_width_mm: f64,
    /// Notes left without LEDs after offsets and trims
    pub empty_notes: Vec<u8>,
    /// Trailing keys fixed distribution could not reach
    pub truncated_keys: usize,
}

impl MappingStats {
    #[must_use]
    pub fn collect(
        geometry: &KeyboardGeometry,
        strip: &LedStripSpec,
        range: CalibrationRange,
        mode: DistributionMode,
        final_mapping: &LedMapping,
    ) -> Self {
        let key_count = geometry.spec.key_count;
        let usable_led_count = range.len();
        let truncated_keys = match mode {
            DistributionMode::FixedPerKey { leds_per_key } => key_count
                .saturating_sub(FixedAllocator { leds_per_key }.max_mappable_keys(usable_led_count)),
            _ => 0,
        };
        Self {
            key_count,
            usable_led_count,
            strip_length_mm: strip.length_mm(usable_led_count),
            piano_width_mm: geometry.physical_width_mm(),
            empty_notes: final_mapping.empty_notes(),
            truncated_keys,
        }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn leds_per_key(&self) -> f64 {
        if self.key_count == 0 {
            return 0.0;
        }
        self.usable_led_count as f64 / self.key_count as f64
    }

    #[must_use]
    pub fn coverage_ratio(&self) -> f64 {
        if self.piano_width_mm <= 0.0 {
            return 0.0;
        }
        self.strip_length_mm / self.piano_width_mm
    }
}

/// 0 at `ideal`, rising linearly to 1 at either bound.
fn deviation(value: f64, lo: f64, ideal: f64, hi: f64) -> f64 {
    let span = if value >= ideal { hi - ideal } else { ideal - lo };
    if span <= 0.0 {
        return 0.0;
    }
    ((value - ideal).abs() / span).clamp(0.0, 1.0)
}

fn list_notes(notes: &[u8]) -> String {
    let mut names: Vec<String> = notes.iter().take(MAX_LISTED_NOTES).map(|&n| note_name(n)).collect();
    if notes.len() > MAX_LISTED_NOTES {
        names.push(format!("and {} more", notes.len() - MAX_LISTED_NOTES));
    }
    names.join(", ")
}

/// Score a mapping.
///
/// - Undersaturated (coverage or LEDs per key below the minimum): `poor`, 0–25.
/// - Both figures inside their bounds: `good`/`excellent`, 51–100, highest at
///   the ideal values.
/// - Otherwise oversaturated: `ok`, 26–50.
///
/// Keys without LEDs cost up to 50 points but never drop the score out of
/// its bucket. Truncation and empty keys are reported as warnings only.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn score(stats: &MappingStats, thresholds: &QualityThresholds) -> QualityReport {
    let t = thresholds;
    let leds_per_key = stats.leds_per_key();
    let coverage_ratio = stats.coverage_ratio();
    let mut warnings = Vec::new();
    let mut recommendations = Vec::new();

    let undersaturated = coverage_ratio < t.min_coverage_ratio || leds_per_key < t.min_leds_per_key;
    let in_bounds = coverage_ratio <= t.max_coverage_ratio && leds_per_key <= t.max_leds_per_key;

    let (raw, floor) = if undersaturated {
        let closeness = (coverage_ratio / t.min_coverage_ratio)
            .min(leds_per_key / t.min_leds_per_key)
            .clamp(0.0, 1.0);
        warnings.push(format!(
            "Undersaturated: {leds_per_key:.2} LEDs per key, strip covers {:.0}% of the keyboard",
            coverage_ratio * 100.0
        ));
        if leds_per_key < t.min_leds_per_key {
            recommendations.push(
                "Increase LED density or widen the calibration range so every key gets at least one LED"
                    .to_string(),
            );
        }
        if coverage_ratio < t.min_coverage_ratio {
            recommendations.push(
                "The calibrated strip is much shorter than the keyboard; use a longer or denser strip"
                    .to_string(),
            );
        }
        (25.0 * closeness, 0.0)
    } else if in_bounds {
        let coverage_dev = deviation(
            coverage_ratio,
            t.min_coverage_ratio,
            t.ideal_coverage_ratio,
            t.max_coverage_ratio,
        );
        let density_dev = deviation(
            leds_per_key,
            t.min_leds_per_key,
            t.ideal_leds_per_key,
            t.max_leds_per_key,
        );
        (100.0 - 25.0 * coverage_dev - 24.0 * density_dev, 51.0)
    } else {
        let excess = (coverage_ratio / t.max_coverage_ratio).max(leds_per_key / t.max_leds_per_key);
        warnings.push(format!(
            "Oversaturated: {leds_per_key:.2} LEDs per key, strip is {:.0}% of the keyboard width",
            coverage_ratio * 100.0
        ));
        if coverage_ratio > t.max_coverage_ratio {
            recommendations
                .push("Narrow the calibration range to the LEDs that sit under the keyboard".to_string());
        }
        if leds_per_key > t.max_leds_per_key {
            recommendations.push(
                "Use fixed distribution or a lower-density strip to keep keys from blurring together"
                    .to_string(),
            );
        }
        ((50.0 - 12.0 * (excess - 1.0)).max(26.0), 26.0)
    };

    if stats.truncated_keys > 0 {
        warnings.push(format!(
            "Fixed distribution truncated: the highest {} of {} keys have no LEDs",
            stats.truncated_keys, stats.key_count
        ));
        let fitting = stats.usable_led_count / stats.key_count.max(1);
        if fitting >= 1 {
            recommendations.push(format!("Use at most {fitting} LEDs per key so every key is mapped"));
        } else {
            recommendations.push("Switch to proportional distribution".to_string());
        }
    }

    let mut penalty = 0.0;
    if !stats.empty_notes.is_empty() {
        warnings.push(format!(
            "{} key(s) have no LEDs: {}",
            stats.empty_notes.len(),
            list_notes(&stats.empty_notes)
        ));
        if stats.truncated_keys < stats.empty_notes.len() {
            recommendations.push("Reduce trims or check offsets on keys without LEDs".to_string());
        }
        penalty = 50.0 * stats.empty_notes.len() as f64 / stats.key_count.max(1) as f64;
    }

    let score = (raw - penalty).max(floor).round().clamp(0.0, 100.0) as u8;
    let level = if undersaturated {
        QualityLevel::Poor
    } else if !in_bounds {
        QualityLevel::Ok
    } else if score >= t.excellent_score {
        QualityLevel::Excellent
    } else {
        QualityLevel::Good
    };

    QualityReport {
        score,
        level,
        leds_per_key,
        coverage_ratio,
        warnings,
        recommendations,
    }
}

//! Piano key → LED index mapping engine
//!
//! This library turns a keyboard size, an LED strip description and a set of
//! calibration adjustments into the list of strip LEDs that light up for each
//! MIDI note. It is hardware-agnostic: the real-time layer only reads the
//! published [`MappingSnapshot`] (or a frame built from it by
//! [`render_key_frame`]).
//!
//! The pipeline is `config → geometry → allocation → rescue → offsets/trims
//! → invariant check → quality report`; [`CalibrationStore`] owns the
//! persisted configuration and publishes snapshots atomically.

pub mod allocation;
pub mod config;
pub mod engine;
pub mod frame;
pub mod geometry;
pub mod mapping;
pub mod offsets;
pub mod piano;
pub mod quality;
pub mod rescue;
pub mod store;

pub use rgb::RGB8;

pub use allocation::{allocate, Allocation, Allocator, DistributionMode, PhysicsParams};
pub use config::{validate, ConfigError, LogLevel, MappingConfig, ValidationErrors, ValidationReport};
pub use engine::{quality_report, MappingError, MappingSnapshot};
pub use frame::{render_colored_frame, render_key_frame};
pub use geometry::{build_key_geometry, KeyGeometry, KeyboardGeometry, LedStripSpec};
pub use mapping::{CalibrationRange, InvariantViolation, LedList, LedMapping};
pub use offsets::{LedTrim, OffsetConfig};
pub use piano::{note_name, PianoSize};
pub use quality::{QualityLevel, QualityReport, QualityThresholds};
pub use store::{CalibrationStore, ConfigBackend, JsonFileBackend, MemoryBackend, StoreError};

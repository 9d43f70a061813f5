//! Configuration store: the canonical configuration plus its published snapshot.
//!
//! Mutations are serialised behind a writer lock. Each one clones the current
//! configuration, applies the change, validates and recomputes, persists, and
//! only then swaps the new [`MappingSnapshot`] in. Any failure along the way
//! leaves both the backend and the published snapshot untouched. Readers
//! clone the current `Arc` and never see a half-applied update.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use derive_more::{Display, Error, From};
use log::{debug, info, warn};

use crate::allocation::DistributionMode;
use crate::config::MappingConfig;
use crate::engine::{MappingError, MappingSnapshot};
use crate::mapping::CalibrationRange;
use crate::offsets::LedTrim;
use crate::piano::PianoSize;

#[derive(Debug, Display, Error, From)]
pub enum StoreError {
    #[display("{_0}")]
    Mapping(MappingError),
    #[display("I/O error: {_0}")]
    Io(io::Error),
    #[display("invalid configuration JSON: {_0}")]
    Json(serde_json::Error),
}

/// Where a [`CalibrationStore`] persists its configuration.
pub trait ConfigBackend {
    /// `Ok(None)` when nothing has been saved yet.
    ///
    /// # Errors
    /// Fails when stored data exists but cannot be read or parsed.
    fn load(&self) -> Result<Option<MappingConfig>, StoreError>;

    /// # Errors
    /// Fails when the configuration cannot be written.
    fn save(&self, config: &MappingConfig) -> Result<(), StoreError>;
}

/// Pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigBackend for JsonFileBackend {
    fn load(&self) -> Result<Option<MappingConfig>, StoreError> {
        debug!("Loading config from {}", self.path.display());
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let config = serde_json::from_slice(&bytes)?;
        Ok(Some(config))
    }

    fn save(&self, config: &MappingConfig) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(config)?;
        debug!("Config JSON size: {} bytes", json.len());
        // Write next to the target and rename so a crash never leaves a torn file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &self.path)?;
        info!("Config saved to {}", self.path.display());
        Ok(())
    }
}

/// In-process backend, for tests and embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    config: Mutex<Option<MappingConfig>>,
    read_only: bool,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: MappingConfig) -> Self {
        Self {
            config: Mutex::new(Some(config)),
            read_only: false,
        }
    }

    /// A backend whose saves always fail.
    #[must_use]
    pub fn read_only(config: Option<MappingConfig>) -> Self {
        Self {
            config: Mutex::new(config),
            read_only: true,
        }
    }

    /// The last saved configuration.
    pub fn stored(&self) -> Option<MappingConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ConfigBackend for MemoryBackend {
    fn load(&self) -> Result<Option<MappingConfig>, StoreError> {
        Ok(self.stored())
    }

    fn save(&self, config: &MappingConfig) -> Result<(), StoreError> {
        if self.read_only {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "backend is read-only").into());
        }
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = Some(config.clone());
        Ok(())
    }
}

pub struct CalibrationStore<B> {
    backend: B,
    writer: Mutex<()>,
    current: RwLock<Arc<MappingSnapshot>>,
}

impl<B: ConfigBackend> CalibrationStore<B> {
    /// Load the persisted configuration, falling back to defaults when there
    /// is none or it cannot be used.
    ///
    /// # Errors
    /// Fails only if the default configuration itself cannot be mapped.
    pub fn open(backend: B) -> Result<Self, StoreError> {
        let snapshot = match backend.load() {
            Ok(Some(config)) => match MappingSnapshot::compute(config) {
                Ok(snapshot) => {
                    info!("Loaded config");
                    snapshot
                }
                Err(e) => {
                    warn!("Stored config rejected: {e}, using defaults");
                    MappingSnapshot::compute(MappingConfig::default())?
                }
            },
            Ok(None) => {
                info!("No stored config, using defaults");
                MappingSnapshot::compute(MappingConfig::default())?
            }
            Err(e) => {
                warn!("Failed to load config: {e}, using defaults");
                MappingSnapshot::compute(MappingConfig::default())?
            }
        };
        Ok(Self {
            backend,
            writer: Mutex::new(()),
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<MappingSnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn config(&self) -> MappingConfig {
        self.snapshot().config.clone()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Apply `change` to a copy of the configuration and publish the result.
    ///
    /// # Errors
    /// Validation, invariant or persistence failures; nothing is published.
    pub fn update<F>(&self, change: F) -> Result<Arc<MappingSnapshot>, StoreError>
    where
        F: FnOnce(&mut MappingConfig),
    {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();
        let mut proposed = current.config.clone();
        change(&mut proposed);
        if proposed == current.config {
            debug!("Config unchanged");
            return Ok(current);
        }

        let snapshot = MappingSnapshot::compute_reusing(proposed, Some(&current.base))
            .inspect_err(|e| warn!("Config change rejected: {e}"))?;
        self.backend.save(&snapshot.config)?;

        let snapshot = Arc::new(snapshot);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&snapshot);
        info!(
            "Published mapping: {} keys, quality {} ({})",
            snapshot.mapping.key_count(),
            snapshot.quality.score,
            snapshot.quality.level
        );
        Ok(snapshot)
    }

    /// Compute the snapshot `config` would produce, without committing it.
    ///
    /// # Errors
    /// Fails like [`MappingSnapshot::compute`].
    pub fn preview(&self, config: &MappingConfig) -> Result<MappingSnapshot, MappingError> {
        MappingSnapshot::compute_reusing(config.clone(), Some(&self.snapshot().base))
    }

    /// # Errors
    /// See [`update`](Self::update).
    pub fn set_piano_size(&self, piano_size: PianoSize) -> Result<Arc<MappingSnapshot>, StoreError> {
        self.update(|c| c.piano_size = piano_size)
    }

    /// # Errors
    /// See [`update`](Self::update).
    pub fn set_leds_per_meter(&self, leds_per_meter: u32) -> Result<Arc<MappingSnapshot>, StoreError> {
        self.update(|c| c.leds_per_meter = leds_per_meter)
    }

    /// # Errors
    /// See [`update`](Self::update).
    pub fn set_total_led_count(&self, total_led_count: usize) -> Result<Arc<MappingSnapshot>, StoreError> {
        self.update(|c| c.total_led_count = total_led_count)
    }

    /// # Errors
    /// See [`update`](Self::update).
    pub fn set_calibration_range(&self, range: CalibrationRange) -> Result<Arc<MappingSnapshot>, StoreError> {
        self.update(|c| c.calibration = range)
    }

    /// # Errors
    /// See [`update`](Self::update).
    pub fn set_distribution_mode(&self, mode: DistributionMode) -> Result<Arc<MappingSnapshot>, StoreError> {
        self.update(|c| c.distribution_mode = mode)
    }

    /// # Errors
    /// See [`update`](Self::update).
    pub fn set_global_offset(&self, offset: i32) -> Result<Arc<MappingSnapshot>, StoreError> {
        self.update(|c| c.offsets.global_offset = offset)
    }

    /// # Errors
    /// See [`update`](Self::update).
    pub fn upsert_key_offset(&self, midi_note: u8, offset: i32) -> Result<Arc<MappingSnapshot>, StoreError> {
        self.update(|c| {
            c.offsets.key_offsets.insert(midi_note, offset);
        })
    }

    /// # Errors
    /// See [`update`](Self::update).
    pub fn delete_key_offset(&self, midi_note: u8) -> Result<Arc<MappingSnapshot>, StoreError> {
        self.update(|c| {
            c.offsets.key_offsets.remove(&midi_note);
        })
    }

    /// # Errors
    /// See [`update`](Self::update).
    pub fn upsert_joint_offset(&self, midi_note: u8, offset_mm: f64) -> Result<Arc<MappingSnapshot>, StoreError> {
        self.update(|c| {
            c.offsets.key_joint_offsets.insert(midi_note, offset_mm);
        })
    }

    /// # Errors
    /// See [`update`](Self::update).
    pub fn delete_joint_offset(&self, midi_note: u8) -> Result<Arc<MappingSnapshot>, StoreError> {
        self.update(|c| {
            c.offsets.key_joint_offsets.remove(&midi_note);
        })
    }

    /// # Errors
    /// See [`update`](Self::update).
    pub fn upsert_trim(&self, midi_note: u8, trim: LedTrim) -> Result<Arc<MappingSnapshot>, StoreError> {
        self.update(|c| {
            c.offsets.key_led_trims.insert(midi_note, trim);
        })
    }

    /// # Errors
    /// See [`update`](Self::update).
    pub fn delete_trim(&self, midi_note: u8) -> Result<Arc<MappingSnapshot>, StoreError> {
        self.update(|c| {
            c.offsets.key_led_trims.remove(&midi_note);
        })
    }
}

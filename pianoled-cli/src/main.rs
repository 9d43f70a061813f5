use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use pianoled_mapping_lib::config::describe_notes;
use pianoled_mapping_lib::{
    note_name, validate, CalibrationRange, CalibrationStore, ConfigBackend, DistributionMode, JsonFileBackend,
    LedTrim, MappingConfig, MappingSnapshot, PianoSize, QualityReport,
};
use std::fmt::{Display, Write};
use std::path::{Path, PathBuf};

/// Compute and calibrate piano key → LED strip mappings.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Log debug detail (overrides the configuration's log level).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the final LED list for every key.
    Map {
        /// Path to the JSON configuration.
        config: PathBuf,

        /// Print the mapping as JSON.
        #[arg(long)]
        json: bool,

        /// Only show this MIDI note.
        #[arg(short, long)]
        note: Option<u8>,
    },
    /// Print the quality score, warnings and recommendations.
    Quality {
        /// Path to the JSON configuration.
        config: PathBuf,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Check a configuration without applying it; exits 1 if it is invalid.
    Validate {
        /// Path to the JSON configuration.
        config: PathBuf,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Write a default configuration calibrated over the whole strip.
    Init {
        /// Path to the JSON configuration.
        config: PathBuf,

        /// Number of keys (25, 37, 49, 61, 76 or 88).
        #[arg(long, default_value_t = 88)]
        piano_size: u16,

        #[arg(long, default_value_t = 60)]
        leds_per_meter: u32,

        /// LEDs physically present on the strip.
        #[arg(long, default_value_t = 120)]
        total_leds: usize,

        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Change one setting; a rejected change leaves the file untouched.
    Set {
        /// Path to the JSON configuration.
        config: PathBuf,

        #[command(subcommand)]
        change: Change,
    },
}

impl Command {
    fn config_path(&self) -> &Path {
        match self {
            Self::Map { config, .. }
            | Self::Quality { config, .. }
            | Self::Validate { config, .. }
            | Self::Init { config, .. }
            | Self::Set { config, .. } => config,
        }
    }
}

#[derive(Subcommand)]
enum Change {
    /// Calibration range (inclusive LED indices).
    Range { start: usize, end: usize },
    /// Distribution mode.
    Mode {
        mode: ModeArg,

        /// LEDs per key for the fixed mode.
        #[arg(long, required_if_eq("mode", "fixed"))]
        leds_per_key: Option<usize>,
    },
    /// Keyboard size in keys.
    PianoSize { keys: u16 },
    /// Strip density in LEDs per meter.
    Density { leds_per_meter: u32 },
    /// LEDs physically present on the strip.
    TotalLeds { count: usize },
    /// Shift applied to every key, in LEDs.
    GlobalOffset {
        #[arg(allow_hyphen_values = true)]
        offset: i32,
    },
    /// Cascading LED offset from a MIDI note upward.
    KeyOffset {
        note: u8,

        #[arg(allow_hyphen_values = true, required_unless_present = "delete")]
        offset: Option<i32>,

        /// Remove the offset registered at this note.
        #[arg(long, conflicts_with = "offset")]
        delete: bool,
    },
    /// Cascading solder-joint offset in millimetres from a MIDI note upward.
    JointOffset {
        note: u8,

        #[arg(allow_hyphen_values = true, required_unless_present = "delete")]
        offset_mm: Option<f64>,

        /// Remove the joint offset registered at this note.
        #[arg(long, conflicts_with = "offset_mm")]
        delete: bool,
    },
    /// LEDs removed from either end of one key.
    Trim {
        note: u8,

        #[arg(long, default_value_t = 0)]
        left: u32,

        #[arg(long, default_value_t = 0)]
        right: u32,

        /// Remove the trim registered at this note.
        #[arg(long, conflicts_with_all = ["left", "right"])]
        delete: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Proportional,
    Fixed,
    Physics,
    PianoOverlap,
    PianoNoOverlap,
}

fn fail(message: impl Display) -> ! {
    eprintln!("Error: {message}");
    std::process::exit(1);
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.command.config_path());

    match args.command {
        Command::Map { config, json, note } => cmd_map(&config, json, note),
        Command::Quality { config, json } => cmd_quality(&config, json),
        Command::Validate { config, json } => cmd_validate(&config, json),
        Command::Init {
            config,
            piano_size,
            leds_per_meter,
            total_leds,
            force,
        } => cmd_init(&config, piano_size, leds_per_meter, total_leds, force),
        Command::Set { config, change } => cmd_set(&config, change),
    }
}

/// `RUST_LOG` wins, then `--verbose`, then the configuration's log level.
fn init_logging(verbose: bool, config_path: &Path) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        JsonFileBackend::new(config_path)
            .load()
            .ok()
            .flatten()
            .map_or(LevelFilter::Info, |c| c.log_level.as_level_filter())
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

/// Read a configuration that must exist and parse.
fn load_config(path: &Path) -> MappingConfig {
    match JsonFileBackend::new(path).load() {
        Ok(Some(config)) => config,
        Ok(None) => fail(format_args!(
            "{} does not exist (create it with `init`)",
            path.display()
        )),
        Err(e) => fail(format_args!("reading {}: {e}", path.display())),
    }
}

fn compute(path: &Path) -> MappingSnapshot {
    MappingSnapshot::compute(load_config(path)).unwrap_or_else(|e| fail(e))
}

fn mode_label(snapshot: &MappingSnapshot) -> &'static str {
    let config = &snapshot.config;
    config.distribution_mode.allocator(config.physics).name()
}

/// Compact LED list: `[3, 4, 5, 9]` → `"3-5, 9"`.
fn format_leds(leds: &[usize]) -> String {
    let mut out = String::new();
    let mut i = 0;
    while i < leds.len() {
        let start = leds[i];
        let mut end = start;
        while i + 1 < leds.len() && leds[i + 1] == end + 1 {
            i += 1;
            end = leds[i];
        }
        if !out.is_empty() {
            out.push_str(", ");
        }
        if start == end {
            let _ = write!(out, "{start}");
        } else {
            let _ = write!(out, "{start}-{end}");
        }
        i += 1;
    }
    if out.is_empty() {
        out.push('-');
    }
    out
}

fn cmd_map(path: &Path, json: bool, note: Option<u8>) {
    let snapshot = compute(path);
    let config = &snapshot.config;

    if json {
        let value = match note {
            Some(n) => serde_json::json!({ "midi_note": n, "leds": snapshot.leds_for_note(n) }),
            None => serde_json::json!({
                "total_led_count": snapshot.total_led_count(),
                "pitch_scale_factor": snapshot.pitch_scale_factor(),
                "mapping": snapshot.mapping,
            }),
        };
        match serde_json::to_string_pretty(&value) {
            Ok(s) => println!("{s}"),
            Err(e) => fail(e),
        }
        return;
    }

    println!(
        "{} piano, LEDs {}..={} of {} ({} distribution)",
        config.piano_size,
        config.calibration.start_led,
        config.calibration.end_led,
        snapshot.total_led_count(),
        mode_label(&snapshot)
    );
    let offsets = &config.offsets;
    if !offsets.key_offsets.is_empty() {
        println!("Key offsets at:   {}", describe_notes(&offsets.key_offsets));
    }
    if !offsets.key_joint_offsets.is_empty() {
        println!("Joint offsets at: {}", describe_notes(&offsets.key_joint_offsets));
    }
    if !offsets.key_led_trims.is_empty() {
        println!("Trims at:         {}", describe_notes(&offsets.key_led_trims));
    }
    println!();
    println!("{:>6}  {:<5}  LEDs", "Note", "Name");
    println!("{}", "-".repeat(40));

    let notes: Vec<u8> = match note {
        Some(n) => vec![n],
        None => snapshot.mapping.notes().collect(),
    };
    for n in notes {
        println!("{n:>6}  {:<5}  {}", note_name(n), format_leds(snapshot.leds_for_note(n)));
    }

    if note.is_none() {
        for warning in &snapshot.quality.warnings {
            eprintln!("Warning: {warning}");
        }
    }
}

fn print_quality(report: &QualityReport) {
    println!("Quality:      {}/100 ({})", report.score, report.level);
    println!("LEDs per key: {:.2}", report.leds_per_key);
    println!("Coverage:     {:.0}% of keyboard width", report.coverage_ratio * 100.0);
    if !report.warnings.is_empty() {
        println!("Warnings:");
        for warning in &report.warnings {
            println!("  - {warning}");
        }
    }
    if !report.recommendations.is_empty() {
        println!("Recommendations:");
        for recommendation in &report.recommendations {
            println!("  - {recommendation}");
        }
    }
}

fn cmd_quality(path: &Path, json: bool) {
    let snapshot = compute(path);
    if json {
        match serde_json::to_string_pretty(&snapshot.quality) {
            Ok(s) => println!("{s}"),
            Err(e) => fail(e),
        }
    } else {
        print_quality(&snapshot.quality);
    }
}

fn cmd_validate(path: &Path, json: bool) {
    let report = validate(&load_config(path));
    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(s) => println!("{s}"),
            Err(e) => fail(e),
        }
    } else if report.valid {
        println!("{} is valid", path.display());
    } else {
        println!("{} is invalid:", path.display());
        for error in &report.errors {
            println!("  - {error}");
        }
    }
    if !report.valid {
        std::process::exit(1);
    }
}

fn cmd_init(path: &Path, piano_size: u16, leds_per_meter: u32, total_leds: usize, force: bool) {
    if path.exists() && !force {
        fail(format_args!("{} already exists (use --force to overwrite)", path.display()));
    }
    let piano_size = PianoSize::from_key_count(piano_size).unwrap_or_else(|e| fail(e));
    let config = MappingConfig::for_strip(piano_size, leds_per_meter, total_leds);
    let snapshot = MappingSnapshot::compute(config).unwrap_or_else(|e| fail(e));
    if let Err(e) = JsonFileBackend::new(path).save(&snapshot.config) {
        fail(e);
    }
    println!("Wrote {}", path.display());
    print_quality(&snapshot.quality);
}

fn mode_from_arg(mode: ModeArg, leds_per_key: Option<usize>) -> DistributionMode {
    match mode {
        ModeArg::Proportional => DistributionMode::Proportional,
        ModeArg::Fixed => DistributionMode::FixedPerKey {
            leds_per_key: leds_per_key.unwrap_or(1),
        },
        ModeArg::Physics => DistributionMode::Physics,
        ModeArg::PianoOverlap => DistributionMode::PianoOverlap,
        ModeArg::PianoNoOverlap => DistributionMode::PianoNoOverlap,
    }
}

fn cmd_set(path: &Path, change: Change) {
    // Refuse to start from defaults when the file is missing or unusable,
    // otherwise the first change would overwrite it.
    let existing = load_config(path);
    if let Err(e) = existing.check() {
        fail(format_args!("{} is invalid: {e}", path.display()));
    }
    let store = CalibrationStore::open(JsonFileBackend::new(path)).unwrap_or_else(|e| fail(e));

    let result = match change {
        Change::Range { start, end } => match CalibrationRange::new(start, end) {
            Ok(range) => store.set_calibration_range(range),
            Err(e) => fail(e),
        },
        Change::Mode { mode, leds_per_key } => store.set_distribution_mode(mode_from_arg(mode, leds_per_key)),
        Change::PianoSize { keys } => match PianoSize::from_key_count(keys) {
            Ok(size) => store.set_piano_size(size),
            Err(e) => fail(e),
        },
        Change::Density { leds_per_meter } => store.set_leds_per_meter(leds_per_meter),
        Change::TotalLeds { count } => store.set_total_led_count(count),
        Change::GlobalOffset { offset } => store.set_global_offset(offset),
        Change::KeyOffset { note, offset, delete } => match offset {
            Some(offset) if !delete => store.upsert_key_offset(note, offset),
            _ => store.delete_key_offset(note),
        },
        Change::JointOffset { note, offset_mm, delete } => match offset_mm {
            Some(offset_mm) if !delete => store.upsert_joint_offset(note, offset_mm),
            _ => store.delete_joint_offset(note),
        },
        Change::Trim {
            note,
            left,
            right,
            delete,
        } => {
            if delete {
                store.delete_trim(note)
            } else {
                store.upsert_trim(note, LedTrim { left, right })
            }
        }
    };

    match result {
        Ok(snapshot) => {
            println!(
                "Updated {}: quality {}/100 ({})",
                path.display(),
                snapshot.quality.score,
                snapshot.quality.level
            );
            for warning in &snapshot.quality.warnings {
                println!("Warning: {warning}");
            }
        }
        Err(e) => fail(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_leds() {
        assert_eq!(format_leds(&[]), "-");
        assert_eq!(format_leds(&[7]), "7");
        assert_eq!(format_leds(&[3, 4, 5, 9]), "3-5, 9");
        assert_eq!(format_leds(&[1, 3, 4]), "1, 3-4");
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["pianoled", "set", "cfg.json", "key-offset", "60", "-3"]).unwrap();
        match args.command {
            Command::Set {
                change: Change::KeyOffset { note, offset, delete },
                ..
            } => {
                assert_eq!(note, 60);
                assert_eq!(offset, Some(-3));
                assert!(!delete);
            }
            _ => panic!("wrong subcommand"),
        }

        let args = Args::try_parse_from(["pianoled", "set", "cfg.json", "trim", "60", "--delete"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Set {
                change: Change::Trim { delete: true, .. },
                ..
            }
        ));

        assert!(Args::try_parse_from(["pianoled", "set", "cfg.json", "mode", "fixed"]).is_err());
    }

    #[test]
    fn test_mode_from_arg() {
        assert_eq!(
            mode_from_arg(ModeArg::Fixed, Some(3)),
            DistributionMode::FixedPerKey { leds_per_key: 3 }
        );
        assert_eq!(mode_from_arg(ModeArg::PianoNoOverlap, None), DistributionMode::PianoNoOverlap);
    }
}

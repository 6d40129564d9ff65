//! # Hitlog Writer
//!
//! Append-only JSONL writer for enforcement sessions with size-based
//! rotation, gzip of rotated files, and bounded retention.
//!
//! Layout under the hitlog directory:
//! ```text
//! enforcement.hitlog                      current file
//! enforcement.hitlog.<unix_ms>.<seq>.gz   rotated (compressed) files
//! ```

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use super::recorder::TelemetryConfig;
use super::session::EnforcementSession;
use crate::error::TelemetryError;
use crate::types::now_ms;

pub const CURRENT_FILE_NAME: &str = "enforcement.hitlog";
const ROTATED_PREFIX: &str = "enforcement.hitlog.";

/// Hitlog writer configuration
#[derive(Debug, Clone)]
pub struct HitlogConfig {
    /// Base directory for hitlogs
    pub base_dir: PathBuf,

    /// Rotate once the current file reaches this many bytes
    pub rotate_bytes: u64,

    /// Enable compression for rotated logs
    pub compress_rotated: bool,

    /// Maximum number of rotated files to keep
    pub max_rotated_files: usize,

    /// Buffer size for writes (bytes)
    pub buffer_size: usize,

    /// Enable immediate flush (disable buffering)
    pub immediate_flush: bool,
}

impl HitlogConfig {
    pub fn from_telemetry_config(config: &TelemetryConfig) -> Self {
        HitlogConfig {
            base_dir: PathBuf::from(&config.hitlog_dir),
            rotate_bytes: config.rotate_bytes,
            compress_rotated: config.compress_rotated,
            max_rotated_files: config.max_rotated_files,
            buffer_size: 8192,
            immediate_flush: config.immediate_flush,
        }
    }
}

/// Thread-safe hitlog writer
pub struct HitlogWriter {
    config: HitlogConfig,
    current: Mutex<HitlogFile>,
}

struct HitlogFile {
    writer: BufWriter<File>,
    bytes_written: u64,
    sessions_written: u64,
    rotations: u64,
}

impl HitlogWriter {
    /// Create the hitlog directory and open (append to) the current file.
    pub fn new(config: HitlogConfig) -> Result<Self, TelemetryError> {
        fs::create_dir_all(&config.base_dir)?;

        let current = Self::open_current(&config)?;
        info!("Hitlog writing to {}", config.base_dir.join(CURRENT_FILE_NAME).display());

        Ok(HitlogWriter {
            config,
            current: Mutex::new(current),
        })
    }

    fn open_current(config: &HitlogConfig) -> Result<HitlogFile, TelemetryError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(config.base_dir.join(CURRENT_FILE_NAME))?;
        let existing = file.metadata()?.len();

        Ok(HitlogFile {
            writer: BufWriter::with_capacity(config.buffer_size, file),
            bytes_written: existing,
            sessions_written: 0,
            rotations: 0,
        })
    }

    /// Append one session as a JSON line, rotating afterwards if the file is full.
    pub fn write_session(&self, session: &EnforcementSession) -> Result<(), TelemetryError> {
        let mut line = serde_json::to_vec(session)?;
        line.push(b'\n');

        let mut current = self.current.lock();
        current.writer.write_all(&line)?;
        if self.config.immediate_flush {
            current.writer.flush()?;
        }

        current.bytes_written += line.len() as u64;
        current.sessions_written += 1;

        if current.bytes_written >= self.config.rotate_bytes {
            self.rotate(&mut current)?;
        }

        Ok(())
    }

    /// Flush pending writes
    pub fn flush(&self) -> Result<(), TelemetryError> {
        self.current.lock().writer.flush()?;
        Ok(())
    }

    fn rotate(&self, current: &mut HitlogFile) -> Result<(), TelemetryError> {
        current.writer.flush()?;

        let current_path = self.current_path();
        let rotated_path = self.config.base_dir.join(format!(
            "{}{}.{}",
            ROTATED_PREFIX,
            now_ms(),
            current.rotations
        ));
        fs::rename(&current_path, &rotated_path)?;

        let rotations = current.rotations + 1;
        *current = Self::open_current(&self.config)?;
        current.rotations = rotations;

        if self.config.compress_rotated {
            compress_file(&rotated_path)?;
        }
        self.cleanup_old_files()?;

        debug!("Rotated hitlog to {}", rotated_path.display());
        Ok(())
    }

    /// Keep only the newest `max_rotated_files` rotated files.
    fn cleanup_old_files(&self) -> Result<(), TelemetryError> {
        let rotated = rotated_files(&self.config.base_dir)?;
        if rotated.len() > self.config.max_rotated_files {
            let excess = rotated.len() - self.config.max_rotated_files;
            for path in &rotated[..excess] {
                fs::remove_file(path).ok();
            }
        }
        Ok(())
    }

    pub fn current_path(&self) -> PathBuf {
        self.config.base_dir.join(CURRENT_FILE_NAME)
    }

    /// Get current file stats
    pub fn stats(&self) -> HitlogStats {
        let current = self.current.lock();
        HitlogStats {
            path: self.current_path(),
            bytes_written: current.bytes_written,
            sessions_written: current.sessions_written,
            rotations: current.rotations,
        }
    }
}

/// Statistics for current hitlog file
#[derive(Debug, Clone)]
pub struct HitlogStats {
    pub path: PathBuf,
    pub bytes_written: u64,
    pub sessions_written: u64,
    pub rotations: u64,
}

/// Compress a rotated file (gzip) and remove the original.
fn compress_file(path: &Path) -> Result<(), TelemetryError> {
    let input = fs::read(path)?;

    let mut output_path = path.as_os_str().to_owned();
    output_path.push(".gz");
    let output_file = File::create(PathBuf::from(output_path))?;

    let mut encoder = GzEncoder::new(output_file, Compression::default());
    encoder.write_all(&input)?;
    encoder.finish()?;

    fs::remove_file(path)?;
    Ok(())
}

/// Rotated files under `dir`, oldest first.
pub fn rotated_files(dir: &Path) -> Result<Vec<PathBuf>, TelemetryError> {
    let mut rotated: Vec<((u64, u64), PathBuf)> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter_map(|path| rotation_key(&path).map(|key| (key, path)))
        .collect();

    rotated.sort();
    Ok(rotated.into_iter().map(|(_, path)| path).collect())
}

fn rotation_key(path: &Path) -> Option<(u64, u64)> {
    let name = path.file_name()?.to_str()?;
    let stamp = name.strip_prefix(ROTATED_PREFIX)?;
    let stamp = stamp.strip_suffix(".gz").unwrap_or(stamp);
    let (ms, seq) = stamp.split_once('.')?;
    Some((ms.parse().ok()?, seq.parse().ok()?))
}

/// Sessions in the live hitlog under `dir`. No hitlog yet reads as empty.
pub fn current_sessions(dir: &Path) -> Result<Vec<EnforcementSession>, TelemetryError> {
    match read_sessions(&dir.join(CURRENT_FILE_NAME)) {
        Err(TelemetryError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        other => other,
    }
}

/// Read every session from a hitlog file, gzip or plain.
pub fn read_sessions(path: &Path) -> Result<Vec<EnforcementSession>, TelemetryError> {
    let file = File::open(path)?;
    let reader: Box<dyn Read> = if path.extension().map_or(false, |ext| ext == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut sessions = Vec::new();
    for line in BufReader::new(reader).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        sessions.push(serde_json::from_str(&line)?);
    }
    Ok(sessions)
}

//! Warm storage - memory-mapped file for persistent rule vectors.
//!
//! Stores a full rule_id → RuleVector snapshot in one binary file and serves
//! point lookups straight out of a read-only mapping.
//!
//! # File Format
//! ```text
//! Metadata (JSON, space-padded to a fixed width, newline-terminated):
//!   magic: "RVEC"
//!   version: 2
//!   index_offset: u64
//!
//! Records (length-prefixed, sorted by rule_id):
//!   [record_1][record_2]...
//!
//! Index at index_offset (bincode BTreeMap):
//!   rule_id → { offset, len, installed_at_ms }
//! ```
//!
//! Records are never patched in place. Every write regenerates the whole file
//! under `<path>.tmp` and renames it over the live file, so a crash mid-write
//! leaves the previous file intact. Incremental rebuilds copy unchanged
//! records byte-for-byte from the current mapping; only new records are
//! encoded, and an undecodable record is carried over untouched.

use log::{debug, info, warn};
use memmap2::Mmap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{StoreError, StoreResult};
use crate::rule_vector::{decode, encode, RuleVector};
use crate::storage::StorageTier;

const MAGIC: &str = "RVEC";
const VERSION: u32 = 2;
/// Metadata line width, excluding the trailing newline.
const METADATA_WIDTH: usize = 200;

pub const DEFAULT_WARM_CAPACITY: usize = 100_000;

fn warm_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::io(StorageTier::Warm, e)
}

/// Metadata header stored as JSON on the first line of the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Metadata {
    magic: String,
    version: u32,
    index_offset: u64,
}

impl Metadata {
    fn line(index_offset: u64) -> StoreResult<Vec<u8>> {
        let json = serde_json::to_string(&Metadata {
            magic: MAGIC.to_string(),
            version: VERSION,
            index_offset,
        })
        .map_err(|e| warm_err(format!("Serialize metadata failed: {}", e)))?;

        if json.len() > METADATA_WIDTH {
            return Err(warm_err("metadata exceeds header width"));
        }

        Ok(format!("{:<width$}\n", json, width = METADATA_WIDTH).into_bytes())
    }
}

/// Location of one record, plus its install time so overflow can pick the
/// oldest entries without decoding anything.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct IndexEntry {
    offset: u64,
    len: u64,
    installed_at_ms: u64,
}

/// One record headed for a rebuilt file.
struct Staged<'a> {
    bytes: Cow<'a, [u8]>,
    installed_at_ms: u64,
}

/// A mapped file together with the index that points into it.
struct Mapped {
    mmap: Mmap,
    index: HashMap<String, IndexEntry>,
}

impl Mapped {
    fn open(path: &Path) -> StoreResult<Self> {
        let file = File::open(path).map_err(|e| warm_err(format!("Open failed: {}", e)))?;

        // SAFETY: the live file is only ever replaced by rename, never written
        // in place, so the mapped bytes stay stable for the life of the map.
        let mmap = unsafe { Mmap::map(&file).map_err(|e| warm_err(format!("Mmap failed: {}", e)))? };

        if mmap.is_empty() {
            return Err(warm_err("File is empty"));
        }

        // Read metadata from first line
        let newline_pos = mmap
            .iter()
            .take(METADATA_WIDTH + 1)
            .position(|&b| b == b'\n')
            .ok_or_else(|| warm_err("No metadata line found"))?;

        let metadata_str = std::str::from_utf8(&mmap[..newline_pos])
            .map_err(|e| warm_err(format!("Invalid UTF-8 in metadata: {}", e)))?
            .trim();

        let metadata: Metadata = serde_json::from_str(metadata_str)
            .map_err(|e| warm_err(format!("Parse metadata failed: {}", e)))?;

        if metadata.magic != MAGIC {
            return Err(warm_err("Invalid magic number"));
        }

        if metadata.version != VERSION {
            return Err(warm_err(format!(
                "Unsupported version: {}",
                metadata.version
            )));
        }

        let records_start = (newline_pos + 1) as u64;
        let index_offset = metadata.index_offset;
        if index_offset < records_start || index_offset > mmap.len() as u64 {
            return Err(warm_err(format!(
                "Index offset {} outside file of {} bytes",
                index_offset,
                mmap.len()
            )));
        }

        let index: BTreeMap<String, IndexEntry> =
            bincode::deserialize(&mmap[index_offset as usize..])
                .map_err(|e| warm_err(format!("Deserialize index failed: {}", e)))?;

        if let Some((rule_id, entry)) = index.iter().find(|(_, entry)| {
            entry.offset < records_start
                || entry
                    .offset
                    .checked_add(entry.len)
                    .map_or(true, |end| end > index_offset)
        }) {
            return Err(warm_err(format!(
                "Index entry '{}' points outside the record region ({}+{})",
                rule_id, entry.offset, entry.len
            )));
        }

        Ok(Self {
            mmap,
            index: index.into_iter().collect(),
        })
    }

    /// Raw record bytes; bounds were checked when the index was loaded.
    fn bytes(&self, entry: &IndexEntry) -> &[u8] {
        &self.mmap[entry.offset as usize..(entry.offset + entry.len) as usize]
    }

    fn read(&self, rule_id: &str) -> StoreResult<Option<RuleVector>> {
        let entry = match self.index.get(rule_id) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        let (vector, _) = decode(self.bytes(entry))?;
        if vector.rule_id != rule_id {
            return Err(StoreError::serialization(format!(
                "warm index entry '{}' holds record for '{}'",
                rule_id, vector.rule_id
            )));
        }

        Ok(Some(vector))
    }
}

/// Memory-mapped warm storage.
pub struct WarmStorage {
    /// Path to storage file
    path: PathBuf,

    /// Rebuild target, renamed over `path` on commit
    tmp_path: PathBuf,

    /// Current mapping and index (read-only after load)
    mapped: RwLock<Mapped>,

    /// Serializes rebuilds so two writers never share the temp file
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for WarmStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarmStorage")
            .field("path", &self.path)
            .field("index_entries", &self.mapped.read().index.len())
            .finish()
    }
}

impl WarmStorage {
    /// Open or create warm storage at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut tmp_path = path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| warm_err(format!("Failed to create directory: {}", e)))?;
            }
        }

        // A leftover temp file is a rebuild that never reached its rename.
        if tmp_path.exists() {
            warn!(
                "Discarding interrupted warm rebuild at {}",
                tmp_path.display()
            );
            std::fs::remove_file(&tmp_path)
                .map_err(|e| warm_err(format!("Remove stale temp failed: {}", e)))?;
        }

        if !path.exists() {
            Self::stage_to(&tmp_path, &BTreeMap::new())?;
            std::fs::rename(&tmp_path, &path)
                .map_err(|e| warm_err(format!("Rename failed: {}", e)))?;
        }

        let mapped = Mapped::open(&path)?;
        info!(
            "Warm storage opened at {} ({} rules)",
            path.display(),
            mapped.index.len()
        );

        Ok(Self {
            path,
            tmp_path,
            mapped: RwLock::new(mapped),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a rule vector by ID: index lookup plus a bounds-checked decode
    /// from the mapping.
    pub fn get(&self, rule_id: &str) -> StoreResult<Option<RuleVector>> {
        self.mapped.read().read(rule_id)
    }

    pub fn contains(&self, rule_id: &str) -> bool {
        self.mapped.read().index.contains_key(rule_id)
    }

    pub fn len(&self) -> usize {
        self.mapped.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored rule ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.mapped.read().index.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Install time of every stored rule, read from the index alone.
    pub fn install_times(&self) -> HashMap<String, u64> {
        self.mapped
            .read()
            .index
            .iter()
            .map(|(rule_id, entry)| (rule_id.clone(), entry.installed_at_ms))
            .collect()
    }

    /// The encoded record for `rule_id`, copied out of the mapping undecoded.
    pub fn raw_record(&self, rule_id: &str) -> Option<Vec<u8>> {
        let mapped = self.mapped.read();
        mapped
            .index
            .get(rule_id)
            .map(|entry| mapped.bytes(entry).to_vec())
    }

    /// Load every readable rule vector. Records that fail to decode are
    /// logged and left out.
    pub fn load_anchors(&self) -> HashMap<String, RuleVector> {
        let mapped = self.mapped.read();
        let mut anchors = HashMap::with_capacity(mapped.index.len());

        for rule_id in mapped.index.keys() {
            match mapped.read(rule_id) {
                Ok(Some(vector)) => {
                    anchors.insert(rule_id.clone(), vector);
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable warm record '{}': {}", rule_id, e),
            }
        }

        anchors
    }

    /// Replace the stored snapshot with `anchors`.
    ///
    /// The new file is fully written and synced before the rename; readers are
    /// blocked only while the new mapping is swapped in.
    pub fn write_anchors(&self, anchors: &HashMap<String, RuleVector>) -> StoreResult<()> {
        let _writer = self.write_lock.lock();
        self.stage_snapshot(anchors)?;
        self.commit_staged()
    }

    /// Rebuild the file as the current contents minus `removals`, plus
    /// `upserts` (which replace any stored copy).
    ///
    /// Kept records are copied from the mapping without decoding, so the
    /// cost is one sequential copy of the file and an fsync.
    pub fn rebuild_with(&self, upserts: &[RuleVector], removals: &HashSet<&str>) -> StoreResult<()> {
        let _writer = self.write_lock.lock();

        {
            let mapped = self.mapped.read();
            let mut records: BTreeMap<String, Staged<'_>> = mapped
                .index
                .iter()
                .filter(|(rule_id, _)| !removals.contains(rule_id.as_str()))
                .map(|(rule_id, entry)| {
                    let staged = Staged {
                        bytes: Cow::Borrowed(mapped.bytes(entry)),
                        installed_at_ms: entry.installed_at_ms,
                    };
                    (rule_id.clone(), staged)
                })
                .collect();

            for vector in upserts {
                let staged = Staged {
                    bytes: Cow::Owned(encode(vector)?),
                    installed_at_ms: vector.installed_at_ms,
                };
                records.insert(vector.rule_id.clone(), staged);
            }

            Self::stage_to(&self.tmp_path, &records)?;
        }

        self.commit_staged()
    }

    /// Write a complete snapshot to the temp path without touching the live file.
    pub(crate) fn stage_snapshot(&self, anchors: &HashMap<String, RuleVector>) -> StoreResult<()> {
        let mut records = BTreeMap::new();
        for (rule_id, vector) in anchors {
            if vector.rule_id != *rule_id {
                return Err(StoreError::invalid(
                    rule_id,
                    format!("snapshot key holds vector for '{}'", vector.rule_id),
                ));
            }
            let staged = Staged {
                bytes: Cow::Owned(encode(vector)?),
                installed_at_ms: vector.installed_at_ms,
            };
            records.insert(rule_id.clone(), staged);
        }

        Self::stage_to(&self.tmp_path, &records)
    }

    /// Atomically replace the live file with the staged one and remap it.
    pub(crate) fn commit_staged(&self) -> StoreResult<()> {
        std::fs::rename(&self.tmp_path, &self.path)
            .map_err(|e| warm_err(format!("Rename failed: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
                debug!("Directory sync after warm rename skipped: {}", e);
            }
        }

        let mapped = Mapped::open(&self.path)?;
        let entries = mapped.index.len();
        *self.mapped.write() = mapped;

        debug!("Warm storage rebuilt with {} rules", entries);
        Ok(())
    }

    /// Records are written in id order, so identical snapshots produce
    /// byte-identical files.
    fn stage_to(tmp_path: &Path, records: &BTreeMap<String, Staged<'_>>) -> StoreResult<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(tmp_path)
            .map_err(|e| warm_err(format!("Create temp failed: {}", e)))?;
        let mut writer = BufWriter::new(file);

        // Placeholder metadata, rewritten once the index offset is known
        let placeholder = Metadata::line(u64::MAX)?;
        writer
            .write_all(&placeholder)
            .map_err(|e| warm_err(format!("Write metadata failed: {}", e)))?;

        let mut offset = placeholder.len() as u64;
        let mut index = BTreeMap::new();
        for (rule_id, record) in records {
            writer
                .write_all(&record.bytes)
                .map_err(|e| warm_err(format!("Write record failed: {}", e)))?;

            let len = record.bytes.len() as u64;
            index.insert(
                rule_id.as_str(),
                IndexEntry {
                    offset,
                    len,
                    installed_at_ms: record.installed_at_ms,
                },
            );
            offset += len;
        }

        let index_offset = offset;
        let index_bytes = bincode::serialize(&index)
            .map_err(|e| warm_err(format!("Serialize index failed: {}", e)))?;
        writer
            .write_all(&index_bytes)
            .map_err(|e| warm_err(format!("Write index failed: {}", e)))?;

        let mut file = writer
            .into_inner()
            .map_err(|e| warm_err(format!("Flush failed: {}", e)))?;

        // Update metadata with correct index_offset
        file.seek(SeekFrom::Start(0))
            .map_err(|e| warm_err(format!("Seek failed: {}", e)))?;
        file.write_all(&Metadata::line(index_offset)?)
            .map_err(|e| warm_err(format!("Write updated metadata failed: {}", e)))?;

        file.sync_all()
            .map_err(|e| warm_err(format!("Sync failed: {}", e)))?;

        Ok(())
    }
}

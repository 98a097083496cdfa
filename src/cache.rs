//! Per-symbol flag cache for incremental builds.
//!
//! Loaded whole at run start and saved whole at run end. Saving is atomic
//! (temp file + rename) and refuses to overwrite a cache another run has
//! saved in the meantime. A single writer per cache path is still assumed;
//! the version check only detects a lost update, it does not lock.
//!
//! The file records the timeframe and flag parameters its counts were
//! computed with; entries made under a different key are discarded.

use crate::error::{DashboardError, Result};
use crate::flags::FlagCounts;
use crate::market_data::TimeFrame;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Time of the latest completed bar the flags were computed from
    pub last_bar_time: i64,
    pub nh: u32,
    pub nl: u32,
    pub up: u32,
    pub down: u32,
}

impl CacheEntry {
    pub fn new(last_bar_time: i64, counts: FlagCounts) -> Self {
        Self {
            last_bar_time,
            nh: counts.nh,
            nl: counts.nl,
            up: counts.up,
            down: counts.down,
        }
    }

    pub fn counts(&self) -> FlagCounts {
        FlagCounts {
            nh: self.nh,
            nl: self.nl,
            up: self.up,
            down: self.down,
        }
    }
}

/// What the cached counts depend on besides the bars themselves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheKey {
    pub timeframe: String,
    pub flag_lookback: usize,
    pub streak_len: usize,
}

impl CacheKey {
    pub fn new(timeframe: TimeFrame, flag_lookback: usize, streak_len: usize) -> Self {
        Self {
            timeframe: timeframe.label().to_string(),
            flag_lookback,
            streak_len,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    version: u64,
    #[serde(default)]
    key: Option<CacheKey>,
    #[serde(default)]
    entries: BTreeMap<String, CacheEntry>,
}

#[derive(Debug)]
pub struct PersistentCache {
    path: PathBuf,
    /// Version found on disk at load time
    loaded_version: u64,
    key: Option<CacheKey>,
    entries: BTreeMap<String, CacheEntry>,
}

impl PersistentCache {
    /// Load the cache; a missing or unreadable file starts empty
    pub fn load(path: &Path) -> Self {
        let file = match fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<CacheFile>(&text) {
                Ok(file) => file,
                Err(e) => {
                    warn!("Cache {} is corrupt ({}), starting empty", path.display(), e);
                    CacheFile::default()
                }
            },
            Err(_) => {
                info!("No cache at {}, starting empty", path.display());
                CacheFile::default()
            }
        };

        debug!(
            "Loaded cache {} v{} with {} entries",
            path.display(),
            file.version,
            file.entries.len()
        );

        Self {
            path: path.to_path_buf(),
            loaded_version: file.version,
            key: file.key,
            entries: file.entries,
        }
    }

    /// Tie the cache to `key`. Entries written under another key (or none)
    /// are dropped; the on-disk version is kept so `save` still detects
    /// concurrent writers.
    pub fn bind(&mut self, key: CacheKey) {
        if self.key.as_ref() != Some(&key) && !self.entries.is_empty() {
            warn!(
                "Cache {} was built for {:?}, need {:?}; discarding {} entries",
                self.path.display(),
                self.key,
                key,
                self.entries.len()
            );
            self.entries.clear();
        }
        self.key = Some(key);
    }

    pub fn key(&self) -> Option<&CacheKey> {
        self.key.as_ref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> u64 {
        self.loaded_version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, symbol: &str) -> Option<&CacheEntry> {
        self.entries.get(symbol)
    }

    pub fn upsert(&mut self, symbol: &str, entry: CacheEntry) {
        self.entries.insert(symbol.to_string(), entry);
    }

    /// Drop symbols no longer in the membership
    pub fn retain_symbols(&mut self, keep: &[String]) {
        let before = self.entries.len();
        self.entries.retain(|symbol, _| keep.iter().any(|k| k == symbol));
        let dropped = before - self.entries.len();
        if dropped > 0 {
            info!("Dropped {} cache entries for removed symbols", dropped);
        }
    }

    /// Flag counts for every cached symbol
    pub fn counts(&self) -> HashMap<String, FlagCounts> {
        self.entries
            .iter()
            .map(|(symbol, entry)| (symbol.clone(), entry.counts()))
            .collect()
    }

    /// Write the whole cache atomically. Fails with `CacheConflict` if the
    /// file on disk is no longer the version this cache was loaded from.
    pub fn save(&mut self) -> Result<()> {
        let on_disk = read_version(&self.path);
        if on_disk != self.loaded_version {
            return Err(DashboardError::CacheConflict {
                path: self.path.display().to_string(),
                expected: self.loaded_version,
                found: on_disk,
            });
        }

        let next = CacheFile {
            version: self.loaded_version + 1,
            key: self.key.clone(),
            entries: self.entries.clone(),
        };
        let json = serde_json::to_string_pretty(&next)?;
        write_atomic(&self.path, json.as_bytes())?;
        self.loaded_version = next.version;

        info!(
            "Saved cache {} v{} ({} entries)",
            self.path.display(),
            self.loaded_version,
            self.entries.len()
        );
        Ok(())
    }
}

fn read_version(path: &Path) -> u64 {
    fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str::<CacheFile>(&text).ok())
        .map(|file| file.version)
        .unwrap_or(0)
}

/// Write to a sibling temp file, then rename over `path`
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));

    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

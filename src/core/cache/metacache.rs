// ─── HTTP Meta Cache ───
// Durable index of downloaded files: ETag, Last-Modified, local commit time,
// MD5 and staleness per (namespace, relative path).
//
// Updates land in memory and mark the index dirty. `flush` writes it out;
// jobs flush once they settle.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::entry::MetaEntry;
use super::file_mtime_millis;
use crate::core::error::{FetchError, FetchResult};

const INDEX_FORMAT_VERSION: &str = "1";

#[derive(Debug, Serialize, Deserialize)]
struct IndexDocument {
    version: String,
    entries: Vec<MetaEntry>,
}

#[derive(Debug)]
struct CacheBase {
    base_path: PathBuf,
    entries: HashMap<String, MetaEntry>,
}

/// Shared cache index. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct HttpMetaCache {
    index_file: PathBuf,
    bases: Mutex<HashMap<String, CacheBase>>,
    dirty: AtomicBool,
    // Held for a whole flush so snapshots reach the disk in order.
    save_lock: Mutex<()>,
}

impl HttpMetaCache {
    pub fn new(index_file: impl Into<PathBuf>) -> Self {
        Self {
            index_file: index_file.into(),
            bases: Mutex::new(HashMap::new()),
            dirty: AtomicBool::new(false),
            save_lock: Mutex::new(()),
        }
    }

    /// Register a namespace whose files live under `base_path`.
    pub fn with_base(mut self, base_id: &str, base_path: impl Into<PathBuf>) -> Self {
        self.bases.get_mut().insert(
            base_id.to_string(),
            CacheBase {
                base_path: base_path.into(),
                entries: HashMap::new(),
            },
        );
        self
    }

    /// Register a namespace on a cache that is already shared.
    /// Re-registering keeps the known entries and only moves the base path.
    pub async fn add_base(&self, base_id: &str, base_path: impl Into<PathBuf>) {
        let base_path = base_path.into();
        let mut bases = self.bases.lock().await;
        match bases.entry(base_id.to_string()) {
            Entry::Occupied(mut slot) => slot.get_mut().base_path = base_path,
            Entry::Vacant(slot) => {
                slot.insert(CacheBase {
                    base_path,
                    entries: HashMap::new(),
                });
            }
        }
    }

    pub fn index_file(&self) -> &Path {
        &self.index_file
    }

    /// Whether in-memory changes are waiting for a [`flush`](Self::flush).
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Read the persisted index. Entries of unregistered namespaces are dropped;
    /// a corrupt index is logged and ignored.
    pub async fn load(&self) -> FetchResult<()> {
        let raw = match tokio::fs::read_to_string(&self.index_file).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(FetchError::Io {
                    path: self.index_file.clone(),
                    source,
                })
            }
        };

        let document: IndexDocument = match serde_json::from_str(&raw) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Corrupt cache index at {:?}: {}", self.index_file, e);
                return Ok(());
            }
        };
        if document.version != INDEX_FORMAT_VERSION {
            warn!(
                "Ignoring cache index {:?} with unsupported version {}",
                self.index_file, document.version
            );
            return Ok(());
        }

        let mut bases = self.bases.lock().await;
        let mut loaded = 0usize;
        for mut entry in document.entries {
            let Some(base) = bases.get_mut(&entry.base_id) else {
                continue;
            };
            let Ok(relative_path) = normalize_relative(&entry.relative_path) else {
                warn!("Dropping cache entry with unsafe path {}", entry.relative_path);
                continue;
            };
            entry.full_path = base.base_path.join(&relative_path);
            entry.relative_path = relative_path;
            base.entries.insert(entry.relative_path.clone(), entry);
            loaded += 1;
        }
        debug!("Loaded {} cache entries from {:?}", loaded, self.index_file);
        Ok(())
    }

    /// Existing entry for `(base_id, relative_path)`, or a new one marked stale.
    ///
    /// A known entry turns stale when its file is gone, or when the file changed
    /// on disk and its MD5 no longer matches. The file is inspected without
    /// holding the index lock.
    pub async fn resolve_entry(&self, base_id: &str, relative_path: &str) -> FetchResult<MetaEntry> {
        let relative_path = normalize_relative(relative_path)?;
        let seen = {
            let mut bases = self.bases.lock().await;
            let base = bases
                .get_mut(base_id)
                .ok_or_else(|| FetchError::UnknownCacheBase(base_id.to_string()))?;
            let full_path = base.base_path.join(&relative_path);

            match base.entries.entry(relative_path.clone()) {
                Entry::Vacant(slot) => {
                    let entry = MetaEntry::new_stale(base_id, &relative_path, full_path);
                    return Ok(slot.insert(entry).clone());
                }
                Entry::Occupied(slot) => {
                    let entry = slot.into_mut();
                    entry.full_path = full_path;
                    if entry.stale {
                        return Ok(entry.clone());
                    }
                    entry.clone()
                }
            }
        };

        let mut checked = seen.clone();
        match file_mtime_millis(&checked.full_path).await {
            None => checked.stale = true,
            Some(file_changed) if file_changed != checked.local_changed_timestamp => {
                let actual = match tokio::fs::read(&checked.full_path).await {
                    Ok(bytes) => hex::encode(Md5::digest(&bytes)),
                    Err(_) => String::new(),
                };
                if actual != checked.md5sum {
                    debug!("Cache entry {}/{} changed on disk", base_id, relative_path);
                    checked.stale = true;
                } else {
                    checked.local_changed_timestamp = file_changed;
                }
            }
            Some(_) => return Ok(seen),
        }

        Ok(self.settle(&seen, checked).await)
    }

    /// Store the outcome of a disk check unless a commit replaced the entry
    /// in the meantime, in which case the newer entry wins.
    async fn settle(&self, seen: &MetaEntry, checked: MetaEntry) -> MetaEntry {
        let mut bases = self.bases.lock().await;
        let Some(stored) = bases
            .get_mut(&checked.base_id)
            .and_then(|base| base.entries.get_mut(&checked.relative_path))
        else {
            return checked;
        };
        if *stored != *seen {
            return stored.clone();
        }
        *stored = checked.clone();
        self.dirty.store(true, Ordering::Release);
        checked
    }

    /// Store a mutated entry. The index is written on the next flush.
    pub async fn update_entry(&self, entry: &MetaEntry) -> FetchResult<()> {
        let mut bases = self.bases.lock().await;
        let base = bases
            .get_mut(&entry.base_id)
            .ok_or_else(|| FetchError::UnknownCacheBase(entry.base_id.clone()))?;
        base.entries
            .insert(entry.relative_path.clone(), entry.clone());
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// Force the entry to be fetched again next time.
    pub async fn evict_entry(&self, entry: &MetaEntry) -> FetchResult<()> {
        let mut bases = self.bases.lock().await;
        let base = bases
            .get_mut(&entry.base_id)
            .ok_or_else(|| FetchError::UnknownCacheBase(entry.base_id.clone()))?;
        let stored = base
            .entries
            .entry(entry.relative_path.clone())
            .or_insert_with(|| entry.clone());
        stored.stale = true;
        self.dirty.store(true, Ordering::Release);
        debug!("Evicted cache entry {}/{}", entry.base_id, entry.relative_path);
        Ok(())
    }

    /// Write the index if anything changed since the last flush.
    pub async fn flush(&self) -> FetchResult<()> {
        let _saving = self.save_lock.lock().await;
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let result = match self.snapshot().await {
            Ok(json) => self.write_index(json).await,
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.dirty.store(true, Ordering::Release);
        }
        result
    }

    async fn snapshot(&self) -> FetchResult<String> {
        let bases = self.bases.lock().await;
        let mut entries: Vec<MetaEntry> = bases
            .values()
            .flat_map(|base| base.entries.values())
            .filter(|entry| !entry.md5sum.is_empty() || !entry.etag.is_empty() || !entry.stale)
            .cloned()
            .collect();
        drop(bases);
        entries.sort_by_key(MetaEntry::key);

        let document = IndexDocument {
            version: INDEX_FORMAT_VERSION.to_string(),
            entries,
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Same commit discipline as downloaded files: staging file, sync, rename.
    async fn write_index(&self, json: String) -> FetchResult<()> {
        if let Some(parent) = self.index_file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| FetchError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let staging = staging_path(&self.index_file);
        if let Err(source) = write_synced(&staging, json.as_bytes()).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(FetchError::Io {
                path: staging,
                source,
            });
        }
        if let Err(source) = tokio::fs::rename(&staging, &self.index_file).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(FetchError::Io {
                path: self.index_file.clone(),
                source,
            });
        }
        debug!("Wrote cache index {:?}", self.index_file);
        Ok(())
    }
}

async fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await
}

/// `/`-separated path inside a namespace. Parent and absolute components
/// would escape the namespace directory and are rejected.
fn normalize_relative(path: &str) -> FetchResult<String> {
    let unified = path.replace('\\', "/");
    let invalid = || FetchError::InvalidCachePath(path.to_string());
    if unified.starts_with('/') {
        return Err(invalid());
    }

    let mut parts = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(invalid()),
            _ => {}
        }
        if !matches!(Path::new(part).components().next(), Some(Component::Normal(_))) {
            return Err(invalid());
        }
        parts.push(part);
    }
    if parts.is_empty() {
        return Err(invalid());
    }
    Ok(parts.join("/"))
}

fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}

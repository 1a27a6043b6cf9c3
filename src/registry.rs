//! Content-addressed asset registry.
//!
//! The registry lives at `_course_metadata/asset_registry.json` inside the
//! course root and maps a byte-content key to the remote file it was
//! uploaded as. Identity is the content digest, never the path: renaming
//! or duplicating a local file must not trigger a re-upload.

use std::collections::BTreeMap;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ReferenceError;
use crate::fingerprint;

pub const REGISTRY_DIR: &str = "_course_metadata";
pub const REGISTRY_FILE: &str = "asset_registry.json";
pub const REGISTRY_VERSION: &str = "1.0";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One tracked asset. `local_paths` accumulates every course-relative
/// path the same bytes have been seen under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecord {
    pub local_paths: Vec<String>,
    #[serde(default)]
    pub remote_file_id: Option<i64>,
    #[serde(default)]
    pub remote_url: Option<String>,
    pub content_hash: String,
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
    pub file_size: u64,
    pub filename: String,
}

/// Remote identity returned by an upload.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDescriptor {
    pub file_id: i64,
    pub url: String,
}

/// A local reference resolved to exactly one file.
#[derive(Debug, Clone)]
pub struct ResolvedAsset {
    /// Registry key, `content-hash-<12 hex>`.
    pub key: String,
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Path relative to the course root, forward slashes.
    pub course_relative: String,
    pub filename: String,
    pub file_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryFile {
    version: String,
    assets: BTreeMap<String, AssetRecord>,
    #[serde(default)]
    path_lookup: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct AssetRegistry {
    course_root: PathBuf,
    assets: BTreeMap<String, AssetRecord>,
    /// course-relative path -> registry key, for reverse lookups.
    path_lookup: BTreeMap<String, String>,
    dirty: bool,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RegistryStats {
    pub assets: usize,
    pub uploaded: usize,
    pub total_bytes: u64,
}

impl AssetRegistry {
    /// Load the registry for a course root. A missing file yields an
    /// empty registry; an unreadable one is reported and replaced rather
    /// than aborting the run.
    pub fn load(course_root: &Path) -> Self {
        let path = Self::registry_path(course_root);
        let mut registry = Self {
            course_root: course_root.to_path_buf(),
            assets: BTreeMap::new(),
            path_lookup: BTreeMap::new(),
            dirty: false,
        };
        match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<RegistryFile>(&text) {
                Ok(file) => {
                    registry.assets = file.assets;
                    registry.path_lookup = file.path_lookup;
                    debug!(assets = registry.assets.len(), "asset registry loaded");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "asset registry unreadable, starting fresh");
                    registry.dirty = true;
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "no asset registry yet");
            }
        }
        registry
    }

    pub fn save(&mut self) -> std::io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let path = Self::registry_path(&self.course_root);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = RegistryFile {
            version: REGISTRY_VERSION.to_string(),
            assets: self.assets.clone(),
            path_lookup: self.path_lookup.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        fs::write(&path, json)?;
        self.dirty = false;
        info!(path = %path.display(), assets = self.assets.len(), "asset registry saved");
        Ok(())
    }

    fn registry_path(course_root: &Path) -> PathBuf {
        course_root.join(REGISTRY_DIR).join(REGISTRY_FILE)
    }

    /// Resolve a markdown asset reference against the item's directory.
    ///
    /// Resolution order:
    /// 1. the reference as a path relative to the item directory (this
    ///    covers explicit `../../assets/...` references too)
    /// 2. a bare filename searched across the course `assets/` tree; more
    ///    than one hit is ambiguous, never guessed at
    pub fn resolve(&self, reference: &str, item_dir: &Path) -> Result<ResolvedAsset, ReferenceError> {
        let direct = item_dir.join(reference);
        if direct.is_file() {
            return self.describe(&direct);
        }
        if !reference.contains('/') {
            let mut candidates = Vec::new();
            collect_by_filename(&self.course_root.join("assets"), reference, &mut candidates);
            candidates.sort();
            match candidates.len() {
                0 => Err(ReferenceError::NotFound {
                    reference: reference.to_string(),
                    item_dir: item_dir.to_path_buf(),
                }),
                1 => self.describe(&candidates[0]),
                _ => Err(ReferenceError::Ambiguous {
                    reference: reference.to_string(),
                    candidates,
                }),
            }
        } else {
            Err(ReferenceError::NotFound {
                reference: reference.to_string(),
                item_dir: item_dir.to_path_buf(),
            })
        }
    }

    fn describe(&self, path: &Path) -> Result<ResolvedAsset, ReferenceError> {
        let bytes = fs::read(path).map_err(|_| ReferenceError::NotFound {
            reference: path.display().to_string(),
            item_dir: self.course_root.clone(),
        })?;
        let key = fingerprint::content_key(&bytes);
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(ResolvedAsset {
            key,
            course_relative: relative_to(&self.course_root, path),
            path: path.to_path_buf(),
            filename,
            file_size: bytes.len() as u64,
        })
    }

    /// Upload an asset at most once. If the content key is already known
    /// with a remote identity, the recorded descriptor is returned and the
    /// callback is never invoked; a new local path for known bytes is
    /// recorded without re-uploading.
    pub async fn ensure_uploaded<F, Fut>(
        &mut self,
        resolved: &ResolvedAsset,
        upload: F,
    ) -> Result<RemoteDescriptor, BoxError>
    where
        F: FnOnce(String, Vec<u8>) -> Fut,
        Fut: Future<Output = Result<RemoteDescriptor, BoxError>>,
    {
        if let Some(record) = self.assets.get_mut(&resolved.key) {
            if let (Some(id), Some(url)) = (record.remote_file_id, record.remote_url.clone()) {
                if !record.local_paths.contains(&resolved.course_relative) {
                    record.local_paths.push(resolved.course_relative.clone());
                    self.path_lookup
                        .insert(resolved.course_relative.clone(), resolved.key.clone());
                    self.dirty = true;
                }
                debug!(key = %resolved.key, file_id = id, "asset already uploaded, skipping");
                return Ok(RemoteDescriptor { file_id: id, url });
            }
        }

        let bytes = fs::read(&resolved.path)?;
        info!(key = %resolved.key, filename = %resolved.filename, size = bytes.len(), "uploading asset");
        let descriptor = upload(resolved.filename.clone(), bytes).await?;
        self.record_upload(resolved, &descriptor);
        Ok(descriptor)
    }

    fn record_upload(&mut self, resolved: &ResolvedAsset, descriptor: &RemoteDescriptor) {
        let record = self
            .assets
            .entry(resolved.key.clone())
            .or_insert_with(|| AssetRecord {
                local_paths: Vec::new(),
                remote_file_id: None,
                remote_url: None,
                content_hash: resolved
                    .key
                    .trim_start_matches(fingerprint::CONTENT_KEY_PREFIX)
                    .to_string(),
                uploaded_at: None,
                file_size: resolved.file_size,
                filename: resolved.filename.clone(),
            });
        if !record.local_paths.contains(&resolved.course_relative) {
            record.local_paths.push(resolved.course_relative.clone());
        }
        record.remote_file_id = Some(descriptor.file_id);
        record.remote_url = Some(descriptor.url.clone());
        record.uploaded_at = Some(Utc::now());
        self.path_lookup
            .insert(resolved.course_relative.clone(), resolved.key.clone());
        self.dirty = true;
    }

    /// Remote URL for an asset reference, if it has been uploaded.
    pub fn remote_url_for(&self, reference: &str, item_dir: &Path) -> Option<String> {
        let resolved = self.resolve(reference, item_dir).ok()?;
        self.assets
            .get(&resolved.key)
            .and_then(|r| r.remote_url.clone())
    }

    /// Reverse lookup by remote file id, used when importing platform
    /// HTML back into author markdown.
    pub fn path_for_remote_id(&self, file_id: i64) -> Option<&str> {
        self.assets
            .values()
            .find(|r| r.remote_file_id == Some(file_id))
            .and_then(|r| r.local_paths.first())
            .map(String::as_str)
    }

    /// Drop records whose local files have all disappeared. Returns the
    /// number of records pruned.
    pub fn prune_missing(&mut self) -> usize {
        let root = self.course_root.clone();
        let before = self.assets.len();
        self.assets.retain(|_, record| {
            record
                .local_paths
                .iter()
                .any(|p| root.join(p).is_file())
        });
        let pruned = before - self.assets.len();
        if pruned > 0 {
            let live: std::collections::BTreeSet<&String> = self.assets.keys().collect();
            self.path_lookup.retain(|_, key| live.contains(key));
            self.dirty = true;
            info!(pruned, "pruned registry records with no surviving local file");
        }
        pruned
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            assets: self.assets.len(),
            uploaded: self
                .assets
                .values()
                .filter(|r| r.remote_file_id.is_some())
                .count(),
            total_bytes: self.assets.values().map(|r| r.file_size).sum(),
        }
    }

    pub fn record(&self, key: &str) -> Option<&AssetRecord> {
        self.assets.get(key)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

fn collect_by_filename(dir: &Path, filename: &str, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_by_filename(&path, filename, out);
        } else if path.file_name().map(|n| n == filename).unwrap_or(false) {
            out.push(path);
        }
    }
}

fn relative_to(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

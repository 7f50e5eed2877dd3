//! kenal-store — durable enrollment registry.
//!
//! Holds the primary template for each enrolled identity. The on-disk layout
//! is a JSON index (`registry.json`) plus one PNG patch per identity; the
//! index is rewritten through a temp file after every mutation, so a crash
//! can lose at most the mutation in flight.
//!
//! Registry membership is the sole source of truth for "is this identity
//! enrolled". When several processes share one registry directory, writes
//! are last-write-wins and in-memory copies can diverge.

use chrono::{DateTime, Utc};
use image::GrayImage;
use kenal_core::types::{FaceTemplate, Template, TEMPLATE_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const INDEX_FILE: &str = "registry.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("registry unavailable: {0}")]
    Io(#[from] std::io::Error),
    #[error("registry index is corrupt: {0}")]
    Index(#[from] serde_json::Error),
    #[error("template image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("stored template {file} has the wrong dimensions")]
    BadTemplate { file: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexEntry {
    template_file: String,
    enrolled_at: DateTime<Utc>,
    #[serde(default)]
    last_used: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    identities: BTreeMap<String, IndexEntry>,
}

struct Entry {
    record: FaceTemplate,
    template_file: String,
}

/// Durable registry of enrolled face templates, keyed by identity.
///
/// Each identity holds at most one primary template; re-enrollment replaces
/// it and removes the superseded patch file.
pub struct TemplateStore {
    dir: PathBuf,
    entries: BTreeMap<String, Entry>,
}

impl TemplateStore {
    /// Open (or create) the registry rooted at `dir`, loading every usable
    /// template into memory. Index entries whose patch file is missing or
    /// unreadable are skipped with a warning.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let index_path = dir.join(INDEX_FILE);
        let index: IndexFile = if index_path.exists() {
            serde_json::from_str(&fs::read_to_string(&index_path)?)?
        } else {
            IndexFile::default()
        };

        let mut entries = BTreeMap::new();
        for (identity, meta) in index.identities {
            match load_patch(&dir.join(&meta.template_file)) {
                Ok(template) => {
                    entries.insert(
                        identity.clone(),
                        Entry {
                            record: FaceTemplate {
                                identity,
                                template,
                                enrolled_at: meta.enrolled_at,
                                last_used: meta.last_used,
                                metadata: meta.metadata,
                            },
                            template_file: meta.template_file,
                        },
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        identity = %identity,
                        file = %meta.template_file,
                        error = %err,
                        "skipping identity with unreadable template"
                    );
                }
            }
        }

        tracing::info!(count = entries.len(), dir = %dir.display(), "registry loaded");
        Ok(Self { dir, entries })
    }

    /// Store (or replace) the primary template for an identity and flush.
    pub fn enroll(
        &mut self,
        identity: &str,
        template: Template,
        metadata: serde_json::Value,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let file = template_filename(identity, now);
        write_patch(&self.dir.join(&file), &template)?;

        let previous = self.entries.insert(
            identity.to_string(),
            Entry {
                record: FaceTemplate {
                    identity: identity.to_string(),
                    template,
                    enrolled_at: now,
                    last_used: None,
                    metadata,
                },
                template_file: file.clone(),
            },
        );
        if let Some(prev) = previous {
            if prev.template_file != file {
                if let Err(err) = fs::remove_file(self.dir.join(&prev.template_file)) {
                    tracing::warn!(
                        file = %prev.template_file,
                        error = %err,
                        "failed to remove superseded template file"
                    );
                }
            }
        }

        self.flush()?;
        tracing::info!(identity, file = %file, "identity enrolled");
        Ok(())
    }

    /// Record a successful match against an identity and flush.
    pub fn touch(&mut self, identity: &str) -> Result<(), StoreError> {
        if let Some(entry) = self.entries.get_mut(identity) {
            entry.record.last_used = Some(Utc::now());
            self.flush()?;
        }
        Ok(())
    }

    /// Remove an identity and its patch file. Returns false when the
    /// identity was not enrolled.
    pub fn remove(&mut self, identity: &str) -> Result<bool, StoreError> {
        match self.entries.remove(identity) {
            Some(entry) => {
                if let Err(err) = fs::remove_file(self.dir.join(&entry.template_file)) {
                    tracing::warn!(
                        file = %entry.template_file,
                        error = %err,
                        "failed to remove template file"
                    );
                }
                self.flush()?;
                tracing::info!(identity, "identity removed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn get(&self, identity: &str) -> Option<&FaceTemplate> {
        self.entries.get(identity).map(|entry| &entry.record)
    }

    /// Enrolled identities in lexicographic order.
    pub fn identities(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// All records in lexicographic identity order.
    pub fn records(&self) -> Vec<&FaceTemplate> {
        self.entries.values().map(|entry| &entry.record).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rewrite the JSON index through a temp file so a crash never leaves a
    /// half-written index behind.
    fn flush(&self) -> Result<(), StoreError> {
        let index = IndexFile {
            identities: self
                .entries
                .iter()
                .map(|(identity, entry)| {
                    (
                        identity.clone(),
                        IndexEntry {
                            template_file: entry.template_file.clone(),
                            enrolled_at: entry.record.enrolled_at,
                            last_used: entry.record.last_used,
                            metadata: entry.record.metadata.clone(),
                        },
                    )
                })
                .collect(),
        };

        let tmp = self.dir.join(format!("{INDEX_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_vec_pretty(&index)?)?;
        fs::rename(&tmp, self.dir.join(INDEX_FILE))?;
        Ok(())
    }
}

/// `<identity>_<YYYYmmdd_HHMMSS>.png`, with the identity sanitized so it is
/// safe as a filename stem.
fn template_filename(identity: &str, at: DateTime<Utc>) -> String {
    let stem: String = identity
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{stem}_{}.png", at.format("%Y%m%d_%H%M%S"))
}

fn load_patch(path: &Path) -> Result<Template, StoreError> {
    let img = image::open(path)?.to_luma8();
    if img.dimensions() != (TEMPLATE_SIZE, TEMPLATE_SIZE) {
        return Err(StoreError::BadTemplate {
            file: path.display().to_string(),
        });
    }
    Template::from_pixels(img.into_raw()).map_err(|_| StoreError::BadTemplate {
        file: path.display().to_string(),
    })
}

fn write_patch(path: &Path, template: &Template) -> Result<(), StoreError> {
    let img = GrayImage::from_raw(TEMPLATE_SIZE, TEMPLATE_SIZE, template.pixels().to_vec())
        .ok_or_else(|| StoreError::BadTemplate {
            file: path.display().to_string(),
        })?;
    img.save_with_format(path, image::ImageFormat::Png)?;
    Ok(())
}

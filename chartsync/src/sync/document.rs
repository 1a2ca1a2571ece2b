//! On-disk manifest document.
//!
//! The published layout keeps its historical Spanish keys:
//! `{"info": {...}, "archivos": [{"nombre", "ruta_relativa", "id_drive", "hash", "tamano"}]}`.
//! A bare array of records is accepted as well.

use std::io;
use std::path::Path;
use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

use super::manifest::ManifestEntry;

pub const DEFAULT_PROJECT_NAME: &str = "Clone Hero Sync";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestInfo {
    #[serde(rename = "nombre_proyecto", default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(rename = "ultima_actualizacion", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(rename = "total_archivos", default, skip_serializing_if = "Option::is_none")]
    pub total_files: Option<u64>,
    #[serde(rename = "tiempo_escaneo_seg", default, skip_serializing_if = "Option::is_none")]
    pub scan_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRecord {
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "ruta_relativa", default)]
    pub relative_path: String,
    #[serde(rename = "id_drive", default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    // Older documents carried the Drive id under `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(rename = "tamano", default, deserialize_with = "size_from_any")]
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestDocument {
    #[serde(default)]
    pub info: ManifestInfo,
    #[serde(rename = "archivos")]
    pub files: Vec<ManifestRecord>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DocumentRepr {
    Wrapped(ManifestDocument),
    Bare(Vec<ManifestRecord>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeRepr {
    Number(u64),
    Text(String),
}

fn size_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match Option::<SizeRepr>::deserialize(deserializer)? {
        None => Ok(0),
        Some(SizeRepr::Number(value)) => Ok(value),
        Some(SizeRepr::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(0);
            }
            text.parse()
                .map_err(|_| D::Error::custom(format!("invalid file size {text:?}")))
        }
    }
}

impl ManifestDocument {
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match serde_json::from_slice::<DocumentRepr>(bytes)? {
            DocumentRepr::Wrapped(document) => document,
            DocumentRepr::Bare(files) => Self {
                info: ManifestInfo::default(),
                files,
            },
        })
    }

    pub fn from_entries(entries: &[ManifestEntry], scan_time: Duration) -> Self {
        let files = entries
            .iter()
            .map(|entry| ManifestRecord {
                name: entry.name.clone(),
                relative_path: entry.relative_path.clone(),
                remote_id: Some(entry.remote_id.clone()),
                id: None,
                hash: entry.content_hash.clone(),
                size: entry.size,
            })
            .collect::<Vec<_>>();
        Self {
            info: ManifestInfo {
                project_name: Some(DEFAULT_PROJECT_NAME.to_string()),
                updated_at: OffsetDateTime::now_utc().format(&Rfc3339).ok(),
                total_files: Some(files.len() as u64),
                scan_seconds: Some((scan_time.as_secs_f64() * 100.0).round() / 100.0),
            },
            files,
        }
    }

    pub fn into_entries(self) -> Vec<ManifestEntry> {
        self.files
            .into_iter()
            .filter_map(|record| {
                let Some(remote_id) = record.remote_id.or(record.id).filter(|id| !id.is_empty())
                else {
                    warn!(name = %record.name, path = %record.relative_path, "manifest record has no remote id, skipping");
                    return None;
                };
                Some(ManifestEntry::new(
                    record.name,
                    &record.relative_path,
                    remote_id,
                    record.hash,
                    record.size,
                ))
            })
            .collect()
    }

    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let encoded = serde_json::to_vec_pretty(self).map_err(io::Error::other)?;
        std::fs::write(path, encoded)
    }
}

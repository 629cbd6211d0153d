use crate::error::GateError;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::warn;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const MANIFEST_PREV_FILE: &str = "manifest.json.prev";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMeta {
    pub filename: String,
    pub rows: u64,
    pub sha256_hex: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TableEntry {
    pub chunks: Vec<ChunkMeta>,
}

impl TableEntry {
    pub fn row_count(&self) -> u64 {
        self.chunks.iter().map(|c| c.rows).sum()
    }
}

/// Root of a file store: which chunks make up which physical table.
/// Replacing this file is the commit point of every store mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StoreManifest {
    pub generation: u64,
    pub next_chunk_id: u64,
    pub tables: BTreeMap<String, TableEntry>,
}

impl StoreManifest {
    pub fn referenced_files(&self) -> impl Iterator<Item = &str> {
        self.tables
            .values()
            .flat_map(|t| t.chunks.iter().map(|c| c.filename.as_str()))
    }
}

/// On-disk form of a manifest. The MAC travels inside the same file as the
/// manifest it covers, so every file on disk verifies on its own.
#[derive(Debug, Serialize, Deserialize)]
struct ManifestEnvelope {
    manifest: StoreManifest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hmac_sha256_hex: Option<String>,
}

/// Publishes `manifest` as the primary and `previous` as the fallback copy.
///
/// Both files are written to a temp file and renamed into place, previous
/// first. A crash between the renames leaves two readable generations.
pub fn write_manifest_atomic(
    manifest: &StoreManifest,
    previous: Option<&StoreManifest>,
    dir: &Path,
    signing_key: Option<&[u8]>,
) -> Result<(), GateError> {
    fs::create_dir_all(dir)?;
    if let Some(previous) = previous {
        persist_envelope(previous, &dir.join(MANIFEST_PREV_FILE), dir, signing_key)?;
    }
    persist_envelope(manifest, &dir.join(MANIFEST_FILE), dir, signing_key)?;
    fsync_dir(dir)?;
    Ok(())
}

fn persist_envelope(
    manifest: &StoreManifest,
    target: &Path,
    dir: &Path,
    signing_key: Option<&[u8]>,
) -> Result<(), GateError> {
    let hmac_sha256_hex = match signing_key {
        Some(key) => Some(hmac_hex(key, &canonical_bytes(manifest)?)?),
        None => None,
    };
    let envelope = ManifestEnvelope {
        manifest: manifest.clone(),
        hmac_sha256_hex,
    };
    let bytes =
        serde_json::to_vec_pretty(&envelope).map_err(|e| GateError::Encode(e.to_string()))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| GateError::Io(e.error))?;
    Ok(())
}

/// Loads the current manifest, falling back to the previous one when the
/// primary is unreadable or fails verification. A directory without any
/// manifest is a new, empty store.
pub fn load_manifest(dir: &Path, signing_key: Option<&[u8]>) -> Result<StoreManifest, GateError> {
    let primary = dir.join(MANIFEST_FILE);
    let prev = dir.join(MANIFEST_PREV_FILE);
    if !primary.exists() && !prev.exists() {
        return Ok(StoreManifest::default());
    }
    match try_read_manifest(&primary, signing_key) {
        Ok(m) => Ok(m),
        Err(primary_err) => {
            warn!(error = %primary_err, "store manifest unreadable, trying previous generation");
            try_read_manifest(&prev, signing_key).map_err(|_| GateError::IntegrityError {
                message: format!("manifest unavailable: {primary_err}"),
            })
        }
    }
}

/// The fallback generation, if present and verifiable. Its chunks stay on
/// disk until a newer generation replaces it.
pub fn load_previous_manifest(dir: &Path, signing_key: Option<&[u8]>) -> Option<StoreManifest> {
    let prev = dir.join(MANIFEST_PREV_FILE);
    if !prev.exists() {
        return None;
    }
    match try_read_manifest(&prev, signing_key) {
        Ok(m) => Some(m),
        Err(err) => {
            warn!(error = %err, "previous store manifest unreadable");
            None
        }
    }
}

fn try_read_manifest(path: &Path, signing_key: Option<&[u8]>) -> Result<StoreManifest, GateError> {
    let bytes = fs::read(path)?;
    let envelope: ManifestEnvelope =
        serde_json::from_slice(&bytes).map_err(|e| GateError::Decode(e.to_string()))?;
    if let Some(key) = signing_key {
        let expected = envelope
            .hmac_sha256_hex
            .as_deref()
            .ok_or_else(|| GateError::IntegrityError {
                message: "manifest hmac missing".into(),
            })?;
        verify_manifest_hmac(key, &canonical_bytes(&envelope.manifest)?, expected)?;
    }
    Ok(envelope.manifest)
}

/// Compact encoding the MAC is computed over. Struct fields and `BTreeMap`
/// keys serialize in a fixed order, so a decoded manifest re-encodes to the
/// same bytes.
fn canonical_bytes(manifest: &StoreManifest) -> Result<Vec<u8>, GateError> {
    serde_json::to_vec(manifest).map_err(|e| GateError::Encode(e.to_string()))
}

fn verify_manifest_hmac(key: &[u8], bytes: &[u8], expected: &str) -> Result<(), GateError> {
    let expected_bytes = hex::decode(expected.trim()).map_err(|_| GateError::IntegrityError {
        message: "manifest hmac must be hex".into(),
    })?;
    let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(|e| GateError::InvalidConfig {
        message: format!("invalid hmac key: {e}"),
    })?;
    mac.update(bytes);
    mac.verify_slice(&expected_bytes)
        .map_err(|_| GateError::IntegrityError {
            message: "manifest hmac mismatch".into(),
        })
}

fn hmac_hex(key: &[u8], bytes: &[u8]) -> Result<String, GateError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(|e| GateError::InvalidConfig {
        message: format!("invalid hmac key: {e}"),
    })?;
    mac.update(bytes);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub(crate) fn fsync_dir(path: &Path) -> Result<(), GateError> {
    let dir = fs::File::open(path)?;
    dir.sync_all()?;
    Ok(())
}

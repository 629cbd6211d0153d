use crate::catalog::types::Row;
use crate::config::GateConfig;
use crate::error::GateError;
use crate::storage::manifest::{
    ChunkMeta, MANIFEST_FILE, StoreManifest, TableEntry, fsync_dir, load_manifest,
    load_previous_manifest, write_manifest_atomic,
};
use crate::storage::{
    DefaultTableNaming, FaultInjector, FaultPoint, MergeOutcome, RowStore, TableNaming, TableRef,
    collect_columns, table_not_found,
};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

const CHUNK_PREFIX: &str = "chunk_";
const CHUNK_SUFFIX: &str = ".rows.zst";

/// Directory-backed row store.
///
/// Rows live in immutable chunk files (msgpack, zstd-compressed, SHA-256
/// recorded in the manifest). A table is a list of chunk references in
/// `manifest.json`. Each mutation writes its new chunks first and then
/// atomically replaces the manifest, so a crash at any point leaves the
/// previous manifest generation, and with it every table, intact. The
/// generation before the current one is kept as a fallback copy, and its
/// chunks are kept with it. Chunks neither copy references are removed on open.
#[derive(Debug)]
pub struct FileRowStore {
    dir: PathBuf,
    naming: Arc<dyn TableNaming>,
    manifest: Mutex<StoreManifest>,
    /// Chunks referenced by the fallback manifest only. Deleted once the
    /// next swap replaces that fallback.
    fallback_only: Mutex<BTreeSet<String>>,
    signing_key: Option<Arc<Zeroizing<Vec<u8>>>>,
    compression_level: i32,
    faults: FaultInjector,
}

impl FileRowStore {
    pub fn open(dir: &Path, config: &GateConfig) -> Result<Self, GateError> {
        Self::open_with_naming(dir, config, Arc::new(DefaultTableNaming))
    }

    pub fn open_with_naming(
        dir: &Path,
        config: &GateConfig,
        naming: Arc<dyn TableNaming>,
    ) -> Result<Self, GateError> {
        fs::create_dir_all(dir)?;
        let manifest = load_manifest(dir, config.hmac_key())?;
        let previous = load_previous_manifest(dir, config.hmac_key())
            .filter(|prev| prev.generation < manifest.generation);
        let fallback_only = previous
            .as_ref()
            .map(|prev| unique_to(prev, &manifest))
            .unwrap_or_default();
        let removed = remove_unreferenced_chunks(dir, &manifest, &fallback_only)?;
        info!(
            dir = %dir.display(),
            generation = manifest.generation,
            tables = manifest.tables.len(),
            orphan_chunks_removed = removed,
            "file row store opened"
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            naming,
            manifest: Mutex::new(manifest),
            fallback_only: Mutex::new(fallback_only),
            signing_key: config.manifest_hmac_key.clone(),
            compression_level: config.chunk_compression_level,
            faults: FaultInjector::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub fn generation(&self) -> u64 {
        self.manifest.lock().generation
    }

    /// Physical table name and row count for every table in the manifest.
    pub fn table_summaries(&self) -> Vec<(String, u64)> {
        self.manifest
            .lock()
            .tables
            .iter()
            .map(|(name, entry)| (name.clone(), entry.row_count()))
            .collect()
    }

    fn signing_key(&self) -> Option<&[u8]> {
        self.signing_key.as_ref().map(|k| &***k as &[u8])
    }

    /// Runs `f` against a copy of the manifest, then publishes the copy as
    /// the next generation. Nothing is visible unless the manifest swap succeeds.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StoreManifest) -> Result<T, GateError>,
    ) -> Result<T, GateError> {
        let mut current = self.manifest.lock();
        let mut next = current.clone();
        let out = f(&mut next)?;
        self.faults.check(FaultPoint::ManifestSwap)?;
        next.generation += 1;
        let previous = (current.generation > 0).then_some(&*current);
        write_manifest_atomic(&next, previous, &self.dir, self.signing_key())?;
        let released =
            std::mem::replace(&mut *self.fallback_only.lock(), unique_to(&current, &next));
        *current = next;
        drop(current);
        for filename in released {
            if let Err(err) = fs::remove_file(self.dir.join(&filename)) {
                warn!(file = %filename, error = %err, "failed to remove released chunk");
            }
        }
        Ok(out)
    }

    fn write_chunk(&self, manifest: &mut StoreManifest, rows: &[Row]) -> Result<ChunkMeta, GateError> {
        let id = manifest.next_chunk_id;
        manifest.next_chunk_id += 1;
        let filename = format!("{CHUNK_PREFIX}{id:016}{CHUNK_SUFFIX}");

        let encoded = rmp_serde::to_vec(rows).map_err(|e| GateError::Encode(e.to_string()))?;
        let compressed = zstd::stream::encode_all(encoded.as_slice(), self.compression_level)?;
        let sha256_hex = hex::encode(Sha256::digest(&compressed));

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&compressed)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.dir.join(&filename))
            .map_err(|e| GateError::Io(e.error))?;
        fsync_dir(&self.dir)?;
        debug!(file = %filename, rows = rows.len(), "chunk written");

        Ok(ChunkMeta {
            filename,
            rows: rows.len() as u64,
            sha256_hex,
            size_bytes: compressed.len() as u64,
            columns: collect_columns(rows),
        })
    }

    fn read_chunk(&self, meta: &ChunkMeta) -> Result<Vec<Row>, GateError> {
        let bytes = fs::read(self.dir.join(&meta.filename))?;
        let actual = hex::encode(Sha256::digest(&bytes));
        if actual != meta.sha256_hex {
            return Err(GateError::IntegrityError {
                message: format!("chunk {} checksum mismatch", meta.filename),
            });
        }
        let decoded = zstd::stream::decode_all(bytes.as_slice())?;
        rmp_serde::from_slice(&decoded).map_err(|e| GateError::Decode(e.to_string()))
    }

    fn read_entry(&self, table: &TableRef, limit: Option<usize>) -> Result<Vec<Row>, GateError> {
        let manifest = self.manifest.lock();
        let name = self.naming.physical_name(table);
        let entry = manifest
            .tables
            .get(&name)
            .ok_or_else(|| table_not_found(table))?;
        let mut out = Vec::new();
        for chunk in &entry.chunks {
            if limit.is_some_and(|l| out.len() >= l) {
                break;
            }
            out.extend(self.read_chunk(chunk)?);
        }
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        Ok(out)
    }
}

/// Store-level I/O failures surface as `StoreUnavailable`.
fn storage_failure(err: GateError) -> GateError {
    match err {
        GateError::Io(e) => GateError::unavailable(e.to_string()),
        other => other,
    }
}

fn is_chunk_file(name: &str) -> bool {
    name.starts_with(CHUNK_PREFIX) && name.ends_with(CHUNK_SUFFIX)
}

/// Chunks `older` references that `newer` no longer does. Chunk files are
/// never reused, so once such a file is unreferenced it stays unreferenced.
fn unique_to(older: &StoreManifest, newer: &StoreManifest) -> BTreeSet<String> {
    let live: BTreeSet<&str> = newer.referenced_files().collect();
    older
        .referenced_files()
        .filter(|f| !live.contains(f))
        .map(str::to_string)
        .collect()
}

fn remove_unreferenced_chunks(
    dir: &Path,
    manifest: &StoreManifest,
    fallback_only: &BTreeSet<String>,
) -> Result<usize, GateError> {
    let live: BTreeSet<&str> = manifest.referenced_files().collect();
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !is_chunk_file(&name) || live.contains(name.as_str()) || fallback_only.contains(&name) {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(err) => warn!(file = %name, error = %err, "failed to remove orphan chunk"),
        }
    }
    Ok(removed)
}

impl RowStore for FileRowStore {
    fn location_tag(&self) -> String {
        format!("file:{}", self.dir.display())
    }

    fn create_table_if_missing(&self, table: &TableRef) -> Result<bool, GateError> {
        self.faults.check(FaultPoint::CreateTable)?;
        let name = self.naming.physical_name(table);
        if self.manifest.lock().tables.contains_key(&name) {
            return Ok(false);
        }
        self.mutate(|m| Ok(m.tables.insert(name, TableEntry::default()).is_none()))
            .map_err(storage_failure)
    }

    fn table_exists(&self, table: &TableRef) -> Result<bool, GateError> {
        let name = self.naming.physical_name(table);
        Ok(self.manifest.lock().tables.contains_key(&name))
    }

    fn append_rows(&self, table: &TableRef, rows: &[Row]) -> Result<(), GateError> {
        let name = self.naming.physical_name(table);
        self.mutate(|m| {
            if !m.tables.contains_key(&name) {
                return Err(table_not_found(table));
            }
            if rows.is_empty() {
                return Ok(());
            }
            let chunk = self.write_chunk(m, rows)?;
            self.faults.check(FaultPoint::AppendRows)?;
            if let Some(entry) = m.tables.get_mut(&name) {
                entry.chunks.push(chunk);
            }
            Ok(())
        })
        .map_err(storage_failure)
    }

    fn count_rows(&self, table: &TableRef) -> Result<u64, GateError> {
        self.faults.check(FaultPoint::CountRows)?;
        let name = self.naming.physical_name(table);
        self.manifest
            .lock()
            .tables
            .get(&name)
            .map(TableEntry::row_count)
            .ok_or_else(|| table_not_found(table))
    }

    fn sample_rows(&self, table: &TableRef, limit: usize) -> Result<Vec<Row>, GateError> {
        self.faults.check(FaultPoint::ReadRows)?;
        self.read_entry(table, Some(limit)).map_err(storage_failure)
    }

    fn read_rows(&self, table: &TableRef) -> Result<Vec<Row>, GateError> {
        self.faults.check(FaultPoint::ReadRows)?;
        self.read_entry(table, None).map_err(storage_failure)
    }

    fn column_names(&self, table: &TableRef) -> Result<Vec<String>, GateError> {
        let name = self.naming.physical_name(table);
        let manifest = self.manifest.lock();
        let entry = manifest
            .tables
            .get(&name)
            .ok_or_else(|| table_not_found(table))?;
        let columns: BTreeSet<&String> = entry.chunks.iter().flat_map(|c| &c.columns).collect();
        Ok(columns.into_iter().cloned().collect())
    }

    fn drop_table(&self, table: &TableRef) -> Result<bool, GateError> {
        self.faults.check(FaultPoint::DropTable)?;
        let name = self.naming.physical_name(table);
        if !self.manifest.lock().tables.contains_key(&name) {
            return Ok(false);
        }
        self.mutate(|m| Ok(m.tables.remove(&name).is_some()))
            .map_err(storage_failure)
    }

    fn replace_rows(&self, table: &TableRef, rows: &[Row]) -> Result<(), GateError> {
        let name = self.naming.physical_name(table);
        self.mutate(|m| {
            let mut entry = TableEntry::default();
            if !rows.is_empty() {
                entry.chunks.push(self.write_chunk(m, rows)?);
            }
            self.faults.check(FaultPoint::ReplaceRows)?;
            m.tables.insert(name, entry);
            Ok(())
        })
        .map_err(storage_failure)
    }

    fn merge_staging(
        &self,
        canonical: &TableRef,
        staging: &TableRef,
    ) -> Result<MergeOutcome, GateError> {
        let canonical_name = self.naming.physical_name(canonical);
        let staging_name = self.naming.physical_name(staging);
        self.mutate(|m| {
            let staged = m
                .tables
                .remove(&staging_name)
                .ok_or_else(|| table_not_found(staging))?;
            let rows_appended = staged.row_count();
            let target = m.tables.entry(canonical_name).or_default();
            target.chunks.extend(staged.chunks);
            self.faults.check(FaultPoint::MergeApply)?;
            Ok(MergeOutcome {
                rows_appended,
                canonical_rows: target.row_count(),
            })
        })
        .map_err(storage_failure)
    }

    fn list_tables(&self, dataset_id: Option<&str>) -> Result<Vec<TableRef>, GateError> {
        let manifest = self.manifest.lock();
        let mut out: Vec<TableRef> = manifest
            .tables
            .keys()
            .filter_map(|name| self.naming.parse(name))
            .filter(|t| dataset_id.is_none_or(|d| t.dataset_id == d))
            .collect();
        out.sort();
        Ok(out)
    }
}

/// True when `dir` holds a file store manifest.
pub fn is_store_dir(dir: &Path) -> bool {
    dir.join(MANIFEST_FILE).exists()
}

//! Flat L2 vector store with hot-reload.
//!
//! Persistent, append-mostly map from internal sequence -> d-dimensional
//! vector, plus a sidecar mapping internal sequence -> chunk id. Exact
//! (not approximate) k-nearest-neighbor search by L2 distance, since the
//! on-disk format must be auditable and bit-reproducible across save/load.

use parking_lot::Mutex;
use rayon::prelude::*;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

const MAGIC: &[u8; 4] = b"DIV1";
const VERSION: u32 = 1;
const TOMBSTONE: i64 = -1;

#[derive(Debug, thiserror::Error)]
pub enum VectorIndexError {
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("vector index corrupt: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, VectorIndexError>;

struct Inner {
    dim: usize,
    vectors: Vec<f32>, // flat, row-major: count * dim
    chunk_ids: Vec<i64>, // TOMBSTONE for removed
    last_known_mtime: Option<SystemTime>,
}

impl Inner {
    fn empty(dim: usize) -> Self {
        Self {
            dim,
            vectors: Vec::new(),
            chunk_ids: Vec::new(),
            last_known_mtime: None,
        }
    }

    fn len(&self) -> usize {
        self.chunk_ids.len()
    }
}

/// A persistent flat L2 vector index for a single scope (e.g. one tenant or
/// the whole corpus — the owning process decides the scope granularity).
pub struct VectorIndex {
    path: PathBuf,
    sidecar_path: PathBuf,
    inner: Mutex<Inner>,
    save_mutex: Mutex<()>,
    reload_count: AtomicU64,
}

impl VectorIndex {
    /// Opens (or lazily creates on first save) the index rooted at
    /// `<dir>/<scope>.vec` and `<dir>/<scope>.sid`.
    pub fn open(dir: &Path, scope: &str, dim: usize) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{scope}.vec"));
        let sidecar_path = dir.join(format!("{scope}.sid"));

        let inner = if path.exists() {
            Self::load_from(&path, &sidecar_path)?
        } else {
            Inner::empty(dim)
        };

        Ok(Self {
            path,
            sidecar_path,
            inner: Mutex::new(inner),
            save_mutex: Mutex::new(()),
            reload_count: AtomicU64::new(0),
        })
    }

    pub fn dim(&self) -> usize {
        self.inner.lock().dim
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of times the in-memory copy has been reloaded from disk due to
    /// an mtime advance. Exposed for the boundary-behavior instrumentation
    /// counter named in the testable-properties section.
    pub fn reload_count(&self) -> u64 {
        self.reload_count.load(Ordering::Relaxed)
    }

    /// Appends vectors in order, returning the assigned internal sequences.
    /// Not persisted until `save()` is called.
    pub fn append(&self, vectors: &[Vec<f32>], chunk_ids: &[i64]) -> Result<Vec<usize>> {
        assert_eq!(vectors.len(), chunk_ids.len());
        let mut inner = self.inner.lock();
        let dim = inner.dim;
        let mut assigned = Vec::with_capacity(vectors.len());

        for (vector, &chunk_id) in vectors.iter().zip(chunk_ids) {
            if vector.len() != dim {
                return Err(VectorIndexError::DimensionMismatch {
                    expected: dim,
                    actual: vector.len(),
                });
            }
            let seq = inner.len();
            inner.vectors.extend_from_slice(vector);
            inner.chunk_ids.push(chunk_id);
            assigned.push(seq);
        }

        Ok(assigned)
    }

    /// Marks the sidecar entries for the given chunk ids as tombstoned.
    /// Tombstoned sequences are skipped by `search` until a `compact()`.
    pub fn remove(&self, chunk_ids: &[i64]) {
        let mut inner = self.inner.lock();
        let targets: std::collections::HashSet<i64> = chunk_ids.iter().copied().collect();
        for id in inner.chunk_ids.iter_mut() {
            if targets.contains(id) {
                *id = TOMBSTONE;
            }
        }
    }

    pub fn tombstone_ratio(&self) -> f32 {
        let inner = self.inner.lock();
        if inner.chunk_ids.is_empty() {
            return 0.0;
        }
        let tombstoned = inner.chunk_ids.iter().filter(|&&id| id == TOMBSTONE).count();
        tombstoned as f32 / inner.chunk_ids.len() as f32
    }

    /// Rebuilds the index without tombstoned entries. Quiesces writers for
    /// the duration of the (in-memory, no I/O) rebuild by holding the same
    /// mutex `save()` uses; concurrent searches continue against the
    /// pre-compaction on-disk file until the atomic rename lands.
    pub fn compact(&self) -> Result<()> {
        let _save_guard = self.save_mutex.lock();
        {
            let mut inner = self.inner.lock();
            let dim = inner.dim;
            let mut new_vectors = Vec::new();
            let mut new_chunk_ids = Vec::new();
            for seq in 0..inner.len() {
                if inner.chunk_ids[seq] == TOMBSTONE {
                    continue;
                }
                new_vectors.extend_from_slice(&inner.vectors[seq * dim..(seq + 1) * dim]);
                new_chunk_ids.push(inner.chunk_ids[seq]);
            }
            inner.vectors = new_vectors;
            inner.chunk_ids = new_chunk_ids;
        }
        self.save_locked()
    }

    /// Writes index + sidecar atomically (write to `*.tmp`, fsync, rename).
    pub fn save(&self) -> Result<()> {
        let _guard = self.save_mutex.lock();
        self.save_locked()
    }

    fn save_locked(&self) -> Result<()> {
        let inner = self.inner.lock();

        let tmp_vec = self.path.with_extension("vec.tmp");
        {
            let mut f = fs::File::create(&tmp_vec)?;
            f.write_all(MAGIC)?;
            f.write_all(&VERSION.to_le_bytes())?;
            f.write_all(&(inner.dim as u32).to_le_bytes())?;
            f.write_all(&(inner.len() as u64).to_le_bytes())?;
            for value in &inner.vectors {
                f.write_all(&value.to_le_bytes())?;
            }
            f.sync_all()?;
        }
        fs::rename(&tmp_vec, &self.path)?;

        let tmp_sid = self.sidecar_path.with_extension("sid.tmp");
        {
            let mut f = fs::File::create(&tmp_sid)?;
            f.write_all(&(inner.len() as u64).to_le_bytes())?;
            for &id in &inner.chunk_ids {
                f.write_all(&id.to_le_bytes())?;
            }
            f.sync_all()?;
        }
        fs::rename(&tmp_sid, &self.sidecar_path)?;

        drop(inner);
        let mtime = fs::metadata(&self.path)?.modified()?;
        self.inner.lock().last_known_mtime = Some(mtime);

        Ok(())
    }

    /// Reads index + sidecar from disk, replacing the in-memory copy.
    pub fn load(&self) -> Result<()> {
        let loaded = Self::load_from(&self.path, &self.sidecar_path)?;
        let mut inner = self.inner.lock();
        let mtime = fs::metadata(&self.path).ok().and_then(|m| m.modified().ok());
        *inner = loaded;
        inner.last_known_mtime = mtime;
        self.reload_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn load_from(path: &Path, sidecar_path: &Path) -> Result<Inner> {
        let mut f = fs::File::open(path)?;
        let mut magic = [0u8; 4];
        f.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(VectorIndexError::Corrupt("bad magic".into()));
        }
        let mut buf4 = [0u8; 4];
        f.read_exact(&mut buf4)?;
        let _version = u32::from_le_bytes(buf4);
        f.read_exact(&mut buf4)?;
        let dim = u32::from_le_bytes(buf4) as usize;
        let mut buf8 = [0u8; 8];
        f.read_exact(&mut buf8)?;
        let count = u64::from_le_bytes(buf8) as usize;

        let mut vectors = vec![0f32; count * dim];
        let mut raw = vec![0u8; count * dim * 4];
        f.read_exact(&mut raw)?;
        for (i, chunk) in raw.chunks_exact(4).enumerate() {
            vectors[i] = f32::from_le_bytes(chunk.try_into().unwrap());
        }

        let mut sf = fs::File::open(sidecar_path)?;
        let mut sbuf8 = [0u8; 8];
        sf.read_exact(&mut sbuf8)?;
        let sidecar_count = u64::from_le_bytes(sbuf8) as usize;
        if sidecar_count != count {
            return Err(VectorIndexError::Corrupt(format!(
                "sidecar length {sidecar_count} != index length {count}"
            )));
        }
        let mut chunk_ids = Vec::with_capacity(count);
        let mut id_buf = [0u8; 8];
        for _ in 0..count {
            sf.read_exact(&mut id_buf)?;
            chunk_ids.push(i64::from_le_bytes(id_buf));
        }

        Ok(Inner {
            dim,
            vectors,
            chunk_ids,
            last_known_mtime: None,
        })
    }

    fn on_disk_mtime(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).ok()?.modified().ok()
    }

    /// Exact k-nearest-neighbor search by L2 distance. Before searching,
    /// checks the on-disk modification time; reloads first if it has
    /// advanced past the recorded value.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(i64, f32)>> {
        let disk_mtime = self.on_disk_mtime();
        let needs_reload = {
            let inner = self.inner.lock();
            match (disk_mtime, inner.last_known_mtime) {
                (Some(disk), Some(known)) => disk > known,
                (Some(_), None) => self.path.exists(),
                _ => false,
            }
        };
        if needs_reload {
            self.load()?;
        }

        let inner = self.inner.lock();
        if query.len() != inner.dim {
            return Err(VectorIndexError::DimensionMismatch {
                expected: inner.dim,
                actual: query.len(),
            });
        }
        if inner.len() == 0 {
            return Ok(Vec::new());
        }

        let dim = inner.dim;
        let mut scored: Vec<(i64, f32)> = (0..inner.len())
            .into_par_iter()
            .filter_map(|seq| {
                let chunk_id = inner.chunk_ids[seq];
                if chunk_id == TOMBSTONE {
                    return None;
                }
                let row = &inner.vectors[seq * dim..(seq + 1) * dim];
                let dist: f32 = row
                    .iter()
                    .zip(query)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f32>()
                    .sqrt();
                Some((chunk_id, dist))
            })
            .collect();

        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_is_bit_identical() {
        let dir = tempdir().unwrap();
        let idx = VectorIndex::open(dir.path(), "scope", 3).unwrap();
        idx.append(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]], &[10, 20])
            .unwrap();
        idx.save().unwrap();
        idx.load().unwrap();

        let results = idx.search(&[1.0, 2.0, 3.0], 1).unwrap();
        assert_eq!(results[0].0, 10);
        assert!(results[0].1 < 1e-6);
    }

    #[test]
    fn empty_index_search_returns_empty() {
        let dir = tempdir().unwrap();
        let idx = VectorIndex::open(dir.path(), "scope", 3).unwrap();
        let results = idx.search(&[0.0, 0.0, 0.0], 5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn k_larger_than_index_size_returns_as_many_as_exist() {
        let dir = tempdir().unwrap();
        let idx = VectorIndex::open(dir.path(), "scope", 2).unwrap();
        idx.append(&[vec![0.0, 0.0]], &[1]).unwrap();
        idx.save().unwrap();
        let results = idx.search(&[0.0, 0.0], 10).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn remove_then_compact_drops_tombstoned_entries() {
        let dir = tempdir().unwrap();
        let idx = VectorIndex::open(dir.path(), "scope", 2).unwrap();
        idx.append(&[vec![0.0, 0.0], vec![1.0, 1.0]], &[1, 2]).unwrap();
        idx.save().unwrap();
        idx.remove(&[1]);
        let results = idx.search(&[0.0, 0.0], 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, 2);

        idx.compact().unwrap();
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.tombstone_ratio(), 0.0);
    }

    #[test]
    fn mtime_not_advanced_skips_reload() {
        let dir = tempdir().unwrap();
        let idx = VectorIndex::open(dir.path(), "scope", 2).unwrap();
        idx.append(&[vec![0.0, 0.0]], &[1]).unwrap();
        idx.save().unwrap();
        let _ = idx.search(&[0.0, 0.0], 1).unwrap();
        let before = idx.reload_count();
        let _ = idx.search(&[0.0, 0.0], 1).unwrap();
        assert_eq!(idx.reload_count(), before);
    }

    #[test]
    fn dimension_mismatch_on_append_is_rejected() {
        let dir = tempdir().unwrap();
        let idx = VectorIndex::open(dir.path(), "scope", 3).unwrap();
        let err = idx.append(&[vec![1.0, 2.0]], &[1]).unwrap_err();
        assert!(matches!(err, VectorIndexError::DimensionMismatch { .. }));
    }
}

//! Single-file record store
//!
//! File format:
//! ```text
//! [HEADER: 64 bytes]
//!   - magic: 8 bytes ("LINEAGDB")
//!   - version: 4 bytes (u32 LE)
//!   - flags: 4 bytes
//!   - object_count: 8 bytes (u64 LE)
//!   - index_offset: 8 bytes (u64 LE)
//!   - branches_offset: 8 bytes (u64 LE)
//!   - branches_len: 8 bytes (u64 LE)
//!   - next_seq: 8 bytes (u64 LE)
//!   - reserved: 8 bytes
//!
//! [OBJECTS: variable]
//!   - compressed blobs, concatenated
//!
//! [INDEX: variable]
//!   - sorted array of (key, offset, size, type) entries
//!
//! [BRANCHES: variable]
//!   - bincode-encoded branch table
//! ```

use super::blob::{Blob, BlobType};
use super::txn::{Staged, Transaction};
use super::RecordSource;
use crate::model::{
    Branch, BranchId, Commit, EdgeId, EntityType, Hash, NodeId, VersionEdge, VersionNode,
};
use crate::{Error, Result, MAGIC, VERSION};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const HEADER_SIZE: u64 = 64;

/// 32 key + 8 offset + 4 size + 1 type
const INDEX_ENTRY_SIZE: usize = 45;

#[derive(Clone, Copy, Debug)]
struct IndexEntry {
    offset: u64,
    size: u32,
    blob_type: BlobType,
}

struct DataFile {
    file: File,
    /// Current append position (end of objects)
    write_offset: u64,
}

/// Committed state: the blob index plus in-memory graph indices
#[derive(Default)]
pub(crate) struct StoreState {
    index: HashMap<Hash, IndexEntry>,
    next_seq: u64,
    branches: HashMap<BranchId, Branch>,
    branch_names: HashMap<String, BranchId>,
    nodes: HashMap<NodeId, VersionNode>,
    nodes_by_entity: HashMap<(EntityType, String), Vec<NodeId>>,
    edges: HashMap<EdgeId, VersionEdge>,
    edges_out: HashMap<NodeId, Vec<EdgeId>>,
    edges_in: HashMap<NodeId, Vec<EdgeId>>,
}

impl StoreState {
    fn index_branch(&mut self, branch: Branch) {
        self.branch_names
            .insert(branch.name.clone(), branch.id.clone());
        self.branches.insert(branch.id.clone(), branch);
    }

    fn index_node(&mut self, node: VersionNode) {
        self.nodes_by_entity
            .entry((node.entity_type, node.entity_id.clone()))
            .or_default()
            .push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
    }

    fn index_edge(&mut self, edge: VersionEdge) {
        self.edges_out
            .entry(edge.source.clone())
            .or_default()
            .push(edge.id.clone());
        self.edges_in
            .entry(edge.target.clone())
            .or_default()
            .push(edge.id.clone());
        self.edges.insert(edge.id.clone(), edge);
    }

    fn collect_edges(&self, ids: Option<&Vec<EdgeId>>) -> Vec<VersionEdge> {
        ids.map(|ids| {
            ids.iter()
                .filter_map(|id| self.edges.get(id).cloned())
                .collect()
        })
        .unwrap_or_default()
    }
}

/// A record store backed by a single file
pub struct ObjectStore {
    path: PathBuf,
    file: Mutex<DataFile>,
    state: RwLock<StoreState>,
    /// Serializes transactions so check-then-insert sections never race
    writer: Mutex<()>,
}

impl ObjectStore {
    /// Create a new database file. An existing file is never overwritten.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => Error::AlreadyExists(path.display().to_string()),
                _ => Error::Io(e),
            })?;

        let mut header = [0u8; HEADER_SIZE as usize];
        header[0..8].copy_from_slice(MAGIC);
        header[8..12].copy_from_slice(&VERSION.to_le_bytes());
        header[48..56].copy_from_slice(&1u64.to_le_bytes());
        file.write_all(&header)?;
        file.sync_all()?;

        debug!(path = %path.display(), "created store");

        Ok(ObjectStore {
            path,
            file: Mutex::new(DataFile {
                file,
                write_offset: HEADER_SIZE,
            }),
            state: RwLock::new(StoreState {
                next_seq: 1,
                ..StoreState::default()
            }),
            writer: Mutex::new(()),
        })
    }

    /// Open an existing database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;

        if &header[0..8] != MAGIC {
            return Err(Error::InvalidFile("Invalid magic bytes".into()));
        }

        let version = read_u32(&header[8..12]);
        if version != VERSION {
            return Err(Error::VersionMismatch {
                expected: VERSION,
                found: version,
            });
        }

        let object_count = read_u64(&header[16..24]);
        let index_offset = read_u64(&header[24..32]);
        let branches_offset = read_u64(&header[32..40]);
        let branches_len = read_u64(&header[40..48]);
        let next_seq = read_u64(&header[48..56]).max(1);

        let mut state = StoreState {
            next_seq,
            ..StoreState::default()
        };

        if index_offset > 0 && object_count > 0 {
            file.seek(SeekFrom::Start(index_offset))?;
            for _ in 0..object_count {
                let mut buf = [0u8; INDEX_ENTRY_SIZE];
                file.read_exact(&mut buf)?;

                let mut key = [0u8; 32];
                key.copy_from_slice(&buf[0..32]);
                let blob_type = BlobType::from_byte(buf[44]).ok_or_else(|| {
                    Error::Corruption(format!("Invalid blob type in index: {}", buf[44]))
                })?;

                state.index.insert(
                    Hash::from_bytes(key),
                    IndexEntry {
                        offset: read_u64(&buf[32..40]),
                        size: read_u32(&buf[40..44]),
                        blob_type,
                    },
                );
            }
        }

        if branches_offset > 0 && branches_len > 0 {
            file.seek(SeekFrom::Start(branches_offset))?;
            let mut buf = vec![0u8; branches_len as usize];
            file.read_exact(&mut buf)?;
            let branches: Vec<Branch> = bincode::deserialize(&buf)?;
            for branch in branches {
                state.index_branch(branch);
            }
        }

        let write_offset = if index_offset > 0 {
            index_offset
        } else {
            file.seek(SeekFrom::End(0))?
        };

        let mut data_file = DataFile { file, write_offset };

        // Nodes and edges are small and walked constantly; keep them resident
        let graph_entries: Vec<IndexEntry> = state
            .index
            .values()
            .filter(|e| e.blob_type != BlobType::Commit)
            .copied()
            .collect();
        for entry in graph_entries {
            let blob = read_blob(&mut data_file, &entry)?;
            match entry.blob_type {
                BlobType::Node => state.index_node(blob.decode(BlobType::Node)?),
                BlobType::Edge => state.index_edge(blob.decode(BlobType::Edge)?),
                BlobType::Commit => {}
            }
        }

        debug!(
            path = %path.display(),
            objects = state.index.len(),
            branches = state.branches.len(),
            "opened store"
        );

        Ok(ObjectStore {
            path,
            file: Mutex::new(data_file),
            state: RwLock::new(state),
            writer: Mutex::new(()),
        })
    }

    /// Open or create a database file
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// A consistent read view of committed state
    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot {
            store: self,
            state: self.state.read(),
        }
    }

    /// Start a write transaction.
    ///
    /// Blocks until any other open transaction finishes. Nothing is visible
    /// to readers until [`Transaction::commit`].
    pub fn begin(&self) -> Transaction<'_> {
        let writer = self.writer.lock();
        let snapshot = self.snapshot();
        Transaction::new(self, writer, snapshot)
    }

    /// Run `f` in a transaction, publishing its writes only if it succeeds
    pub fn transaction<T>(&self, f: impl FnOnce(&mut Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut txn = self.begin();
        let out = f(&mut txn)?;
        txn.commit()?;
        Ok(out)
    }

    /// Write staged records and make them visible.
    ///
    /// Called with the writer lock held and no snapshot alive on this thread.
    pub(crate) fn publish(&self, staged: Staged) -> Result<()> {
        let mut entries = Vec::new();
        {
            let existing: Vec<Hash> = {
                let state = self.state.read();
                staged
                    .commits
                    .iter()
                    .map(|c| c.id)
                    .filter(|id| state.index.contains_key(id))
                    .collect()
            };

            let mut data_file = self.file.lock();
            for commit in &staged.commits {
                if existing.contains(&commit.id) {
                    continue;
                }
                let blob = Blob::encode(BlobType::Commit, commit)?;
                entries.push((commit.id, write_blob(&mut data_file, &blob)?));
            }
            for node in &staged.nodes {
                let blob = Blob::encode(BlobType::Node, node)?;
                entries.push((node.id.storage_key(), write_blob(&mut data_file, &blob)?));
            }
            for edge in &staged.edges {
                let blob = Blob::encode(BlobType::Edge, edge)?;
                entries.push((edge.id.storage_key(), write_blob(&mut data_file, &blob)?));
            }
        }

        let mut state = self.state.write();
        for (key, entry) in entries {
            state.index.insert(key, entry);
        }
        for node in staged.nodes.iter().cloned() {
            state.index_node(node);
        }
        for edge in staged.edges.iter().cloned() {
            state.index_edge(edge);
        }
        for branch in staged.branches.into_values() {
            state.index_branch(branch);
        }
        state.next_seq = state.next_seq.max(staged.next_seq);

        debug!(
            commits = staged.commits.len(),
            nodes = staged.nodes.len(),
            edges = staged.edges.len(),
            "published transaction"
        );
        Ok(())
    }

    /// Number of blobs in the store
    pub fn object_count(&self) -> usize {
        self.state.read().index.len()
    }

    /// Flush the index and branch table to disk
    pub fn sync(&self) -> Result<()> {
        let state = self.state.read();
        let mut data_file = self.file.lock();
        let write_offset = data_file.write_offset;

        let mut branches: Vec<&Branch> = state.branches.values().collect();
        branches.sort_by(|a, b| a.name.cmp(&b.name));
        let branch_bytes = bincode::serialize(&branches)?;

        let index_size = (state.index.len() * INDEX_ENTRY_SIZE) as u64;
        let branches_offset = write_offset + index_size;

        let file = &mut data_file.file;
        file.seek(SeekFrom::Start(16))?;
        file.write_all(&(state.index.len() as u64).to_le_bytes())?;
        file.write_all(&write_offset.to_le_bytes())?;
        file.write_all(&branches_offset.to_le_bytes())?;
        file.write_all(&(branch_bytes.len() as u64).to_le_bytes())?;
        file.write_all(&state.next_seq.to_le_bytes())?;

        file.seek(SeekFrom::Start(write_offset))?;

        // Sorted for determinism
        let mut entries: Vec<_> = state.index.iter().collect();
        entries.sort_by_key(|(h, _)| h.as_bytes());

        for (key, entry) in entries {
            file.write_all(key.as_bytes())?;
            file.write_all(&entry.offset.to_le_bytes())?;
            file.write_all(&entry.size.to_le_bytes())?;
            file.write_all(&[entry.blob_type.as_byte()])?;
        }
        file.write_all(&branch_bytes)?;

        let end = branches_offset + branch_bytes.len() as u64;
        file.set_len(end)?;
        file.sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ObjectStore {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}

/// A read view of committed state.
///
/// Holds the state read-lock for its lifetime, so every read through one
/// snapshot sees the same set of records.
pub struct Snapshot<'a> {
    store: &'a ObjectStore,
    state: RwLockReadGuard<'a, StoreState>,
}

impl<'a> Snapshot<'a> {
    pub(crate) fn next_seq(&self) -> u64 {
        self.state.next_seq
    }
}

impl RecordSource for Snapshot<'_> {
    fn get_commit(&self, id: &Hash) -> Result<Commit> {
        let entry = self
            .state
            .index
            .get(id)
            .filter(|e| e.blob_type == BlobType::Commit)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("commit {}", id.short())))?;

        let mut data_file = self.store.file.lock();
        read_blob(&mut data_file, &entry)?.decode(BlobType::Commit)
    }

    fn has_commit(&self, id: &Hash) -> bool {
        self.state
            .index
            .get(id)
            .is_some_and(|e| e.blob_type == BlobType::Commit)
    }

    fn branch(&self, id: &BranchId) -> Result<Branch> {
        self.state
            .branches
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("branch {}", id)))
    }

    fn branch_by_name(&self, name: &str) -> Option<Branch> {
        self.state
            .branch_names
            .get(name)
            .and_then(|id| self.state.branches.get(id))
            .cloned()
    }

    fn branches(&self) -> Vec<Branch> {
        self.state.branches.values().cloned().collect()
    }

    fn node(&self, id: &NodeId) -> Result<VersionNode> {
        self.state
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("node {}", id)))
    }

    fn nodes_for_entity(&self, entity_type: EntityType, entity_id: &str) -> Vec<VersionNode> {
        self.state
            .nodes_by_entity
            .get(&(entity_type, entity_id.to_string()))
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.state.nodes.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn edges_out(&self, id: &NodeId) -> Vec<VersionEdge> {
        self.state.collect_edges(self.state.edges_out.get(id))
    }

    fn edges_in(&self, id: &NodeId) -> Vec<VersionEdge> {
        self.state.collect_edges(self.state.edges_in.get(id))
    }
}

fn read_blob(data_file: &mut DataFile, entry: &IndexEntry) -> Result<Blob> {
    data_file.file.seek(SeekFrom::Start(entry.offset))?;
    let mut data = vec![0u8; entry.size as usize];
    data_file.file.read_exact(&mut data)?;
    Blob::decompress(&data)
}

fn write_blob(data_file: &mut DataFile, blob: &Blob) -> Result<IndexEntry> {
    let compressed = blob.compress()?;
    let offset = data_file.write_offset;

    data_file.file.seek(SeekFrom::Start(offset))?;
    data_file.file.write_all(&compressed)?;
    data_file.write_offset = offset + compressed.len() as u64;

    Ok(IndexEntry {
        offset,
        size: compressed.len() as u32,
        blob_type: blob.blob_type,
    })
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

//! File-backed prefix store
//!
//! Keeps the index in memory and rewrites a JSON snapshot on every applied
//! batch. The snapshot is written to a sibling temp file and renamed over the
//! old one, so a crash leaves either the previous or the new state on disk.

use super::{NodeMap, PrefixIndex, PrefixStore, WriteBatch};
use crate::models::PrefixNode;
use crate::namespace::Namespace;
use crate::Result;
use ipnet::Ipv4Net;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    nodes: Vec<PrefixNode>,
}

/// Durable single-node store
#[derive(Debug)]
pub struct FilePrefixStore {
    path: PathBuf,
    index: RwLock<PrefixIndex>,
}

impl FilePrefixStore {
    /// Open the store at `path`, loading the snapshot if one exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let index = if path.exists() {
            let bytes = fs::read(&path)?;
            let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
            if snapshot.version != SNAPSHOT_VERSION {
                return Err(crate::Error::Storage(format!(
                    "unsupported snapshot version {} in {}",
                    snapshot.version,
                    path.display()
                )));
            }
            PrefixIndex::from_nodes(snapshot.nodes)
        } else {
            PrefixIndex::default()
        };

        tracing::info!(
            path = %path.display(),
            namespaces = index.namespaces().len(),
            "Opened prefix store"
        );

        Ok(Self {
            path,
            index: RwLock::new(index),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, index: &PrefixIndex) -> Result<()> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            nodes: index.all_nodes().cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;

        // Written beside the snapshot, then renamed over it
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl PrefixStore for FilePrefixStore {
    fn name(&self) -> &'static str {
        "file"
    }

    fn get(&self, namespace: &Namespace, cidr: &Ipv4Net) -> Result<Option<PrefixNode>> {
        Ok(self.index.read().get(namespace, cidr))
    }

    fn nodes(&self, namespace: &Namespace) -> Result<NodeMap> {
        Ok(self.index.read().nodes(namespace))
    }

    fn apply(&self, batch: WriteBatch) -> Result<()> {
        let mut index = self.index.write();

        // Memory is replaced only once the snapshot is on disk
        let mut next = index.clone();
        next.apply(batch)?;
        self.persist(&next)?;
        *index = next;
        Ok(())
    }

    fn namespaces(&self) -> Result<Vec<Namespace>> {
        Ok(self.index.read().namespaces())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace;
    use crate::store::WriteOp;
    use tempfile::TempDir;

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    #[test]
    fn test_reopen_restores_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefixes.json");
        let ns = namespace::resolve("Public", "p", "s");

        {
            let store = FilePrefixStore::open(&path).unwrap();
            let root = PrefixNode::root(ns.clone(), net("10.0.0.0/16"));
            let child = PrefixNode::child(ns.clone(), net("10.0.0.0/16"), net("10.0.3.0/24"), "subnet-9");
            store
                .apply(vec![WriteOp::Put(root), WriteOp::Put(child)].into())
                .unwrap();
        }

        let reopened = FilePrefixStore::open(&path).unwrap();
        let child = reopened.get(&ns, &net("10.0.3.0/24")).unwrap().unwrap();
        assert_eq!(child.owner.as_deref(), Some("subnet-9"));
        assert_eq!(child.parent, Some(net("10.0.0.0/16")));
        assert_eq!(reopened.nodes(&ns).unwrap().len(), 2);
    }

    #[test]
    fn test_failed_batch_is_not_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefixes.json");
        let ns = namespace::resolve("Public", "p", "s");

        let store = FilePrefixStore::open(&path).unwrap();
        store
            .apply(vec![WriteOp::Put(PrefixNode::root(ns.clone(), net("10.0.0.0/16")))].into())
            .unwrap();

        let overlapping = PrefixNode::root(ns.clone(), net("10.0.0.0/8"));
        assert!(store.apply(vec![WriteOp::Put(overlapping)].into()).is_err());

        let reopened = FilePrefixStore::open(&path).unwrap();
        assert_eq!(reopened.nodes(&ns).unwrap().len(), 1);
    }

    #[test]
    fn test_snapshot_named_like_a_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefixes.tmp");
        let ns = namespace::resolve("Public", "p", "s");

        {
            let store = FilePrefixStore::open(&path).unwrap();
            store
                .apply(vec![WriteOp::Put(PrefixNode::root(ns.clone(), net("10.0.0.0/16")))].into())
                .unwrap();
            store
                .apply(vec![WriteOp::Put(PrefixNode::root(ns.clone(), net("10.1.0.0/16")))].into())
                .unwrap();
        }

        let reopened = FilePrefixStore::open(&path).unwrap();
        assert_eq!(reopened.nodes(&ns).unwrap().len(), 2);

        // Only the snapshot remains in the directory
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_stores_in_one_directory_do_not_share_temp_files() {
        let dir = TempDir::new().unwrap();
        let ns = namespace::resolve("Public", "p", "s");
        let json = FilePrefixStore::open(dir.path().join("state.json")).unwrap();
        let yaml = FilePrefixStore::open(dir.path().join("state.yaml")).unwrap();

        json.apply(vec![WriteOp::Put(PrefixNode::root(ns.clone(), net("10.0.0.0/16")))].into())
            .unwrap();
        yaml.apply(vec![WriteOp::Put(PrefixNode::root(ns.clone(), net("172.16.0.0/12")))].into())
            .unwrap();

        let json = FilePrefixStore::open(dir.path().join("state.json")).unwrap();
        let yaml = FilePrefixStore::open(dir.path().join("state.yaml")).unwrap();
        assert!(json.get(&ns, &net("10.0.0.0/16")).unwrap().is_some());
        assert!(json.get(&ns, &net("172.16.0.0/12")).unwrap().is_none());
        assert!(yaml.get(&ns, &net("172.16.0.0/12")).unwrap().is_some());
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefixes.json");
        fs::write(&path, b"{not json").unwrap();

        assert!(matches!(
            FilePrefixStore::open(&path),
            Err(crate::Error::Storage(_))
        ));
    }
}

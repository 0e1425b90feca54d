//!
//! Versioned compressed snapshots of models and evaluation jobs
//!
//! A snapshot is a gzip compressed JSON envelope
//!
//! ```text
//! {"format": "seqmarkov-snapshot", "version": 1, "kind": "...", "payload": ...}
//! ```
//!
//! No compatibility across versions is attempted: a snapshot with another
//! format, version or kind is rejected with `Error::IncompatibleSnapshot`.
//! Where snapshots are kept is the business of a `SnapshotStore`.
//!
use crate::decoder::Decoder;
use crate::error::{Error, Result};
use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use fnv::FnvHashMap as HashMap;
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// format tag of every snapshot
pub const FORMAT: &str = "seqmarkov-snapshot";
/// schema version written by this build
pub const VERSION: u32 = 1;

///
/// Storage of named opaque snapshots.
///
pub trait SnapshotStore: Send + Sync {
    fn save_bytes(&self, name: &str, bytes: &[u8]) -> Result<()>;
    /// `None` if nothing was saved under the name
    fn load_bytes(&self, name: &str) -> Result<Option<Vec<u8>>>;
    fn contains(&self, name: &str) -> bool;
}

///
/// Snapshots as files `<dir>/<name>.json.gz`.
///
#[derive(Clone, Debug)]
pub struct DirectoryStore {
    dir: PathBuf,
}

impl DirectoryStore {
    /// the directory is created if missing
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        Ok(DirectoryStore {
            dir: dir.as_ref().to_path_buf(),
        })
    }
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json.gz", name))
    }
}

impl SnapshotStore for DirectoryStore {
    ///
    /// Written to a temporary file first and renamed, so that an
    /// interrupted write leaves the previous snapshot intact.
    ///
    fn save_bytes(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(name);
        let tmp = self.dir.join(format!("{}.json.gz.tmp", name));
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &path)?;
        debug!("saved snapshot {}", path.display());
        Ok(())
    }
    fn load_bytes(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(name);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(path)?))
    }
    fn contains(&self, name: &str) -> bool {
        self.path(name).exists()
    }
}

///
/// Snapshots kept in memory.
///
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
    /// number of stored snapshots
    pub fn len(&self) -> usize {
        self.snapshots.lock().map(|m| m.len()).unwrap_or(0)
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SnapshotStore for MemoryStore {
    fn save_bytes(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let mut snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        snapshots.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }
    fn load_bytes(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        Ok(snapshots.get(name).cloned())
    }
    fn contains(&self, name: &str) -> bool {
        let snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        snapshots.contains_key(name)
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T: ?Sized> {
    format: &'a str,
    version: u32,
    kind: &'a str,
    payload: &'a T,
}

#[derive(Deserialize)]
struct Envelope {
    format: String,
    version: u32,
    kind: String,
    payload: serde_json::Value,
}

///
/// Encode `value` as a snapshot of `kind`.
///
pub fn to_bytes<T: Serialize + ?Sized>(kind: &str, value: &T) -> Result<Vec<u8>> {
    let envelope = EnvelopeRef {
        format: FORMAT,
        version: VERSION,
        kind,
        payload: value,
    };
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    serde_json::to_writer(&mut encoder, &envelope)?;
    Ok(encoder.finish()?)
}

///
/// Decode a snapshot of `kind`. `name` is used in error messages.
///
pub fn from_bytes<T: DeserializeOwned>(name: &str, kind: &str, bytes: &[u8]) -> Result<T> {
    let incompatible = |reason: String| Error::IncompatibleSnapshot {
        name: name.to_string(),
        reason,
    };
    let decoder = GzDecoder::new(bytes);
    let envelope: Envelope = serde_json::from_reader(decoder)
        .map_err(|e| incompatible(format!("not a snapshot: {}", e)))?;
    if envelope.format != FORMAT {
        return Err(incompatible(format!("format {}", envelope.format)));
    }
    if envelope.version != VERSION {
        return Err(incompatible(format!(
            "version {} (expected {})",
            envelope.version, VERSION
        )));
    }
    if envelope.kind != kind {
        return Err(incompatible(format!(
            "kind {} (expected {})",
            envelope.kind, kind
        )));
    }
    serde_json::from_value(envelope.payload).map_err(|e| incompatible(e.to_string()))
}

/// `to_bytes` into the store
pub fn save<T: Serialize + ?Sized>(
    store: &dyn SnapshotStore,
    name: &str,
    kind: &str,
    value: &T,
) -> Result<()> {
    store.save_bytes(name, &to_bytes(kind, value)?)
}

///
/// `from_bytes` from the store; `Ok(None)` if nothing was saved.
///
pub fn load<T: DeserializeOwned>(store: &dyn SnapshotStore, name: &str, kind: &str) -> Result<Option<T>> {
    match store.load_bytes(name)? {
        Some(bytes) => from_bytes(name, kind, &bytes).map(Some),
        None => Ok(None),
    }
}

///
/// What of a decoder is written into a snapshot.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveMode {
    /// hyperparameters and learned tables
    Full,
    /// hyperparameters only (`duplicate_hyperparameters_only`)
    Clear,
}

///
/// Save a decoder, dropping its learned state under `SaveMode::Clear`.
///
pub fn save_decoder<M: Decoder + Serialize>(
    store: &dyn SnapshotStore,
    name: &str,
    kind: &str,
    decoder: &M,
    mode: SaveMode,
) -> Result<()> {
    match mode {
        SaveMode::Full => save(store, name, kind, decoder),
        SaveMode::Clear => save(store, name, kind, &decoder.duplicate_hyperparameters_only()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainModel, MarkovChain};
    use crate::dataset::Dataset;
    use crate::mocks::mock_labeled_set;
    use crate::params::DecoderParams;
    use crate::viterbi::ViterbiAlgorithm;

    fn trained() -> ViterbiAlgorithm<MarkovChain> {
        let data = mock_labeled_set(10, 50, 0);
        let mut v = ViterbiAlgorithm::new(
            MarkovChain::new(data.states().clone(), 2, 1, 1e-4),
            DecoderParams::default(),
        );
        v.train_set(&data).unwrap();
        v
    }

    #[test]
    fn directory_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path().join("snapshots")).unwrap();
        let v = trained();
        assert!(!store.contains("model"));
        save_decoder(&store, "model", "viterbi", &v, SaveMode::Full).unwrap();
        assert!(store.contains("model"));
        assert!(store.path("model").exists());
        let w: ViterbiAlgorithm<MarkovChain> = load(&store, "model", "viterbi").unwrap().unwrap();
        let data = mock_labeled_set(3, 40, 1);
        for i in 0..data.len() {
            assert_eq!(w.run(data.observed(i)), v.run(data.observed(i)));
        }
        let missing: Option<ViterbiAlgorithm<MarkovChain>> = load(&store, "other", "viterbi").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn clear_mode_drops_tables() {
        let store = MemoryStore::new();
        let v = trained();
        save_decoder(&store, "full", "viterbi", &v, SaveMode::Full).unwrap();
        save_decoder(&store, "clear", "viterbi", &v, SaveMode::Clear).unwrap();
        assert_eq!(store.len(), 2);
        let full = store.load_bytes("full").unwrap().unwrap();
        let clear = store.load_bytes("clear").unwrap().unwrap();
        assert!(clear.len() < full.len());
        let w: ViterbiAlgorithm<MarkovChain> = load(&store, "clear", "viterbi").unwrap().unwrap();
        assert_eq!(w.chain().n_digested(), 0);
        assert_eq!(w.chain().order(), 2);
    }

    #[test]
    fn incompatible_snapshots_are_rejected() {
        let store = MemoryStore::new();
        save(&store, "x", "kind-a", &vec![1, 2, 3]).unwrap();
        let e = load::<Vec<i32>>(&store, "x", "kind-b");
        assert!(matches!(e, Err(Error::IncompatibleSnapshot { .. })));

        // a future schema version
        let bytes = {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            let value = serde_json::json!({
                "format": FORMAT, "version": VERSION + 1, "kind": "kind-a", "payload": [1]
            });
            serde_json::to_writer(&mut encoder, &value).unwrap();
            encoder.finish().unwrap()
        };
        store.save_bytes("future", &bytes).unwrap();
        let e = load::<Vec<i32>>(&store, "future", "kind-a");
        assert!(matches!(e, Err(Error::IncompatibleSnapshot { .. })));

        store.save_bytes("garbage", b"not gzip").unwrap();
        let e = load::<Vec<i32>>(&store, "garbage", "kind-a");
        assert!(matches!(e, Err(Error::IncompatibleSnapshot { .. })));

        // wrong payload type
        let e = load::<String>(&store, "x", "kind-a");
        assert!(matches!(e, Err(Error::IncompatibleSnapshot { .. })));
        assert_eq!(load::<Vec<i32>>(&store, "x", "kind-a").unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn inconsistent_chain_snapshot_is_rejected() {
        let data = mock_labeled_set(5, 40, 2);
        let mut chain = MarkovChain::new(data.states().clone(), 1, 1, 1e-4);
        chain.train_set(&data);
        let mut value = serde_json::to_value(&chain).unwrap();
        for entry in value["transitions"]["entries"].as_array_mut().unwrap() {
            entry[1] = serde_json::json!([]);
        }
        let bytes = to_bytes("chain", &value).unwrap();
        let e = from_bytes::<MarkovChain>("chain", "chain", &bytes);
        assert!(matches!(e, Err(Error::IncompatibleSnapshot { .. })));

        let bytes = to_bytes("chain", &chain).unwrap();
        let loaded: MarkovChain = from_bytes("chain", "chain", &bytes).unwrap();
        assert_eq!(
            loaded.estimate(data.observed(0), data.hidden(0)),
            chain.estimate(data.observed(0), data.hidden(0))
        );
    }
}

// src/pipeline/hash.rs

//! Content hashing and hash persistence for incremental rebuilds.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use blake3::Hasher;
use tracing::{debug, info};

use crate::types::HashStorageMode;

/// Relative path (from the project root) to the hashes file.
pub const HASH_FILE_PATH: &str = ".assetdag/hashes";

/// Hash store shared between tasks running in parallel.
pub type SharedHashStore = Arc<Mutex<Box<dyn HashStore>>>;

/// Hex-encoded blake3 hash of a byte slice.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize().to_hex().to_string()
}

/// Identifies one source file of one task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashKey {
    pub task: String,
    pub source: String,
}

impl HashKey {
    pub fn new(task: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            source: source.into(),
        }
    }
}

/// What was recorded for a source on its last successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRecord {
    pub hash: String,
    /// File the source ended up in, when known.
    pub output: Option<PathBuf>,
}

impl HashRecord {
    pub fn new(hash: impl Into<String>, output: Option<PathBuf>) -> Self {
        Self {
            hash: hash.into(),
            output,
        }
    }
}

/// Abstract storage for content hashes.
pub trait HashStore: Send + Sync + std::fmt::Debug {
    fn load(&self, key: &HashKey) -> Result<Option<HashRecord>>;
    fn save_all(&mut self, entries: &[(HashKey, HashRecord)]) -> Result<()>;
    /// Remove hashes recorded for tasks that are not in `active_tasks`.
    fn prune(&mut self, active_tasks: &[&str]) -> Result<()>;
}

/// Build the store selected by `[config].hash_storage_mode`.
pub fn open_hash_store(mode: HashStorageMode, root: &Path) -> SharedHashStore {
    let store: Box<dyn HashStore> = match mode {
        HashStorageMode::File => Box::new(FileHashStore::new(root.to_path_buf())),
        HashStorageMode::Memory => Box::new(MemoryHashStore::new()),
    };
    Arc::new(Mutex::new(store))
}

/// Stores hashes in `<root>/.assetdag/hashes`.
///
/// One record per line: task, source, hash and output separated by tabs.
/// Backslash, tab and newline inside a field are escaped.
#[derive(Debug)]
pub struct FileHashStore {
    root: PathBuf,
}

impl FileHashStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path(&self) -> PathBuf {
        self.root.join(HASH_FILE_PATH)
    }

    fn load_map(&self) -> Result<HashMap<HashKey, HashRecord>> {
        let path = self.path();
        if !path.exists() {
            return Ok(HashMap::new());
        }

        let file = File::open(&path).with_context(|| format!("opening hash file at {:?}", path))?;
        let mut map = HashMap::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let fields: Vec<String> = line.split('\t').map(unescape).collect();
            // Lines in any other shape are dropped; their sources rebuild once.
            if let [task, source, hash, output] = fields.as_slice() {
                let output = (!output.is_empty()).then(|| PathBuf::from(output));
                map.insert(HashKey::new(task, source), HashRecord::new(hash, output));
            }
        }
        Ok(map)
    }

    fn store_map(&self, map: &HashMap<HashKey, HashRecord>) -> Result<()> {
        let path = self.path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating hash directory at {:?}", parent))?;
        }

        let mut keys: Vec<&HashKey> = map.keys().collect();
        keys.sort();

        let file =
            File::create(&path).with_context(|| format!("creating hash file at {:?}", path))?;
        let mut writer = BufWriter::new(file);
        for key in keys {
            let record = &map[key];
            let output = record
                .output
                .as_deref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            writeln!(
                writer,
                "{}\t{}\t{}\t{}",
                escape(&key.task),
                escape(&key.source),
                escape(&record.hash),
                escape(&output)
            )?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn escape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

impl HashStore for FileHashStore {
    fn load(&self, key: &HashKey) -> Result<Option<HashRecord>> {
        Ok(self.load_map()?.remove(key))
    }

    fn save_all(&mut self, entries: &[(HashKey, HashRecord)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut map = self.load_map()?;
        for (key, record) in entries {
            map.insert(key.clone(), record.clone());
        }
        self.store_map(&map)?;
        debug!(count = entries.len(), "stored content hashes (file)");
        Ok(())
    }

    fn prune(&mut self, active_tasks: &[&str]) -> Result<()> {
        let mut map = self.load_map()?;
        let before = map.len();
        map.retain(|k, _| active_tasks.contains(&k.task.as_str()));
        if map.len() < before {
            self.store_map(&map)?;
            info!(removed = before - map.len(), "pruned stale content hashes (file)");
        }
        Ok(())
    }
}

/// Stores hashes in memory only.
#[derive(Debug, Default)]
pub struct MemoryHashStore {
    map: HashMap<HashKey, HashRecord>,
}

impl MemoryHashStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HashStore for MemoryHashStore {
    fn load(&self, key: &HashKey) -> Result<Option<HashRecord>> {
        Ok(self.map.get(key).cloned())
    }

    fn save_all(&mut self, entries: &[(HashKey, HashRecord)]) -> Result<()> {
        for (key, record) in entries {
            self.map.insert(key.clone(), record.clone());
        }
        Ok(())
    }

    fn prune(&mut self, active_tasks: &[&str]) -> Result<()> {
        let before = self.map.len();
        self.map.retain(|k, _| active_tasks.contains(&k.task.as_str()));
        if self.map.len() < before {
            info!(removed = before - self.map.len(), "pruned stale content hashes (memory)");
        }
        Ok(())
    }
}

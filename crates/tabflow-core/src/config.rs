//! Flow configuration that downstream crates can serialize/deserialize.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
    /// Embedded sqlite database in a temporary directory.
    #[default]
    Sqlite,
    /// In-process ordered map. Nothing touches disk.
    Memory,
}

impl StoreBackendKind {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Some(StoreBackendKind::Sqlite),
            "memory" => Some(StoreBackendKind::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Parent directory for store temp directories. `None` means the system
    /// temp dir.
    pub store_dir: Option<PathBuf>,

    pub store_backend: StoreBackendKind,

    /// Entries held in each store's LRU cache.
    pub store_cache_size: usize,

    /// Dirty entries flushed to the backend per batch.
    pub store_batch_size: usize,

    /// Keys a `KeySet` holds in memory before spilling to a store.
    pub keyset_memory_limit: usize,

    /// Root directory for checkpoints.
    pub checkpoint_path: PathBuf,

    /// Worker threads per `Parallelize` stage.
    pub parallel_workers: usize,

    /// Capacity of the parallel input and output queues.
    pub parallel_queue_capacity: usize,

    /// How long teardown waits for workers before detaching them.
    pub parallel_join_timeout_ms: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            store_dir: None,
            store_backend: StoreBackendKind::Sqlite,
            store_cache_size: 10_240,
            store_batch_size: 1_000,
            keyset_memory_limit: 100_000,
            checkpoint_path: PathBuf::from(".checkpoints"),
            parallel_workers: 2 * num_cpus::get(),
            parallel_queue_capacity: 1_024,
            parallel_join_timeout_ms: 10_000,
        }
    }
}

/// Snapshot of the store-related settings, handed to the store layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreOptions {
    pub backend: StoreBackendKind,
    pub dir: Option<PathBuf>,
    pub cache_size: usize,
    pub batch_size: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        FlowConfig::default().store_options()
    }
}

impl StoreOptions {
    pub fn in_memory() -> Self {
        Self {
            backend: StoreBackendKind::Memory,
            ..Self::default()
        }
    }
}

impl FlowConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `TABFLOW_STORE_DIR`: parent directory for store temp dirs
    /// - `TABFLOW_STORE_BACKEND`: `sqlite` or `memory`
    /// - `TABFLOW_STORE_CACHE_SIZE`: LRU entries per store
    /// - `TABFLOW_STORE_BATCH_SIZE`: dirty entries per flush
    /// - `TABFLOW_KEYSET_MEMORY_LIMIT`: in-memory keys before spilling
    /// - `TABFLOW_CHECKPOINT_PATH`: checkpoint root
    /// - `TABFLOW_PARALLEL_WORKERS`: worker threads
    /// - `TABFLOW_PARALLEL_QUEUE_CAPACITY`: bounded queue size
    /// - `TABFLOW_PARALLEL_JOIN_TIMEOUT_MS`: worker join timeout
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("TABFLOW_STORE_DIR") {
            cfg.store_dir = Some(PathBuf::from(s));
        }

        if let Ok(s) = std::env::var("TABFLOW_STORE_BACKEND") {
            if let Some(v) = StoreBackendKind::parse(&s) {
                cfg.store_backend = v;
            }
        }

        if let Ok(s) = std::env::var("TABFLOW_STORE_CACHE_SIZE") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.store_cache_size = v;
            }
        }

        if let Ok(s) = std::env::var("TABFLOW_STORE_BATCH_SIZE") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.store_batch_size = v;
            }
        }

        if let Ok(s) = std::env::var("TABFLOW_KEYSET_MEMORY_LIMIT") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.keyset_memory_limit = v;
            }
        }

        if let Ok(s) = std::env::var("TABFLOW_CHECKPOINT_PATH") {
            cfg.checkpoint_path = PathBuf::from(s);
        }

        if let Ok(s) = std::env::var("TABFLOW_PARALLEL_WORKERS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.parallel_workers = v.max(1);
            }
        }

        if let Ok(s) = std::env::var("TABFLOW_PARALLEL_QUEUE_CAPACITY") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.parallel_queue_capacity = v.max(1);
            }
        }

        if let Ok(s) = std::env::var("TABFLOW_PARALLEL_JOIN_TIMEOUT_MS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.parallel_join_timeout_ms = v;
            }
        }

        cfg
    }

    /// Produce a store configuration snapshot used by the store layer.
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            backend: self.store_backend,
            dir: self.store_dir.clone(),
            cache_size: self.store_cache_size.max(1),
            batch_size: self.store_batch_size.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = FlowConfig::default();
        assert_eq!(cfg.store_cache_size, 10_240);
        assert_eq!(cfg.store_batch_size, 1_000);
        assert_eq!(cfg.checkpoint_path, PathBuf::from(".checkpoints"));
        assert!(cfg.parallel_workers >= 2);
        assert_eq!(cfg.store_options().backend, StoreBackendKind::Sqlite);
    }

    #[test]
    fn backend_names_parse() {
        assert_eq!(
            StoreBackendKind::parse(" Memory "),
            Some(StoreBackendKind::Memory)
        );
        assert_eq!(StoreBackendKind::parse("lmdb"), None);
    }
}

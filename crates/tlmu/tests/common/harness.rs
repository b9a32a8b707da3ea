//! Per-test scaffolding: log capture and a throwaway module store.

use std::path::Path;

use tempfile::TempDir;
use tlmu::Instance;
use tlmu::loader::ModuleStore;
use tracing_subscriber::EnvFilter;

/// Routes library logs to the test output; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A module store in its own temporary directory.
pub struct TestStore {
    pub dir: TempDir,
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TestStore {
    pub fn new() -> Self {
        init_tracing();
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn store(&self) -> ModuleStore {
        ModuleStore::new(self.root())
    }

    /// A fresh instance named `name` whose copies live in this store.
    pub fn instance(&self, name: &str) -> Instance {
        Instance::with_store(name, self.store())
    }
}

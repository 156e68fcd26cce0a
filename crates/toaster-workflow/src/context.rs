// context.rs
//
// Shared handles every workflow component is built from.
use std::sync::Arc;
use toaster_domain::{Catalog, ContentStore, ToasterConfig};
use toaster_providers::{SystemRunner, ToolRunner};

/// Configuration, catalog and tool runner of one pipeline invocation.
#[derive(Clone)]
pub struct ToasterContext {
  pub config: Arc<ToasterConfig>,
  pub catalog: Arc<dyn Catalog>,
  pub runner: Arc<dyn ToolRunner>,
  store: ContentStore,
}

impl ToasterContext {
  pub fn new(config: Arc<ToasterConfig>, catalog: Arc<dyn Catalog>, runner: Arc<dyn ToolRunner>) -> Self {
    let store = ContentStore::new(config.data_dir.clone(), config.archive_layout.clone());
    Self { config, catalog, runner, store }
  }

  /// Context running the real executables.
  pub fn with_system_runner(config: Arc<ToasterConfig>, catalog: Arc<dyn Catalog>) -> Self {
    let runner = Arc::new(SystemRunner::new(config.debug.syscalls));
    Self::new(config, catalog, runner)
  }

  pub fn store(&self) -> &ContentStore {
    &self.store
  }

  pub fn catalog(&self) -> &dyn Catalog {
    self.catalog.as_ref()
  }

  pub fn runner(&self) -> &dyn ToolRunner {
    self.runner.as_ref()
  }
}

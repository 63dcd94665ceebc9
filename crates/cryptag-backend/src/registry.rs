//! Backend registry
//!
//! Maps a backend type name to a maker that builds a backend from its
//! config. The registry is an explicit value rather than global state;
//! callers construct one, register additional makers, and pass it around.

use crate::{
    config::{self, Config, Paths, TYPE_FILESYSTEM, TYPE_MEMORY},
    Backend, BackendError, FileSystem, MemoryBackend, Result,
};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds a backend from a canonical config
pub type Maker = Arc<dyn Fn(Config) -> BoxFuture<'static, Result<Arc<dyn Backend>>> + Send + Sync>;

/// Registry of backend makers keyed by type name
pub struct BackendRegistry {
    makers: RwLock<HashMap<String, Maker>>,
    paths: Paths,
}

impl BackendRegistry {
    /// An empty registry using `paths` for configs and local data
    pub fn new(paths: Paths) -> Self {
        Self {
            makers: RwLock::new(HashMap::new()),
            paths,
        }
    }

    /// A registry with the `filesystem` and `memory` makers registered
    pub fn with_defaults(paths: Paths) -> Self {
        let registry = Self::new(paths);
        registry.register(TYPE_FILESYSTEM, |config| async move {
            let fs = FileSystem::open(config).await?;
            Ok(Arc::new(fs) as Arc<dyn Backend>)
        });
        registry.register(TYPE_MEMORY, |config| async move {
            let mem = MemoryBackend::from_config(config)?;
            Ok(Arc::new(mem) as Arc<dyn Backend>)
        });
        registry
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Register (or replace) the maker for `backend_type`
    pub fn register<F, Fut>(&self, backend_type: impl Into<String>, make: F)
    where
        F: Fn(Config) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn Backend>>> + Send + 'static,
    {
        let maker: Maker = Arc::new(move |config| make(config).boxed());
        self.makers.write().insert(backend_type.into(), maker);
    }

    /// The maker for `backend_type`
    pub fn maker(&self, backend_type: &str) -> Result<Maker> {
        self.makers
            .read()
            .get(backend_type)
            .cloned()
            .ok_or_else(|| BackendError::MakerNotFound(backend_type.to_string()))
    }

    /// Registered type names
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.makers.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Build the backend `config` describes without persisting anything
    pub async fn build(&self, mut config: Config) -> Result<Arc<dyn Backend>> {
        config.canonicalize(&self.paths)?;
        let maker = self.maker(config.get_type())?;
        maker(config).await
    }

    /// Build a new backend and save its config
    pub async fn create_from_config(&self, mut config: Config) -> Result<Arc<dyn Backend>> {
        config.canonicalize(&self.paths)?;
        config.new = true;
        let backend = self.build(config.clone()).await?;
        config.save(&self.paths.backend_path)?;
        Ok(backend)
    }

    /// Load the backend saved as `name`, or the default backend
    pub async fn load(&self, name: Option<&str>) -> Result<Arc<dyn Backend>> {
        let dir = &self.paths.backend_path;
        let name = match name {
            Some(name) => name.to_string(),
            None => config::default_backend_name(dir)?
                .ok_or_else(|| BackendError::Config("no default backend set".into()))?,
        };
        let config = config::read_config(dir, &name)?;
        self.build(config).await
    }

    /// Load every saved backend whose name matches the glob `pattern`.
    ///
    /// Configs that fail to read or build are logged and skipped. It is an
    /// error only when configs matched and none could be built.
    pub async fn load_all(&self, pattern: &str) -> Result<Vec<Arc<dyn Backend>>> {
        let scan = config::read_configs(&self.paths.backend_path, pattern)?;
        for (path, err) in &scan.errors {
            warn!(path = %path.display(), error = %err, "skipping unreadable backend config");
        }

        let attempted = scan.configs.len() + scan.errors.len();
        let mut backends = Vec::with_capacity(scan.configs.len());
        let mut last_err = scan.errors.into_iter().last().map(|(_, e)| e);
        for config in scan.configs {
            let name = config.name.clone();
            match self.build(config).await {
                Ok(backend) => {
                    debug!(backend = %name, "loaded backend");
                    backends.push(backend);
                }
                Err(e) => {
                    warn!(backend = %name, error = %e, "skipping backend that failed to load");
                    last_err = Some(e);
                }
            }
        }

        if attempted > 0 && backends.is_empty() {
            if let Some(e) = last_err {
                return Err(e);
            }
        }
        Ok(backends)
    }
}

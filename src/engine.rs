//! Engine facade
//!
//! Owns the network store, the published per-mode `(network, hierarchy)`
//! snapshots and the batch coordinator. A snapshot is only replaced after
//! its successor has been built completely; queries pin the snapshot they
//! started with.

use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;

use crate::batch::{BatchCoordinator, BatchRequest, BatchResult};
use crate::ch::{self, ContractionHierarchy};
use crate::config::EngineConfig;
use crate::error::{BuildError, ConfigurationError, Error, QueryError};
use crate::isochrone::{IsochroneEngine, IsochroneRequest, IsochroneResult};
use crate::mode::Mode;
use crate::network::{LoadOptions, Network, NetworkHandle, NetworkStore};

pub struct Engine {
    config: EngineConfig,
    store: NetworkStore,
    snapshots: RwLock<[Option<Arc<IsochroneEngine>>; Mode::COUNT]>,
    coordinator: BatchCoordinator,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, Error> {
        config.validate()?;
        let coordinator = BatchCoordinator::new(&config.workers)?;
        Ok(Self {
            config,
            store: NetworkStore::new(),
            snapshots: RwLock::new(Default::default()),
            coordinator,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &NetworkStore {
        &self.store
    }

    /// Load a network directory and publish it as the current network
    pub fn load_network(&self, dir: &Path) -> Result<NetworkHandle, ConfigurationError> {
        let options = LoadOptions {
            speeds: self.config.speeds.clone(),
        };
        self.store.load(dir, &options)
    }

    /// Publish an in-memory network
    pub fn publish_network(&self, network: Network) -> NetworkHandle {
        self.store.publish(network)
    }

    pub fn current_network(&self) -> Option<NetworkHandle> {
        self.store.current()
    }

    /// Build the hierarchy of `mode` over `handle` and publish the pair.
    ///
    /// A pair for an older network version never replaces one for a newer version.
    pub fn build_hierarchy(
        &self,
        handle: &NetworkHandle,
        mode: Mode,
    ) -> Result<Arc<ContractionHierarchy>, BuildError> {
        let hierarchy = Arc::new(ch::build(handle, mode, &self.config.contraction)?);
        let engine = IsochroneEngine::from_parts(
            handle.clone(),
            Arc::clone(&hierarchy),
            self.config.query.clone(),
        );

        let mut snapshots = self.snapshots.write();
        let slot = &mut snapshots[mode.index()];
        let newer_published = slot
            .as_ref()
            .is_some_and(|s| s.network().version() > handle.version());
        if newer_published {
            tracing::warn!(
                %mode,
                built = handle.version(),
                "hierarchy built for a superseded network, not publishing"
            );
        } else {
            *slot = Some(Arc::new(engine));
            tracing::info!(%mode, version = handle.version(), "published hierarchy");
        }
        Ok(hierarchy)
    }

    /// Query executor pinned to the snapshot currently published for `mode`
    pub fn snapshot(&self, mode: Mode) -> Result<Arc<IsochroneEngine>, QueryError> {
        self.snapshots.read()[mode.index()]
            .clone()
            .ok_or(QueryError::NoHierarchy(mode))
    }

    pub fn isochrone(&self, request: &IsochroneRequest) -> Result<IsochroneResult, QueryError> {
        self.snapshot(request.mode)?.isochrone(request)
    }

    /// Run a batch, waiting for a queue slot if necessary
    pub fn isochrone_batch(&self, request: BatchRequest) -> Result<BatchResult, Error> {
        let engine = self.snapshot(request.mode)?;
        Ok(self.coordinator.run_batch(engine, request)?)
    }

    /// Run a batch, failing with `QueueFull` instead of waiting
    pub fn try_isochrone_batch(&self, request: BatchRequest) -> Result<BatchResult, Error> {
        let engine = self.snapshot(request.mode)?;
        Ok(self.coordinator.try_run_batch(engine, request)?)
    }
}

//! Contraction-hierarchy isochrone engine for multi-modal networks
//!
//! From one or many origins, compute every network node reachable within a
//! travel-cost budget for a travel mode, optionally under a scenario overlay
//! of street edits.

pub mod batch;
pub mod cancel;
pub mod ch;
pub mod config;
pub mod engine;
pub mod error;
pub mod isochrone;
pub mod mode;
pub mod network;
pub mod overlay;
pub mod synthetic;
pub mod validate;

pub use batch::{BatchCoordinator, BatchRequest, BatchResult};
pub use cancel::CancelToken;
pub use ch::{ArcRef, ContractionHierarchy};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{BatchError, BuildError, ConfigurationError, Error, QueryError, Result};
pub use isochrone::{Breaks, Completion, IsochroneEngine, IsochroneRequest, IsochroneResult};
pub use mode::{Mode, ModeMask};
pub use network::{EdgeId, ModeCosts, Network, NetworkBuilder, NetworkHandle, NetworkStore, NodeId};
pub use overlay::{EdgeOp, ScenarioOverlay};

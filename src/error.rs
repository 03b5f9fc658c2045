//! Error types for the reachability core
//!
//! Load and build errors are fatal to the operation that raised them and never
//! touch published state. Query errors are local to one origin.

use std::path::PathBuf;

use thiserror::Error;

use crate::mode::Mode;
use crate::network::{EdgeId, NodeId};

/// Malformed or missing network source data. Fails `load_network` entirely.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid Arrow data in {path}: {source}")]
    Arrow {
        path: PathBuf,
        #[source]
        source: arrow::error::ArrowError,
    },

    #[error("{table} table is missing required column '{column}'")]
    MissingColumn { table: &'static str, column: String },

    #[error("column '{column}' of {table} table has type {found}, expected {expected}")]
    ColumnType {
        table: &'static str,
        column: String,
        found: String,
        expected: &'static str,
    },

    #[error("{table} table has a null in required column '{column}' at row {row}")]
    NullValue {
        table: &'static str,
        column: String,
        row: usize,
    },

    #[error("{table} ids must be dense and 0-based: expected {expected}, found {found}")]
    NonDenseIds {
        table: &'static str,
        expected: u64,
        found: i64,
    },

    #[error("edge {edge}: {mode} cost {cost} is not a finite non-negative number")]
    InvalidCost { edge: EdgeId, mode: Mode, cost: f64 },

    #[error("edge {edge}: length {length} is not a finite non-negative number")]
    InvalidLength { edge: EdgeId, length: f64 },

    #[error("edge {edge} references missing node {node} (network has {n_nodes} nodes)")]
    DanglingEndpoint {
        edge: EdgeId,
        node: i64,
        n_nodes: usize,
    },

    #[error("node {node} has non-finite coordinates ({lon}, {lat})")]
    InvalidCoordinate { node: NodeId, lon: f64, lat: f64 },

    #[error(
        "edges table has no cost source (expected a cost_<mode> column, or length_m with a configured speed)"
    )]
    NoCostColumns,

    #[error("network exceeds {limit} {what}")]
    TooLarge { what: &'static str, limit: u64 },
}

/// Hierarchy preprocessing failure. Nothing is published when a build fails.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("edge {edge}: {mode} cost {cost} is negative or not finite")]
    InvalidCost { edge: EdgeId, mode: Mode, cost: f64 },

    #[error("edge {edge}: {mode} cost {cost} exceeds the representable weight range")]
    CostOutOfRange { edge: EdgeId, mode: Mode, cost: f64 },

    #[error("adjacency tables are inconsistent with the edge list: {0}")]
    InconsistentAdjacency(String),
}

/// Per-origin query failure
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueryError {
    #[error("node {node} not found (network has {n_nodes} nodes)")]
    NodeNotFound { node: NodeId, n_nodes: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("overlay targets network version {overlay}, active version is {active}")]
    VersionMismatch { overlay: u64, active: u64 },

    #[error("hierarchy was built for {built}, query requested {requested}")]
    ModeMismatch { requested: Mode, built: Mode },

    #[error("no hierarchy has been published for mode {0}")]
    NoHierarchy(Mode),

    #[error("query did not complete ({reason}); {settled} nodes were settled")]
    ResourceExhausted { reason: &'static str, settled: usize },
}

/// Batch coordinator failures (the batch itself, not a single origin)
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BatchError {
    #[error("batch queue is full ({capacity} pending batches)")]
    QueueFull { capacity: usize },

    #[error("batch coordinator has shut down")]
    ShutDown,

    #[error("failed to start worker pool: {0}")]
    Pool(String),
}

/// Engine configuration could not be read or is invalid
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Crate-level error
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to write {path}: {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: arrow::error::ArrowError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_offender() {
        let err = ConfigurationError::DanglingEndpoint {
            edge: EdgeId(7),
            node: 99,
            n_nodes: 10,
        };
        assert_eq!(
            err.to_string(),
            "edge 7 references missing node 99 (network has 10 nodes)"
        );

        let err = QueryError::VersionMismatch { overlay: 1, active: 3 };
        assert!(err.to_string().contains("version 1"));

        let err: Error = BuildError::InconsistentAdjacency("offsets not monotonic".into()).into();
        assert!(matches!(err, Error::Build(_)));
    }
}

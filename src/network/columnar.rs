//! Columnar network source (Apache Arrow IPC)
//!
//! A network directory holds two Arrow IPC files:
//!
//! ```text
//! nodes.arrow
//!   node_id: integer      // dense, 0-based
//!   lon: Float64
//!   lat: Float64
//!   walk/bike/car/transit: Boolean (optional, absent or null = available)
//!
//! edges.arrow
//!   edge_id: integer      // dense, 0-based
//!   from: integer
//!   to: integer
//!   cost_walk/cost_bike/cost_car/cost_transit: Float64 (optional, null = mode not allowed)
//!   length_m: Float64 (optional)
//!   geometry_ref: integer (optional)
//! ```
//!
//! A mode without a cost column gets `length_m / speed` when a speed is
//! configured for it. Loading is a pure function of the file contents.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, UInt32Array, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;

use super::{Edge, ModeCosts, Network, NetworkBuilder, NodeId};
use crate::config::ModeSpeeds;
use crate::error::{ConfigurationError, Error};
use crate::mode::{Mode, ModeMask};

pub const NODES_FILE: &str = "nodes.arrow";
pub const EDGES_FILE: &str = "edges.arrow";

const NODES: &str = "nodes";
const EDGES: &str = "edges";

/// Options applied while loading
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub speeds: ModeSpeeds,
}

/// One table: every record batch of one IPC file
struct Table {
    name: &'static str,
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl Table {
    fn read(path: &Path, name: &'static str) -> Result<Self, ConfigurationError> {
        let file = File::open(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let arrow_err = |source| ConfigurationError::Arrow {
            path: path.to_path_buf(),
            source,
        };
        let reader = FileReader::try_new(file, None).map_err(arrow_err)?;
        let schema = reader.schema();
        let batches = reader.collect::<Result<Vec<_>, _>>().map_err(arrow_err)?;
        Ok(Self {
            name,
            schema,
            batches,
        })
    }

    fn n_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }

    fn has(&self, column: &str) -> bool {
        self.schema.field_with_name(column).is_ok()
    }

    fn field_type(&self, column: &str) -> Option<&DataType> {
        self.schema.field_with_name(column).ok().map(|f| f.data_type())
    }

    /// Chunks of `column` cast to `target`, one per record batch
    fn chunks(&self, column: &str, target: &DataType) -> Result<Vec<ArrayRef>, ConfigurationError> {
        self.batches
            .iter()
            .map(|batch| {
                let array = batch
                    .column_by_name(column)
                    .ok_or_else(|| self.missing(column))?;
                arrow::compute::cast(array, target)
                    .map_err(|_| self.wrong_type(column, target_name(target)))
            })
            .collect()
    }

    fn missing(&self, column: &str) -> ConfigurationError {
        ConfigurationError::MissingColumn {
            table: self.name,
            column: column.to_string(),
        }
    }

    fn wrong_type(&self, column: &str, expected: &'static str) -> ConfigurationError {
        ConfigurationError::ColumnType {
            table: self.name,
            column: column.to_string(),
            found: self
                .field_type(column)
                .map(|t| t.to_string())
                .unwrap_or_else(|| "unknown".into()),
            expected,
        }
    }

    /// Required non-null integer column
    fn ints(&self, column: &str) -> Result<Vec<i64>, ConfigurationError> {
        let dtype = self.field_type(column).ok_or_else(|| self.missing(column))?;
        if !dtype.is_integer() {
            return Err(self.wrong_type(column, "integer"));
        }
        let mut out = Vec::with_capacity(self.n_rows());
        for chunk in self.chunks(column, &DataType::Int64)? {
            let values = chunk
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| self.wrong_type(column, "integer"))?;
            for i in 0..values.len() {
                if values.is_null(i) {
                    return Err(ConfigurationError::NullValue {
                        table: self.name,
                        column: column.to_string(),
                        row: out.len(),
                    });
                }
                out.push(values.value(i));
            }
        }
        Ok(out)
    }

    /// Optional nullable integer column
    fn opt_ints(&self, column: &str) -> Result<Option<Vec<Option<i64>>>, ConfigurationError> {
        let Some(dtype) = self.field_type(column) else {
            return Ok(None);
        };
        if !dtype.is_integer() {
            return Err(self.wrong_type(column, "integer"));
        }
        let mut out = Vec::with_capacity(self.n_rows());
        for chunk in self.chunks(column, &DataType::Int64)? {
            let values = chunk
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| self.wrong_type(column, "integer"))?;
            out.extend(values.iter());
        }
        Ok(Some(out))
    }

    /// Float column; nulls allowed unless `required`
    fn floats(
        &self,
        column: &str,
        required: bool,
    ) -> Result<Option<Vec<Option<f64>>>, ConfigurationError> {
        let Some(dtype) = self.field_type(column) else {
            return if required {
                Err(self.missing(column))
            } else {
                Ok(None)
            };
        };
        if !dtype.is_numeric() {
            return Err(self.wrong_type(column, "floating point"));
        }
        let mut out = Vec::with_capacity(self.n_rows());
        for chunk in self.chunks(column, &DataType::Float64)? {
            let values = chunk
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| self.wrong_type(column, "floating point"))?;
            for v in values.iter() {
                if required && v.is_none() {
                    return Err(ConfigurationError::NullValue {
                        table: self.name,
                        column: column.to_string(),
                        row: out.len(),
                    });
                }
                out.push(v);
            }
        }
        Ok(Some(out))
    }

    fn bools(&self, column: &str) -> Result<Option<Vec<Option<bool>>>, ConfigurationError> {
        let Some(dtype) = self.field_type(column) else {
            return Ok(None);
        };
        if dtype != &DataType::Boolean {
            return Err(self.wrong_type(column, "boolean"));
        }
        let mut out = Vec::with_capacity(self.n_rows());
        for chunk in self.chunks(column, &DataType::Boolean)? {
            let values = chunk
                .as_any()
                .downcast_ref::<BooleanArray>()
                .ok_or_else(|| self.wrong_type(column, "boolean"))?;
            out.extend(values.iter());
        }
        Ok(Some(out))
    }
}

fn target_name(dtype: &DataType) -> &'static str {
    match dtype {
        DataType::Int64 => "integer",
        DataType::Float64 => "floating point",
        DataType::Boolean => "boolean",
        _ => "supported type",
    }
}

/// Row order that sorts `ids` to `0..n`; fails unless the ids are exactly `0..n`
fn dense_order(table: &'static str, ids: &[i64]) -> Result<Vec<usize>, ConfigurationError> {
    let mut order: Vec<usize> = (0..ids.len()).collect();
    order.sort_unstable_by_key(|&row| ids[row]);
    for (expected, &row) in order.iter().enumerate() {
        if ids[row] != expected as i64 {
            return Err(ConfigurationError::NonDenseIds {
                table,
                expected: expected as u64,
                found: ids[row],
            });
        }
    }
    Ok(order)
}

/// Load a network directory (`nodes.arrow` + `edges.arrow`). The result is unpublished.
pub fn load_network(dir: &Path, options: &LoadOptions) -> Result<Network, ConfigurationError> {
    let start = std::time::Instant::now();
    let nodes = Table::read(&dir.join(NODES_FILE), NODES)?;
    let edges = Table::read(&dir.join(EDGES_FILE), EDGES)?;

    // Nodes
    let node_ids = nodes.ints("node_id")?;
    let lons = nodes.floats("lon", true)?.unwrap_or_default();
    let lats = nodes.floats("lat", true)?.unwrap_or_default();
    let mut availability = Vec::with_capacity(Mode::COUNT);
    for &mode in Mode::all() {
        availability.push((mode, nodes.bools(mode.name())?));
    }

    let node_order = dense_order(NODES, &node_ids)?;
    let edge_ids = edges.ints("edge_id")?;
    let edge_order = dense_order(EDGES, &edge_ids)?;

    let mut builder = NetworkBuilder::with_capacity(node_order.len(), edge_order.len());
    for &row in &node_order {
        let mut mask = ModeMask::NONE;
        for (mode, column) in &availability {
            let allowed = column
                .as_ref()
                .and_then(|c| c[row])
                .unwrap_or(true);
            if allowed {
                mask = mask.with(*mode);
            }
        }
        builder.add_node(lons[row].unwrap_or(f64::NAN), lats[row].unwrap_or(f64::NAN), mask);
    }

    // Edges
    let n_nodes = node_order.len();
    let from = edges.ints("from")?;
    let to = edges.ints("to")?;
    let lengths = edges.floats("length_m", false)?;
    let geometry = edges.opt_ints("geometry_ref")?;

    let mut cost_columns: Vec<(Mode, Option<Vec<Option<f64>>>)> = Vec::with_capacity(Mode::COUNT);
    for &mode in Mode::all() {
        cost_columns.push((mode, edges.floats(mode.cost_column(), false)?));
    }
    let derivable = |mode: Mode| lengths.is_some() && options.speeds.get(mode).is_some();
    if cost_columns
        .iter()
        .all(|(mode, column)| column.is_none() && !derivable(*mode))
    {
        return Err(ConfigurationError::NoCostColumns);
    }

    for (i, &row) in edge_order.iter().enumerate() {
        let edge = super::EdgeId(i as u32);
        let endpoint = |raw: i64| -> Result<NodeId, ConfigurationError> {
            if raw < 0 || raw as u64 >= n_nodes as u64 {
                Err(ConfigurationError::DanglingEndpoint {
                    edge,
                    node: raw,
                    n_nodes,
                })
            } else {
                Ok(NodeId(raw as u32))
            }
        };
        let length_m = lengths.as_ref().and_then(|l| l[row]);

        let mut costs = ModeCosts::default();
        for (mode, column) in &cost_columns {
            let cost = match column {
                Some(values) => values[row],
                None => length_m.and_then(|len| options.speeds.seconds_for(*mode, len)),
            };
            costs.set(*mode, cost);
        }

        builder.push_edge(Edge {
            from: endpoint(from[row])?,
            to: endpoint(to[row])?,
            costs,
            length_m,
            geometry: geometry.as_ref().and_then(|g| g[row]).map(|g| g as u64),
        });
    }

    let network = builder.build()?;
    tracing::info!(
        dir = %dir.display(),
        nodes = network.n_nodes(),
        edges = network.n_edges(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "loaded network"
    );
    Ok(network)
}

fn nodes_schema() -> Schema {
    let mut fields = vec![
        Field::new("node_id", DataType::UInt32, false),
        Field::new("lon", DataType::Float64, false),
        Field::new("lat", DataType::Float64, false),
    ];
    for mode in Mode::all() {
        fields.push(Field::new(mode.name(), DataType::Boolean, false));
    }
    Schema::new(fields)
}

fn edges_schema() -> Schema {
    let mut fields = vec![
        Field::new("edge_id", DataType::UInt32, false),
        Field::new("from", DataType::UInt32, false),
        Field::new("to", DataType::UInt32, false),
    ];
    for mode in Mode::all() {
        fields.push(Field::new(mode.cost_column(), DataType::Float64, true));
    }
    fields.push(Field::new("length_m", DataType::Float64, true));
    fields.push(Field::new("geometry_ref", DataType::UInt64, true));
    Schema::new(fields)
}

fn write_ipc(path: PathBuf, batch: &RecordBatch) -> Result<(), Error> {
    let file = File::create(&path)?;
    let export_err = |source| Error::Export {
        path: path.clone(),
        source,
    };
    let mut writer =
        FileWriter::try_new(BufWriter::new(file), &batch.schema()).map_err(export_err)?;
    writer.write(batch).map_err(export_err)?;
    writer.finish().map_err(export_err)?;
    Ok(())
}

/// Write `network` as a network directory readable by [`load_network`]
pub fn write_network(dir: &Path, network: &Network) -> Result<(), Error> {
    std::fs::create_dir_all(dir)?;
    let export_err = |path: &str| {
        let path = dir.join(path);
        move |source| Error::Export { path, source }
    };

    let nodes = network.nodes();
    let mut node_columns: Vec<ArrayRef> = vec![
        Arc::new(UInt32Array::from_iter_values(0..nodes.len() as u32)),
        Arc::new(Float64Array::from_iter_values(nodes.iter().map(|n| n.lon))),
        Arc::new(Float64Array::from_iter_values(nodes.iter().map(|n| n.lat))),
    ];
    for &mode in Mode::all() {
        node_columns.push(Arc::new(BooleanArray::from(
            nodes.iter().map(|n| n.modes.contains(mode)).collect::<Vec<_>>(),
        )));
    }
    let node_batch = RecordBatch::try_new(Arc::new(nodes_schema()), node_columns)
        .map_err(export_err(NODES_FILE))?;

    let edges = network.edges();
    let mut edge_columns: Vec<ArrayRef> = vec![
        Arc::new(UInt32Array::from_iter_values(0..edges.len() as u32)),
        Arc::new(UInt32Array::from_iter_values(edges.iter().map(|e| e.from.0))),
        Arc::new(UInt32Array::from_iter_values(edges.iter().map(|e| e.to.0))),
    ];
    for &mode in Mode::all() {
        edge_columns.push(Arc::new(Float64Array::from(
            edges.iter().map(|e| e.costs.get(mode)).collect::<Vec<_>>(),
        )));
    }
    edge_columns.push(Arc::new(Float64Array::from(
        edges.iter().map(|e| e.length_m).collect::<Vec<_>>(),
    )));
    edge_columns.push(Arc::new(UInt64Array::from(
        edges.iter().map(|e| e.geometry).collect::<Vec<_>>(),
    )));
    let edge_batch = RecordBatch::try_new(Arc::new(edges_schema()), edge_columns)
        .map_err(export_err(EDGES_FILE))?;

    write_ipc(dir.join(NODES_FILE), &node_batch)?;
    write_ipc(dir.join(EDGES_FILE), &edge_batch)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::EdgeId;

    fn col<A: Array + 'static>(array: A) -> ArrayRef {
        Arc::new(array)
    }

    fn write_batch(path: PathBuf, columns: Vec<(&str, ArrayRef)>) {
        let batch = RecordBatch::try_from_iter(columns).unwrap();
        write_ipc(path, &batch).unwrap();
    }

    fn sample() -> Network {
        let mut b = NetworkBuilder::new();
        let a = b.add_node(4.35, 50.85, ModeMask::ALL);
        let c = b.add_node(4.36, 50.85, ModeMask::ALL.without(Mode::Car));
        let d = b.add_node(4.37, 50.86, ModeMask::ALL);
        b.add_bidirectional(a, c, ModeCosts::uniform(12.5).without(Mode::Transit));
        b.add_edge(c, d, ModeCosts::only(Mode::Transit, 90.0));
        b.build().unwrap()
    }

    #[test]
    fn test_written_network_loads_equivalently() {
        let dir = tempfile::tempdir().unwrap();
        let net = sample();
        write_network(dir.path(), &net).unwrap();

        let loaded = load_network(dir.path(), &LoadOptions::default()).unwrap();
        assert_eq!(loaded.nodes(), net.nodes());
        assert_eq!(loaded.edges(), net.edges());
        assert_eq!(loaded.mode_cost(EdgeId(2), Mode::Transit), Some(90.0));
        assert_eq!(loaded.mode_cost(EdgeId(0), Mode::Transit), None);
    }

    #[test]
    fn test_shuffled_rows_and_speed_derived_costs() {
        let dir = tempfile::tempdir().unwrap();
        write_batch(
            dir.path().join(NODES_FILE),
            vec![
                ("node_id", col(Int64Array::from(vec![1, 0]))),
                ("lon", col(Float64Array::from(vec![1.0, 0.0]))),
                ("lat", col(Float64Array::from(vec![1.0, 0.0]))),
            ],
        );
        write_batch(
            dir.path().join(EDGES_FILE),
            vec![
                ("edge_id", col(Int64Array::from(vec![0]))),
                ("from", col(Int64Array::from(vec![0]))),
                ("to", col(Int64Array::from(vec![1]))),
                ("length_m", col(Float64Array::from(vec![1000.0]))),
                ("cost_car", col(Float64Array::from(vec![Some(60.0)]))),
            ],
        );

        let net = load_network(dir.path(), &LoadOptions::default()).unwrap();
        assert_eq!(net.nodes()[1].lon, 1.0);
        assert_eq!(net.mode_cost(EdgeId(0), Mode::Car), Some(60.0));
        // walk at 5 km/h over 1 km
        let walk = net.mode_cost(EdgeId(0), Mode::Walk).unwrap();
        assert!((walk - 720.0).abs() < 1e-9);
        // no speed configured for transit
        assert_eq!(net.mode_cost(EdgeId(0), Mode::Transit), None);
    }

    #[test]
    fn test_load_failures() {
        let dir = tempfile::tempdir().unwrap();
        write_batch(
            dir.path().join(NODES_FILE),
            vec![
                ("node_id", col(Int64Array::from(vec![0, 1]))),
                ("lon", col(Float64Array::from(vec![0.0, 1.0]))),
            ],
        );
        write_batch(
            dir.path().join(EDGES_FILE),
            vec![
                ("edge_id", col(Int64Array::from(vec![0]))),
                ("from", col(Int64Array::from(vec![0]))),
                ("to", col(Int64Array::from(vec![5]))),
                ("cost_walk", col(Float64Array::from(vec![1.0]))),
            ],
        );
        let err = load_network(dir.path(), &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingColumn { column, .. } if column == "lat"));

        write_batch(
            dir.path().join(NODES_FILE),
            vec![
                ("node_id", col(Int64Array::from(vec![0, 1]))),
                ("lon", col(Float64Array::from(vec![0.0, 1.0]))),
                ("lat", col(Float64Array::from(vec![0.0, 1.0]))),
            ],
        );
        let err = load_network(dir.path(), &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, ConfigurationError::DanglingEndpoint { node: 5, .. }));

        write_batch(
            dir.path().join(EDGES_FILE),
            vec![
                ("edge_id", col(Int64Array::from(vec![0]))),
                ("from", col(Int64Array::from(vec![0]))),
                ("to", col(Int64Array::from(vec![1]))),
                ("cost_walk", col(Float64Array::from(vec![f64::NAN]))),
            ],
        );
        let err = load_network(dir.path(), &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidCost { mode: Mode::Walk, .. }));

        write_batch(
            dir.path().join(NODES_FILE),
            vec![
                ("node_id", col(Int64Array::from(vec![0, 2]))),
                ("lon", col(Float64Array::from(vec![0.0, 1.0]))),
                ("lat", col(Float64Array::from(vec![0.0, 1.0]))),
            ],
        );
        let err = load_network(dir.path(), &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, ConfigurationError::NonDenseIds { expected: 1, found: 2, .. }));

        let empty = tempfile::tempdir().unwrap();
        let err = load_network(empty.path(), &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, ConfigurationError::Io { .. }));
    }

    #[test]
    fn test_cost_sources() {
        let dir = tempfile::tempdir().unwrap();
        write_batch(
            dir.path().join(NODES_FILE),
            vec![
                ("node_id", col(Int64Array::from(vec![0, 1]))),
                ("lon", col(Float64Array::from(vec![0.0, 1.0]))),
                ("lat", col(Float64Array::from(vec![0.0, 1.0]))),
            ],
        );
        write_batch(
            dir.path().join(EDGES_FILE),
            vec![
                ("edge_id", col(Int64Array::from(vec![0]))),
                ("from", col(Int64Array::from(vec![0]))),
                ("to", col(Int64Array::from(vec![1]))),
                ("cost_bike", col(Float64Array::from(vec![Some(3.0)]))),
            ],
        );
        // bike alone is enough; the other modes just have no cost
        let net = load_network(dir.path(), &LoadOptions::default()).unwrap();
        assert_eq!(net.mode_cost(EdgeId(0), Mode::Bike), Some(3.0));
        for mode in [Mode::Walk, Mode::Car, Mode::Transit] {
            assert_eq!(net.mode_cost(EdgeId(0), mode), None);
        }

        write_batch(
            dir.path().join(EDGES_FILE),
            vec![
                ("edge_id", col(Int64Array::from(vec![0]))),
                ("from", col(Int64Array::from(vec![0]))),
                ("to", col(Int64Array::from(vec![1]))),
                ("length_m", col(Float64Array::from(vec![500.0]))),
            ],
        );
        let no_speeds = LoadOptions {
            speeds: ModeSpeeds::none(),
        };
        let err = load_network(dir.path(), &no_speeds).unwrap_err();
        assert!(matches!(err, ConfigurationError::NoCostColumns));
        assert!(load_network(dir.path(), &LoadOptions::default()).is_ok());
    }
}

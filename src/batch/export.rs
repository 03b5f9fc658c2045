//! Origin-destination export (Apache Arrow IPC)
//!
//! One row per reached `(origin, node)` pair, consumed by heatmap and OD
//! flow tools (DuckDB, Polars, pyarrow, ...):
//!
//! ```text
//! origin_index: u32   // position of the origin in the batch request
//! origin: u32         // origin node id
//! node: u32           // reached node id
//! cost: f64           // network units
//! band: u32?          // break band, null without breaks or above the last break
//! ```
//!
//! Failed origins contribute no rows.

use arrow::array::{ArrayRef, Float64Array, UInt32Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

use super::BatchResult;
use crate::ch::to_cost;
use crate::error::Error;
use crate::isochrone::band_of;

pub fn od_schema() -> Schema {
    Schema::new(vec![
        Field::new("origin_index", DataType::UInt32, false),
        Field::new("origin", DataType::UInt32, false),
        Field::new("node", DataType::UInt32, false),
        Field::new("cost", DataType::Float64, false),
        Field::new("band", DataType::UInt32, true),
    ])
}

/// Flatten a batch result into OD rows
pub fn to_record_batch(result: &BatchResult) -> Result<RecordBatch, ArrowError> {
    let rows: usize = result
        .results
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .map(|r| r.len())
        .sum();

    let mut origin_index = Vec::with_capacity(rows);
    let mut origin = Vec::with_capacity(rows);
    let mut node = Vec::with_capacity(rows);
    let mut cost = Vec::with_capacity(rows);
    let mut band = Vec::with_capacity(rows);

    for (i, outcome) in result.results.iter().enumerate() {
        let Ok(iso) = outcome else {
            continue;
        };
        for &(n, w) in &iso.reached {
            origin_index.push(i as u32);
            origin.push(iso.origin.0);
            node.push(n.0);
            cost.push(to_cost(w));
            band.push(result.breaks.as_ref().and_then(|b| band_of(w, b)));
        }
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(UInt32Array::from(origin_index)),
        Arc::new(UInt32Array::from(origin)),
        Arc::new(UInt32Array::from(node)),
        Arc::new(Float64Array::from(cost)),
        Arc::new(UInt32Array::from(band)),
    ];
    RecordBatch::try_new(Arc::new(od_schema()), columns)
}

/// Write the OD rows of `result` to an Arrow IPC file. Returns the row count.
pub fn write_od_file(path: &Path, result: &BatchResult) -> Result<usize, Error> {
    let export_err = |source| Error::Export {
        path: path.to_path_buf(),
        source,
    };
    let batch = to_record_batch(result).map_err(export_err)?;
    let file = File::create(path)?;
    let mut writer =
        FileWriter::try_new(BufWriter::new(file), &batch.schema()).map_err(export_err)?;
    writer.write(&batch).map_err(export_err)?;
    writer.finish().map_err(export_err)?;

    tracing::info!(path = %path.display(), rows = batch.num_rows(), "wrote OD rows");
    Ok(batch.num_rows())
}

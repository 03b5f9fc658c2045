use arrow::array::{Float64Array, UInt32Array};
use arrow::ipc::reader::FileReader;
use butterfly_reach::batch::export::{to_record_batch, write_od_file};
use butterfly_reach::{
    synthetic, BatchRequest, Breaks, Engine, EngineConfig, Error, IsochroneRequest, Mode, NodeId,
    QueryError,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::time::Duration;

fn engine(threads: usize) -> Engine {
    let mut config = EngineConfig::default();
    config.workers.threads = threads;
    let engine = Engine::new(config).unwrap();
    let handle = engine.publish_network(synthetic::random(800, 3, 4).unwrap());
    engine.build_hierarchy(&handle, Mode::Walk).unwrap();
    engine
}

#[test]
fn test_thousand_origins_fill_their_own_slots() {
    let engine = engine(8);
    let mut rng = StdRng::seed_from_u64(1);
    let origins: Vec<NodeId> = (0..1000).map(|_| NodeId(rng.random_range(0..800))).collect();

    let result = engine
        .isochrone_batch(BatchRequest::new(origins.clone(), Mode::Walk, 300.0))
        .unwrap();

    assert_eq!(result.len(), 1000);
    assert_eq!(result.stats.origins, 1000);
    assert_eq!(result.stats.succeeded + result.stats.failed, 1000);
    assert_eq!(result.stats.threads, 8);
    for (slot, origin) in result.results.iter().zip(&origins) {
        let single = engine.isochrone(&IsochroneRequest::new(*origin, Mode::Walk, 300.0));
        match (slot, single) {
            (Ok(batched), Ok(single)) => {
                assert_eq!(batched.origin, *origin);
                assert_eq!(batched.reached, single.reached);
            }
            (Err(a), Err(b)) => assert_eq!(*a, b),
            (a, b) => panic!("origin {origin}: batch {a:?} vs single {b:?}"),
        }
    }
}

#[test]
fn test_failing_origins_do_not_abort_the_batch() {
    let engine = engine(2);
    let origins = vec![NodeId(0), NodeId(5000), NodeId(1)];
    let result = engine
        .isochrone_batch(BatchRequest::new(origins, Mode::Walk, 100.0))
        .unwrap();

    assert!(result.results[0].is_ok());
    assert!(matches!(result.results[1], Err(QueryError::NodeNotFound { .. })));
    assert!(result.results[2].is_ok());
    assert_eq!(result.stats.failed, 1);
}

#[test]
fn test_batch_without_hierarchy() {
    let engine = engine(1);
    let err = engine
        .isochrone_batch(BatchRequest::new(vec![NodeId(0)], Mode::Car, 100.0))
        .unwrap_err();
    assert!(matches!(err, Error::Query(QueryError::NoHierarchy(Mode::Car))));
}

#[test]
fn test_expired_batch_timeout_marks_results_incomplete() {
    let engine = engine(2);
    let request = BatchRequest::new((0..20).map(NodeId).collect(), Mode::Walk, 1000.0)
        .with_timeout(Duration::ZERO);
    let result = engine.isochrone_batch(request).unwrap();
    assert_eq!(result.len(), 20);
    assert_eq!(result.stats.incomplete, result.stats.succeeded);
    for slot in result.results.iter().flatten() {
        assert!(!slot.is_complete());
        assert!(slot.contains(slot.origin));
    }
}

#[test]
fn test_od_rows_match_reached_nodes() {
    let engine = engine(4);
    let origins = vec![NodeId(3), NodeId(9999), NodeId(3), NodeId(400)];
    let request = BatchRequest::new(origins, Mode::Walk, 200.0)
        .with_breaks(Breaks::evenly_spaced(200.0, 4).unwrap());
    let result = engine.isochrone_batch(request).unwrap();
    let expected_rows = result.stats.reached_total;

    let batch = to_record_batch(&result).unwrap();
    assert_eq!(batch.num_rows(), expected_rows);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("od.arrow");
    assert_eq!(write_od_file(&path, &result).unwrap(), expected_rows);

    let reader = FileReader::try_new(File::open(&path).unwrap(), None).unwrap();
    let mut rows = 0;
    for batch in reader {
        let batch = batch.unwrap();
        let index = batch
            .column_by_name("origin_index")
            .unwrap()
            .as_any()
            .downcast_ref::<UInt32Array>()
            .unwrap();
        let cost = batch
            .column_by_name("cost")
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        for i in 0..batch.num_rows() {
            // the failed origin (slot 1) contributes nothing
            assert_ne!(index.value(i), 1);
            assert!(cost.value(i) <= 200.0);
        }
        rows += batch.num_rows();
    }
    assert_eq!(rows, expected_rows);
}

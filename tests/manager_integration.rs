//! End-to-end dispatch through the task manager.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::{Value, json};

use geoworker::config::{Config, ParamMap};
use geoworker::error::DispatchError;
use geoworker::params::{chain_overrides, resolve_params};
use geoworker::raster::Raster;
use geoworker::worker::{TaskFamily, TaskManager, TaskStatus, WorkerEvent};

fn params(value: Value) -> ParamMap {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn manager() -> TaskManager {
    TaskManager::new(Config::default())
}

fn write_array(path: &Path, shape: Vec<usize>) -> PathBuf {
    let len = shape.iter().product::<usize>();
    let data = (0..len).map(|i| (i % 97) as f64).collect();
    Raster::new(shape, data).unwrap().save(path).unwrap();
    path.to_path_buf()
}

#[tokio::test]
async fn missing_input_fails_with_path() {
    let manager = manager();
    let handle = manager
        .dispatch(
            TaskFamily::FileOperation,
            params(json!({ "input_paths": ["/nonexistent.tif"] })),
        )
        .await
        .unwrap();

    let result = handle.wait().await;
    assert_eq!(result.status(), TaskStatus::Failure);
    assert!(result.message().contains("/nonexistent.tif"));
    assert!(result.outputs().is_empty());
}

#[tokio::test]
async fn stretch_keeps_shape() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_array(&dir.path().join("a.npy"), vec![6, 5]);
    let manager = manager();

    let handle = manager
        .dispatch(
            TaskFamily::ImageProcessing,
            params(json!({
                "paths": [input],
                "methods": ["stretch"],
                "options": { "stretch": { "in_range": [2, 98] } },
                "output_dir": dir.path().join("processed"),
            })),
        )
        .await
        .unwrap();

    let (progress, result) = handle.join().await;
    assert_eq!(result.status(), TaskStatus::Success, "{}", result.message());
    assert!(!progress.is_empty());
    assert_eq!(result.outputs().len(), 1);
    let output = Raster::load(&result.outputs()[0]).unwrap();
    assert_eq!(output.shape(), [6, 5]);
}

#[tokio::test]
async fn samples_table_excludes_unlabelled_rows() {
    let dir = tempfile::tempdir().unwrap();
    let samples = dir.path().join("samples.csv");
    std::fs::write(&samples, "CLASSIFIED,RASTERVALU\n1,1\n1,0\n0,0\n-1,1\n").unwrap();
    let manager = manager();

    let handle = manager
        .dispatch(
            TaskFamily::Evaluation,
            params(json!({
                "samples_file": samples,
                "output_dir": dir.path().join("evaluation"),
            })),
        )
        .await
        .unwrap();

    let result = handle.wait().await;
    assert_eq!(result.status(), TaskStatus::Success, "{}", result.message());
    assert!(result.logs().iter().any(|l| l == "Labelled samples: 3"));
    assert_eq!(result.outputs().len(), 3);
    for output in result.outputs() {
        assert!(output.exists(), "{} missing", output.display());
    }
    let csv = std::fs::read_to_string(&result.outputs()[0]).unwrap();
    assert_eq!(csv, "reference\\predicted,0,1\n0,1,0\n1,1,1\n");
}

#[tokio::test]
async fn overlapping_dispatches_each_finish_once() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_array(&dir.path().join("big.npy"), vec![2, 120, 120]);
    let features = write_array(&dir.path().join("features.npy"), vec![10, 10, 3]);
    let manager = manager();
    let mut events = manager.subscribe();

    let a = manager
        .dispatch(
            TaskFamily::ImageProcessing,
            params(json!({
                "paths": [image],
                "methods": ["smooth", "sharpen", "edge"],
                "options": { "smooth": { "size": 15 } },
                "output_dir": dir.path().join("processed"),
            })),
        )
        .await
        .unwrap();
    let b = manager
        .dispatch(
            TaskFamily::Classification,
            params(json!({
                "data": { "features": features },
                "pipeline_config": { "classifiers": [{ "name": "kmeans", "params": { "k": 3 } }] },
                "output_dir": dir.path().join("classification"),
            })),
        )
        .await
        .unwrap();
    let (a_id, b_id) = (a.id(), b.id());
    assert_ne!(a_id, b_id);

    let (a_result, b_result) = tokio::join!(a.wait(), b.wait());
    assert_eq!(a_result.status(), TaskStatus::Success, "{}", a_result.message());
    assert_eq!(b_result.status(), TaskStatus::Success, "{}", b_result.message());
    manager.wait_idle().await;

    let mut finished: HashMap<_, usize> = HashMap::new();
    let mut first_started = None;
    while let Ok(event) = events.try_recv() {
        match event {
            WorkerEvent::Started { worker_id, .. } if first_started.is_none() => {
                first_started = Some(worker_id);
            }
            WorkerEvent::Finished { worker_id, .. } => {
                *finished.entry(worker_id).or_default() += 1;
            }
            _ => {}
        }
    }
    assert_eq!(first_started, Some(a_id));
    assert_eq!(finished.get(&a_id), Some(&1));
    assert_eq!(finished.get(&b_id), Some(&1));
}

#[tokio::test]
async fn cancel_when_idle_is_noop() {
    let manager = manager();
    assert!(!manager.cancel().await);
    manager.cancel_all().await;
    assert!(manager.active().await.is_none());
}

#[tokio::test]
async fn cancel_active_worker_delivers_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let images: Vec<PathBuf> = (0..20)
        .map(|i| write_array(&dir.path().join(format!("img{i}.npy")), vec![200, 200]))
        .collect();
    let manager = manager();

    let mut handle = manager
        .dispatch(
            TaskFamily::ImageProcessing,
            params(json!({
                "paths": images,
                "methods": ["smooth"],
                "options": { "smooth": { "size": 21 } },
                "output_dir": dir.path().join("processed"),
            })),
        )
        .await
        .unwrap();

    assert!(handle.next_progress().await.is_some());
    assert!(manager.cancel().await);
    let result = handle.wait().await;
    assert_eq!(result.status(), TaskStatus::Cancelled);
    assert!(result.outputs().len() < 20);
}

#[tokio::test]
async fn overrides_replace_defaults() {
    let defaults = params(json!({ "bands": [1, 2, 3] }));
    let overrides = params(json!({ "bands": [4] }));
    assert_eq!(
        Value::Object(resolve_params(&defaults, &overrides)),
        json!({ "bands": [4] })
    );
}

#[tokio::test]
async fn full_queue_reported_synchronously() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_array(&dir.path().join("big.npy"), vec![200, 200]);
    let mut config = Config::default();
    config.queue_capacity = 0;
    let manager = TaskManager::new(config);

    let active = manager
        .dispatch(
            TaskFamily::ImageProcessing,
            params(json!({
                "paths": [image],
                "methods": ["smooth", "smooth", "smooth"],
                "options": { "smooth": { "size": 21 } },
                "output_dir": dir.path().join("processed"),
            })),
        )
        .await
        .unwrap();

    let err = manager
        .dispatch(
            TaskFamily::FileOperation,
            params(json!({ "input_paths": ["/nonexistent.tif"] })),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Busy { capacity: 0 }));

    manager.cancel().await;
    assert_eq!(active.wait().await.status(), TaskStatus::Cancelled);
}

#[tokio::test]
async fn chained_families_feed_outputs_forward() {
    let dir = tempfile::tempdir().unwrap();
    let scene = write_array(&dir.path().join("scene.npy"), vec![5, 8, 8]);
    let manager = manager();

    let features = manager
        .dispatch(
            TaskFamily::FeatureExtraction,
            params(json!({
                "input_files": [scene],
                "output_dir": dir.path().join("features"),
            })),
        )
        .await
        .unwrap()
        .wait()
        .await;
    assert_eq!(features.status(), TaskStatus::Success, "{}", features.message());

    let mut next = chain_overrides(TaskFamily::Classification, features.outputs());
    next.insert(
        "output_dir".into(),
        json!(dir.path().join("classification")),
    );
    let classified = manager
        .dispatch(TaskFamily::Classification, next)
        .await
        .unwrap()
        .wait()
        .await;
    assert_eq!(classified.status(), TaskStatus::Success, "{}", classified.message());
    let map = Raster::load(&classified.outputs()[0]).unwrap();
    assert_eq!(map.shape(), [8, 8]);
}

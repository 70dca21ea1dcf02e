mod common;

use std::fs;
use std::sync::Arc;

use mos_sanitizer::calibrator::SanitizedArtifact;
use mos_sanitizer::transport::{keys, require_json};
use mos_sanitizer::{
    AnalysisCatalog, ArtifactStore, CsvDataset, DatasetCatalog, FileArtifactStore,
    InMemoryTaskQueue, Job, LocalPipeline,
};
use tempfile::tempdir;

use common::{DATASET_ID, SCRIPT_REF, people, summary_routine, test_config};

#[test]
fn csv_job_persists_every_artifact_on_disk() {
    let temp = tempdir().unwrap();
    let csv_path = temp.path().join("people.csv");
    let table = people(120);
    let mut csv = String::from("age,state\n");
    for row in &table.rows {
        csv.push_str(&format!("{},{}\n", row[0], row[1]));
    }
    fs::write(&csv_path, csv).unwrap();

    let store_root = temp.path().join("store");
    let store = Arc::new(FileArtifactStore::new(&store_root));
    let config = test_config();
    let pipeline = LocalPipeline::new(
        store.clone(),
        Arc::new(InMemoryTaskQueue::new()),
        AnalysisCatalog::new().with(Arc::new(summary_routine())),
        DatasetCatalog::new().with(Arc::new(CsvDataset::new(DATASET_ID, &csv_path))),
        config.clone(),
    );
    let outcome = pipeline
        .run_job(&Job::new("disk", DATASET_ID, SCRIPT_REF, &config))
        .unwrap();

    for key in [
        keys::baseline("disk"),
        keys::mos("disk"),
        keys::sanitized("disk", 1),
        keys::subset("disk", DATASET_ID, 0),
        keys::probe_subset("disk", DATASET_ID),
    ] {
        assert!(store_root.join(&key).is_file(), "missing {key}");
    }
    assert_eq!(
        store
            .count(&keys::partial_results_prefix("disk"))
            .unwrap(),
        outcome.dispatch.num_tasks_dispatched
    );

    // A fresh handle on the same directory sees the same release.
    let reopened = FileArtifactStore::new(&store_root);
    let stored: SanitizedArtifact =
        require_json(&reopened, &keys::sanitized("disk", 1)).unwrap();
    assert_eq!(stored, outcome.sanitized);
    assert!(
        walk_has_no_temp_files(&store_root),
        "temp files left behind"
    );
}

fn walk_has_no_temp_files(root: &std::path::Path) -> bool {
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "tmp") {
                return false;
            }
        }
    }
    true
}

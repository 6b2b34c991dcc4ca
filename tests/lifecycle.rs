//! End-to-end job lifecycle tests over the in-memory store, a recording
//! mailer and a shell script standing in for the external pipeline binary.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use genoflow::config::{EngineConfig, PipelineCommand};
use genoflow::engine::{Engine, SubmitRequest};
use genoflow::job::JobStatus;
use genoflow::notify::{Notifier, RecordingMailer, StaticDirectory};
use genoflow::params::ProcessingParams;
use genoflow::pipeline::PipelineKind;
use genoflow::rawdata::{InputDataPackage, RawDataSelection};
use genoflow::storage::MemoryJobStore;
use genoflow::SubmitError;

const OWNER: &str = "user-1";
const OWNER_EMAIL: &str = "owner@example.org";
const SUPPORT_EMAIL: &str = "support@example.org";

struct Harness {
    engine: Arc<Engine>,
    store: Arc<MemoryJobStore>,
    mailer: Arc<RecordingMailer>,
    work_dir: tempfile::TempDir,
    data_dir: tempfile::TempDir,
}

/// Builds an engine whose "pipeline binary" is a shell script.
fn harness(script: &str) -> Harness {
    let work_dir = tempfile::TempDir::new().unwrap();
    let data_dir = tempfile::TempDir::new().unwrap();

    let script_path = work_dir.path().join("pipeline.sh");
    std::fs::write(&script_path, script).unwrap();

    let config = EngineConfig::default()
        .with_work_dir(work_dir.path())
        .with_default_command(PipelineCommand::new(
            "sh",
            script_path.display().to_string(),
        ));

    let store = Arc::new(MemoryJobStore::new());
    let mailer = Arc::new(RecordingMailer::new());
    let notifier = Notifier::new(
        mailer.clone(),
        Arc::new(StaticDirectory::new().with_user(OWNER, OWNER_EMAIL)),
        "portal@example.org",
        vec![SUPPORT_EMAIL.to_string()],
    )
    .unwrap();

    let engine = Arc::new(Engine::new(config, store.clone(), notifier));

    Harness {
        engine,
        store,
        mailer,
        work_dir,
        data_dir,
    }
}

/// Writes an expression-array package with the given raw files, annotating
/// `annotated` in the sample annotation file.
fn write_package(dir: &Path, serial: i32, raw: &[&str], annotated: &[&str]) -> InputDataPackage {
    let mut annot = String::from("filename\tsample\n");
    for (i, name) in annotated.iter().enumerate() {
        annot.push_str(&format!("{name}\tS{i}\n"));
    }
    std::fs::write(dir.join("samples.txt"), annot).unwrap();
    for name in raw {
        std::fs::write(dir.join(name), "raw").unwrap();
    }

    InputDataPackage {
        study_id: "STU-1".to_string(),
        pipeline: PipelineKind::ExpressionArray,
        serial_number: serial,
        filepath: dir.to_path_buf(),
        description: "uploaded data".to_string(),
        upload_time: Utc::now(),
        owner_user_id: OWNER.to_string(),
        samples_annot_file: "samples.txt".to_string(),
        ctrl_file: String::new(),
        interval_file: String::new(),
        gtf_file: String::new(),
    }
}

fn request(selection: RawDataSelection) -> SubmitRequest {
    SubmitRequest {
        study_id: "STU-1".to_string(),
        owner_user_id: OWNER.to_string(),
        kind: PipelineKind::ExpressionArray,
        annotation: "hg38".to_string(),
        selection: Some(selection),
        processing: ProcessingParams {
            normalization: "rma".to_string(),
            summarization: "median".to_string(),
            read_depth: 0,
            variant_depth: 0,
            exclude_db: false,
        },
    }
}

fn param_file_content(work_dir: &Path) -> String {
    let path = std::fs::read_dir(work_dir)
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.path())
        .find(|p| p.extension().is_some_and(|ext| ext == "params"))
        .expect("a parameter file should exist");
    std::fs::read_to_string(path).unwrap()
}

// Fresh upload, everything present, pipeline exits 0.
#[tokio::test]
async fn fresh_upload_success_completes_and_mails_owner() {
    let h = harness("exit 0");
    let pkg = write_package(h.data_dir.path(), 1, &["a.cel", "b.cel"], &["a.cel", "b.cel"]);

    let outcome = h
        .engine
        .submit(request(RawDataSelection::FreshUpload { package: pkg }))
        .await
        .unwrap();
    assert!(outcome.missing_files.is_empty());

    outcome.detector.expect("detector should attach").await.unwrap();

    let job = h.store.jobs().into_iter().next().unwrap();
    assert_eq!(job.id, outcome.job_id);
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.complete_time.is_some());
    assert!(job.complete_time.unwrap() >= job.submit_time);

    let sent = h.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec![OWNER_EMAIL.to_string()]);
    assert!(sent[0].subject.contains("completed"));
}

// Pipeline exits 137.
#[tokio::test]
async fn nonzero_exit_fails_and_escalates_to_support() {
    let h = harness("exit 137");
    let pkg = write_package(h.data_dir.path(), 1, &["a.cel"], &["a.cel"]);

    let outcome = h
        .engine
        .submit(request(RawDataSelection::FreshUpload { package: pkg }))
        .await
        .unwrap();
    outcome.detector.expect("detector should attach").await.unwrap();

    let job = h.store.jobs().into_iter().next().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.complete_time.is_some());

    let sent = h.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].to,
        vec![OWNER_EMAIL.to_string(), SUPPORT_EMAIL.to_string()]
    );
    assert!(sent[0].body.contains("137"));
}

// The process cannot be spawned at all.
#[tokio::test]
async fn spawn_failure_fails_job_without_detector_or_mail() {
    let h = harness("exit 0");
    let pkg = write_package(h.data_dir.path(), 1, &["a.cel"], &["a.cel"]);

    // Break the command after harness construction.
    let config = EngineConfig::default()
        .with_work_dir(h.work_dir.path())
        .with_default_command(PipelineCommand::new("no-such-binary-anywhere", "-x"));
    let notifier = Notifier::new(
        h.mailer.clone(),
        Arc::new(StaticDirectory::new().with_user(OWNER, OWNER_EMAIL)),
        "portal@example.org",
        vec![SUPPORT_EMAIL.to_string()],
    )
    .unwrap();
    let engine = Arc::new(Engine::new(config, h.store.clone(), notifier));

    let result = engine
        .submit(request(RawDataSelection::FreshUpload { package: pkg }))
        .await;
    assert!(matches!(result, Err(SubmitError::Launch(_))));

    let job = h.store.jobs().into_iter().next().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    // Pre-execution failure: no complete_time, no outcome mail
    assert!(job.complete_time.is_none());
    assert!(h.mailer.sent().is_empty());
}

// Reuse with two of five raw files excluded.
#[tokio::test]
async fn reuse_with_exclusions_writes_exact_list_and_activity() {
    let h = harness("exit 0");
    let raw = ["s1.cel", "s2.cel", "s3.cel", "s4.cel", "s5.cel"];
    let pkg = write_package(h.data_dir.path(), 3, &raw, &raw);

    let outcome = h
        .engine
        .submit(request(RawDataSelection::Reuse {
            package: pkg,
            excluded: vec!["s2.cel".to_string(), "s4.cel".to_string()],
        }))
        .await
        .unwrap();
    outcome.detector.expect("detector should attach").await.unwrap();

    let content = param_file_content(h.work_dir.path());
    assert!(content.contains("INPUT\tEXCLUDE_FILES\t=\ts2.cel,s4.cel\n"));

    let job = h.store.jobs().into_iter().next().unwrap();
    assert_eq!(job.input_reference, 3);

    let activities = h.store.activities();
    assert_eq!(activities.len(), 1);
    assert_eq!(activities[0].kind, "raw_data_customized");
    assert_eq!(
        activities[0].detail["excluded"],
        serde_json::json!(["s2.cel", "s4.cel"])
    );
}

// A file listed in the annotation never arrived.
#[tokio::test]
async fn missing_annotated_file_is_reported_but_not_blocking() {
    let h = harness("exit 0");
    let pkg = write_package(
        h.data_dir.path(),
        1,
        &["a.cel", "b.cel"],
        &["a.cel", "b.cel", "lost.cel"],
    );

    let outcome = h
        .engine
        .submit(request(RawDataSelection::FreshUpload { package: pkg }))
        .await
        .unwrap();
    assert_eq!(outcome.missing_files, vec!["lost.cel".to_string()]);

    outcome.detector.expect("detector should attach").await.unwrap();
    let job = h.store.jobs().into_iter().next().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

// Job ids grow monotonically across submissions to the same store.
#[tokio::test]
async fn job_ids_are_monotonic_across_submissions() {
    let h = harness("exit 0");

    let mut last = 0;
    for serial in 1..=3 {
        let dir = tempfile::TempDir::new().unwrap();
        let pkg = write_package(dir.path(), serial, &["a.cel"], &["a.cel"]);
        let outcome = h
            .engine
            .submit(request(RawDataSelection::FreshUpload { package: pkg }))
            .await
            .unwrap();
        assert!(outcome.job_id > last);
        last = outcome.job_id;
        outcome.detector.unwrap().await.unwrap();
    }

    assert_eq!(h.store.jobs().len(), 3);
}

mod common;
use crate::common::{EXP, ExperimentTreeBuilder, FakeProcessRunner, init_tracing, open};

use std::error::Error;
use std::fs;

use expflow::errors::ExpError;
use expflow::experiment::{ExpFile, Experiment, OpenOptions};
use expflow::types::{Dtg, Stream, SuiteKind};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn fresh_single_host_experiment_opens_unlocked() -> TestResult {
    init_tracing();
    let tree = ExperimentTreeBuilder::new().build();

    let exp = open(&tree, OpenOptions::default()).await?;

    assert!(tree.wd.join("rev").is_file());
    assert!(tree.data_root(0).is_dir());
    assert!(!exp.is_locked());
    assert_eq!(exp.progress().dtg_current(), Dtg::parse("2024060100")?);
    assert_eq!(exp.name(), EXP);
    assert_eq!(exp.server_settings().port, 2000 + 1500);
    // Seeded progress is not persisted until it moves.
    assert!(!tree.wd.join("progress.toml").exists());
    Ok(())
}

#[tokio::test]
async fn missing_server_file_is_a_setup_error() -> TestResult {
    init_tracing();
    let tree = ExperimentTreeBuilder::new().build();
    fs::remove_file(tree.wd.join("Env_server"))?;

    match open(&tree, OpenOptions::default()).await {
        Err(ExpError::Setup(msg)) => assert!(msg.contains("Env_server"), "{msg}"),
        other => panic!("expected setup error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn progress_without_dtg_is_corrupt() -> TestResult {
    init_tracing();
    let tree = ExperimentTreeBuilder::new().build();
    tree.write_wd("progress.toml", "DTGBEG = \"2024060100\"\n");

    let err = open(&tree, OpenOptions::default()).await.unwrap_err();
    assert!(matches!(err, ExpError::ProgressCorrupt(_)), "{err:?}");
    assert_eq!(err.exit_code(), 4);
    Ok(())
}

#[tokio::test]
async fn advancing_three_hours_widens_end_and_persists() -> TestResult {
    init_tracing();
    let tree = ExperimentTreeBuilder::new().dtg_start("2024010100").build();

    let mut exp = open(&tree, OpenOptions::default()).await?;
    exp.progress_mut().advance(3, false)?;
    assert_eq!(exp.progress().dtg_current(), Dtg::parse("2024010103")?);
    assert_eq!(exp.progress().dtg_end(), Dtg::parse("2024010103")?);

    let text = fs::read_to_string(tree.wd.join("progress.toml"))?;
    assert!(text.contains("DTG = \"2024010103\""), "{text}");
    assert!(text.contains("DTGEND = \"2024010103\""), "{text}");

    let reopened = open(&tree, OpenOptions::default()).await?;
    assert_eq!(reopened.progress(), exp.progress());
    Ok(())
}

#[tokio::test]
async fn streams_keep_separate_progress_and_lib_root() -> TestResult {
    init_tracing();
    let tree = ExperimentTreeBuilder::new().build();

    let opts = OpenOptions {
        stream: Some(Stream::new("2")),
        ..OpenOptions::default()
    };
    let mut exp = open(&tree, opts).await?;
    exp.progress_mut().advance(3, false)?;

    assert!(tree.wd.join("progress2.toml").is_file());
    assert!(!tree.wd.join("progress.toml").exists());
    assert_eq!(exp.suite_name(), "exp12");
    assert_eq!(
        exp.system().entry(0)?.lib_root,
        format!("{}2", tree.lib_root(0).display())
    );
    Ok(())
}

#[tokio::test]
async fn suite_over_twelve_hours_steps_by_three() -> TestResult {
    init_tracing();
    let tree = ExperimentTreeBuilder::new()
        .dtg_start("2024060100")
        .dtg_end("2024060112")
        .build();

    let exp = open(&tree, OpenOptions::default()).await?;
    let suite = exp.build_suite(SuiteKind::Surfex)?;

    let dtgs: Vec<String> = suite.dtgs().iter().map(|d| d.to_string()).collect();
    assert_eq!(
        dtgs,
        ["2024060100", "2024060103", "2024060106", "2024060109", "2024060112"]
    );
    assert!(suite.cycles.iter().all(|c| c.fcint == 3));

    let def = suite.to_def();
    assert!(def.starts_with("suite exp1\n"), "{def}");
    assert!(def.contains("edit EXP 'exp1'"), "{def}");
    assert!(def.contains(&format!("edit ECF_HOME '{}/job'", tree.root().display())));
    assert!(def.contains("trigger prep == complete"), "{def}");
    Ok(())
}

#[tokio::test]
async fn testbed_suite_requires_configurations() -> TestResult {
    init_tracing();
    let tree = ExperimentTreeBuilder::new().build();
    let exp = open(&tree, OpenOptions::default()).await?;
    assert!(matches!(
        exp.build_suite(SuiteKind::Testbed),
        Err(ExpError::Config(_))
    ));

    let tree = ExperimentTreeBuilder::new()
        .block("testbed", "configurations = [\"AROME\", \"HARMONIE\"]")
        .build();
    let exp = open(&tree, OpenOptions::default()).await?;
    let def = exp.build_suite(SuiteKind::Testbed)?.to_def();
    assert!(def.contains("family AROME"), "{def}");
    assert!(def.contains("edit TESTBED_CONF 'HARMONIE'"), "{def}");
    Ok(())
}

#[tokio::test]
async fn testbed_submit_overlays_decomposition_block() -> TestResult {
    init_tracing();
    let tree = ExperimentTreeBuilder::new().build();
    let exp = open(&tree, OpenOptions::default()).await?;

    let file = tree.root().join("testbed_submit.json");
    fs::write(
        &file,
        r#"{"2D": {"background": {"tasks": ["forecast", "post"]}}, "1D": {}}"#,
    )?;
    let merged = exp.merge_testbed_submit(&file, "2D")?;
    assert_eq!(
        merged["background"]["tasks"],
        serde_json::json!(["forecast", "post"])
    );
    assert_eq!(merged["default_submit_type"], "background");

    assert!(matches!(
        exp.merge_testbed_submit(&file, "3D"),
        Err(ExpError::Config(_))
    ));
    Ok(())
}

#[tokio::test]
async fn domain_file_reaches_configuration() -> TestResult {
    init_tracing();
    let tree = ExperimentTreeBuilder::new().build();
    tree.write_wd("domain.json", r#"{"NAME": "DRAMMEN", "NLON": 50}"#);

    let exp = open(&tree, OpenOptions::default()).await?;
    assert_eq!(
        exp.config().get("domain.NAME"),
        Some(&serde_json::json!("DRAMMEN"))
    );
    Ok(())
}

#[tokio::test]
async fn open_without_setup_names_missing_files() -> TestResult {
    init_tracing();
    let tree = ExperimentTreeBuilder::new().without_setup().build();
    let runner = FakeProcessRunner::new();

    let err = Experiment::open(
        EXP,
        &tree.wd,
        Some(tree.rev.clone()),
        None,
        OpenOptions::default(),
        &runner,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ExpError::Setup(_)), "{err:?}");
    // The scaffold is still written.
    assert!(ExpFile::Rev.path(&tree.wd, None).is_file());
    Ok(())
}

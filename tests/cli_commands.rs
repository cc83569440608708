mod common;
use crate::common::{EXP, ExperimentTreeBuilder, FakeProcessRunner, init_tracing, open};

use std::error::Error;
use std::fs;
use std::sync::Arc;

use clap::Parser;
use expflow::cli::CliArgs;
use expflow::experiment::OpenOptions;
use expflow::run_with;
use serde_json::json;

type TestResult = Result<(), Box<dyn Error>>;

fn args(wd: &std::path::Path, rest: &[&str]) -> Result<CliArgs, clap::Error> {
    let wd = wd.display().to_string();
    let mut argv = vec!["expflow", "--exp", EXP, "--wd", wd.as_str()];
    argv.extend_from_slice(rest);
    CliArgs::try_parse_from(argv)
}

#[tokio::test]
async fn preset_given_at_setup_survives_the_lock() -> TestResult {
    init_tracing();
    let tree = ExperimentTreeBuilder::new()
        .block("forecast", "length = 6")
        .rev_file(
            "config/configurations/big.toml",
            "[forecast]\nlength = 24\n\n[suite]\ntasks = [\"prep\", \"bigforecast\"]\n",
        )
        .without_setup()
        .build();
    let runner = Arc::new(FakeProcessRunner::new());
    let rev = tree.rev.display().to_string();

    run_with(
        args(
            &tree.wd,
            &["--preset", "big", "setup", "--rev", &rev, "--host-tag", "testhost"],
        )?,
        runner.clone(),
    )
    .await?;
    run_with(args(&tree.wd, &["init-run"])?, runner.clone()).await?;
    run_with(args(&tree.wd, &["start-exp"])?, runner.clone()).await?;

    let exp = open(&tree, OpenOptions::default()).await?;
    assert!(exp.is_locked());
    assert_eq!(exp.config().get("forecast.length"), Some(&json!(24)));

    let def = fs::read_to_string(tree.wd.join("exp1.def"))?;
    assert!(def.contains("task bigforecast"), "{def}");
    assert!(!def.contains("task pgd"), "{def}");
    Ok(())
}

#[tokio::test]
async fn preset_given_after_the_lock_is_ignored() -> TestResult {
    init_tracing();
    let tree = ExperimentTreeBuilder::new()
        .block("forecast", "length = 6")
        .rev_file("config/configurations/big.toml", "[forecast]\nlength = 24\n")
        .build();
    let runner = Arc::new(FakeProcessRunner::new());

    run_with(args(&tree.wd, &["init-run"])?, runner.clone()).await?;
    let opts = OpenOptions {
        preset: Some("big".to_string()),
        ..OpenOptions::default()
    };
    let exp = open(&tree, opts).await?;
    assert!(exp.is_locked());
    assert_eq!(exp.config().get("forecast.length"), Some(&json!(6)));
    Ok(())
}

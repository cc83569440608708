#![allow(dead_code)]

pub use expflow_test_utils::builders::{ExperimentTree, ExperimentTreeBuilder};
pub use expflow_test_utils::fake_runner::FakeProcessRunner;
pub use expflow_test_utils::{init_tracing, with_timeout};

use expflow::errors::Result;
use expflow::experiment::{Experiment, OpenOptions};

pub const EXP: &str = "exp1";

/// Open the fixture's working tree with a fresh fake runner.
pub async fn open(tree: &ExperimentTree, opts: OpenOptions) -> Result<Experiment> {
    let runner = FakeProcessRunner::new();
    Experiment::open(EXP, &tree.wd, None, None, opts, &runner).await
}

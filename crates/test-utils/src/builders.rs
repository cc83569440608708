#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use expflow::experiment::WorkingTree;
use tempfile::TempDir;

/// One entry of `HOSTS` in the generated `Env_system`.
#[derive(Debug, Clone)]
pub struct HostSpec {
    pub label: String,
    /// Network name; `None` for the local machine.
    pub hostname: Option<String>,
}

/// Builder for a scratch revision tree plus a working tree set up from it.
///
/// Layout under the temp dir:
/// `rev/` (also the configuration tree), `wd/`, `data/<label>`,
/// `lib/<label>`, `job/`.
pub struct ExperimentTreeBuilder {
    host_tag: String,
    hosts: Vec<HostSpec>,
    rsync: String,
    hh_list: Vec<u32>,
    dtg_start: String,
    dtg_end: Option<String>,
    suite: Option<String>,
    blocks: Vec<(String, String)>,
    rev_files: Vec<(String, String)>,
    setup: bool,
}

impl ExperimentTreeBuilder {
    pub fn new() -> Self {
        Self {
            host_tag: "testhost".to_string(),
            hosts: vec![HostSpec {
                label: "a".to_string(),
                hostname: None,
            }],
            rsync: "rsync -a".to_string(),
            hh_list: vec![0, 3, 6, 9, 12, 15, 18, 21],
            dtg_start: "2024060100".to_string(),
            dtg_end: None,
            suite: None,
            blocks: Vec::new(),
            rev_files: Vec::new(),
            setup: true,
        }
    }

    /// Replace the host list. Host 0 is local; the others are remote and
    /// reached under their label.
    pub fn hosts(mut self, labels: &[&str]) -> Self {
        self.hosts = labels
            .iter()
            .enumerate()
            .map(|(i, label)| HostSpec {
                label: label.to_string(),
                hostname: (i > 0).then(|| label.to_string()),
            })
            .collect();
        self
    }

    pub fn rsync(mut self, cmd: &str) -> Self {
        self.rsync = cmd.to_string();
        self
    }

    pub fn hh_list(mut self, hours: &[u32]) -> Self {
        self.hh_list = hours.to_vec();
        self
    }

    pub fn dtg_start(mut self, dtg: &str) -> Self {
        self.dtg_start = dtg.to_string();
        self
    }

    pub fn dtg_end(mut self, dtg: &str) -> Self {
        self.dtg_end = Some(dtg.to_string());
        self
    }

    /// Body of the `[suite]` block.
    pub fn suite(mut self, body: &str) -> Self {
        self.suite = Some(body.to_string());
        self
    }

    /// Extra top-level block in `config_exp.toml`, e.g. `("forecast",
    /// "length = 6")`.
    pub fn block(mut self, name: &str, body: &str) -> Self {
        self.blocks.push((name.to_string(), body.to_string()));
        self
    }

    /// Extra file in the revision tree, relative to `rev/`.
    pub fn rev_file(mut self, rel: &str, text: &str) -> Self {
        self.rev_files.push((rel.to_string(), text.to_string()));
        self
    }

    /// Stop after writing the revision tree; `wd/` stays empty.
    pub fn without_setup(mut self) -> Self {
        self.setup = false;
        self
    }

    pub fn build(self) -> ExperimentTree {
        let dir = tempfile::tempdir().expect("creating temp dir");
        let root = dir.path().to_path_buf();
        let rev = root.join("rev");
        let wd = root.join("wd");

        let mut block_names = vec!["general".to_string(), "suite".to_string()];
        block_names.extend(self.blocks.iter().map(|(n, _)| n.clone()));
        let block_list = block_names
            .iter()
            .map(|b| format!("\"{b}\""))
            .collect::<Vec<_>>()
            .join(", ");
        write(
            &rev.join("config/config.toml"),
            &format!(
                "config_files = [\"config_exp.toml\"]\n\n[\"config_exp.toml\"]\nblocks = [{block_list}]\n"
            ),
        );

        let hours = self
            .hh_list
            .iter()
            .map(|h| h.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let mut exp = format!(
            "[general]\nhh_list = [{hours}]\ndtg_start = \"{}\"\ndtg_end = \"{}\"\n\n[suite]\n{}\n",
            self.dtg_start,
            self.dtg_end.as_deref().unwrap_or(&self.dtg_start),
            self.suite.as_deref().unwrap_or("")
        );
        for (name, body) in &self.blocks {
            exp.push_str(&format!("\n[{name}]\n{body}\n"));
        }
        write(&rev.join("config/config_exp.toml"), &exp);

        let tag = &self.host_tag;
        write(
            &rev.join(format!("config/system/{tag}.toml")),
            &env_system(&root, &self.hosts, &self.rsync),
        );
        write(&rev.join(format!("config/env/{tag}.sh")), "export OMP_NUM_THREADS=1\n");
        write(
            &rev.join(format!("config/submit/{tag}.json")),
            r#"{"submit_types": ["background"], "default_submit_type": "background", "background": {"tasks": ["forecast"]}}"#,
        );
        write(
            &rev.join(format!("config/server/{tag}.toml")),
            "ECF_HOST = \"localhost\"\nECF_PORT = 2000\n",
        );
        write(&rev.join(format!("config/input_paths/{tag}.json")), "{}\n");

        for (rel, text) in &self.rev_files {
            write(&rev.join(rel), text);
        }

        if self.setup {
            WorkingTree::new(&wd, &rev, &rev, None)
                .setup_files(tag)
                .expect("setting up working tree");
        }

        ExperimentTree {
            dir,
            rev,
            wd,
            hosts: self.hosts,
        }
    }
}

impl Default for ExperimentTreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn env_system(root: &Path, hosts: &[HostSpec], rsync: &str) -> String {
    let labels = hosts
        .iter()
        .map(|h| format!("\"{}\"", h.label))
        .collect::<Vec<_>>()
        .join(", ");
    let mut out = format!(
        "[HOST_SYSTEM]\nHOSTS = [{labels}]\nRSYNC = \"{rsync}\"\nMKDIR = \"mkdir -p\"\nJOBOUTDIR = \"{}/job\"\n",
        root.display()
    );
    for (i, host) in hosts.iter().enumerate() {
        out.push_str(&format!(
            "\n[HOST_SYSTEM.HOST{i}]\nSFX_EXP_DATA = \"{root}/data/{label}\"\nSFX_EXP_LIB = \"{root}/lib/{label}\"\n",
            root = root.display(),
            label = host.label
        ));
        if let Some(name) = &host.hostname {
            out.push_str(&format!("HOST_NAME = \"{name}\"\n"));
        }
    }
    out
}

fn write(path: &Path, text: &str) {
    fs::create_dir_all(path.parent().expect("path has a parent")).expect("creating dirs");
    fs::write(path, text).expect("writing fixture file");
}

/// A built fixture; the temp dir lives as long as this value.
pub struct ExperimentTree {
    dir: TempDir,
    pub rev: PathBuf,
    pub wd: PathBuf,
    pub hosts: Vec<HostSpec>,
}

impl ExperimentTree {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn data_root(&self, host: usize) -> PathBuf {
        self.root().join("data").join(&self.hosts[host].label)
    }

    pub fn lib_root(&self, host: usize) -> PathBuf {
        self.root().join("lib").join(&self.hosts[host].label)
    }

    pub fn write_wd(&self, rel: &str, text: &str) {
        write(&self.wd.join(rel), text);
    }
}

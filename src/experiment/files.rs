// src/experiment/files.rs

//! Names of the files that make up an experiment working tree.

use std::path::{Path, PathBuf};

use crate::types::{Stream, with_stream_suffix};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpFile {
    /// One line: absolute path of the revision tree.
    Rev,
    /// One line: absolute path of the configuration tree.
    Conf,
    EnvSystem,
    Env,
    EnvSubmit,
    EnvServer,
    EnvInputPaths,
    Progress,
    ProgressPp,
    Domain,
    Lock,
}

impl ExpFile {
    /// Files `open` refuses to work without.
    pub const REQUIRED: [ExpFile; 4] = [
        ExpFile::EnvSystem,
        ExpFile::EnvServer,
        ExpFile::EnvSubmit,
        ExpFile::EnvInputPaths,
    ];

    /// Per-host settings files linked into the tree by `setup_files`.
    pub const HOST_FILES: [ExpFile; 5] = [
        ExpFile::EnvSystem,
        ExpFile::Env,
        ExpFile::EnvSubmit,
        ExpFile::EnvServer,
        ExpFile::EnvInputPaths,
    ];

    pub fn file_name(self, stream: Option<&Stream>) -> String {
        match self {
            ExpFile::Rev => "rev".to_string(),
            ExpFile::Conf => "conf".to_string(),
            ExpFile::EnvSystem => "Env_system".to_string(),
            ExpFile::Env => "Env".to_string(),
            ExpFile::EnvSubmit => "Env_submit".to_string(),
            ExpFile::EnvServer => "Env_server".to_string(),
            ExpFile::EnvInputPaths => "Env_input_paths".to_string(),
            ExpFile::Progress => format!("{}.toml", with_stream_suffix("progress", stream)),
            ExpFile::ProgressPp => format!("{}.toml", with_stream_suffix("progressPP", stream)),
            ExpFile::Domain => "domain.json".to_string(),
            ExpFile::Lock => with_stream_suffix("experiment_is_locked", stream),
        }
    }

    pub fn path(self, wd: &Path, stream: Option<&Stream>) -> PathBuf {
        wd.join(self.file_name(stream))
    }

    /// Host copy under `config/`, relative to a tree root.
    pub fn host_source(self, host_tag: &str) -> Option<String> {
        let rel = match self {
            ExpFile::EnvSystem => format!("config/system/{host_tag}.toml"),
            ExpFile::Env => format!("config/env/{host_tag}.sh"),
            ExpFile::EnvSubmit => format!("config/submit/{host_tag}.json"),
            ExpFile::EnvServer => format!("config/server/{host_tag}.toml"),
            ExpFile::EnvInputPaths => format!("config/input_paths/{host_tag}.json"),
            _ => return None,
        };
        Some(rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_suffixes_only_stateful_files() {
        let s = Stream::new("2");
        assert_eq!(ExpFile::Progress.file_name(Some(&s)), "progress2.toml");
        assert_eq!(ExpFile::ProgressPp.file_name(Some(&s)), "progressPP2.toml");
        assert_eq!(ExpFile::Lock.file_name(Some(&s)), "experiment_is_locked2");
        assert_eq!(ExpFile::EnvSystem.file_name(Some(&s)), "Env_system");
        assert_eq!(ExpFile::Progress.file_name(None), "progress.toml");
    }

    #[test]
    fn host_sources() {
        assert_eq!(
            ExpFile::EnvServer.host_source("ecgb").as_deref(),
            Some("config/server/ecgb.toml")
        );
        assert_eq!(ExpFile::Progress.host_source("ecgb"), None);
    }
}

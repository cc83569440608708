use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use expflow::errors::Result;
use expflow::exec::{CommandOutput, CommandSpec, ProcessRunner};

#[derive(Debug, Clone)]
struct Script {
    needle: String,
    code: i32,
    stdout: String,
}

/// A process runner that:
/// - records every command line it is asked to run
/// - answers `id -u` with a fixed uid
/// - exits 0 unless a scripted substring matches the line.
#[derive(Debug, Clone)]
pub struct FakeProcessRunner {
    lines: Arc<Mutex<Vec<CommandSpec>>>,
    scripts: Arc<Mutex<Vec<Script>>>,
    uid: u32,
}

impl FakeProcessRunner {
    pub fn new() -> Self {
        Self {
            lines: Arc::new(Mutex::new(Vec::new())),
            scripts: Arc::new(Mutex::new(Vec::new())),
            uid: 1000,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = uid;
        self
    }

    /// Exit with `code` for every line containing `needle`.
    pub fn fail_on(&self, needle: &str, code: i32) {
        self.respond(needle, code, "");
    }

    /// Answer lines containing `needle` with `code` and `stdout`.
    pub fn respond(&self, needle: &str, code: i32, stdout: &str) {
        self.scripts.lock().unwrap().push(Script {
            needle: needle.to_string(),
            code,
            stdout: stdout.to_string(),
        });
    }

    /// Command lines run so far, `id -u` excluded.
    pub fn lines(&self) -> Vec<String> {
        self.specs().into_iter().map(|s| s.line).collect()
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.line != "id -u")
            .cloned()
            .collect()
    }
}

impl Default for FakeProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner for FakeProcessRunner {
    fn run(
        &self,
        spec: CommandSpec,
    ) -> Pin<Box<dyn Future<Output = Result<CommandOutput>> + Send + '_>> {
        Box::pin(async move {
            self.lines.lock().unwrap().push(spec.clone());
            if spec.line == "id -u" {
                return Ok(CommandOutput {
                    code: 0,
                    stdout: format!("{}\n", self.uid),
                    stderr: String::new(),
                });
            }
            let scripted = self
                .scripts
                .lock()
                .unwrap()
                .iter()
                .find(|s| spec.line.contains(&s.needle))
                .cloned();
            Ok(match scripted {
                Some(s) => CommandOutput {
                    code: s.code,
                    stdout: s.stdout,
                    stderr: if s.code == 0 {
                        String::new()
                    } else {
                        format!("scripted failure for '{}'", s.needle)
                    },
                },
                None => CommandOutput::default(),
            })
        })
    }
}

// src/scheduler/signals.rs

//! Fatal-signal listener for task processes.
//!
//! Each signal gets its own tokio stream forwarding into one channel, so the
//! task client can `select!` on "any fatal signal". Signals the runtime
//! refuses to handle (SIGILL and SIGFPE among them) are logged and skipped;
//! the rest keep working.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// `(name, number)` of every signal that aborts a task.
#[cfg(target_os = "linux")]
pub const ABORT_SIGNALS: &[(&str, i32)] = &[
    ("SIGINT", 2),
    ("SIGHUP", 1),
    ("SIGQUIT", 3),
    ("SIGILL", 4),
    ("SIGTRAP", 5),
    ("SIGIOT", 6),
    ("SIGBUS", 7),
    ("SIGFPE", 8),
    ("SIGUSR1", 10),
    ("SIGUSR2", 12),
    ("SIGPIPE", 13),
    ("SIGTERM", 15),
    ("SIGXCPU", 24),
    ("SIGPWR", 30),
];

/// BSD numbering; there is no SIGPWR.
#[cfg(all(unix, not(target_os = "linux")))]
pub const ABORT_SIGNALS: &[(&str, i32)] = &[
    ("SIGINT", 2),
    ("SIGHUP", 1),
    ("SIGQUIT", 3),
    ("SIGILL", 4),
    ("SIGTRAP", 5),
    ("SIGIOT", 6),
    ("SIGBUS", 10),
    ("SIGFPE", 8),
    ("SIGUSR1", 30),
    ("SIGUSR2", 31),
    ("SIGPIPE", 13),
    ("SIGTERM", 15),
    ("SIGXCPU", 24),
];

pub struct SignalListener {
    rx: mpsc::Receiver<i32>,
    handles: Vec<JoinHandle<()>>,
    installed: Vec<&'static str>,
}

impl SignalListener {
    /// Register every signal in [`ABORT_SIGNALS`] that the platform allows.
    /// Must be called inside a tokio runtime.
    #[cfg(unix)]
    pub fn install() -> Self {
        use tokio::signal::unix::{SignalKind, signal};

        let (tx, rx) = mpsc::channel(8);
        let mut handles = Vec::new();
        let mut installed = Vec::new();

        for &(name, num) in ABORT_SIGNALS {
            match signal(SignalKind::from_raw(num)) {
                Ok(mut stream) => {
                    let tx = tx.clone();
                    handles.push(tokio::spawn(async move {
                        while stream.recv().await.is_some() {
                            if tx.send(num).await.is_err() {
                                break;
                            }
                        }
                    }));
                    installed.push(name);
                }
                Err(e) => warn!(signal = name, error = %e, "cannot handle signal; skipping"),
            }
        }
        debug!(?installed, "signal handlers installed");
        Self {
            rx,
            handles,
            installed,
        }
    }

    /// Only Ctrl-C is observable off unix.
    #[cfg(not(unix))]
    pub fn install() -> Self {
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(2).await;
            }
        });
        warn!("only SIGINT can be observed on this platform");
        Self {
            rx,
            handles: vec![handle],
            installed: vec!["SIGINT"],
        }
    }

    pub fn installed(&self) -> &[&'static str] {
        &self.installed
    }

    /// Next signal number; `None` when nothing could be registered.
    pub async fn recv(&mut self) -> Option<i32> {
        self.rx.recv().await
    }
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn common_signals_are_registered() {
        let listener = SignalListener::install();
        for name in ["SIGTERM", "SIGINT", "SIGUSR1", "SIGHUP"] {
            assert!(listener.installed().contains(&name), "{name} missing");
        }
        assert!(!listener.installed().contains(&"SIGILL"));
    }
}

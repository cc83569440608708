// src/scheduler/task.rs

//! One execution of a scheduler task, as seen from inside its job.

use std::time::Duration;

use crate::errors::{ExpError, Result};

/// Child timeout used when the job does not set one.
pub const DEFAULT_CHILD_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    ecf_name: String,
    try_no: u32,
    password: String,
    remote_id: String,
    submission_id: Option<String>,
    timeout: Duration,
}

impl Task {
    /// `remote_id` defaults to the current process id when absent or empty;
    /// an empty `submission_id` counts as unset.
    pub fn new(
        ecf_name: impl Into<String>,
        try_no: u32,
        password: impl Into<String>,
        remote_id: Option<String>,
        submission_id: Option<String>,
    ) -> Result<Self> {
        let ecf_name = ecf_name.into();
        if !ecf_name.starts_with('/') || ecf_name.len() < 2 {
            return Err(ExpError::Config(format!(
                "task path '{ecf_name}' must be an absolute node path like /suite/family/task"
            )));
        }
        if try_no == 0 {
            return Err(ExpError::Config(format!(
                "try number for {ecf_name} must be at least 1"
            )));
        }
        let remote_id = remote_id
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| std::process::id().to_string());
        Ok(Self {
            ecf_name,
            try_no,
            password: password.into(),
            remote_id,
            submission_id: submission_id.filter(|s| !s.trim().is_empty()),
            timeout: DEFAULT_CHILD_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn ecf_name(&self) -> &str {
        &self.ecf_name
    }

    pub fn try_no(&self) -> u32 {
        self.try_no
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn submission_id(&self) -> Option<&str> {
        self.submission_id.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Last path component.
    pub fn task_name(&self) -> &str {
        self.ecf_name.rsplit('/').next().unwrap_or(&self.ecf_name)
    }

    /// Families between the suite and the task.
    pub fn families(&self) -> Vec<&str> {
        let parts: Vec<&str> = self.ecf_name.trim_start_matches('/').split('/').collect();
        if parts.len() > 2 {
            parts[1..parts.len() - 1].to_vec()
        } else {
            Vec::new()
        }
    }

    /// Innermost family, if any.
    pub fn family(&self) -> Option<&str> {
        self.families().last().copied()
    }

    /// `<joboutdir><ecf_name>.job<try>`, the layout ecFlow uses under
    /// `ECF_HOME`.
    pub fn job_file(&self, joboutdir: &str) -> String {
        format!(
            "{}{}.job{}",
            joboutdir.trim_end_matches('/'),
            self.ecf_name,
            self.try_no
        )
    }

    pub fn job_output(&self, joboutdir: &str) -> String {
        format!(
            "{}{}.{}",
            joboutdir.trim_end_matches('/'),
            self.ecf_name,
            self.try_no
        )
    }

    pub fn submission_log(&self, joboutdir: &str) -> String {
        format!("{}.sub", self.job_file(joboutdir))
    }

    pub fn kill_log(&self, joboutdir: &str) -> String {
        format!("{}.kill", self.job_file(joboutdir))
    }

    pub fn status_log(&self, joboutdir: &str) -> String {
        format!("{}.stat", self.job_file(joboutdir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new(
            "/exp1/2024030106/forecast",
            2,
            "xyz",
            Some("4242".to_string()),
            Some(String::new()),
        )
        .unwrap()
    }

    #[test]
    fn names_are_derived_from_path() {
        let t = task();
        assert_eq!(t.task_name(), "forecast");
        assert_eq!(t.family(), Some("2024030106"));
        assert_eq!(t.submission_id(), None);

        let top = Task::new("/exp1/pgd", 1, "p", None, None).unwrap();
        assert_eq!(top.family(), None);
        assert_eq!(top.remote_id(), std::process::id().to_string());
    }

    #[test]
    fn job_files_live_under_joboutdir() {
        let t = task();
        assert_eq!(t.job_file("/job/"), "/job/exp1/2024030106/forecast.job2");
        assert_eq!(t.job_output("/job"), "/job/exp1/2024030106/forecast.2");
        assert_eq!(t.kill_log("/job"), "/job/exp1/2024030106/forecast.job2.kill");
        assert_eq!(t.status_log("/job"), "/job/exp1/2024030106/forecast.job2.stat");
        assert_eq!(t.submission_log("/job"), "/job/exp1/2024030106/forecast.job2.sub");
    }

    #[test]
    fn invalid_tasks_are_rejected() {
        assert!(Task::new("exp1/a", 1, "p", None, None).is_err());
        assert!(Task::new("/exp1/a", 0, "p", None, None).is_err());
    }
}

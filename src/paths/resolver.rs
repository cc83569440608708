// src/paths/resolver.rs

//! Placeholder substitution for path templates.
//!
//! Two placeholder families are understood:
//! - time/member tokens `@YYYY@ @MM@ @DD@ @HH@ @EEE@`
//! - environment references `$NAME` and `${NAME}`
//!
//! Substitution is a single left-to-right pass; text produced by a
//! substitution is never scanned again.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::errors::{ExpError, Result};
use crate::types::{Dtg, Member};

/// Environment used for `$NAME` expansion.
pub type Env = BTreeMap<String, String>;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@(YYYY|MM|DD|HH|EEE)@|\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("placeholder regex is valid")
});

static UNRESOLVED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@[A-Za-z]+@|\$\{?[A-Za-z_][A-Za-z0-9_]*\}?").expect("unresolved regex is valid")
});

/// Snapshot of the current process environment.
pub fn process_env() -> Env {
    std::env::vars().collect()
}

/// Everything a template may refer to.
#[derive(Debug, Clone, Copy)]
pub struct PathContext<'a> {
    pub dtg: Option<Dtg>,
    pub member: Option<Member>,
    pub env: &'a Env,
}

impl<'a> PathContext<'a> {
    pub fn new(env: &'a Env) -> Self {
        Self {
            dtg: None,
            member: None,
            env,
        }
    }

    pub fn with_dtg(mut self, dtg: Dtg) -> Self {
        self.dtg = Some(dtg);
        self
    }

    pub fn with_member(mut self, member: Member) -> Self {
        self.member = Some(member);
        self
    }
}

/// Stateless template expander.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathResolver;

impl PathResolver {
    /// Expand `template` against `ctx`.
    ///
    /// Tokens whose context is missing (no DTG, no member, unknown
    /// environment variable) are left as-is. With `check_parsing` set, any
    /// such leftover makes the call fail with [`ExpError::Template`].
    pub fn resolve(template: &str, ctx: &PathContext<'_>, check_parsing: bool) -> Result<String> {
        let out = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| -> Cow<'static, str> {
            let literal = || Cow::Owned(caps[0].to_string());
            if let Some(token) = caps.get(1) {
                match (token.as_str(), ctx.dtg, ctx.member) {
                    ("YYYY", Some(d), _) => Cow::Owned(format!("{:04}", d.year())),
                    ("MM", Some(d), _) => Cow::Owned(format!("{:02}", d.month())),
                    ("DD", Some(d), _) => Cow::Owned(format!("{:02}", d.day())),
                    ("HH", Some(d), _) => Cow::Owned(format!("{:02}", d.hour())),
                    ("EEE", _, Some(m)) => Cow::Owned(m.padded()),
                    _ => literal(),
                }
            } else {
                let name = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str());
                match name.and_then(|n| ctx.env.get(n)) {
                    Some(value) => Cow::Owned(value.clone()),
                    None => literal(),
                }
            }
        });

        let out = out.into_owned();
        if check_parsing {
            if let Some(left) = UNRESOLVED.find(&out) {
                return Err(ExpError::Template {
                    template: template.to_string(),
                    remaining: left.as_str().to_string(),
                });
            }
        }
        Ok(out)
    }

    /// `true` when the string still contains a placeholder.
    pub fn has_placeholders(s: &str) -> bool {
        UNRESOLVED.is_match(s)
    }
}

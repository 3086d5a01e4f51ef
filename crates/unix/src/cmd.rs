// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Unix command behaviors.

pub mod adb_shell;
pub mod exit;
pub mod ps;
pub mod pwd;
pub mod ssh;
pub mod su;
pub mod sudo;

use std::sync::OnceLock;

use regex::Regex;

/// Failure indication shared by generic unix commands.
pub fn generic_failure_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"command not found|No such file or directory|running it may require superuser privileges",
        )
        .expect("generic unix failure pattern")
    })
}

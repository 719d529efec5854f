// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-test logging
//!
//! Each test gets a logger writing to its own temporary file.  On success
//! the test calls [`LogContext::cleanup_successful`] and the file is
//! removed; on panic the file sticks around so the log can be inspected.

use slog::o;
use slog::Drain;
use slog::Logger;
use std::fs::File;
use std::path::PathBuf;
use std::process;

/// Log state for one test
pub struct LogContext {
    pub log: Logger,
    log_path: PathBuf,
}

impl LogContext {
    /// Removes the test's log file.  Call at the end of a successful test;
    /// skip it on failure paths so the log survives for debugging.
    pub fn cleanup_successful(self) {
        // Drop the logger (and with it the file handle) before unlinking.
        let path = self.log_path.clone();
        drop(self);
        if let Err(error) = std::fs::remove_file(&path) {
            panic!(
                "failed to remove log file {}: {}",
                path.display(),
                error
            );
        }
    }
}

/// Sets up a [`LogContext`] appropriate for a test named `test_name`.
pub fn test_setup_log(test_name: &str) -> LogContext {
    let log_path = std::env::temp_dir()
        .join(format!("shipwright-{}.{}.log", test_name, process::id()));
    eprintln!("log file: {}", log_path.display());

    let file = File::create(&log_path).unwrap_or_else(|error| {
        panic!(
            "failed to create log file {}: {}",
            log_path.display(),
            error
        )
    });
    let decorator = slog_term::PlainSyncDecorator::new(file);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let log = Logger::root(drain, o!("test" => test_name.to_string()));

    LogContext { log, log_path }
}

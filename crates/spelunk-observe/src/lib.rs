//! Operator-facing diagnostics, separate from the per-session NDJSON log.
//!
//! `observe.log` under the runtime directory collects timestamped lines
//! across all sessions; stderr gets `[spelunk]` lines when verbose mode is
//! on and warnings always.

use anyhow::Result;
use chrono::Utc;
use spelunk_core::runtime_dir;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct Observer {
    log_path: PathBuf,
    verbose: bool,
}

impl Observer {
    pub fn new(workspace: &Path) -> Result<Self> {
        let dir = runtime_dir(workspace);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            log_path: dir.join("observe.log"),
            verbose: false,
        })
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    #[must_use]
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Appends one `EVENT` line to the observe log.
    pub fn record_event(&self, name: &str, detail: &str) -> Result<()> {
        self.append_log_line(&format!("{} EVENT {name} {detail}", Utc::now().to_rfc3339()))
    }

    /// Writes to stderr with the `[spelunk]` prefix when verbose mode is on.
    pub fn verbose_log(&self, msg: &str) {
        if self.verbose {
            eprintln!("[spelunk] {msg}");
        }
    }

    /// Warnings go to stderr unconditionally and to the observe log.
    pub fn warn_log(&self, msg: &str) {
        eprintln!("[spelunk WARN] {msg}");
        let _ = self.append_log_line(&format!("{} WARN {msg}", Utc::now().to_rfc3339()));
    }

    fn append_log_line(&self, line: &str) -> Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}

//! Append-only violation audit log.
//!
//! One JSON record per line, appended atomically and never mutated. The
//! log is written *before* any downstream action is taken on a violation,
//! so the audit trail survives a crash of everything downstream. Duplicate
//! event delivery collapses to a single record via the violation's
//! identity key.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::domain::Violation;
use crate::error::Result;

struct LogInner {
    file: File,
    seen: HashSet<String>,
}

pub struct ViolationLog {
    path: PathBuf,
    inner: Mutex<LogInner>,
}

impl ViolationLog {
    /// Open (or create) the log, loading existing record keys so
    /// deduplication survives a monitor restart.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut seen = HashSet::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                if let Ok(v) = serde_json::from_str::<Violation>(&line) {
                    seen.insert(v.dedup_key());
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            inner: Mutex::new(LogInner { file, seen }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one violation. Returns false when an identical record was
    /// already persisted (duplicate event delivery).
    pub fn append(&self, violation: &Violation) -> Result<bool> {
        let key = violation.dedup_key();
        let mut line = serde_json::to_vec(violation)?;
        line.push(b'\n');

        let mut inner = self
            .inner
            .lock()
            .map_err(|_| crate::error::WardenError::Internal("violation log poisoned".into()))?;
        if !inner.seen.insert(key) {
            return Ok(false);
        }
        inner.file.write_all(&line)?;
        inner.file.sync_data()?;
        Ok(true)
    }

    /// Read every persisted violation back, for end-of-run reporting and
    /// external audit tools.
    pub fn load(&self) -> Result<Vec<Violation>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            out.push(serde_json::from_str(&line)?);
        }
        Ok(out)
    }
}

//! Append-only log of identifiers whose fetch gave up

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::state::ItemId;

#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `[<ts>] post_id=<id> | <message>`.
    pub fn append(&self, id: &ItemId, message: &str) -> anyhow::Result<()> {
        self.append_at(id, message, Utc::now())
    }

    pub fn append_at(&self, id: &ItemId, message: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Cannot open error log {}", self.path.display()))?;
        writeln!(
            file,
            "[{}] post_id={id} | {message}",
            at.to_rfc3339_opts(SecondsFormat::Secs, true)
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = ErrorLog::new(dir.path().join("errors.log"));
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        log.append_at(&ItemId::Num(7), "Failed after 5 attempts on page 2", at)
            .unwrap();
        log.append_at(&ItemId::from("x"), "second", at).unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                "[2024-05-01T12:00:00Z] post_id=7 | Failed after 5 attempts on page 2",
                "[2024-05-01T12:00:00Z] post_id=x | second",
            ]
        );
    }
}

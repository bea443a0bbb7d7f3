//! Send reports.
//!
//! Each dispatch run writes one new CSV file named after the time it was
//! generated. Existing reports are never overwritten: a name that is
//! already taken gets a numeric suffix.

use std::{io, path::PathBuf};

use chrono::{DateTime, Utc};
use mailrun_common::internal;
use tokio::{fs, io::AsyncWriteExt};

use crate::{dispatcher::DispatchOutcome, error::ReportError};

/// Column order consumers rely on.
pub const REPORT_HEADER: [&str; 5] = ["email", "name", "status", "messageId", "errorMessage"];

const FILE_PREFIX: &str = "send_results";

const MAX_SUFFIX: usize = 100;

/// Writes timestamped send reports into a directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    directory: PathBuf,
}

impl ReportWriter {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Write `outcomes` to a new report stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns a [`ReportError`] if the directory or file cannot be created
    /// or written.
    pub async fn write(&self, outcomes: &[DispatchOutcome]) -> Result<PathBuf, ReportError> {
        self.write_at(outcomes, Utc::now()).await
    }

    /// Write `outcomes` to a new report stamped with `generated`.
    ///
    /// # Errors
    ///
    /// See [`ReportWriter::write`].
    pub async fn write_at(
        &self,
        outcomes: &[DispatchOutcome],
        generated: DateTime<Utc>,
    ) -> Result<PathBuf, ReportError> {
        let content = render(outcomes)?;

        fs::create_dir_all(&self.directory)
            .await
            .map_err(|source| ReportError::Create {
                path: self.directory.clone(),
                source,
            })?;

        let stem = format!("{FILE_PREFIX}_{}", generated.format("%Y-%m-%dT%H-%M-%S-%3fZ"));
        let (path, mut file) = self.create_unique(&stem).await?;

        file.write_all(&content).await?;
        file.flush().await?;

        internal!(level = INFO, "Report with {} row(s) written to {}", outcomes.len(), path.display());
        Ok(path)
    }

    async fn create_unique(&self, stem: &str) -> Result<(PathBuf, fs::File), ReportError> {
        for suffix in 0..MAX_SUFFIX {
            let name = if suffix == 0 {
                format!("{stem}.csv")
            } else {
                format!("{stem}_{suffix}.csv")
            };
            let path = self.directory.join(name);

            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(source) => return Err(ReportError::Create { path, source }),
            }
        }

        Err(ReportError::Collision(self.directory.join(stem)))
    }
}

/// Serialise the header and one row per outcome.
fn render(outcomes: &[DispatchOutcome]) -> Result<Vec<u8>, ReportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(REPORT_HEADER)?;

    for outcome in outcomes {
        writer.write_record([
            single_line(&outcome.email),
            single_line(&outcome.name),
            outcome.status.as_str().to_string(),
            single_line(outcome.message_id.as_deref().unwrap_or_default()),
            single_line(outcome.error_message.as_deref().unwrap_or_default()),
        ])?;
    }

    writer.into_inner().map_err(|e| ReportError::Io(e.into_error()))
}

/// Collapse every run of CR/LF into a single space.
fn single_line(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_break = false;

    for c in text.chars() {
        if c == '\r' || c == '\n' {
            if !in_break {
                out.push(' ');
                in_break = true;
            }
        } else {
            out.push(c);
            in_break = false;
        }
    }

    out
}

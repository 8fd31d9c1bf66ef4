//! The conversion run: discover `.emlx` files, translate each one, and append
//! it to a single locked MBOX archive.
//!
//! A [`ConversionSession`] owns the archive for the whole run. Failures on
//! individual files are recorded and the run moves on; only a missing source
//! folder or a locked archive stop it. The archive is flushed and unlocked
//! exactly once, when the session finishes or is dropped.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::discovery;
use crate::error::{ConvertError, Result};
use crate::export::mbox::MboxWriter;
use crate::model::envelope::Envelope;
use crate::parser::emlx;
use crate::parser::message::{synthesize_envelope, MessageParser};
use crate::paths;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// At least one file was discovered and processed.
    Completed,
    /// Discovery found no message files; the archive was created but left untouched.
    NothingFound,
}

/// A source file that could not be converted.
#[derive(Debug)]
pub struct FileFailure {
    /// 1-based position in discovery order.
    pub index: usize,
    pub path: PathBuf,
    pub error: ConvertError,
}

/// Summary handed back to the driver.
#[derive(Debug)]
pub struct ConversionReport {
    /// Normalized source folder.
    pub source: PathBuf,
    /// Normalized archive path.
    pub output: PathBuf,
    pub discovered: usize,
    pub converted: usize,
    /// Converted messages stamped with the conversion time for lack of a usable `Date:`.
    pub fallback_dates: usize,
    pub failures: Vec<FileFailure>,
    pub outcome: RunOutcome,
}

impl ConversionReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// State for one run: the locked archive plus running counters.
pub struct ConversionSession {
    writer: MboxWriter,
    parser: MessageParser,
    max_message_size: usize,
    sentinel: String,
    fallback_dates: usize,
    failures: Vec<FileFailure>,
}

/// Counters handed back by [`ConversionSession::finish`].
#[derive(Debug)]
pub struct SessionTotals {
    pub converted: usize,
    pub fallback_dates: usize,
    pub failures: Vec<FileFailure>,
}

impl ConversionSession {
    /// Create and lock the archive at `output`.
    pub fn open(output: &Path, config: &Config) -> Result<Self> {
        let writer = MboxWriter::open(output, &config.archive)?;
        Ok(Self {
            writer,
            parser: MessageParser::new(config.performance.max_message_size),
            max_message_size: config.performance.max_message_size,
            sentinel: config.archive.sentinel_address.clone(),
            fallback_dates: 0,
            failures: Vec::new(),
        })
    }

    /// Read, parse and append one source file.
    pub fn convert_file(&mut self, path: &Path) -> Result<Envelope> {
        let content = emlx::read_emlx(path, self.max_message_size)?;
        let message = self
            .parser
            .parse(&content.bytes)
            .map_err(|e| ConvertError::parse(path, e.to_string()))?;
        let envelope = synthesize_envelope(&message, &self.sentinel);
        self.writer.append(&envelope, &message)?;
        Ok(envelope)
    }

    /// Convert one file and account for the result.
    ///
    /// Per-file errors are recorded; fatal errors are returned.
    pub fn process(&mut self, index: usize, path: &Path) -> Result<()> {
        match self.convert_file(path) {
            Ok(envelope) => {
                if envelope.date_is_fallback {
                    self.fallback_dates += 1;
                }
                debug!(index, path = %path.display(), envelope = %envelope, "Converted");
                Ok(())
            }
            Err(error) if !error.is_fatal() => {
                warn!(index, path = %path.display(), error = %error, "Conversion failed");
                self.failures.push(FileFailure {
                    index,
                    path: path.to_path_buf(),
                    error,
                });
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    pub fn converted(&self) -> usize {
        self.writer.appended() as usize
    }

    pub fn fallback_dates(&self) -> usize {
        self.fallback_dates
    }

    pub fn failures(&self) -> &[FileFailure] {
        &self.failures
    }

    /// Flush and unlock the archive.
    pub fn finish(mut self) -> Result<SessionTotals> {
        self.writer.close()?;
        Ok(SessionTotals {
            converted: self.converted(),
            fallback_dates: self.fallback_dates,
            failures: std::mem::take(&mut self.failures),
        })
    }
}

/// Convert every message file under `source` into the archive at `output`.
///
/// Both paths go through `~`/variable expansion and canonicalization first.
/// The progress callback receives `(processed, total)`.
pub fn run(
    source: &Path,
    output: &Path,
    config: &Config,
    progress: &dyn Fn(usize, usize),
) -> Result<ConversionReport> {
    let source = paths::normalize(source)?;
    let output = paths::normalize(output)?;

    let files = discovery::collect_message_paths(&source, &config.discovery)?;
    let total = files.len();
    info!(source = %source.display(), output = %output.display(), total, "Starting conversion");

    let mut session = ConversionSession::open(&output, config)?;
    for (i, path) in files.iter().enumerate() {
        progress(i, total);
        session.process(i + 1, path)?;
    }
    progress(total, total);

    let totals = session.finish()?;
    info!(
        converted = totals.converted,
        failed = totals.failures.len(),
        fallback_dates = totals.fallback_dates,
        "Conversion complete"
    );

    Ok(ConversionReport {
        source,
        output,
        discovered: total,
        converted: totals.converted,
        fallback_dates: totals.fallback_dates,
        failures: totals.failures,
        outcome: if total == 0 {
            RunOutcome::NothingFound
        } else {
            RunOutcome::Completed
        },
    })
}

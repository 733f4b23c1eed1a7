//! Tail a delimiter-separated energy report while its producer is still
//! appending to it.
//!
//! Row layout: `unix_seconds;label;...;value`. Rows sharing a timestamp are
//! summed on their last column, and the row carrying the CPU-energy label
//! closes the batch into one sample. A trailing line without its newline is
//! still being written and is left for the next poll.

#![allow(missing_docs)]

use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::DateTime;

use crate::core::config::{IngestConfig, MalformedRowPolicy};
use crate::core::errors::{Result, WsError};
use crate::core::types::Sample;
use crate::ingest::{SampleSource, SourcePoll};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};

/// Running sum for the rows of one timestamp.
#[derive(Debug, Clone, Copy)]
struct Batch {
    unix_secs: i64,
    sum: f64,
}

pub struct CsvSampleSource {
    path: PathBuf,
    file: File,
    offset: u64,
    pending: Vec<u8>,
    line_no: u64,
    delimiter: u8,
    label: String,
    policy: MalformedRowPolicy,
    batch: Option<Batch>,
    ready: VecDeque<Sample>,
    logger: ActivityLoggerHandle,
}

impl CsvSampleSource {
    pub fn open(
        path: &Path,
        delimiter: u8,
        label: impl Into<String>,
        policy: MalformedRowPolicy,
        logger: ActivityLoggerHandle,
    ) -> Result<Self> {
        let file = File::open(path).map_err(|source| WsError::io(path, source))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            offset: 0,
            pending: Vec::new(),
            line_no: 0,
            delimiter,
            label: label.into(),
            policy,
            batch: None,
            ready: VecDeque::new(),
            logger,
        })
    }

    pub fn from_config(config: &IngestConfig, logger: ActivityLoggerHandle) -> Result<Self> {
        let path = config.csv_path.as_deref().ok_or_else(|| WsError::InvalidConfig {
            details: "ingest.csv_path is not set".to_string(),
        })?;
        // Validation guarantees an ASCII delimiter.
        let delimiter = u8::try_from(config.csv_delimiter).map_err(|_| WsError::InvalidConfig {
            details: format!("delimiter {:?} is not ASCII", config.csv_delimiter),
        })?;
        Self::open(
            path,
            delimiter,
            config.cpu_energy_label.clone(),
            config.malformed_rows,
            logger,
        )
    }

    /// Pull whatever the producer appended since the last read.
    fn fill(&mut self) -> Result<usize> {
        self.file
            .seek(SeekFrom::Start(self.offset))
            .map_err(|source| WsError::io(&self.path, source))?;
        let read = self
            .file
            .read_to_end(&mut self.pending)
            .map_err(|source| WsError::io(&self.path, source))?;
        self.offset += read as u64;
        Ok(read)
    }

    /// Consume every complete line in the buffer.
    fn drain_lines(&mut self) -> Result<()> {
        let mut consumed = 0;
        while let Some(pos) = memchr::memchr(b'\n', &self.pending[consumed..]) {
            let end = consumed + pos;
            let line = self.pending[consumed..end].to_vec();
            consumed = end + 1;
            self.line_no += 1;
            if let Err(err) = self.handle_line(&line) {
                self.pending.drain(..consumed);
                return Err(err);
            }
        }
        self.pending.drain(..consumed);
        Ok(())
    }

    fn handle_line(&mut self, raw: &[u8]) -> Result<()> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            return Ok(());
        }
        let fields: Vec<&str> = line.split(char::from(self.delimiter)).collect();

        // Headers and restart markers carry no numeric timestamp.
        let Ok(unix_secs) = fields[0].trim().parse::<i64>() else {
            return Ok(());
        };
        if fields.len() < 3 {
            return self.malformed(format!("expected at least 3 fields, got {}", fields.len()));
        }
        let raw_value = fields[fields.len() - 1].trim();
        let Ok(value) = raw_value.parse::<f64>() else {
            return self.malformed(format!("unparsable value {raw_value:?}"));
        };

        let batch = match self.batch {
            Some(batch) if batch.unix_secs == unix_secs => batch,
            Some(stale) => {
                eprintln!(
                    "[WS-CSV] discarding unfinished batch at {} (line {})",
                    stale.unix_secs, self.line_no
                );
                Batch { unix_secs, sum: 0.0 }
            }
            None => Batch { unix_secs, sum: 0.0 },
        };
        let batch = Batch {
            sum: batch.sum + value,
            ..batch
        };

        if fields[1].trim() == self.label {
            let timestamp =
                DateTime::from_timestamp(unix_secs, 0).ok_or_else(|| WsError::MalformedSample {
                    line: self.line_no,
                    details: format!("timestamp {unix_secs} out of range"),
                })?;
            self.ready.push_back(Sample::new(timestamp, batch.sum));
            self.batch = None;
        } else {
            self.batch = Some(batch);
        }
        Ok(())
    }

    fn malformed(&self, details: String) -> Result<()> {
        match self.policy {
            MalformedRowPolicy::Skip => {
                self.logger.send(ActivityEvent::MalformedRow {
                    line: self.line_no,
                    details,
                });
                Ok(())
            }
            MalformedRowPolicy::Abort => Err(WsError::MalformedSample {
                line: self.line_no,
                details,
            }),
        }
    }
}

impl SampleSource for CsvSampleSource {
    fn poll(&mut self) -> Result<SourcePoll> {
        if let Some(sample) = self.ready.pop_front() {
            return Ok(SourcePoll::Sample(sample));
        }
        self.fill()?;
        self.drain_lines()?;
        Ok(self
            .ready
            .pop_front()
            .map_or(SourcePoll::Pending, SourcePoll::Sample))
    }

    fn name(&self) -> &'static str {
        "csv"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn source(path: &Path, policy: MalformedRowPolicy) -> CsvSampleSource {
        CsvSampleSource::open(
            path,
            b';',
            "CPU Energy",
            policy,
            ActivityLoggerHandle::detached(),
        )
        .unwrap()
    }

    fn append(path: &Path, text: &str) {
        let mut f = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    fn values(src: &mut CsvSampleSource) -> Vec<(i64, f64)> {
        let mut out = Vec::new();
        while let SourcePoll::Sample(s) = src.poll().unwrap() {
            out.push((s.timestamp.timestamp(), s.value));
        }
        out
    }

    #[test]
    fn batches_are_summed_until_cpu_energy_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        std::fs::write(
            &path,
            "Timestamp;Process;CPU;Energy\n\
             1740389314;explorer.exe;1.0;0.25\n\
             1740389314;firefox;2.0;0.75\n\
             1740389314;CPU Energy;0.0;12.0\n\
             1740389315;CPU Energy;0.0;4.5\n",
        )
        .unwrap();
        let mut src = source(&path, MalformedRowPolicy::Skip);
        assert_eq!(values(&mut src), vec![(1_740_389_314, 13.0), (1_740_389_315, 4.5)]);
    }

    #[test]
    fn partial_line_waits_for_producer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        std::fs::write(&path, "100;a;1.0\n100;CPU En").unwrap();
        let mut src = source(&path, MalformedRowPolicy::Abort);
        assert_eq!(src.poll().unwrap(), SourcePoll::Pending);

        append(&path, "ergy;2.0\n");
        assert_eq!(values(&mut src), vec![(100, 3.0)]);
        assert_eq!(src.poll().unwrap(), SourcePoll::Pending);
    }

    #[test]
    fn restart_markers_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        std::fs::write(&path, "RESTART;;\n7;CPU Energy;1.5\r\n").unwrap();
        let mut src = source(&path, MalformedRowPolicy::Abort);
        assert_eq!(values(&mut src), vec![(7, 1.5)]);
    }

    #[test]
    fn unfinished_batch_is_discarded_on_new_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        std::fs::write(&path, "1;proc;9.0\n2;proc;1.0\n2;CPU Energy;1.0\n").unwrap();
        let mut src = source(&path, MalformedRowPolicy::Skip);
        assert_eq!(values(&mut src), vec![(2, 2.0)]);
    }

    #[test]
    fn malformed_rows_follow_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        std::fs::write(&path, "5;proc;abc\n5;CPU Energy;2.0\n").unwrap();

        let mut skipping = source(&path, MalformedRowPolicy::Skip);
        assert_eq!(values(&mut skipping), vec![(5, 2.0)]);

        let mut aborting = source(&path, MalformedRowPolicy::Abort);
        let err = aborting.poll().unwrap_err();
        assert_eq!(err.code(), "WS-2301");
        assert!(!err.is_retryable());
    }

    #[test]
    fn too_few_fields_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        std::fs::write(&path, "5;1.0\n").unwrap();
        let mut aborting = source(&path, MalformedRowPolicy::Abort);
        assert!(matches!(
            aborting.poll(),
            Err(WsError::MalformedSample { line: 1, .. })
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = CsvSampleSource::open(
            Path::new("/definitely/not/here.csv"),
            b';',
            "CPU Energy",
            MalformedRowPolicy::Skip,
            ActivityLoggerHandle::detached(),
        )
        .err()
        .unwrap();
        assert_eq!(err.code(), "WS-3002");
    }
}

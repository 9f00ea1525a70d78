//! Cumulative CPU counter reading.
//!
//! A [`CounterSource`] produces one [`CounterSnapshot`] per call. Reads never
//! fail: anything that goes wrong collapses to [`CounterSnapshot::ZERO`] and
//! the reason is carried next to it in [`CounterRead::degraded`], so callers
//! can log degraded reads without changing what they do with the value.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::ShedError;

/// Default location of the kernel CPU accounting table.
pub const PROC_STAT_PATH: &str = "/proc/stat";

/// Literal that must open the aggregate CPU line.
const CPU_SENTINEL: &str = "cpu";

/// Position (1-based, after the sentinel) of the idle column.
const IDLE_FIELD: usize = 4;

/// Cumulative idle and total ticks for all processing units combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub idle: u64,
    pub total: u64,
}

impl CounterSnapshot {
    pub const ZERO: CounterSnapshot = CounterSnapshot { idle: 0, total: 0 };

    pub fn new(idle: u64, total: u64) -> Self {
        Self { idle, total }
    }
}

/// Why a read produced the zero snapshot instead of real counters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DegradedReason {
    #[error("counter resource unreadable: {0}")]
    Unreadable(String),

    #[error("counter resource is empty")]
    Empty,

    #[error("first line does not start with the cpu sentinel")]
    MissingSentinel,

    #[error("non-numeric counter at field {position}")]
    InvalidField { position: usize },
}

/// Result of one counter read: always a snapshot, optionally flagged degraded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterRead {
    pub snapshot: CounterSnapshot,
    pub degraded: Option<DegradedReason>,
}

impl CounterRead {
    pub fn ok(snapshot: CounterSnapshot) -> Self {
        Self {
            snapshot,
            degraded: None,
        }
    }

    pub fn degraded(reason: DegradedReason) -> Self {
        Self {
            snapshot: CounterSnapshot::ZERO,
            degraded: Some(reason),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

impl From<Result<CounterSnapshot, DegradedReason>> for CounterRead {
    fn from(result: Result<CounterSnapshot, DegradedReason>) -> Self {
        match result {
            Ok(snapshot) => CounterRead::ok(snapshot),
            Err(reason) => CounterRead::degraded(reason),
        }
    }
}

/// Source of cumulative CPU counters.
///
/// Reads may block on I/O, so implementations must only be driven from the
/// sampler task, never from request handling.
pub trait CounterSource: Send {
    fn read(&mut self) -> CounterRead;
}

/// Parse the aggregate line of a `/proc/stat`-style table.
///
/// `total` is the sum of every numeric column, `idle` is the fourth column.
pub fn parse_stat_line(line: &str) -> Result<CounterSnapshot, DegradedReason> {
    let mut fields = line.split_whitespace();

    match fields.next() {
        None => return Err(DegradedReason::Empty),
        Some(CPU_SENTINEL) => {}
        Some(_) => return Err(DegradedReason::MissingSentinel),
    }

    let mut snapshot = CounterSnapshot::ZERO;
    for (index, field) in fields.enumerate() {
        let position = index + 1;
        let value: u64 = field
            .parse()
            .map_err(|_| DegradedReason::InvalidField { position })?;
        if position == IDLE_FIELD {
            snapshot.idle = value;
        }
        snapshot.total = snapshot.total.saturating_add(value);
    }

    Ok(snapshot)
}

/// Counter source backed by a procfs-style file.
///
/// The file is opened once; every read rewinds it and parses the first line.
#[derive(Debug)]
pub struct ProcStatSource {
    path: PathBuf,
    file: File,
}

impl ProcStatSource {
    /// Open the counter resource. Failing here is fatal for the caller.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ShedError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| ShedError::CounterSource {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_first_line(&mut self) -> std::io::Result<String> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut line = String::new();
        BufReader::new(&self.file).read_line(&mut line)?;
        Ok(line)
    }
}

impl CounterSource for ProcStatSource {
    fn read(&mut self) -> CounterRead {
        match self.read_first_line() {
            Ok(line) => parse_stat_line(&line).into(),
            Err(e) => CounterRead::degraded(DegradedReason::Unreadable(e.to_string())),
        }
    }
}

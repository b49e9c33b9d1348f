use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

use super::domain::{BackgroundCheckState, CheckTier, RunKey};
use super::token;

const JOURNAL_EXTENSION: &str = "jsonl";

/// Append-only history of one background-check run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEvent {
    Started {
        run: RunKey,
        email: String,
        tier: CheckTier,
        created_at: DateTime<Utc>,
    },
    Step {
        key: String,
        record: StepRecord,
        recorded_at: DateTime<Utc>,
    },
    Finished {
        state: Box<BackgroundCheckState>,
    },
}

/// Recorded outcome of a keyed step, replayed instead of re-executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepRecord {
    Completed { output: Value },
    Failed { error: String },
}

/// Storage abstraction for run histories.
pub trait Journal: Send + Sync {
    fn append(&self, key: &RunKey, event: &JournalEvent) -> Result<(), JournalError>;
    fn load(&self, key: &RunKey) -> Result<Vec<JournalEvent>, JournalError>;
    fn runs(&self) -> Result<Vec<RunKey>, JournalError>;
}

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("journal io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("journal event could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("journal for {run} is corrupt at line {line}: {source}")]
    Corrupt {
        run: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Process-local journal; histories die with the process.
#[derive(Default)]
pub struct InMemoryJournal {
    inner: Mutex<InMemoryRuns>,
}

#[derive(Default)]
struct InMemoryRuns {
    order: Vec<RunKey>,
    events: HashMap<RunKey, Vec<JournalEvent>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Journal for InMemoryJournal {
    fn append(&self, key: &RunKey, event: &JournalEvent) -> Result<(), JournalError> {
        let mut guard = self.inner.lock().expect("journal mutex poisoned");
        if !guard.events.contains_key(key) {
            guard.order.push(key.clone());
        }
        guard
            .events
            .entry(key.clone())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    fn load(&self, key: &RunKey) -> Result<Vec<JournalEvent>, JournalError> {
        let guard = self.inner.lock().expect("journal mutex poisoned");
        Ok(guard.events.get(key).cloned().unwrap_or_default())
    }

    fn runs(&self) -> Result<Vec<RunKey>, JournalError> {
        let guard = self.inner.lock().expect("journal mutex poisoned");
        Ok(guard.order.clone())
    }
}

/// One JSON-lines file per run, named by a SHA-256 of the run's decision
/// token. The run key itself is read back from the `started` event.
pub struct FileJournal {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileJournal {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &RunKey) -> PathBuf {
        self.dir.join(format!("{}.{JOURNAL_EXTENSION}", file_stem(key)))
    }

    /// Reads the run key from the first event of a journal file.
    fn run_in(path: &Path) -> Result<Option<RunKey>, JournalError> {
        let mut first = String::new();
        BufReader::new(fs::File::open(path)?).read_line(&mut first)?;
        match serde_json::from_str::<JournalEvent>(&first) {
            Ok(JournalEvent::Started { run, .. }) => Ok(Some(run)),
            _ => Ok(None),
        }
    }
}

fn file_stem(key: &RunKey) -> String {
    format!("{:x}", Sha256::digest(token::issue_for(key).as_str().as_bytes()))
}

impl Journal for FileJournal {
    fn append(&self, key: &RunKey, event: &JournalEvent) -> Result<(), JournalError> {
        let mut line = serde_json::to_vec(event).map_err(JournalError::Encode)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().expect("journal mutex poisoned");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(key))?;
        file.write_all(&line)?;
        file.sync_data()?;
        Ok(())
    }

    fn load(&self, key: &RunKey) -> Result<Vec<JournalEvent>, JournalError> {
        let path = self.path_for(key);
        let _guard = self.write_lock.lock().expect("journal mutex poisoned");
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut events = Vec::new();
        let mut offset = 0usize;
        let mut torn_at = None;
        let mut lines = bytes.split_inclusive(|byte| *byte == b'\n').peekable();
        let mut number = 0;
        while let Some(line) = lines.next() {
            number += 1;
            let start = offset;
            offset += line.len();
            let complete = line.ends_with(b"\n");
            let body = line.strip_suffix(b"\n").unwrap_or(line);
            if complete && body.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<JournalEvent>(body) {
                Ok(event) if complete => events.push(event),
                Err(source) if lines.peek().is_some() => {
                    return Err(JournalError::Corrupt {
                        run: key.to_string(),
                        line: number,
                        source,
                    })
                }
                // A crash mid-append leaves an unterminated final line.
                _ => torn_at = Some(start),
            }
        }

        if let Some(len) = torn_at {
            warn!(
                run = %key,
                offset = len,
                dropped = bytes.len() - len,
                "truncating torn journal tail"
            );
            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_len(len as u64)?;
            file.sync_all()?;
        }
        Ok(events)
    }

    fn runs(&self) -> Result<Vec<RunKey>, JournalError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(JOURNAL_EXTENSION) {
                continue;
            }
            let stem = path.file_stem().and_then(|stem| stem.to_str());
            match Self::run_in(&path) {
                Ok(Some(key)) if stem == Some(file_stem(&key).as_str()) => keys.push(key),
                Ok(_) => warn!(path = %path.display(), "skipping foreign journal file"),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable journal file"),
            }
        }
        keys.sort();
        Ok(keys)
    }
}

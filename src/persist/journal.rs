//! File-backed journal + snapshot, the reference [`PersistHook`].
//!
//! ## Layout
//!
//! ```text
//! {dir}/
//!   snapshot.bin     (bincode-encoded DatabaseImage)
//!   journal.jsonl    (operations since the snapshot)
//! ```
//!
//! ## Journal Entry Format
//!
//! Each entry is a JSON line for debuggability, checksummed with crc32
//! over the serialized operation:
//! ```json
//! {"seq":1,"crc":3839425,"op":{"op":"fact_write","cube":"sales","coords":[1,2],"value":400.0}}
//! ```
//!
//! Replay verifies checksums and stops at the first corrupt line, so a
//! torn tail write cannot poison recovery.

use super::{DatabaseImage, JournalOp, PersistHook, StructureChange};
use crate::address::BaseAddress;
use crate::error::{EngineError, EngineResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize)]
struct JournalLine {
    seq: u64,
    crc: u32,
    op: JournalOp,
}

struct JournalState {
    writer: Option<BufWriter<File>>,
    seq: u64,
    batch: Vec<JournalOp>,
    in_batch: bool,
}

/// File-backed persistence hook.
pub struct FileJournal {
    dir: PathBuf,
    journal_path: PathBuf,
    snapshot_path: PathBuf,
    immediate_sync: bool,
    state: Mutex<JournalState>,
}

impl FileJournal {
    pub fn new(dir: impl Into<PathBuf>, immediate_sync: bool) -> EngineResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let journal_path = dir.join("journal.jsonl");
        let snapshot_path = dir.join("snapshot.bin");
        Ok(FileJournal {
            dir,
            journal_path,
            snapshot_path,
            immediate_sync,
            state: Mutex::new(JournalState {
                writer: None,
                seq: 0,
                batch: Vec::new(),
                in_batch: false,
            }),
        })
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Journal size in bytes, for monitoring.
    pub fn journal_size(&self) -> u64 {
        fs::metadata(&self.journal_path).map(|m| m.len()).unwrap_or(0)
    }

    fn write_ops(&self, state: &mut JournalState, ops: &[JournalOp]) -> EngineResult<()> {
        if state.writer.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.journal_path)?;
            state.writer = Some(BufWriter::new(file));
        }
        let JournalState { writer, seq, .. } = state;
        let writer = writer.as_mut().expect("journal writer open");
        for op in ops {
            *seq += 1;
            let payload = serde_json::to_string(op)?;
            let line = JournalLine {
                seq: *seq,
                crc: crc32fast::hash(payload.as_bytes()),
                op: op.clone(),
            };
            writeln!(writer, "{}", serde_json::to_string(&line)?)?;
        }
        writer.flush()?;
        if self.immediate_sync {
            writer.get_ref().sync_data()?;
        }
        Ok(())
    }
}

impl PersistHook for FileJournal {
    fn begin_batch(&self) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.batch.clear();
        state.in_batch = true;
        Ok(())
    }

    fn append_fact_write(&self, cube: &str, addr: &BaseAddress, value: f64) -> EngineResult<()> {
        let op = JournalOp::FactWrite {
            cube: cube.to_string(),
            coords: addr.coords().to_vec(),
            value,
        };
        let mut state = self.state.lock();
        if state.in_batch {
            state.batch.push(op);
            Ok(())
        } else {
            self.write_ops(&mut state, &[op])
        }
    }

    fn append_structure_change(&self, change: &StructureChange) -> EngineResult<()> {
        let op = JournalOp::Structure(change.clone());
        let mut state = self.state.lock();
        if state.in_batch {
            state.batch.push(op);
            Ok(())
        } else {
            self.write_ops(&mut state, &[op])
        }
    }

    fn commit_batch(&self) -> EngineResult<()> {
        let mut state = self.state.lock();
        let ops = std::mem::take(&mut state.batch);
        state.in_batch = false;
        if ops.is_empty() {
            return Ok(());
        }
        self.write_ops(&mut state, &ops)
    }

    fn save_snapshot(&self, image: &DatabaseImage) -> EngineResult<()> {
        let bytes =
            bincode::serialize(image).map_err(|e| EngineError::Encode(e.to_string()))?;
        let tmp = self.dir.join("snapshot.bin.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.snapshot_path)?;

        // the journal is folded into the snapshot; start a fresh one
        let mut state = self.state.lock();
        state.writer = None;
        state.seq = 0;
        if self.journal_path.exists() {
            fs::remove_file(&self.journal_path)?;
        }
        tracing::info!(dir = %self.dir.display(), "snapshot saved, journal truncated");
        Ok(())
    }

    fn load_snapshot(&self) -> EngineResult<Option<DatabaseImage>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.snapshot_path)?;
        let image =
            bincode::deserialize(&bytes).map_err(|e| EngineError::Encode(e.to_string()))?;
        Ok(Some(image))
    }

    fn replay_journal(&self) -> EngineResult<Vec<JournalOp>> {
        if !self.journal_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.journal_path)?;
        let reader = BufReader::new(file);
        let mut ops = Vec::new();
        let mut max_seq = 0;
        for raw in reader.lines() {
            let raw = raw?;
            if raw.trim().is_empty() {
                continue;
            }
            let line: JournalLine = match serde_json::from_str(&raw) {
                Ok(line) => line,
                Err(err) => {
                    tracing::warn!(%err, "journal replay stopped at unparsable line");
                    break;
                }
            };
            let payload = serde_json::to_string(&line.op)?;
            if crc32fast::hash(payload.as_bytes()) != line.crc {
                tracing::warn!(seq = line.seq, "journal replay stopped at checksum mismatch");
                break;
            }
            max_seq = line.seq;
            ops.push(line.op);
        }
        // continue numbering after the replayed tail
        self.state.lock().seq = max_seq;
        Ok(ops)
    }
}

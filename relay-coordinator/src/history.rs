//! Append-only log of liveness poll outcomes.
//!
//! `FileHistoryStore` keeps one JSON document per line on disk and answers
//! queries by reading the file, newest rows from the end backwards. Rows
//! are never updated or removed.

use crate::models::HistoryRecord;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_QUERY_LIMIT: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("history serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusStats {
    pub count: u64,
    pub avg_response_time_ms: Option<f64>,
}

/// node id -> status -> stats
pub type HistoryStats = BTreeMap<String, BTreeMap<String, StatusStats>>;

pub trait HistoryStore: Send + Sync {
    /// Stores `record` under a fresh id and returns the stored row.
    fn append(&self, record: HistoryRecord) -> Result<HistoryRecord, HistoryError>;

    /// Newest rows first, optionally restricted to one node.
    fn query(&self, pi_id: Option<&str>, limit: usize) -> Result<Vec<HistoryRecord>, HistoryError>;

    fn aggregate(&self, pi_id: Option<&str>) -> Result<HistoryStats, HistoryError>;
}

fn for_node(record: &HistoryRecord, pi_id: Option<&str>) -> bool {
    pi_id.map_or(true, |id| record.pi_id == id)
}

/// Running per-node, per-status counts and response-time sums.
#[derive(Default)]
struct StatsBuilder {
    acc: BTreeMap<(String, String), (u64, u64, f64)>,
}

impl StatsBuilder {
    fn add(&mut self, r: &HistoryRecord) {
        let (count, timed, total_ms) = self
            .acc
            .entry((r.pi_id.clone(), r.status.clone()))
            .or_default();
        *count += 1;
        if let Some(ms) = r.response_time_ms {
            *timed += 1;
            *total_ms += ms;
        }
    }

    fn finish(self) -> HistoryStats {
        let mut stats = HistoryStats::new();
        for ((node, status), (count, timed, total_ms)) in self.acc {
            let avg = (timed > 0).then(|| round2(total_ms / timed as f64));
            stats.entry(node).or_default().insert(
                status,
                StatusStats {
                    count,
                    avg_response_time_ms: avg,
                },
            );
        }
        stats
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Volatile store, used when no history path is configured and in tests.
#[derive(Default)]
pub struct MemoryHistoryStore {
    records: Mutex<Vec<HistoryRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn append(&self, mut record: HistoryRecord) -> Result<HistoryRecord, HistoryError> {
        let mut records = self.records.lock();
        record.id = records.last().map_or(1, |r| r.id + 1);
        records.push(record.clone());
        Ok(record)
    }

    fn query(&self, pi_id: Option<&str>, limit: usize) -> Result<Vec<HistoryRecord>, HistoryError> {
        let records = self.records.lock();
        Ok(records
            .iter()
            .rev()
            .filter(|r| for_node(r, pi_id))
            .take(limit)
            .cloned()
            .collect())
    }

    fn aggregate(&self, pi_id: Option<&str>) -> Result<HistoryStats, HistoryError> {
        let mut stats = StatsBuilder::default();
        for r in self.records.lock().iter().filter(|r| for_node(r, pi_id)) {
            stats.add(r);
        }
        Ok(stats.finish())
    }
}

struct FileInner {
    file: File,
    next_id: u64,
    /// The file may end mid-line; the next row starts on a fresh line.
    torn_tail: bool,
}

/// JSON-lines history file. Only the next id is kept in memory; queries
/// read the file on demand.
pub struct FileHistoryStore {
    path: PathBuf,
    inner: Mutex<FileInner>,
}

impl FileHistoryStore {
    /// Opens (or creates) the history file and resumes ids after its last row.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, HistoryError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new().create(true).read(true).append(true).open(&path)?;
        let torn_tail = !ends_on_line_boundary(&mut file)?;

        let mut next_id = 1;
        let mut lines = ReverseLines::new(File::open(&path)?)?;
        while let Some(line) = lines.next_line()? {
            if let Some(last) = parse_row(&path, &line) {
                next_id = last.id + 1;
                break;
            }
        }

        info!(path = %path.display(), next_id, "status history opened");
        Ok(Self {
            path,
            inner: Mutex::new(FileInner {
                file,
                next_id,
                torn_tail,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reader(&self) -> Result<Option<File>, HistoryError> {
        match File::open(&self.path) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn ends_on_line_boundary(file: &mut File) -> io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// `None` for blank or unreadable lines.
fn parse_row(path: &Path, line: &[u8]) -> Option<HistoryRecord> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    match serde_json::from_slice(line) {
        Ok(record) => Some(record),
        Err(e) => {
            debug!(path = %path.display(), "skipping unreadable history row: {e}");
            None
        }
    }
}

/// Appends one row, first terminating a torn previous line.
fn write_row<W: Write>(out: &mut W, torn_tail: &mut bool, line: &[u8]) -> io::Result<()> {
    if *torn_tail {
        out.write_all(b"\n")?;
    }
    *torn_tail = true;
    out.write_all(line)?;
    out.flush()?;
    *torn_tail = false;
    Ok(())
}

const READ_CHUNK: u64 = 8 * 1024;

/// Lines of a file from last to first, read in fixed-size chunks.
struct ReverseLines {
    file: File,
    pos: u64,
    buf: Vec<u8>,
}

impl ReverseLines {
    fn new(file: File) -> io::Result<Self> {
        let pos = file.metadata()?.len();
        Ok(Self {
            file,
            pos,
            buf: Vec::new(),
        })
    }

    fn next_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(i) = self.buf.iter().rposition(|&b| b == b'\n') {
                let line = self.buf.split_off(i + 1);
                self.buf.truncate(i);
                return Ok(Some(line));
            }
            if self.pos == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(std::mem::take(&mut self.buf)));
            }

            let start = self.pos.saturating_sub(READ_CHUNK);
            let mut chunk = vec![0; (self.pos - start) as usize];
            self.file.seek(SeekFrom::Start(start))?;
            self.file.read_exact(&mut chunk)?;
            chunk.extend_from_slice(&self.buf);
            self.buf = chunk;
            self.pos = start;
        }
    }
}

impl HistoryStore for FileHistoryStore {
    fn append(&self, mut record: HistoryRecord) -> Result<HistoryRecord, HistoryError> {
        let mut inner = self.inner.lock();
        record.id = inner.next_id;

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let FileInner { file, torn_tail, .. } = &mut *inner;
        write_row(file, torn_tail, line.as_bytes())?;

        inner.next_id += 1;
        Ok(record)
    }

    fn query(&self, pi_id: Option<&str>, limit: usize) -> Result<Vec<HistoryRecord>, HistoryError> {
        let mut rows = Vec::new();
        let Some(file) = self.reader()? else {
            return Ok(rows);
        };
        if limit == 0 {
            return Ok(rows);
        }

        let mut lines = ReverseLines::new(file)?;
        while let Some(line) = lines.next_line()? {
            match parse_row(&self.path, &line) {
                Some(r) if for_node(&r, pi_id) => rows.push(r),
                _ => continue,
            }
            if rows.len() == limit {
                break;
            }
        }
        Ok(rows)
    }

    fn aggregate(&self, pi_id: Option<&str>) -> Result<HistoryStats, HistoryError> {
        let mut stats = StatsBuilder::default();
        let Some(file) = self.reader()? else {
            return Ok(stats.finish());
        };

        for line in BufReader::new(file).split(b'\n') {
            if let Some(r) = parse_row(&self.path, &line?) {
                if for_node(&r, pi_id) {
                    stats.add(&r);
                }
            }
        }
        Ok(stats.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeState;
    use time::macros::datetime;

    fn record(pi: &str, status: NodeState, ms: Option<f64>) -> HistoryRecord {
        let mut r = HistoryRecord::new(datetime!(2024-05-01 12:00 UTC), pi, status);
        r.response_time_ms = ms;
        r
    }

    #[test]
    fn append_then_query_returns_the_same_record_first() {
        let store = MemoryHistoryStore::new();
        store.append(record("pi_1", NodeState::Online, Some(3.0))).unwrap();

        let mut input = record("pi_2", NodeState::Offline, None);
        input.error_msg = Some("connection refused".into());
        input.chassis_list = Some("[3,4]".into());
        let stored = store.append(input.clone()).unwrap();

        let newest = store.query(None, 1).unwrap();
        assert_eq!(newest, vec![stored.clone()]);
        assert_eq!(HistoryRecord { id: 0, ..stored }, input);
    }

    #[test]
    fn query_filters_and_limits_newest_first() {
        let store = MemoryHistoryStore::new();
        for i in 0..5 {
            store.append(record("pi_1", NodeState::Online, Some(i as f64))).unwrap();
            store.append(record("pi_2", NodeState::Online, None)).unwrap();
        }

        let rows = store.query(Some("pi_1"), 3).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.pi_id == "pi_1"));
        assert_eq!(rows[0].response_time_ms, Some(4.0));
        assert!(rows.windows(2).all(|w| w[0].id > w[1].id));

        assert_eq!(store.query(None, 100).unwrap().len(), 10);
        assert!(store.query(Some("pi_9"), 10).unwrap().is_empty());
    }

    #[test]
    fn aggregate_counts_and_averages_per_status() {
        let store = MemoryHistoryStore::new();
        store.append(record("pi_1", NodeState::Online, Some(10.0))).unwrap();
        store.append(record("pi_1", NodeState::Online, Some(11.0))).unwrap();
        store.append(record("pi_1", NodeState::Online, Some(11.0))).unwrap();
        store.append(record("pi_1", NodeState::Offline, None)).unwrap();
        store.append(record("pi_2", NodeState::Error, Some(1.0))).unwrap();

        let stats = store.aggregate(None).unwrap();
        assert_eq!(stats["pi_1"]["online"], StatusStats { count: 3, avg_response_time_ms: Some(10.67) });
        assert_eq!(stats["pi_1"]["offline"], StatusStats { count: 1, avg_response_time_ms: None });
        assert_eq!(stats["pi_2"]["error"].count, 1);

        let only = store.aggregate(Some("pi_2")).unwrap();
        assert_eq!(only.len(), 1);
    }

    #[test]
    fn file_store_persists_and_continues_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.jsonl");

        {
            let store = FileHistoryStore::open(&path).unwrap();
            assert_eq!(store.append(record("pi_1", NodeState::Online, Some(1.0))).unwrap().id, 1);
            assert_eq!(store.append(record("pi_1", NodeState::Offline, None)).unwrap().id, 2);
        }

        let reopened = FileHistoryStore::open(&path).unwrap();
        let rows = reopened.query(None, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, "offline");
        assert_eq!(reopened.append(record("pi_2", NodeState::Online, None)).unwrap().id, 3);
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 3);
    }

    #[test]
    fn file_store_skips_torn_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let good = serde_json::to_string(&HistoryRecord {
            id: 7,
            ..record("pi_1", NodeState::Online, None)
        })
        .unwrap();
        fs::write(&path, format!("{good}\n{{\"id\": 8, \"timest")).unwrap();

        let store = FileHistoryStore::open(&path).unwrap();
        assert_eq!(store.query(None, 10).unwrap().len(), 1);
        assert_eq!(store.append(record("pi_1", NodeState::Online, None)).unwrap().id, 8);
        drop(store);

        let reopened = FileHistoryStore::open(&path).unwrap();
        let ids: Vec<u64> = reopened.query(None, 10).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![8, 7]);
    }

    #[test]
    fn file_store_reads_rows_on_demand_across_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let store = FileHistoryStore::open(&path).unwrap();
        for i in 0..400 {
            let pi = if i % 4 == 0 { "pi_2" } else { "pi_1" };
            let mut r = record(pi, NodeState::Online, Some(i as f64));
            r.chassis_list = Some("[1,2]".into());
            store.append(r).unwrap();
        }
        assert!(fs::metadata(&path).unwrap().len() > 4 * READ_CHUNK);

        let newest = store.query(Some("pi_2"), 3).unwrap();
        let ids: Vec<u64> = newest.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![397, 393, 389]);
        assert_eq!(store.query(None, 1000).unwrap().len(), 400);
        assert!(store.query(None, 0).unwrap().is_empty());

        let stats = store.aggregate(None).unwrap();
        assert_eq!(stats["pi_1"]["online"].count, 300);
        assert_eq!(stats["pi_2"]["online"].count, 100);
        assert_eq!(stats["pi_2"]["online"].avg_response_time_ms, Some(198.0));

        // another writer's rows are visible without reopening
        let mut extra = record("pi_3", NodeState::Error, None);
        extra.id = 999;
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "{}", serde_json::to_string(&extra).unwrap()).unwrap();
        assert_eq!(store.query(None, 1).unwrap()[0].pi_id, "pi_3");
        assert_eq!(store.aggregate(Some("pi_3")).unwrap()["pi_3"]["error"].count, 1);
    }

    /// Accepts `budget` bytes, then fails every write.
    struct ShortWriter {
        out: Vec<u8>,
        budget: usize,
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(ErrorKind::Other, "disk full"));
            }
            let n = buf.len().min(self.budget);
            self.out.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_write_does_not_swallow_the_next_row() {
        let mut out = ShortWriter { out: Vec::new(), budget: 5 };
        let mut torn = false;
        assert!(write_row(&mut out, &mut torn, b"{\"id\":1}\n").is_err());
        assert!(torn);

        out.budget = usize::MAX;
        write_row(&mut out, &mut torn, b"{\"id\":2}\n").unwrap();
        assert!(!torn);
        assert_eq!(out.out, b"{\"id\n{\"id\":2}\n");
    }
}

//! Append-only durable log of acquired quotes.
//!
//! The log is a CSV file with the header `Value,Time Span/Date,Rate of Change,Timestamp`,
//! written once when the file is created. Rows are only ever appended; nothing in the
//! service rewrites or deletes them. Reads serve two purposes: recovery (the query
//! endpoint and the cache fallback strategy) and export.
//!
//! Appends happen off the scheduler thread: `spawn_journal` starts a single writer thread
//! fed through a bounded `crossbeam_channel`, and `JournalHandle::submit` never blocks the
//! caller. A full or closed queue is reported as a persistence error and the row is dropped.

use chrono::NaiveDateTime;
use crossbeam_channel::{Sender, TrySendError, bounded};
use log::{debug, error, warn};
use spot_common::quote::{parse_timestamp, split_rate_of_change};
use spot_common::{ExtractedFields, FeedError, Quote, Result, Source};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Column header of the durable log and of the exported file.
pub const LOG_HEADER: [&str; 4] = ["Value", "Time Span/Date", "Rate of Change", "Timestamp"];

/// Bytes read from the end of the log when looking for the newest row.
const TAIL_WINDOW: u64 = 8 * 1024;

/// CSV-backed time series of quotes.
pub struct TimeSeriesStore {
    path: PathBuf,
    /// Serialises file access inside the process so readers never see half a row.
    lock: Mutex<()>,
}

impl TimeSeriesStore {
    /// Open (or create) the log at `path`, writing the header if the file is new.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        if !path.exists() {
            let mut wtr = csv::Writer::from_path(&path).map_err(persistence)?;
            wtr.write_record(LOG_HEADER).map_err(persistence)?;
            wtr.flush()?;
            debug!("Created durable log at {}", path.display());
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row. The header is restored first if the file was removed underneath us.
    pub fn append(&self, quote: &Quote) -> Result<()> {
        let _guard = self.lock.lock()?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let needs_header = file.metadata()?.len() == 0;

        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            wtr.write_record(LOG_HEADER).map_err(persistence)?;
        }
        wtr.write_record([
            quote.value.as_str(),
            quote.time_span.as_str(),
            quote.rate_of_change().as_str(),
            quote.timestamp().as_str(),
        ])
        .map_err(persistence)?;
        wtr.flush()?;
        Ok(())
    }

    /// Most recent valid row, if any.
    ///
    /// Only the tail of the file is read; the full scan is a fallback for a tail made
    /// entirely of malformed rows.
    pub fn latest(&self) -> Result<Option<Quote>> {
        let (found, whole_file) = self.read_tail()?;
        match found {
            Some(quote) => Ok(Some(quote)),
            None if whole_file => Ok(None),
            None => Ok(self.read_all()?.pop()),
        }
    }

    /// Up to `n` most recent rows, oldest first.
    pub fn last_n(&self, n: usize) -> Result<Vec<Quote>> {
        let mut rows = self.read_all()?;
        let skip = rows.len().saturating_sub(n);
        Ok(rows.split_off(skip))
    }

    /// Most recent row if it is strictly younger than `max_age` at `now`.
    pub fn latest_younger_than(&self, max_age: Duration, now: NaiveDateTime) -> Result<Option<Quote>> {
        Ok(self
            .latest()?
            .filter(|q| (0..max_age.as_secs() as i64).contains(&age_secs(q, now))))
    }

    /// Raw bytes of the whole log, or `None` when it is absent or holds no rows.
    pub fn export(&self) -> Result<Option<Vec<u8>>> {
        let _guard = self.lock.lock()?;
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let has_rows = bytes
            .split(|b| *b == b'\n')
            .skip(1)
            .any(|line| !line.iter().all(u8::is_ascii_whitespace));
        Ok(has_rows.then_some(bytes))
    }

    /// Newest valid row within the last [`TAIL_WINDOW`] bytes, and whether that window
    /// covered the whole file.
    fn read_tail(&self) -> Result<(Option<Quote>, bool)> {
        let _guard = self.lock.lock()?;
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((None, true)),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len();
        let start = len.saturating_sub(TAIL_WINDOW);
        file.seek(SeekFrom::Start(start))?;
        let mut tail = Vec::new();
        file.read_to_end(&mut tail)?;

        let mut lines = tail.split(|b| *b == b'\n');
        if start > 0 {
            // The window may begin mid-row.
            lines.next();
        }
        let lines: Vec<&[u8]> = lines.collect();
        for line in lines.into_iter().rev() {
            if let Some(quote) = line_to_quote(line) {
                return Ok((Some(quote), start == 0));
            }
        }
        Ok((None, start == 0))
    }

    fn read_all(&self) -> Result<Vec<Quote>> {
        let _guard = self.lock.lock()?;
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(&self.path)
            .map_err(persistence)?;

        let mut rows = Vec::new();
        for (line, record) in rdr.records().enumerate() {
            let record = record.map_err(persistence)?;
            match row_to_quote(&record) {
                Ok(quote) => rows.push(quote),
                Err(e) => warn!("Skipping malformed log row {}: {}", line + 2, e),
            }
        }
        Ok(rows)
    }
}

/// Whole seconds between `quote.captured_at` and `now`.
pub fn age_secs(quote: &Quote, now: NaiveDateTime) -> i64 {
    (now - quote.captured_at).num_seconds()
}

/// Parse one raw log line; `None` for blank, header or malformed lines.
fn line_to_quote(line: &[u8]) -> Option<Quote> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(line);
    let record = rdr.records().next()?.ok()?;
    if record.get(0) == Some(LOG_HEADER[0]) {
        return None;
    }
    match row_to_quote(&record) {
        Ok(quote) => Some(quote),
        Err(e) => {
            warn!("Skipping malformed log row: {}", e);
            None
        }
    }
}

/// Rebuild a quote from a log row, applying the same validation as a fresh extraction.
fn row_to_quote(record: &csv::StringRecord) -> Result<Quote> {
    let field = |i: usize, name: &'static str| {
        record
            .get(i)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FeedError::Format(format!("missing column {name}")))
    };
    let rate = field(2, "Rate of Change")?;
    let (change_absolute, change_percent) = split_rate_of_change(rate)
        .ok_or_else(|| FeedError::Format(format!("unrecognised rate of change {rate:?}")))?;

    let fields = ExtractedFields {
        value: field(0, "Value")?.to_string(),
        change_absolute,
        change_percent,
        time_label: field(1, "Time Span/Date")?.to_string(),
    };
    Quote::from_fields(fields, parse_timestamp(field(3, "Timestamp")?)?, Source::Cache)
}

fn persistence(err: csv::Error) -> FeedError {
    FeedError::Persistence(err.to_string())
}

/// Non-blocking submission side of the persistence worker.
#[derive(Clone)]
pub struct JournalHandle {
    tx: Sender<Quote>,
}

impl JournalHandle {
    /// Queue a quote for appending. Never blocks; failures are logged, not returned.
    pub fn submit(&self, quote: Quote) {
        match self.tx.try_send(quote) {
            Ok(()) => {}
            Err(TrySendError::Full(q)) => error!(
                "{}",
                FeedError::Persistence(format!("journal queue full, dropped row {}", q.timestamp()))
            ),
            Err(TrySendError::Disconnected(q)) => error!(
                "{}",
                FeedError::Persistence(format!("journal worker gone, dropped row {}", q.timestamp()))
            ),
        }
    }
}

/// Start the writer thread. It exits once every `JournalHandle` has been dropped.
pub fn spawn_journal(store: Arc<TimeSeriesStore>, depth: usize) -> Result<(JournalHandle, JoinHandle<()>)> {
    let (tx, rx) = bounded::<Quote>(depth.max(1));
    let worker = thread::Builder::new()
        .name("journal".into())
        .spawn(move || {
            for quote in rx {
                match store.append(&quote) {
                    Ok(()) => debug!("Logged quote captured at {}", quote.timestamp()),
                    Err(e) => error!("Failed to append quote to {}: {}", store.path().display(), e),
                }
            }
            debug!("Journal worker stopped");
        })?;
    Ok((JournalHandle { tx }, worker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(secs: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            + chrono::Duration::seconds(secs as i64)
    }

    fn quote(value: &str, secs: u32) -> Quote {
        Quote::from_fields(
            ExtractedFields {
                value: value.into(),
                change_absolute: "+1.50".into(),
                change_percent: "+0.06%".into(),
                time_label: "3 Months".into(),
            },
            at(secs),
            Source::Browser,
        )
        .unwrap()
    }

    #[test]
    fn appended_quote_reads_back_unchanged_apart_from_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = TimeSeriesStore::open(dir.path().join("log.csv")).unwrap();
        let original = quote("2,612.50", 0);

        store.append(&original).unwrap();

        let back = store.latest().unwrap().unwrap();
        assert_eq!(back, original.with_source(Source::Cache));
    }

    #[test]
    fn header_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("log.csv");
        let store = TimeSeriesStore::open(&path).unwrap();
        store.append(&quote("1", 0)).unwrap();
        drop(store);

        let reopened = TimeSeriesStore::open(&path).unwrap();
        reopened.append(&quote("2", 1)).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("Time Span/Date").count(), 1);
        assert_eq!(text.lines().count(), 3);
        assert!(text.starts_with("Value,Time Span/Date,Rate of Change,Timestamp"));
    }

    #[test]
    fn last_n_returns_newest_rows_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = TimeSeriesStore::open(dir.path().join("log.csv")).unwrap();
        for (i, v) in ["10", "11", "12", "13"].iter().enumerate() {
            store.append(&quote(v, i as u32)).unwrap();
        }
        let values: Vec<String> = store.last_n(2).unwrap().into_iter().map(|q| q.value).collect();
        assert_eq!(values, vec!["12", "13"]);
        assert_eq!(store.last_n(10).unwrap().len(), 4);
    }

    #[test]
    fn latest_younger_than_respects_age() {
        let dir = tempfile::tempdir().unwrap();
        let store = TimeSeriesStore::open(dir.path().join("log.csv")).unwrap();
        store.append(&quote("2500", 0)).unwrap();

        let max_age = Duration::from_secs(300);
        assert!(store.latest_younger_than(max_age, at(299)).unwrap().is_some());
        assert!(store.latest_younger_than(max_age, at(301)).unwrap().is_none());
    }

    #[test]
    fn export_is_none_until_a_row_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let store = TimeSeriesStore::open(&path).unwrap();
        assert!(store.export().unwrap().is_none());

        store.append(&quote("2500", 0)).unwrap();
        let bytes = store.export().unwrap().unwrap();
        assert!(String::from_utf8(bytes).unwrap().contains("2500,3 Months,+1.50 (+0.06%),2025-06-01 12:00:00"));

        fs::remove_file(&path).unwrap();
        assert!(store.export().unwrap().is_none());
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let store = TimeSeriesStore::open(&path).unwrap();
        store.append(&quote("2500", 0)).unwrap();
        let mut text = fs::read_to_string(&path).unwrap();
        text.push_str("garbage,,\n");
        fs::write(&path, text).unwrap();

        assert_eq!(store.latest().unwrap().unwrap().value, "2500");
    }

    #[test]
    fn non_numeric_row_is_not_served() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let store = TimeSeriesStore::open(&path).unwrap();
        store.append(&quote("2500", 0)).unwrap();
        let mut text = fs::read_to_string(&path).unwrap();
        text.push_str("N/A,3 Months,+1.00 (+0.04%),2025-06-01 12:00:05\n");
        fs::write(&path, text).unwrap();

        assert_eq!(store.latest().unwrap().unwrap().value, "2500");
        assert_eq!(store.last_n(5).unwrap().len(), 1);
    }

    #[test]
    fn latest_comes_from_the_tail_of_a_long_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let store = TimeSeriesStore::open(&path).unwrap();
        for i in 0..1_000 {
            store.append(&quote(&format!("{}", 2000 + i), i)).unwrap();
        }
        assert!(fs::metadata(&path).unwrap().len() > TAIL_WINDOW);

        let newest = store.latest().unwrap().unwrap();
        assert_eq!(newest.value, "2999");
        assert_eq!(newest.captured_at, at(999));
    }

    #[test]
    fn latest_scans_back_past_a_corrupt_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let store = TimeSeriesStore::open(&path).unwrap();
        store.append(&quote("2500", 0)).unwrap();
        let mut text = fs::read_to_string(&path).unwrap();
        for _ in 0..1_000 {
            text.push_str("garbage,,,\n");
        }
        fs::write(&path, text).unwrap();

        assert_eq!(store.latest().unwrap().unwrap().value, "2500");
    }

    #[test]
    fn row_from_the_future_is_not_young() {
        let dir = tempfile::tempdir().unwrap();
        let store = TimeSeriesStore::open(dir.path().join("log.csv")).unwrap();
        store.append(&quote("2500", 0)).unwrap();

        let before = at(0) - chrono::Duration::seconds(10);
        assert!(store.latest_younger_than(Duration::from_secs(300), before).unwrap().is_none());
    }

    #[test]
    fn journal_appends_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TimeSeriesStore::open(dir.path().join("log.csv")).unwrap());
        let (journal, worker) = spawn_journal(Arc::clone(&store), 4).unwrap();

        journal.submit(quote("2601", 0));
        journal.submit(quote("2602", 1));
        drop(journal);
        worker.join().unwrap();

        let values: Vec<String> = store.last_n(5).unwrap().into_iter().map(|q| q.value).collect();
        assert_eq!(values, vec!["2601", "2602"]);
    }
}

// SPDX-License-Identifier: Apache-2.0
//! The segment writer: owns one metric's append-only log on disk, plus its
//! last-value side file, and knows nothing about value types or encoding
//! beyond the opaque bytes the facade hands it.
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::id::MetricId;
use crate::segment::{self, Frame};

const LAST_FILE_NAME: &str = "last";

/// A single durable, timestamped sample, carried as engine-opaque bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub timestamp: f64,
    pub value_bytes: Vec<u8>,
}

struct OpenSegment {
    path: PathBuf,
    file: BufWriter<File>,
    bytes_written: u64,
}

/// Owns one metric's segment files and last-value side file.
///
/// A writer holds at most one open file handle at a time and decides lazily
/// which segment to append to, per the protocol in
/// [`SegmentWriter::ensure_open_for_append`].
pub struct SegmentWriter {
    id: MetricId,
    metric_dir: PathBuf,
    segment_size: u64,
    open: Option<OpenSegment>,
    /// Set after a rollover: the next append must start a fresh segment
    /// rather than re-scanning the directory for one to reopen.
    needs_new_segment: bool,
}

impl SegmentWriter {
    pub fn new(id: MetricId, metric_dir: PathBuf, segment_size: u64) -> Self {
        Self { id, metric_dir, segment_size, open: None, needs_new_segment: false }
    }

    fn last_file_path(&self) -> PathBuf {
        self.metric_dir.join(LAST_FILE_NAME)
    }

    fn open_new_segment(&mut self, ts_millis: i64) -> Result<()> {
        let path = self.metric_dir.join(segment::segment_filename(ts_millis));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| Error::OpenFailure { path: path.clone(), source })?;
        let bytes_written = file.metadata().map(|m| m.len()).unwrap_or(0);
        log::debug!("metric {}: opened segment {}", self.id, path.display());
        self.open = Some(OpenSegment { path, file: BufWriter::new(file), bytes_written });
        self.needs_new_segment = false;
        Ok(())
    }

    /// Picks the segment to append to: the currently open one if any,
    /// else a fresh one if the previous append triggered a rollover, else
    /// the newest on-disk segment if it still has headroom, else a fresh one.
    fn ensure_open_for_append(&mut self, ts_millis: i64) -> Result<()> {
        if self.open.is_some() {
            return Ok(());
        }
        if self.needs_new_segment {
            return self.open_new_segment(ts_millis);
        }
        let segments = segment::list_segments(&self.metric_dir)?;
        if let Some((_, path)) = segments.last() {
            let size = fs::metadata(path)
                .map_err(|source| Error::OpenFailure { path: path.clone(), source })?
                .len();
            if size < self.segment_size {
                let file = OpenOptions::new()
                    .append(true)
                    .open(path)
                    .map_err(|source| Error::OpenFailure { path: path.clone(), source })?;
                self.open = Some(OpenSegment { path: path.clone(), file: BufWriter::new(file), bytes_written: size });
                return Ok(());
            }
        }
        self.open_new_segment(ts_millis)
    }

    fn close_open(&mut self) -> Result<()> {
        if let Some(mut seg) = self.open.take() {
            seg.file
                .flush()
                .map_err(|source| Error::WriteFailure { path: seg.path.clone(), source })?;
        }
        Ok(())
    }

    fn append_frame(&mut self, timestamp: f64, value_bytes: &[u8]) -> Result<()> {
        let frame = segment::encode_frame(&self.id, timestamp, value_bytes)?;
        let ts_millis = segment::millis_from_timestamp(timestamp);
        self.ensure_open_for_append(ts_millis)?;
        let seg = self.open.as_mut().expect("ensure_open_for_append leaves a segment open");
        seg.file
            .write_all(&frame)
            .map_err(|source| Error::WriteFailure { path: seg.path.clone(), source })?;
        seg.file
            .flush()
            .map_err(|source| Error::WriteFailure { path: seg.path.clone(), source })?;
        seg.bytes_written += frame.len() as u64;
        if seg.bytes_written >= self.segment_size {
            log::debug!(
                "metric {}: segment {} reached {} bytes, rolling over",
                self.id,
                seg.path.display(),
                seg.bytes_written
            );
            self.close_open()?;
            self.needs_new_segment = true;
        }
        Ok(())
    }

    /// Appends one record and refreshes the last-value side file.
    pub fn append(&mut self, timestamp: f64, value_bytes: &[u8]) -> Result<()> {
        self.append_frame(timestamp, value_bytes)?;
        self.write_last_value(timestamp, value_bytes)
    }

    /// Appends a batch of already-deduped, already-ordered records,
    /// refreshing the last-value file once from the final sample.
    pub fn write_many(&mut self, samples: &[RawSample]) -> Result<()> {
        for sample in samples {
            self.append_frame(sample.timestamp, &sample.value_bytes)?;
        }
        if let Some(last) = samples.last() {
            self.write_last_value(last.timestamp, &last.value_bytes)?;
        }
        Ok(())
    }

    /// The last-value file holds `[8-byte LE f64 timestamp][value_bytes]`
    /// with no length prefix: its length is the file's length. It is a
    /// fast-path cache, not framing, so it is rewritten atomically rather
    /// than appended to.
    fn write_last_value(&self, timestamp: f64, value_bytes: &[u8]) -> Result<()> {
        let path = self.last_file_path();
        let mut out = Vec::with_capacity(8 + value_bytes.len());
        out.extend_from_slice(&timestamp.to_le_bytes());
        out.extend_from_slice(value_bytes);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &out).map_err(|source| Error::WriteFailure { path: tmp.clone(), source })?;
        fs::rename(&tmp, &path).map_err(|source| Error::WriteFailure { path: path.clone(), source })?;
        Ok(())
    }

    fn delete_last_value_file(&self) -> Result<()> {
        let path = self.last_file_path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::DeleteFailure { path, source }),
        }
    }

    fn scan_newest_segment_last_record(&self) -> Result<Option<RawSample>> {
        let segments = segment::list_segments(&self.metric_dir)?;
        let Some((_, path)) = segments.last() else { return Ok(None) };
        let file = File::open(path).map_err(|source| Error::OpenFailure { path: path.clone(), source })?;
        let mut reader = BufReader::new(file);
        let mut last = None;
        while let Some(frame) = segment::read_frame(&self.id, path, &mut reader)? {
            last = Some(frame);
        }
        Ok(last.map(|Frame { timestamp, value_bytes }| RawSample { timestamp, value_bytes }))
    }

    /// The most recent record, read from the last-value file if present and
    /// decodable, else by scanning the newest segment's final record.
    ///
    /// A present-but-too-short last-value file is treated as corrupt: it is
    /// deleted (it cannot be trusted for future reads either) and reads
    /// fall back to the segment scan, per the engine's one documented
    /// not-fully-restorable recovery path.
    pub fn last_value(&self) -> Result<Option<RawSample>> {
        let path = self.last_file_path();
        match fs::read(&path) {
            Ok(data) => {
                if data.len() >= 8 {
                    let timestamp = f64::from_le_bytes(data[0..8].try_into().expect("8-byte slice"));
                    let value_bytes = data[8..].to_vec();
                    Ok(Some(RawSample { timestamp, value_bytes }))
                } else {
                    log::warn!(
                        "metric {}: last-value file at {} is truncated, deleting and rescanning segments",
                        self.id,
                        path.display()
                    );
                    self.delete_last_value_file()?;
                    self.scan_newest_segment_last_record()
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.scan_newest_segment_last_record(),
            Err(source) => Err(Error::OpenFailure { path, source }),
        }
    }

    /// Total record count across every segment, found by scanning frame
    /// headers without decoding payloads.
    pub fn count(&self) -> Result<u64> {
        let segments = segment::list_segments(&self.metric_dir)?;
        let mut total = 0u64;
        for (_, path) in segments {
            let file = File::open(&path).map_err(|source| Error::OpenFailure { path: path.clone(), source })?;
            let mut reader = BufReader::new(file);
            while segment::read_frame(&self.id, &path, &mut reader)?.is_some() {
                total += 1;
            }
        }
        Ok(total)
    }

    /// Records with timestamps in `[min(from, to), max(from, to)]`, read in
    /// ascending order if `from <= to`, descending otherwise. `limit` caps
    /// the number of records returned, counted from the `from` end.
    pub fn history(&self, from: f64, to: f64, limit: Option<usize>) -> Result<Vec<RawSample>> {
        let (lo, hi, reverse) = if from <= to { (from, to, false) } else { (to, from, true) };
        let segments = segment::list_segments(&self.metric_dir)?;
        if segments.is_empty() {
            return Ok(Vec::new());
        }

        let mut ranges: Vec<(f64, f64, PathBuf)> = Vec::with_capacity(segments.len());
        for (idx, (ts_ms, path)) in segments.iter().enumerate() {
            let lower = *ts_ms as f64 / 1000.0;
            let upper = segments.get(idx + 1).map(|(ts, _)| *ts as f64 / 1000.0).unwrap_or(f64::INFINITY);
            ranges.push((lower, upper, path.clone()));
        }

        let mut selected: Vec<&(f64, f64, PathBuf)> =
            ranges.iter().filter(|(lower, upper, _)| *lower <= hi && *upper > lo).collect();
        if reverse {
            selected.reverse();
        }

        let limit = limit.unwrap_or(usize::MAX);
        let mut out = Vec::new();
        for (_, _, path) in selected {
            if out.len() >= limit {
                break;
            }
            let file = File::open(&path).map_err(|source| Error::OpenFailure { path: path.clone(), source })?;
            let mut reader = BufReader::new(file);
            let mut in_window = Vec::new();
            while let Some(frame) = segment::read_frame(&self.id, &path, &mut reader)? {
                if frame.timestamp >= lo && frame.timestamp <= hi {
                    in_window.push(RawSample { timestamp: frame.timestamp, value_bytes: frame.value_bytes });
                }
            }
            if reverse {
                let remaining = limit.saturating_sub(out.len());
                let start = in_window.len().saturating_sub(remaining);
                let mut suffix = in_window[start..].to_vec();
                suffix.reverse();
                out.extend(suffix);
            } else {
                let remaining = limit.saturating_sub(out.len());
                out.extend(in_window.into_iter().take(remaining));
            }
        }
        Ok(out)
    }

    /// Deletes every record with `timestamp < before`: whole segments that
    /// fall entirely before the cutoff are removed outright, and the one
    /// segment (if any) whose range straddles the cutoff is rewritten with
    /// only its surviving records.
    pub fn delete_history(&mut self, before: f64) -> Result<()> {
        self.close_open()?;
        self.needs_new_segment = false;

        let segments = segment::list_segments(&self.metric_dir)?;
        let before_ms = segment::millis_from_timestamp(before);

        let mut remaining: Vec<(i64, PathBuf)> = Vec::new();
        for (idx, (ts_ms, path)) in segments.iter().enumerate() {
            let upper_ms = segments.get(idx + 1).map(|(ts, _)| *ts).unwrap_or(i64::MAX);
            if upper_ms < before_ms {
                fs::remove_file(path).map_err(|source| Error::DeleteFailure { path: path.clone(), source })?;
                log::debug!("metric {}: deleted segment {} entirely before cutoff", self.id, path.display());
            } else {
                remaining.push((*ts_ms, path.clone()));
            }
        }

        if let Some((ts_ms, path)) = remaining.first().cloned() {
            if ts_ms < before_ms {
                self.rewrite_straddling_segment(&path, before)?;
            }
        }

        match self.last_value() {
            Ok(Some(sample)) if sample.timestamp < before => {
                self.delete_last_value_file()?;
            }
            _ => {}
        }
        Ok(())
    }

    fn rewrite_straddling_segment(&self, path: &PathBuf, before: f64) -> Result<()> {
        let file = File::open(path).map_err(|source| Error::OpenFailure { path: path.clone(), source })?;
        let mut reader = BufReader::new(file);
        let mut survivors = Vec::new();
        while let Some(frame) = segment::read_frame(&self.id, path, &mut reader)? {
            if frame.timestamp >= before {
                survivors.push(frame);
            }
        }

        if survivors.is_empty() {
            fs::remove_file(path).map_err(|source| Error::DeleteFailure { path: path.clone(), source })?;
            log::debug!("metric {}: segment {} emptied by delete_history, removed", self.id, path.display());
            return Ok(());
        }

        let new_ts_ms = segment::millis_from_timestamp(survivors[0].timestamp);
        let new_path = self.metric_dir.join(segment::segment_filename(new_ts_ms));
        let mut buf = Vec::new();
        for frame in &survivors {
            buf.extend_from_slice(&segment::encode_frame(&self.id, frame.timestamp, &frame.value_bytes)?);
        }

        if &new_path == path {
            fs::write(path, &buf).map_err(|source| Error::WriteFailure { path: path.clone(), source })?;
        } else {
            fs::write(&new_path, &buf).map_err(|source| Error::WriteFailure { path: new_path.clone(), source })?;
            if let Err(delete_err) = fs::remove_file(path) {
                // The new file now exists alongside the stale old one. We
                // favor not losing data over a clean directory: remove the
                // just-written file so the old one remains authoritative,
                // and surface the failure rather than leaving a duplicate.
                let _ = fs::remove_file(&new_path);
                return Err(Error::DeleteFailure { path: path.clone(), source: delete_err });
            }
        }
        log::debug!("metric {}: rewrote segment {} -> {}", self.id, path.display(), new_path.display());
        Ok(())
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        if let Err(err) = self.close_open() {
            log::warn!("metric {}: failed to flush segment on drop: {err}", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer(dir: &std::path::Path) -> SegmentWriter {
        let metric_dir = dir.join("system").join("cpu-load");
        fs::create_dir_all(&metric_dir).unwrap();
        SegmentWriter::new(MetricId::new("system", "cpu-load"), metric_dir, 64)
    }

    #[test]
    fn append_then_last_value_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path());
        w.append(1.0, b"a").unwrap();
        w.append(2.0, b"bb").unwrap();
        let last = w.last_value().unwrap().unwrap();
        assert_eq!(last.timestamp, 2.0);
        assert_eq!(last.value_bytes, b"bb");
        assert_eq!(w.count().unwrap(), 2);
    }

    #[test]
    fn last_value_falls_back_to_segment_scan_when_side_file_absent() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path());
        w.append(1.0, b"a").unwrap();
        fs::remove_file(w.last_file_path()).unwrap();
        let last = w.last_value().unwrap().unwrap();
        assert_eq!(last.timestamp, 1.0);
        assert_eq!(last.value_bytes, b"a");
    }

    #[test]
    fn truncated_last_value_file_is_deleted_and_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path());
        w.append(1.0, b"a").unwrap();
        fs::write(w.last_file_path(), b"\x00\x01").unwrap();
        let last = w.last_value().unwrap().unwrap();
        assert_eq!(last.timestamp, 1.0);
        assert!(!w.last_file_path().exists());
    }

    #[test]
    fn segment_rolls_over_once_size_threshold_is_crossed() {
        let dir = tempfile::tempdir().unwrap();
        // segment_size = 64: a 10-byte header plus a handful of bytes per
        // record should cross the threshold well before 10 records.
        let mut w = writer(dir.path());
        for i in 0..10 {
            w.append(i as f64, b"0123456789").unwrap();
        }
        let segments = crate::segment::list_segments(&dir.path().join("system").join("cpu-load")).unwrap();
        assert!(segments.len() > 1, "expected more than one segment after rollover");
        assert_eq!(w.count().unwrap(), 10);
    }

    #[test]
    fn history_supports_forward_and_reverse_ranges_with_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path());
        for i in 1..=5 {
            w.append(i as f64, format!("{i}").as_bytes()).unwrap();
        }
        let forward = w.history(1.0, 5.0, None).unwrap();
        assert_eq!(forward.iter().map(|s| s.timestamp).collect::<Vec<_>>(), vec![1.0, 2.0, 3.0, 4.0, 5.0]);

        let reverse = w.history(5.0, 1.0, None).unwrap();
        assert_eq!(reverse.iter().map(|s| s.timestamp).collect::<Vec<_>>(), vec![5.0, 4.0, 3.0, 2.0, 1.0]);

        let limited = w.history(1.0, 5.0, Some(2)).unwrap();
        assert_eq!(limited.iter().map(|s| s.timestamp).collect::<Vec<_>>(), vec![1.0, 2.0]);

        let reverse_limited = w.history(5.0, 1.0, Some(2)).unwrap();
        assert_eq!(reverse_limited.iter().map(|s| s.timestamp).collect::<Vec<_>>(), vec![5.0, 4.0]);
    }

    #[test]
    fn delete_history_removes_whole_segments_and_rewrites_the_straddling_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path());
        for i in 1..=5 {
            w.append(i as f64, b"0123456789").unwrap();
        }
        w.delete_history(3.5).unwrap();
        let remaining = w.history(f64::NEG_INFINITY, f64::INFINITY, None).unwrap();
        assert_eq!(remaining.iter().map(|s| s.timestamp).collect::<Vec<_>>(), vec![4.0, 5.0]);
    }

    #[test]
    fn delete_history_past_everything_empties_the_metric() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path());
        w.append(1.0, b"a").unwrap();
        w.append(2.0, b"b").unwrap();
        w.delete_history(100.0).unwrap();
        assert_eq!(w.history(f64::NEG_INFINITY, f64::INFINITY, None).unwrap(), Vec::new());
        assert!(w.last_value().unwrap().is_none());
    }
}

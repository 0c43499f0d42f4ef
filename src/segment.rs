// SPDX-License-Identifier: Apache-2.0
//! Bit-exact framing for the per-metric segment files, and the handful of
//! pure helpers (filename parsing, directory enumeration) that the segment
//! writer builds on top of.
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::id::MetricId;

/// `byte_count` (2) + timestamp (8); the value bytes follow.
pub const FRAME_HEADER_LEN: usize = 10;

/// One decoded record: an instant and its codec-encoded value bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub timestamp: f64,
    pub value_bytes: Vec<u8>,
}

/// Frames a `(timestamp, value_bytes)` pair as
/// `[2-byte LE byte_count][8-byte LE f64 timestamp][value_bytes]`, where
/// `byte_count = 8 + value_bytes.len()`.
pub fn encode_frame(id: &MetricId, timestamp: f64, value_bytes: &[u8]) -> Result<Vec<u8>> {
    let byte_count = 8 + value_bytes.len();
    if byte_count > u16::MAX as usize {
        return Err(Error::EncodeFailure {
            id: id.clone(),
            source: Box::new(crate::error::Msg(format!(
                "value too large to frame: {byte_count} bytes exceeds the {}-byte limit",
                u16::MAX
            ))),
        });
    }
    let mut out = Vec::with_capacity(2 + byte_count);
    out.extend_from_slice(&(byte_count as u16).to_le_bytes());
    out.extend_from_slice(&timestamp.to_le_bytes());
    out.extend_from_slice(value_bytes);
    Ok(out)
}

/// Reads one frame from `reader`, returning `Ok(None)` at a clean end of
/// file (no bytes at all before the next length prefix).
///
/// Any other form of truncation, or a `byte_count` below the 8-byte
/// timestamp-only minimum, is reported as [`Error::LogCorrupted`].
pub fn read_frame(id: &MetricId, path: &Path, reader: &mut impl Read) -> Result<Option<Frame>> {
    let mut len_buf = [0u8; 2];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(source) => return Err(Error::OpenFailure { path: path.to_path_buf(), source }),
    }

    let byte_count = u16::from_le_bytes(len_buf) as usize;
    if byte_count < 8 {
        return Err(Error::LogCorrupted {
            id: id.clone(),
            path: path.to_path_buf(),
            reason: format!("frame declares {byte_count} bytes, below the 8-byte timestamp minimum"),
        });
    }

    let mut rest = vec![0u8; byte_count];
    reader.read_exact(&mut rest).map_err(|source| {
        if source.kind() == io::ErrorKind::UnexpectedEof {
            Error::LogCorrupted {
                id: id.clone(),
                path: path.to_path_buf(),
                reason: format!("frame declares {byte_count} bytes but the file ends early"),
            }
        } else {
            Error::OpenFailure { path: path.to_path_buf(), source }
        }
    })?;

    let timestamp = f64::from_le_bytes(rest[0..8].try_into().expect("8-byte slice"));
    let value_bytes = rest[8..].to_vec();
    Ok(Some(Frame { timestamp, value_bytes }))
}

/// A segment file is named by the millisecond-epoch timestamp of its first
/// record.
pub fn segment_filename(ts_millis: i64) -> String {
    ts_millis.to_string()
}

pub fn millis_from_timestamp(timestamp: f64) -> i64 {
    (timestamp * 1000.0).round() as i64
}

fn parse_segment_filename(name: &str) -> Option<i64> {
    name.parse::<i64>().ok()
}

/// Segment files in `metric_dir`, sorted ascending by filename timestamp.
/// Non-segment entries (the `last` side file, anything unrecognized) are
/// skipped rather than treated as corruption: a metric directory is not a
/// closed world, and unrelated embedder-placed files should not break reads.
pub fn list_segments(metric_dir: &Path) -> Result<Vec<(i64, PathBuf)>> {
    if !metric_dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(metric_dir)
        .map_err(|source| Error::OpenFailure { path: metric_dir.to_path_buf(), source })?
    {
        let entry = entry.map_err(|source| Error::OpenFailure { path: metric_dir.to_path_buf(), source })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        if let Some(ts) = parse_segment_filename(name) {
            out.push((ts, path));
        }
    }
    out.sort_by_key(|(ts, _)| *ts);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn id() -> MetricId {
        MetricId::new("system", "cpu-load")
    }

    #[test]
    fn frame_round_trips() {
        let frame_bytes = encode_frame(&id(), 1_700_000_000.25, b"\x01\x02\x03").unwrap();
        let mut cursor = Cursor::new(frame_bytes);
        let frame = read_frame(&id(), Path::new("mem"), &mut cursor).unwrap().unwrap();
        assert_eq!(frame.timestamp, 1_700_000_000.25);
        assert_eq!(frame.value_bytes, b"\x01\x02\x03");
    }

    #[test]
    fn reading_past_the_last_frame_returns_none() {
        let frame_bytes = encode_frame(&id(), 1.0, b"x").unwrap();
        let mut cursor = Cursor::new(frame_bytes);
        assert!(read_frame(&id(), Path::new("mem"), &mut cursor).unwrap().is_some());
        assert!(read_frame(&id(), Path::new("mem"), &mut cursor).unwrap().is_none());
    }

    #[test]
    fn truncated_frame_is_corruption() {
        let mut frame_bytes = encode_frame(&id(), 1.0, b"0123456789").unwrap();
        frame_bytes.truncate(frame_bytes.len() - 3);
        let mut cursor = Cursor::new(frame_bytes);
        let err = read_frame(&id(), Path::new("mem"), &mut cursor);
        assert!(matches!(err, Err(Error::LogCorrupted { .. })));
    }

    #[test]
    fn byte_count_below_minimum_is_corruption() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&7u16.to_le_bytes());
        let mut cursor = Cursor::new(bytes);
        let err = read_frame(&id(), Path::new("mem"), &mut cursor);
        assert!(matches!(err, Err(Error::LogCorrupted { .. })));
    }

    #[test]
    fn list_segments_sorts_by_filename_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("2000"), b"").unwrap();
        fs::write(dir.path().join("1000"), b"").unwrap();
        fs::write(dir.path().join("last"), b"").unwrap();
        let segments = list_segments(dir.path()).unwrap();
        let timestamps: Vec<i64> = segments.iter().map(|(ts, _)| *ts).collect();
        assert_eq!(timestamps, vec![1000, 2000]);
    }
}

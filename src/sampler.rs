// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content sampler: full read, head+tail slice, or nothing.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Joins the head and tail slices of a sampled file.
pub const SAMPLE_SEPARATOR: &str = "\n…\n";

/// Per-crawl content coverage policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplePolicy {
    /// Target fraction of file bytes to sample.
    pub coverage_fraction: f64,
    /// Share of the file taken from the start; the remainder of the
    /// coverage budget comes from the end.
    pub head_fraction: f64,
    /// Files at or below this size are read in full.
    pub small_file_threshold: u64,
    /// Hard upper bound on content stored per document.
    pub max_bytes: u64,
    /// Minimum head slice when the budget permits.
    pub min_head_bytes: u64,
    /// Minimum tail slice when the budget permits.
    pub min_tail_bytes: u64,
    /// Prefix size inspected for binary detection.
    pub sniff_bytes: usize,
}

impl Default for SamplePolicy {
    fn default() -> Self {
        Self {
            coverage_fraction: 0.10,
            head_fraction: 0.08,
            small_file_threshold: 128 * 1024,
            max_bytes: 1_572_864,
            min_head_bytes: 4 * 1024,
            min_tail_bytes: 1024,
            sniff_bytes: 8192,
        }
    }
}

/// Stat and open `path`, then sample it under `policy`.
pub fn sample_path(path: &Path, policy: &SamplePolicy) -> Result<Option<String>> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("failed to stat file for sampling: {}", path.display()))?;
    let file = File::open(path)
        .with_context(|| format!("failed to open file for sampling: {}", path.display()))?;
    sample_file(&file, metadata.len(), policy)
}

/// Sample an already-opened file of known size.
///
/// Returns the full decoded text, a head+tail concatenation joined by
/// [`SAMPLE_SEPARATOR`], or `None` for oversized or binary files.
pub fn sample_file(file: &File, size: u64, policy: &SamplePolicy) -> Result<Option<String>> {
    if policy.coverage_fraction <= 0.0 {
        if size > policy.max_bytes {
            return Ok(None);
        }
        return read_full(file, size, policy);
    }
    if size <= policy.small_file_threshold {
        return read_full(file, size, policy);
    }

    let (head_bytes, tail_bytes) = split_budget(size, policy);
    if head_bytes + tail_bytes >= size {
        return read_full(file, size, policy);
    }

    let head = read_range(file, 0, head_bytes)?;
    if looks_binary(sniff_slice(&head, policy.sniff_bytes)) {
        return Ok(None);
    }

    let tail = if tail_bytes > 0 {
        let tail = read_range(file, size - tail_bytes, tail_bytes)?;
        if looks_binary(sniff_slice(&tail, policy.sniff_bytes)) {
            Vec::new()
        } else {
            tail
        }
    } else {
        Vec::new()
    };

    let head = decode(head);
    let tail = decode(tail);
    let joined = if head.is_empty() {
        tail
    } else if tail.is_empty() {
        head
    } else {
        format!("{head}{SAMPLE_SEPARATOR}{tail}")
    };

    Ok(Some(clamp_to_char_boundary(joined, policy.max_bytes)))
}

/// Split the coverage budget into head and tail byte counts.
///
/// Floors are applied head-first, then the tail is re-floored within the
/// remaining budget. Either floor is relaxed when the budget is too small;
/// the total never exceeds the budget.
fn split_budget(size: u64, policy: &SamplePolicy) -> (u64, u64) {
    let budget = ((size as f64 * policy.coverage_fraction) as u64)
        .min(policy.max_bytes)
        .min(size);

    let mut head = ((size as f64 * policy.head_fraction) as u64).min(budget);
    let mut tail = budget - head;

    if head < policy.min_head_bytes {
        head = policy.min_head_bytes.min(budget);
        tail = budget - head;
    }
    if tail < policy.min_tail_bytes {
        tail = policy.min_tail_bytes.min(budget - head);
    }

    (head, tail)
}

fn read_full(file: &File, size: u64, policy: &SamplePolicy) -> Result<Option<String>> {
    let bytes = read_range(file, 0, size.min(policy.max_bytes))?;
    if looks_binary(sniff_slice(&bytes, policy.sniff_bytes)) {
        return Ok(None);
    }
    Ok(Some(clamp_to_char_boundary(decode(bytes), policy.max_bytes)))
}

fn read_range(mut file: &File, offset: u64, len: u64) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))
        .context("failed to seek while sampling")?;
    let mut buf = Vec::with_capacity(len as usize);
    file.take(len)
        .read_to_end(&mut buf)
        .context("failed to read while sampling")?;
    Ok(buf)
}

fn sniff_slice(bytes: &[u8], sniff_bytes: usize) -> &[u8] {
    &bytes[..bytes.len().min(sniff_bytes)]
}

/// NUL anywhere, or more than 10% of bytes outside the printable range
/// (byte < 9, or 14 ≤ byte < 32), marks the slice as binary.
pub fn looks_binary(head: &[u8]) -> bool {
    if head.is_empty() {
        return false;
    }
    if head.iter().any(|&b| b == 0) {
        return true;
    }
    let non_printable = head
        .iter()
        .filter(|&&b| b < 9 || (b > 13 && b < 32))
        .count();
    (non_printable as f32 / head.len() as f32) > 0.10
}

fn decode(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            let bytes = err.into_bytes();
            String::from_utf8_lossy(&bytes).into_owned()
        }
    }
}

/// Lossy decoding can grow the byte length past the policy bound when
/// replacement characters land; trim back to a char boundary.
fn clamp_to_char_boundary(text: String, max_bytes: u64) -> String {
    let max = max_bytes as usize;
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut text = text;
    text.truncate(end);
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::char::REPLACEMENT_CHARACTER;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_temp(name: &str, bytes: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        (dir, path)
    }

    #[test]
    fn small_file_is_read_in_full() {
        let (_dir, path) = write_temp("hello.txt", b"hello world");
        let text = sample_path(&path, &SamplePolicy::default()).unwrap();
        assert_eq!(text.as_deref(), Some("hello world"));
    }

    #[test]
    fn oversized_file_yields_nothing_when_sampling_is_off() {
        let (_dir, path) = write_temp("big.txt", b"0123456789");
        let policy = SamplePolicy {
            coverage_fraction: 0.0,
            max_bytes: 5,
            ..SamplePolicy::default()
        };
        assert_eq!(sample_path(&path, &policy).unwrap(), None);
    }

    #[test]
    fn nul_byte_in_sniff_window_yields_nothing() {
        let mut bytes = vec![0u8; 16];
        bytes.extend_from_slice(b"hello");
        let (_dir, path) = write_temp("c.bin", &bytes);
        assert_eq!(sample_path(&path, &SamplePolicy::default()).unwrap(), None);
    }

    #[test]
    fn mostly_control_bytes_sniff_binary() {
        assert!(looks_binary(b"\x01\x02\x03\x04rest"));
        assert!(!looks_binary(b"Hello, world!\n"));
        assert!(!looks_binary(b""));
    }

    #[test]
    fn ill_formed_utf8_decodes_with_replacement() {
        let (_dir, path) = write_temp("odd.txt", &[0xf0, 0x9f, 0x92, 0xa9, 0xff]);
        let text = sample_path(&path, &SamplePolicy::default())
            .unwrap()
            .unwrap();
        assert!(text.contains(REPLACEMENT_CHARACTER));
    }

    #[test]
    fn coverage_zero_reads_full_file() {
        let body = "x".repeat(300 * 1024);
        let (_dir, path) = write_temp("full.txt", body.as_bytes());
        let policy = SamplePolicy {
            coverage_fraction: 0.0,
            ..SamplePolicy::default()
        };
        let text = sample_path(&path, &policy).unwrap().unwrap();
        assert_eq!(text.len(), body.len());
    }

    #[test]
    fn large_text_file_samples_head_and_tail() {
        let size = 4 * 1024 * 1024usize;
        let mut body = vec![b'm'; size];
        body[..5].copy_from_slice(b"START");
        let end = size - 3;
        body[end..].copy_from_slice(b"END");
        let (_dir, path) = write_temp("big.log", &body);

        let policy = SamplePolicy::default();
        let text = sample_path(&path, &policy).unwrap().unwrap();

        assert!(text.starts_with("START"));
        assert!(text.ends_with("END"));
        assert!(text.contains(SAMPLE_SEPARATOR));

        let expected = (size as f64 * policy.coverage_fraction) as usize;
        let len = text.len();
        assert!(len >= expected - 1024, "sampled too little: {len}");
        assert!(
            len <= expected + 1024 + SAMPLE_SEPARATOR.len(),
            "sampled too much: {len}"
        );
    }

    #[test]
    fn sample_respects_coverage_budget() {
        let size = 1024 * 1024usize;
        let body = vec![b'q'; size];
        let (_dir, path) = write_temp("budget.txt", &body);

        let policy = SamplePolicy::default();
        let text = sample_path(&path, &policy).unwrap().unwrap();
        let budget = (size as f64 * policy.coverage_fraction) as usize;
        assert!(text.len() <= budget + SAMPLE_SEPARATOR.len());
    }

    #[test]
    fn binary_tail_is_dropped_but_text_head_kept() {
        let size = 512 * 1024usize;
        let mut body = vec![b't'; size];
        for byte in body[size - 64 * 1024..].iter_mut() {
            *byte = 0;
        }
        let (_dir, path) = write_temp("mixed.dat", &body);

        let text = sample_path(&path, &SamplePolicy::default())
            .unwrap()
            .unwrap();
        assert!(!text.contains('\u{0}'));
        assert!(!text.contains(SAMPLE_SEPARATOR));
        assert!(text.starts_with('t'));
    }

    #[test]
    fn head_floor_wins_over_fractions() {
        let policy = SamplePolicy::default();
        // 200 KiB at 10% coverage = 20 KiB budget; 8% head = ~16 KiB.
        let (head, tail) = split_budget(200 * 1024, &policy);
        assert_eq!(head + tail, 20 * 1024);
        assert!(head >= policy.min_head_bytes);
        assert!(tail >= policy.min_tail_bytes);
    }

    #[test]
    fn tiny_budget_relaxes_floors() {
        let policy = SamplePolicy {
            coverage_fraction: 0.01,
            head_fraction: 0.008,
            small_file_threshold: 1024,
            ..SamplePolicy::default()
        };
        // 200 KiB at 1% = 2048-byte budget, below the 4 KiB head floor.
        let (head, tail) = split_budget(200 * 1024, &policy);
        assert_eq!(head, 2048);
        assert_eq!(tail, 0);
    }

    #[test]
    fn tail_floor_never_pushes_total_past_budget() {
        let policy = SamplePolicy {
            coverage_fraction: 0.10,
            head_fraction: 0.0999,
            ..SamplePolicy::default()
        };
        let size = 400 * 1024u64;
        let (head, tail) = split_budget(size, &policy);
        let budget = (size as f64 * policy.coverage_fraction) as u64;
        assert!(head + tail <= budget);
        assert_eq!(tail, budget - head);
    }

    #[test]
    fn clamp_preserves_char_boundaries() {
        let text = "é".repeat(10);
        let clamped = clamp_to_char_boundary(text, 5);
        assert_eq!(clamped.len(), 4);
        assert!(clamped.chars().all(|c| c == 'é'));
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared output helpers for the CLI shell.

use anyhow::Result;
use chrono::{DateTime, Local};
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T, compact: bool) -> Result<()> {
    let rendered = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{rendered}");
    Ok(())
}

/// Render a unix timestamp as local date-time, or "-" when unknown.
pub fn format_mtime(mtime: i64) -> String {
    if mtime == 0 {
        return "-".to_string();
    }
    DateTime::from_timestamp(mtime, 0)
        .map(|utc| {
            utc.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|| "-".to_string())
}

/// Human-readable byte size.
pub fn format_size(size: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{size} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

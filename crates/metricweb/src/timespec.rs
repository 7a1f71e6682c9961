// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Graphite-style time specifications.
//!
//! Accepted forms, all resolving to Unix seconds:
//!
//! | Form | Example | Meaning |
//! |---|---|---|
//! | `now` | `now` | the reference time |
//! | relative | `-24hour`, `-5min`, `-30s`, `-2d`, `-1w` | offset before now |
//! | `HH:MM_YYYYMMDD` | `14:30_20240115` | local wall-clock time |
//! | `YYYYMMDD` | `20240115` | local midnight |
//! | epoch | `1705329000` | absolute seconds |

use crate::error::{BridgeError, Result};
use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone};

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

/// Parse `value` relative to `now` (Unix seconds).
pub fn parse_timespec(value: &str, now: i64) -> Result<i64> {
    let value = value.trim();
    if value.is_empty() {
        return Err(BridgeError::InvalidWindow("empty time specification".into()));
    }
    if value == "now" {
        return Ok(now);
    }
    if let Some(offset) = value.strip_prefix('-') {
        return parse_offset(offset)
            .and_then(|secs| now.checked_sub(secs))
            .ok_or_else(|| invalid(value));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%H:%M_%Y%m%d") {
        return local_seconds(dt).ok_or_else(|| invalid(value));
    }
    if value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(date) = NaiveDate::parse_from_str(value, "%Y%m%d") {
            return date
                .and_hms_opt(0, 0, 0)
                .and_then(local_seconds)
                .ok_or_else(|| invalid(value));
        }
    }
    value.parse::<i64>().map_err(|_| invalid(value))
}

/// Parse against the current wall clock.
pub fn parse_timespec_now(value: &str) -> Result<i64> {
    parse_timespec(value, Local::now().timestamp())
}

fn invalid(value: &str) -> BridgeError {
    BridgeError::InvalidWindow(format!("unparseable time specification {:?}", value))
}

fn local_seconds(dt: NaiveDateTime) -> Option<i64> {
    Local.from_local_datetime(&dt).earliest().map(|t| t.timestamp())
}

/// `24hour` -> 86400. `None` for an unknown unit or missing number.
fn parse_offset(offset: &str) -> Option<i64> {
    let split = offset
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(offset.len());
    let (digits, unit) = offset.split_at(split);
    let count: i64 = digits.parse().ok()?;
    let scale = match unit {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "min" | "mins" | "minute" | "minutes" => MINUTE,
        "h" | "hour" | "hours" => HOUR,
        "d" | "day" | "days" => DAY,
        "w" | "week" | "weeks" => 7 * DAY,
        "mon" | "month" | "months" => 30 * DAY,
        "y" | "year" | "years" => 365 * DAY,
        _ => return None,
    };
    count.checked_mul(scale)
}

//! TDT consumer: wall-clock discipline from broadcast time.
//!
//! Broadcast time is only trusted once two consecutive TDT readings agree
//! on the drift; single outliers are common enough. Large drifts hard-set
//! the clock, small ones are smoothed out, and smoothing is rate-limited
//! so the clock is not nudged on every table repetition.

use chrono::{Local, TimeZone};
use log::{error, info};

use crate::clock::WallClock;
use crate::si::tdt::TdtSection;

/// Drift below this is left alone entirely (seconds).
const MAX_TIME_DIFF: i64 = 1;

/// Drift up to this is smoothed; anything larger is a hard set (seconds).
const MAX_ADJ_DIFF: i64 = 10;

/// Minimum spacing between smooth adjustments (seconds).
const ADJ_DELTA: i64 = 300;

/// The two-sample agreement state. One instance lives in the filter and
/// is serialized by the filter mutex.
#[derive(Debug, Default)]
pub struct TdtProcessor {
    last_dvb_time: i64,
    last_diff: i64,
    last_adjust: i64,
}

impl TdtProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one TDT section against the wall clock.
    pub fn process(&mut self, clock: &dyn WallClock, data: &[u8]) {
        let Ok(section) = TdtSection::parse(data) else {
            return;
        };
        let dvb_time = section.utc_time;
        let local_time = clock.now();
        let diff = dvb_time - local_time;
        if diff.abs() <= MAX_TIME_DIFF {
            return;
        }
        if self.last_dvb_time != dvb_time && self.last_diff == diff {
            // two consecutive readings agree on the drift
            if diff.abs() > MAX_ADJ_DIFF {
                match clock.set(dvb_time) {
                    Ok(()) => info!(
                        "system time changed from {} ({}) to {} ({})",
                        fmt_time(local_time),
                        local_time,
                        fmt_time(dvb_time),
                        dvb_time
                    ),
                    Err(e) => error!("while setting system time: {e}"),
                }
            } else if local_time - self.last_adjust > ADJ_DELTA {
                self.last_adjust = local_time;
                match clock.adjust(diff) {
                    Ok(()) => info!(
                        "system time adjustment initiated from {} ({}) to {} ({})",
                        fmt_time(local_time),
                        local_time,
                        fmt_time(dvb_time),
                        dvb_time
                    ),
                    Err(e) => error!("while adjusting system time: {e}"),
                }
            }
        }
        self.last_dvb_time = dvb_time;
        self.last_diff = diff;
    }
}

fn fmt_time(t: i64) -> String {
    match Local.timestamp_opt(t, 0) {
        chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
            dt.format("%a %b %e %T %Y").to_string()
        }
        chrono::LocalResult::None => format!("@{t}"),
    }
}

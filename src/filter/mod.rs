//! The SI filter: subscription masks, dispatch and lifecycle.
//!
//! A demuxer thread feeds complete sections into [`EitFilter::process`];
//! everything runs synchronously inside that call under the filter mutex.

pub mod eit;
pub mod syncer;
pub mod tdt;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::WallClock;
use crate::config::Config;
use crate::epg::channels::{is_transponder, Channels, SourceId};
use crate::epg::handlers::EpgHandlers;
use crate::epg::schedule::Schedules;
use crate::epg::state::StateLock;
use crate::si::{pid, table_id};

use eit::EitProcessor;
use syncer::EitTables;
use tdt::TdtProcessor;

/// One (pid, table id, mask) subscription of the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidFilter {
    pub pid: u16,
    pub table_id: u8,
    pub mask: u8,
}

impl PidFilter {
    pub fn matches(&self, pid: u16, table_id: u8) -> bool {
        pid == self.pid && table_id & self.mask == self.table_id
    }
}

/// State behind the filter mutex.
struct FilterState {
    active: bool,
    disable_until: i64,
    tables: HashMap<u16, EitTables>,
    tdt: TdtProcessor,
}

/// The EIT/TDT section filter of one device.
pub struct EitFilter {
    state: Mutex<FilterState>,
    channels: Arc<StateLock<Channels>>,
    schedules: Arc<StateLock<Schedules>>,
    handlers: Arc<EpgHandlers>,
    config: Arc<Config>,
    clock: Arc<dyn WallClock>,
    source: SourceId,
    transponder: u32,
}

impl EitFilter {
    pub fn new(
        channels: Arc<StateLock<Channels>>,
        schedules: Arc<StateLock<Schedules>>,
        handlers: Arc<EpgHandlers>,
        config: Arc<Config>,
        clock: Arc<dyn WallClock>,
        source: SourceId,
        transponder: u32,
    ) -> Self {
        EitFilter {
            state: Mutex::new(FilterState {
                active: true,
                disable_until: 0,
                tables: HashMap::new(),
                tdt: TdtProcessor::new(),
            }),
            channels,
            schedules,
            handlers,
            config,
            clock,
            source,
            transponder,
        }
    }

    /// The subscriptions a demuxer has to register for this filter:
    /// EIT tables 0x40..0x7F on PID 0x12 and the TDT on PID 0x14.
    pub fn filters() -> [PidFilter; 2] {
        [
            PidFilter {
                pid: pid::EIT,
                table_id: 0x40,
                mask: 0xC0,
            },
            PidFilter {
                pid: pid::TDT,
                table_id: table_id::TDT,
                mask: 0xFF,
            },
        ]
    }

    /// Whether a (pid, table id) pair belongs to this filter.
    pub fn matches(pid: u16, table_id: u8) -> bool {
        Self::filters().iter().any(|f| f.matches(pid, table_id))
    }

    /// Process one complete section. `data` starts at the table id byte.
    pub fn process(&self, pid: u16, table_id_byte: u8, data: &[u8]) {
        let mut state = self.state.lock();
        if state.disable_until != 0 {
            if self.clock.now() > state.disable_until {
                state.disable_until = 0;
            } else {
                return;
            }
        }
        if !state.active {
            return;
        }
        match pid {
            pid::EIT => {
                let in_range = (table_id::EIT_PRESENT_FOLLOWING..=table_id::EIT_SCHEDULE_LAST)
                    .contains(&table_id_byte);
                // 0x4F is known broadcaster chaos and stays untouched
                if in_range && table_id_byte != table_id::EIT_PRESENT_FOLLOWING_OTHER {
                    let processor = EitProcessor {
                        channels: &self.channels,
                        schedules: &self.schedules,
                        handlers: &self.handlers,
                        config: &self.config,
                        clock: &*self.clock,
                        source: self.source,
                    };
                    processor.process(&mut state.tables, data);
                }
            }
            pid::TDT if table_id_byte == table_id::TDT => {
                if self.config.set_system_time
                    && self.config.time_transponder != 0
                    && self.source == self.config.time_source
                    && is_transponder(self.transponder, self.config.time_transponder)
                {
                    let FilterState { tdt, .. } = &mut *state;
                    tdt.process(&*self.clock, data);
                }
            }
            _ => {}
        }
    }

    /// Toggle the filter. Any toggle clears the accumulated section
    /// bookkeeping so a retune starts from a clean slate.
    pub fn set_status(&self, on: bool) {
        let mut state = self.state.lock();
        state.active = on;
        state.tables.clear();
    }

    /// Suppress all processing until the given wall-clock time; zero
    /// lifts the suppression.
    pub fn set_disable_until(&self, until: i64) {
        self.state.lock().disable_until = until;
    }
}

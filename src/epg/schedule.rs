//! Per-service schedules and the schedule store.

use std::collections::HashMap;

use super::channels::ChannelId;
use super::event::{Event, RunningStatus};

/// The schedule of one service: its events plus the bookkeeping the EIT
/// consumer needs (running-status ownership, present/following sighting,
/// actual-transponder latch).
#[derive(Debug, Default)]
pub struct Schedule {
    channel_id: ChannelId,
    events: Vec<Event>,
    has_running: bool,
    on_actual_tp: bool,
    present_seen: i64,
}

impl Schedule {
    pub fn new(channel_id: ChannelId) -> Self {
        Schedule {
            channel_id,
            ..Schedule::default()
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn event(&self, index: usize) -> &Event {
        &self.events[index]
    }

    pub fn event_mut(&mut self, index: usize) -> &mut Event {
        &mut self.events[index]
    }

    /// Find an event by its id. Phased-out events (id zero) never match.
    pub fn get_event_by_id(&self, event_id: u16) -> Option<usize> {
        if event_id == 0 {
            return None;
        }
        self.events.iter().position(|e| e.event_id == event_id)
    }

    /// Find an event by its exact start time.
    pub fn get_event_by_time(&self, start_time: i64) -> Option<usize> {
        if start_time == 0 {
            return None;
        }
        self.events.iter().position(|e| e.start_time == start_time)
    }

    pub fn add_event(&mut self, event: Event) -> usize {
        self.events.push(event);
        self.events.len() - 1
    }

    /// Sort events by start time.
    pub fn sort(&mut self) {
        self.events
            .sort_by_key(|e| (e.start_time, e.event_id));
    }

    /// Apply a running status to one event. A status at `Pausing` or
    /// above marks every earlier event as no longer running; the running
    /// flag of the schedule tracks whether anything is on air.
    pub fn set_running_status(&mut self, index: usize, status: RunningStatus) {
        self.has_running = false;
        let start_time = self.events[index].start_time;
        for (i, event) in self.events.iter_mut().enumerate() {
            if i == index {
                if event.running_status > RunningStatus::NotRunning
                    || status > RunningStatus::NotRunning
                {
                    event.running_status = status;
                }
            } else if status >= RunningStatus::Pausing && event.start_time < start_time {
                event.running_status = RunningStatus::NotRunning;
            }
            if event.running_status >= RunningStatus::Pausing {
                self.has_running = true;
            }
        }
    }

    /// Drop all running-status knowledge (ETR 211: an empty
    /// present/following section 0 means nothing is on air).
    pub fn clr_running_status(&mut self) {
        if self.has_running {
            for event in &mut self.events {
                if event.running_status >= RunningStatus::Pausing {
                    event.running_status = RunningStatus::NotRunning;
                }
            }
            self.has_running = false;
        }
    }

    pub fn has_running(&self) -> bool {
        self.has_running
    }

    /// Record that a present/following section for this service was seen.
    pub fn set_present_seen(&mut self, now: i64) {
        self.present_seen = now;
    }

    pub fn present_seen(&self) -> i64 {
        self.present_seen
    }

    /// Latch when a 0x5X schedule table touches this schedule and report
    /// the latch. Once it holds, 0x6X data for this service is redundant.
    pub fn on_actual_tp(&mut self, table_id: u8) -> bool {
        if table_id & 0xF0 == 0x50 {
            self.on_actual_tp = true;
        }
        self.on_actual_tp
    }

    /// Phase out events overlapping `[segment_start, segment_end)` that
    /// belong to a higher table or another version of the same table.
    ///
    /// Events are neutralized (id and start time zeroed) instead of being
    /// removed, so indices held elsewhere, recording timers in
    /// particular, stay valid.
    pub fn drop_outdated(
        &mut self,
        segment_start: i64,
        segment_end: i64,
        table_id: u8,
        version: u8,
    ) {
        if segment_start <= 0 || segment_end <= 0 {
            return;
        }
        let mut cleared_running = false;
        for event in &mut self.events {
            if event.start_time == 0 || event.end_time() <= segment_start {
                continue;
            }
            if event.start_time >= segment_end {
                continue;
            }
            if event.table_id > table_id || (event.table_id == table_id && event.version != version)
            {
                if event.running_status >= RunningStatus::Pausing {
                    cleared_running = true;
                }
                event.event_id = 0;
                event.start_time = 0;
                event.running_status = RunningStatus::Undefined;
            }
        }
        if cleared_running {
            self.has_running = self
                .events
                .iter()
                .any(|e| e.running_status >= RunningStatus::Pausing);
        }
    }
}

/// The schedule store: one schedule per service, created lazily.
#[derive(Debug, Default)]
pub struct Schedules {
    map: HashMap<ChannelId, Schedule>,
}

impl Schedules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, channel_id: &ChannelId) -> Option<&Schedule> {
        self.map.get(channel_id)
    }

    pub fn get_mut(&mut self, channel_id: &ChannelId) -> Option<&mut Schedule> {
        self.map.get_mut(channel_id)
    }

    pub fn get_or_create(&mut self, channel_id: ChannelId) -> &mut Schedule {
        self.map
            .entry(channel_id)
            .or_insert_with(|| Schedule::new(channel_id))
    }

    /// Find a schedule by service identity, tolerating a different rid.
    pub fn find_by_service(&self, channel_id: &ChannelId) -> Option<&Schedule> {
        self.map.get(channel_id).or_else(|| {
            self.map
                .values()
                .find(|s| s.channel_id.matches_without_rid(channel_id))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Schedule> {
        self.map.values()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule_with(events: &[(u16, i64, i32, u8, u8)]) -> Schedule {
        let mut s = Schedule::new(ChannelId::new(1, 1, 1, 1));
        for &(id, start, duration, table_id, version) in events {
            let mut e = Event::new(id, start, duration);
            e.table_id = table_id;
            e.version = version;
            s.add_event(e);
        }
        s
    }

    #[test]
    fn test_lookup_by_id_and_time() {
        let s = schedule_with(&[(10, 1000, 60, 0x50, 1), (11, 2000, 60, 0x50, 1)]);
        assert_eq!(s.get_event_by_id(11), Some(1));
        assert_eq!(s.get_event_by_id(12), None);
        assert_eq!(s.get_event_by_time(1000), Some(0));
        assert_eq!(s.get_event_by_time(1500), None);
        assert_eq!(s.get_event_by_id(0), None);
    }

    #[test]
    fn test_set_running_status_clears_earlier_events() {
        let mut s = schedule_with(&[(10, 1000, 60, 0x4E, 1), (11, 2000, 60, 0x4E, 1)]);
        s.event_mut(0).running_status = RunningStatus::Running;
        s.set_running_status(1, RunningStatus::Running);
        assert_eq!(s.event(0).running_status, RunningStatus::NotRunning);
        assert_eq!(s.event(1).running_status, RunningStatus::Running);
        assert!(s.has_running());
    }

    #[test]
    fn test_set_running_status_ignores_undefined_over_undefined() {
        let mut s = schedule_with(&[(10, 1000, 60, 0x4E, 1)]);
        s.set_running_status(0, RunningStatus::NotRunning);
        // neither old nor new status was beyond NotRunning
        assert_eq!(s.event(0).running_status, RunningStatus::Undefined);
        assert!(!s.has_running());
    }

    #[test]
    fn test_clr_running_status() {
        let mut s = schedule_with(&[(10, 1000, 60, 0x4E, 1)]);
        s.set_running_status(0, RunningStatus::Running);
        assert!(s.has_running());
        s.clr_running_status();
        assert!(!s.has_running());
        assert_eq!(s.event(0).running_status, RunningStatus::NotRunning);
    }

    #[test]
    fn test_drop_outdated_phases_out() {
        let mut s = schedule_with(&[
            (10, 1000, 600, 0x51, 1), // higher table, overlaps
            (11, 2000, 600, 0x50, 1), // same table, old version
            (12, 3000, 600, 0x50, 2), // current
            (13, 9000, 600, 0x51, 1), // outside the segment
        ]);
        s.drop_outdated(500, 4000, 0x50, 2);
        assert_eq!(s.event(0).event_id, 0);
        assert_eq!(s.event(0).start_time, 0);
        assert_eq!(s.event(1).event_id, 0);
        assert_eq!(s.event(2).event_id, 12);
        assert_eq!(s.event(3).event_id, 13);
    }

    #[test]
    fn test_drop_outdated_needs_valid_segment() {
        let mut s = schedule_with(&[(10, 1000, 600, 0x60, 1)]);
        s.drop_outdated(0, 0, 0x50, 1);
        assert_eq!(s.event(0).event_id, 10);
    }

    #[test]
    fn test_on_actual_tp_latch() {
        let mut s = schedule_with(&[]);
        assert!(!s.on_actual_tp(0x4E));
        assert!(!s.on_actual_tp(0x60));
        assert!(s.on_actual_tp(0x50));
        assert!(s.on_actual_tp(0x60));
    }

    #[test]
    fn test_sort_orders_by_start_time() {
        let mut s = schedule_with(&[(2, 2000, 60, 0x50, 1), (1, 1000, 60, 0x50, 1)]);
        s.sort();
        assert_eq!(s.event(0).event_id, 1);
        assert_eq!(s.event(1).event_id, 2);
    }
}

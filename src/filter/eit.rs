//! The EIT section processor.
//!
//! One call per CRC-valid section: decide through the section syncer
//! whether the section still carries news, resolve the channel and its
//! schedule under bounded-wait write locks, reconcile every event row
//! against the stored schedule, interpret the descriptor loop, and hand
//! all mutations to the handler chain. Nothing here propagates errors;
//! a section that cannot be applied is dropped without side effects.

use std::collections::HashMap;

use chrono::{Datelike, LocalResult, TimeZone};
use log::debug;

use crate::clock::WallClock;
use crate::config::Config;
use crate::epg::channels::{ChannelId, Channels, SourceId};
use crate::epg::event::{
    pack_content, parental_rating_age, Component, Event, RunningStatus, MAX_EVENT_CONTENTS,
};
use crate::epg::handlers::EpgHandlers;
use crate::epg::schedule::{Schedule, Schedules};
use crate::epg::state::{StateLock, LOCK_TIMEOUT};
use crate::si::descriptors::{descriptor_loop, EitDescriptor, ShortEventDescriptor};
use crate::si::eit::{EitEvent, EitSection};
use crate::si::table_id;
use crate::si::text;

use super::syncer::EitTables;

/// Wall-clock times earlier than this (two years past the epoch) mean the
/// clock has not been set; sections are dropped until it is.
pub const VALID_TIME: i64 = 2 * 365 * 24 * 3600;

/// Linkage type of bouquet portal links.
const LINKAGE_TYPE_PORTAL: u8 = 0xB0;

/// Cap on an assembled extended event text.
const MAX_DESCRIPTION_LEN: usize = 0x4000;

/// Where a resolved event row lives while its section is processed.
enum Slot {
    /// Index into the schedule's event list.
    InSchedule(usize),
    /// Transient event for an externally handled channel; dropped after
    /// the handlers have seen it.
    Detached(Box<Event>),
}

/// Everything a descriptor pass produces before it is applied to the
/// event. Collected first so channel and schedule borrows stay disjoint.
#[derive(Default)]
struct DescriptorScan {
    short_event: Option<ShortEventDescriptor>,
    extended_text: Option<String>,
    contents: Option<Vec<u8>>,
    parental_rating: Option<u8>,
    vps: Option<i64>,
    /// Title, short text and description copied from an NVOD master
    /// event; suppresses descriptor-derived text.
    reference: Option<(Option<String>, Option<String>, Option<String>)>,
    components: Option<Vec<Component>>,
    link_channels: Option<Vec<ChannelId>>,
}

/// Processes EIT sections of one source against the shared stores.
pub struct EitProcessor<'a> {
    pub channels: &'a StateLock<Channels>,
    pub schedules: &'a StateLock<Schedules>,
    pub handlers: &'a EpgHandlers,
    pub config: &'a Config,
    pub clock: &'a dyn WallClock,
    pub source: SourceId,
}

impl EitProcessor<'_> {
    /// Process one EIT section. `tables` is the per-service syncer map
    /// owned by the filter.
    pub fn process(&self, tables: &mut HashMap<u16, EitTables>, data: &[u8]) {
        let Ok(section) = EitSection::parse(data) else {
            return;
        };
        let tid = section.table_id;
        let tables = tables.entry(section.service_id).or_default();

        let process = tables.check(tid, section.version, section.section_number);
        if tid != table_id::EIT_PRESENT_FOLLOWING && !process {
            // already absorbed; only 0x4E still needs its seen tags
            return;
        }

        let now = self.clock.now();
        if now < VALID_TIME {
            return;
        }

        let Some(mut channels) = self.channels.try_write_for(LOCK_TIMEOUT) else {
            return;
        };
        let Some(mut schedules) = self.schedules.try_write_for(LOCK_TIMEOUT) else {
            return;
        };

        let channel_id = ChannelId::new(
            self.source,
            section.original_network_id,
            section.transport_stream_id,
            section.service_id,
        );
        // only collect data for known channels
        let Some(channel_idx) = channels.get_by_channel_id(channel_id, true) else {
            return;
        };
        if self.handlers.ignore_channel(channels.get(channel_idx)) {
            return;
        }

        let sched_id = channels.get(channel_idx).id;
        let schedule = schedules.get_or_create(sched_id);
        if schedule.on_actual_tp(tid) && tid & 0xF0 == 0x60 {
            // the actual transponder's own tables already feed this
            // schedule; 0x6X data would only degrade it
            return;
        }
        if !self.handlers.begin_segment_transfer(channels.get(channel_idx)) {
            return;
        }

        let handled_externally = self.handlers.handled_externally(channels.get(channel_idx));
        let only_running_status = !process;

        let mut empty = true;
        let mut modified = false;
        let mut segment_start: i64 = 0;
        let mut segment_end: i64 = 0;

        for ev in section.events() {
            let Some(schedule) = schedules.get_mut(&sched_id) else {
                break;
            };
            if self
                .handlers
                .handle_eit_event(schedule, &ev, tid, section.version)
            {
                continue;
            }

            // rows without a start time or with a zero duration carry
            // nothing; NVOD reference rows (negative start) stay
            if ev.start_time == 0 || (ev.start_time > 0 && ev.duration == 0) {
                continue;
            }
            if ev.start_time > 0 && ev.end_time() < now - self.config.epg_linger_secs() {
                continue;
            }
            empty = false;

            if segment_start == 0 {
                segment_start = ev.start_time;
            }
            segment_end = segment_end.max(ev.end_time());
            if tid == table_id::EIT_PRESENT_FOLLOWING {
                if section.section_number == 0 {
                    tables.set_table_start(segment_start);
                } else {
                    tables.set_table_end(segment_end);
                }
            }

            let Some(mut slot) = self.resolve_event(schedule, &ev, tid, section.version, handled_externally, now)
            else {
                continue;
            };

            if tid == table_id::EIT_PRESENT_FOLLOWING {
                self.apply_running_status(schedule, &mut slot, &ev, section.section_number);
            }
            if only_running_status {
                // the section itself was known already; only the seen
                // tags and running status needed refreshing
                continue;
            }
            modified = true;
            event_mut(schedule, &mut slot).version = section.version;

            let scan = self.scan_descriptors(&ev, &schedules, &mut channels, channel_idx, now);

            let Some(schedule) = schedules.get_mut(&sched_id) else {
                break;
            };
            let event = event_mut(schedule, &mut slot);
            self.apply_scan(event, &scan);
            if let Some(links) = scan.link_channels {
                channels.get_mut(channel_idx).link_channels = links;
            }
            self.handlers.handle_event(event_mut(schedule, &mut slot));
            // a Detached slot drops its transient event here
        }

        if let Some(schedule) = schedules.get_mut(&sched_id) {
            if tid == table_id::EIT_PRESENT_FOLLOWING {
                if empty && section.section_number == 0 {
                    // ETR 211: an empty present section says nothing is
                    // on air
                    schedule.clr_running_status();
                }
                schedule.set_present_seen(now);
            }
            let table_done = tables.processed(
                tid,
                section.last_table_id,
                section.section_number,
                section.last_section_number,
                section.segment_last_section_number,
            );
            // 0x4E only counts once both its sections are in
            if table_done
                && (tid >= table_id::EIT_SCHEDULE_FIRST || tables.complete())
                && modified
            {
                let (mut seg_start, mut seg_end) = (segment_start, segment_end);
                if tid == table_id::EIT_PRESENT_FOLLOWING {
                    seg_start = tables.table_start().unwrap_or(0);
                    seg_end = tables.table_end().unwrap_or(0);
                }
                self.handlers.sort_schedule(schedule);
                self.handlers
                    .drop_outdated(schedule, seg_start, seg_end, tid, section.version);
            }
        }

        self.handlers.end_segment_transfer(modified);
        schedules.release(modified);
        channels.release(modified);
    }

    /// Find the event this row refers to, or create it. `None` skips the
    /// row entirely.
    fn resolve_event(
        &self,
        schedule: &mut Schedule,
        ev: &EitEvent<'_>,
        tid: u8,
        version: u8,
        handled_externally: bool,
        now: i64,
    ) -> Option<Slot> {
        let existing = if tid == table_id::EIT_PRESENT_FOLLOWING || tid & 0xF0 == 0x50 {
            schedule.get_event_by_id(ev.event_id)
        } else {
            // 0x6X tables are notorious for changing event ids between
            // transponders; the start time is the stable key there
            schedule.get_event_by_time(ev.start_time)
        };

        let mut slot = match existing {
            None => {
                if handled_externally
                    && !self.handlers.is_update(ev.event_id, ev.start_time, tid, version)
                {
                    return None;
                }
                let mut event = Event::new(ev.event_id, ev.start_time, ev.duration);
                event.version = version;
                if handled_externally {
                    Slot::Detached(Box::new(event))
                } else {
                    Slot::InSchedule(schedule.add_event(event))
                }
            }
            Some(index) => {
                if handled_externally
                    && !self.handlers.is_update(ev.event_id, ev.start_time, tid, version)
                {
                    return None;
                }
                if handled_externally {
                    let mut event = Event::new(ev.event_id, ev.start_time, ev.duration);
                    event.version = version;
                    Slot::Detached(Box::new(event))
                } else {
                    let channel_id = schedule.channel_id();
                    let event = schedule.event_mut(index);
                    event.set_seen(now);
                    // legacy rows carry table ids below 0x4E; treat them
                    // as present/following
                    let stored_tid = event.table_id.max(table_id::EIT_PRESENT_FOLLOWING);
                    if stored_tid == table_id::EIT_PRESENT_FOLLOWING
                        && tid != table_id::EIT_PRESENT_FOLLOWING
                    {
                        // present/following is authoritative; schedule
                        // tables do not overwrite it
                        return None;
                    }
                    if event.has_timer
                        && (event.start_time != ev.start_time || event.duration != ev.duration)
                    {
                        debug!(
                            "timed event {} of {} moved: start {} -> {}, duration {} -> {}",
                            event.event_id,
                            channel_id,
                            event.start_time,
                            ev.start_time,
                            event.duration,
                            ev.duration
                        );
                    }
                    self.handlers.set_event_id(schedule.event_mut(index), ev.event_id);
                    self.handlers.set_start_time(schedule.event_mut(index), ev.start_time);
                    self.handlers.set_duration(schedule.event_mut(index), ev.duration);
                    Slot::InSchedule(index)
                }
            }
        };

        let event = event_mut(schedule, &mut slot);
        if event.table_id > table_id::EIT_PRESENT_FOLLOWING {
            event.table_id = tid;
        }
        Some(slot)
    }

    /// Present/following running status, with the customary corrections
    /// for stations that flag a paused or undefined event as not running.
    fn apply_running_status(
        &self,
        schedule: &mut Schedule,
        slot: &mut Slot,
        ev: &EitEvent<'_>,
        section_number: u8,
    ) {
        let mut status = RunningStatus::from_raw(ev.running_status);
        if status < RunningStatus::NotRunning {
            return;
        }
        let previous = event_mut(schedule, slot).running_status;
        if status != previous && status == RunningStatus::NotRunning {
            if section_number == 0 {
                if previous == RunningStatus::Pausing {
                    // the present event is paused, not gone
                    status = RunningStatus::Pausing;
                }
            } else {
                // "following, not running" is noise
                status = RunningStatus::Undefined;
            }
        }
        match slot {
            Slot::InSchedule(index) => schedule.set_running_status(*index, status),
            Slot::Detached(event) => event.running_status = status,
        }
    }

    /// Walk the descriptor loop and collect everything to apply. Channel
    /// mutations from linkage descriptors happen right here.
    fn scan_descriptors(
        &self,
        ev: &EitEvent<'_>,
        schedules: &Schedules,
        channels: &mut Channels,
        channel_idx: usize,
        now: i64,
    ) -> DescriptorScan {
        let mut scan = DescriptorScan::default();
        let mut lang_pref_short: Option<usize> = None;
        let mut lang_pref_ext: Option<usize> = None;
        let mut use_extended = false;

        for (tag, body) in descriptor_loop(ev.descriptors) {
            match EitDescriptor::parse(tag, body) {
                EitDescriptor::ShortEvent(sed) => {
                    if self.config.is_preferred_language(sed.language, &mut lang_pref_short)
                        || scan.short_event.is_none()
                    {
                        scan.short_event = Some(sed);
                    }
                }
                EitDescriptor::ExtendedEvent(eed) => {
                    if self.config.is_preferred_language(eed.language, &mut lang_pref_ext)
                        || scan.extended_text.is_none()
                    {
                        scan.extended_text = Some(String::new());
                        use_extended = true;
                    }
                    if use_extended {
                        if let Some(text) = scan.extended_text.as_mut() {
                            append_extended_text(text, &eed.items, &eed.text);
                        }
                    }
                    if eed.number == eed.last_number {
                        use_extended = false;
                    }
                }
                EitDescriptor::Content(cd) => {
                    let contents: Vec<u8> = cd
                        .nibbles
                        .iter()
                        .take(MAX_EVENT_CONTENTS)
                        .map(|&(n1, n2)| pack_content(n1, n2))
                        .collect();
                    scan.contents = Some(contents);
                }
                EitDescriptor::ParentalRating(prd) => {
                    let mut lang_pref_rating: Option<usize> = None;
                    for &(country, raw) in &prd.ratings {
                        if self.config.is_preferred_language(country, &mut lang_pref_rating)
                            || scan.parental_rating.is_none()
                        {
                            scan.parental_rating = Some(parental_rating_age(raw));
                        }
                    }
                }
                EitDescriptor::Pdc(pdc) => {
                    if let Some(vps) =
                        pdc_to_vps(now, pdc.month, pdc.day, pdc.hour, pdc.minute)
                    {
                        scan.vps = Some(vps);
                    }
                }
                EitDescriptor::TimeShiftedEvent(tsed) => {
                    let current = channels.get(channel_idx).id;
                    let reference_id = ChannelId::new(
                        self.source,
                        current.original_network_id,
                        current.transport_stream_id,
                        tsed.reference_service_id,
                    );
                    let Some(reference) = schedules.find_by_service(&reference_id) else {
                        continue;
                    };
                    let Some(master) = reference
                        .get_event_by_id(tsed.reference_event_id)
                        .map(|i| reference.event(i))
                    else {
                        continue;
                    };
                    scan.reference = Some((
                        master.title.clone(),
                        master.short_text.clone(),
                        master.description.clone(),
                    ));
                }
                EitDescriptor::Linkage(ld) => {
                    if ld.linkage_type != LINKAGE_TYPE_PORTAL {
                        continue;
                    }
                    // portal links only matter while their event is on air
                    if !(ev.start_time <= now && now < ev.end_time()) {
                        continue;
                    }
                    let link_id = ChannelId::new(
                        self.source,
                        ld.original_network_id,
                        ld.transport_stream_id,
                        ld.service_id,
                    );
                    let name = text::decode_link_name(&ld.private_data);
                    let link_idx = channels.get_by_channel_id(link_id, false);
                    if link_idx == Some(channel_idx) {
                        channels.get_mut(channel_idx).portal_name = name;
                        continue;
                    }
                    let link_idx = match link_idx {
                        Some(idx) => {
                            if self.config.renames_channels() && !name.is_empty() {
                                channels.get_mut(idx).name = name;
                            }
                            Some(idx)
                        }
                        None if self.config.adds_channels() => {
                            let template = if channels.get(channel_idx).id.transport_stream_id
                                != ld.transport_stream_id
                            {
                                channels.get_by_transponder_id(link_id)
                            } else {
                                Some(channel_idx)
                            };
                            template.map(|t| {
                                channels.new_channel(
                                    t,
                                    &name,
                                    ld.original_network_id,
                                    ld.transport_stream_id,
                                    ld.service_id,
                                )
                            })
                        }
                        None => None,
                    };
                    if let Some(idx) = link_idx {
                        scan.link_channels
                            .get_or_insert_with(Vec::new)
                            .push(channels.get(idx).id);
                    }
                }
                EitDescriptor::Component(cd) => {
                    let stream = cd.stream_content;
                    let keep = ((1..=6).contains(&stream) && cd.component_type != 0)
                        || (stream == 9 && cd.stream_content_ext < 2);
                    if !keep {
                        continue;
                    }
                    let stream = if stream == 9 {
                        stream | (cd.stream_content_ext << 4)
                    } else {
                        stream
                    };
                    scan.components.get_or_insert_with(Vec::new).push(Component {
                        stream,
                        kind: cd.component_type,
                        language: text::normalize_language_code(cd.language),
                        description: (!cd.description.is_empty()).then(|| cd.description.clone()),
                    });
                }
                EitDescriptor::Other(_) => {}
            }
        }
        scan
    }

    /// Apply a finished descriptor scan to the event through the handler
    /// chain.
    fn apply_scan(&self, event: &mut Event, scan: &DescriptorScan) {
        if let Some(contents) = &scan.contents {
            self.handlers.set_contents(event, contents);
        }
        if let Some(age) = scan.parental_rating {
            self.handlers.set_parental_rating(event, age);
        }
        if let Some(vps) = scan.vps {
            self.handlers.set_vps(event, Some(vps));
        }
        if let Some((title, short_text, description)) = &scan.reference {
            self.handlers.set_title(event, title.as_deref());
            self.handlers.set_short_text(event, short_text.as_deref());
            self.handlers.set_description(event, description.as_deref());
        } else {
            match &scan.short_event {
                Some(sed) => {
                    self.handlers.set_title(event, Some(&sed.name));
                    self.handlers.set_short_text(event, Some(&sed.text));
                }
                None => {
                    self.handlers.set_title(event, None);
                    self.handlers.set_short_text(event, None);
                }
            }
            self.handlers
                .set_description(event, scan.extended_text.as_deref());
        }
        if let Some(components) = &scan.components {
            self.handlers.set_components(event, components);
        }
        self.handlers.fix_epg_bugs(event);
    }
}

fn event_mut<'s>(schedule: &'s mut Schedule, slot: &'s mut Slot) -> &'s mut Event {
    match slot {
        Slot::InSchedule(index) => schedule.event_mut(*index),
        Slot::Detached(event) => event,
    }
}

/// Assemble one extended event descriptor into the growing description.
fn append_extended_text(out: &mut String, items: &[(String, String)], text: &str) {
    for (name, value) in items {
        if out.len() >= MAX_DESCRIPTION_LEN {
            return;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
    }
    if out.len() + text.len() <= MAX_DESCRIPTION_LEN {
        out.push_str(text);
    } else if let Some(room) = MAX_DESCRIPTION_LEN.checked_sub(out.len()) {
        let mut cut = room;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        out.push_str(&text[..cut]);
    }
}

/// Compute the VPS anchor of a PDC label. The label carries no year, so
/// the current local date supplies it, bumped across a year boundary when
/// the label's month and the current month straddle it. Local-time
/// resolution handles DST; an instant falling into a spring-forward gap
/// yields `None`.
fn pdc_to_vps(now: i64, month: u32, day: u32, hour: u32, minute: u32) -> Option<i64> {
    let local_now = match chrono::Local.timestamp_opt(now, 0) {
        LocalResult::Single(t) => t,
        LocalResult::Ambiguous(t, _) => t,
        LocalResult::None => return None,
    };
    let mut year = local_now.year();
    if local_now.month() == 12 && month == 1 {
        year += 1;
    } else if local_now.month() == 1 && month == 12 {
        year -= 1;
    }
    match chrono::Local.with_ymd_and_hms(year, month, day, hour, minute, 0) {
        LocalResult::Single(t) => Some(t.timestamp()),
        LocalResult::Ambiguous(t, _) => Some(t.timestamp()),
        LocalResult::None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::si::testutil::{self, EitSectionBuilder};
    use std::sync::Arc;

    const NOW: i64 = 1_700_000_000;
    const ONID: u16 = 0x0085;
    const TSID: u16 = 0x0401;
    const SID: u16 = 0x2EE3;

    struct Rig {
        channels: Arc<StateLock<Channels>>,
        schedules: Arc<StateLock<Schedules>>,
        handlers: EpgHandlers,
        config: Config,
        clock: ManualClock,
        tables: HashMap<u16, EitTables>,
    }

    impl Rig {
        fn new() -> Self {
            let mut channels = Channels::new();
            channels.add(crate::epg::channels::Channel::new(
                ChannelId::new(1, ONID, TSID, SID),
                "Test One",
                11954,
            ));
            Rig {
                channels: Arc::new(StateLock::new(channels)),
                schedules: Arc::new(StateLock::new(Schedules::new())),
                handlers: EpgHandlers::new(),
                config: Config::default(),
                clock: ManualClock::new(NOW),
                tables: HashMap::new(),
            }
        }

        fn process(&mut self, data: &[u8]) {
            let processor = EitProcessor {
                channels: &self.channels,
                schedules: &self.schedules,
                handlers: &self.handlers,
                config: &self.config,
                clock: &self.clock,
                source: 1,
            };
            processor.process(&mut self.tables, data);
        }

        fn with_schedule<R>(&self, f: impl FnOnce(&Schedule) -> R) -> R {
            let schedules = self.schedules.read();
            f(schedules.get(&ChannelId::new(1, ONID, TSID, SID)).unwrap())
        }
    }

    fn builder(table_id: u8) -> EitSectionBuilder {
        EitSectionBuilder::new(table_id, SID).ids(ONID, TSID)
    }

    #[test]
    fn test_schedule_section_creates_events() {
        let mut rig = Rig::new();
        let descriptors = testutil::short_event(b"eng", "News", "Headlines.");
        let data = builder(0x50)
            .version(1)
            .event_with_descriptors(100, NOW + 3600, 1800, 0, descriptors)
            .build();
        rig.process(&data);
        rig.with_schedule(|s| {
            assert_eq!(s.events().len(), 1);
            let e = s.event(0);
            assert_eq!(e.event_id, 100);
            assert_eq!(e.start_time, NOW + 3600);
            assert_eq!(e.duration, 1800);
            assert_eq!(e.table_id, 0x50);
            assert_eq!(e.version, 1);
            assert_eq!(e.title.as_deref(), Some("News"));
            assert_eq!(e.short_text.as_deref(), Some("Headlines."));
        });
    }

    #[test]
    fn test_duplicate_section_is_ignored() {
        let mut rig = Rig::new();
        let data = builder(0x50).version(1).event(100, NOW, 1800, 0).build();
        rig.process(&data);
        rig.process(&data);
        rig.with_schedule(|s| assert_eq!(s.events().len(), 1));
    }

    #[test]
    fn test_version_bump_reprocesses_section() {
        let mut rig = Rig::new();
        let v1 = builder(0x50).version(1).event(100, NOW + 600, 1800, 0).build();
        rig.process(&v1);
        let v2 = builder(0x50)
            .version(2)
            .event(100, NOW + 600, 1800, 0)
            .event(101, NOW + 2400, 1800, 0)
            .build();
        rig.process(&v2);
        rig.with_schedule(|s| {
            assert_eq!(s.events().len(), 2);
            assert_eq!(s.event(0).version, 2);
            assert_eq!(s.event(1).event_id, 101);
        });
    }

    #[test]
    fn test_unknown_channel_collects_nothing() {
        let mut rig = Rig::new();
        let data = EitSectionBuilder::new(0x50, 0x9999)
            .ids(ONID, TSID)
            .event(1, NOW, 60, 0)
            .build();
        rig.process(&data);
        assert!(rig.schedules.read().is_empty());
    }

    #[test]
    fn test_unset_clock_blocks_processing() {
        let mut rig = Rig::new();
        rig.clock = ManualClock::new(VALID_TIME - 1);
        let data = builder(0x50).event(1, NOW, 60, 0).build();
        rig.process(&data);
        assert!(rig.schedules.read().is_empty());
    }

    #[test]
    fn test_present_following_authority_over_schedule_tables() {
        let mut rig = Rig::new();
        let pf = builder(0x4E)
            .version(1)
            .section(0, 1)
            .event_with_descriptors(
                100,
                NOW,
                1800,
                4,
                testutil::short_event(b"eng", "Live show", ""),
            )
            .build();
        rig.process(&pf);
        // a schedule table must not overwrite the present/following event
        let sched = builder(0x50)
            .version(1)
            .event_with_descriptors(
                100,
                NOW + 60,
                600,
                0,
                testutil::short_event(b"eng", "Wrong", ""),
            )
            .build();
        rig.process(&sched);
        rig.with_schedule(|s| {
            let e = s.event(0);
            assert_eq!(e.title.as_deref(), Some("Live show"));
            assert_eq!(e.start_time, NOW);
            assert_eq!(e.duration, 1800);
            assert_eq!(e.table_id, 0x4E);
        });
    }

    #[test]
    fn test_schedule_tables_blocked_after_actual_tp() {
        let mut rig = Rig::new();
        let actual = builder(0x50).version(1).event(100, NOW + 600, 1800, 0).build();
        rig.process(&actual);
        let other = builder(0x60)
            .version(1)
            .event_with_descriptors(
                200,
                NOW + 600,
                1800,
                0,
                testutil::short_event(b"eng", "Stale", ""),
            )
            .build();
        rig.process(&other);
        rig.with_schedule(|s| {
            assert_eq!(s.events().len(), 1);
            let e = s.event(0);
            assert_eq!(e.event_id, 100);
            assert_eq!(e.title, None);
        });
    }

    #[test]
    fn test_other_ts_events_resolved_by_start_time() {
        let mut rig = Rig::new();
        let first = builder(0x60).version(1).event(100, NOW + 600, 1800, 0).build();
        rig.process(&first);
        // same start time under a new version and a different id: the
        // row must update the stored event instead of duplicating it
        let second = builder(0x60).version(2).event(200, NOW + 600, 2400, 0).build();
        rig.process(&second);
        rig.with_schedule(|s| {
            assert_eq!(s.events().len(), 1);
            let e = s.event(0);
            assert_eq!(e.event_id, 200);
            assert_eq!(e.duration, 2400);
        });
    }

    #[test]
    fn test_running_status_glitch_keeps_pausing() {
        let mut rig = Rig::new();
        let pausing = builder(0x4E)
            .version(1)
            .section(0, 1)
            .event(100, NOW - 600, 3600, 3)
            .build();
        rig.process(&pausing);
        rig.with_schedule(|s| assert_eq!(s.event(0).running_status, RunningStatus::Pausing));
        // the glitch: present section flips to "not running"
        let glitch = builder(0x4E)
            .version(2)
            .section(0, 1)
            .event(100, NOW - 600, 3600, 1)
            .build();
        rig.process(&glitch);
        rig.with_schedule(|s| {
            assert_eq!(s.event(0).running_status, RunningStatus::Pausing);
        });
    }

    #[test]
    fn test_following_not_running_becomes_undefined() {
        let mut rig = Rig::new();
        let following = builder(0x4E)
            .version(1)
            .section(1, 1)
            .event(101, NOW + 3600, 3600, 4)
            .build();
        rig.process(&following);
        rig.with_schedule(|s| assert_eq!(s.event(0).running_status, RunningStatus::Running));
        let glitch = builder(0x4E)
            .version(2)
            .section(1, 1)
            .event(101, NOW + 3600, 3600, 1)
            .build();
        rig.process(&glitch);
        rig.with_schedule(|s| {
            assert_eq!(s.event(0).running_status, RunningStatus::Undefined);
        });
    }

    #[test]
    fn test_empty_present_section_clears_running_status() {
        let mut rig = Rig::new();
        let running = builder(0x4E)
            .version(1)
            .section(0, 1)
            .event(100, NOW - 60, 3600, 4)
            .build();
        rig.process(&running);
        rig.with_schedule(|s| assert!(s.has_running()));
        let empty = builder(0x4E).version(2).section(0, 1).build();
        rig.process(&empty);
        rig.with_schedule(|s| {
            assert!(!s.has_running());
            assert_eq!(s.present_seen(), NOW);
            assert_eq!(s.events().len(), 1);
        });
    }

    #[test]
    fn test_expired_events_are_dropped() {
        let mut rig = Rig::new();
        let linger = Config::default().epg_linger_secs();
        let data = builder(0x50)
            .version(1)
            .event(1, NOW - linger - 7200, 600, 0)
            .event(2, NOW + 600, 600, 0)
            .build();
        rig.process(&data);
        rig.with_schedule(|s| {
            assert_eq!(s.events().len(), 1);
            assert_eq!(s.event(0).event_id, 2);
        });
    }

    #[test]
    fn test_nvod_reference_event_is_kept() {
        let mut rig = Rig::new();
        let data = builder(0x50).version(1).event(77, -1, 0, 0).build();
        rig.process(&data);
        rig.with_schedule(|s| {
            assert_eq!(s.events().len(), 1);
            assert!(s.event(0).start_time < 0);
        });
    }

    #[test]
    fn test_content_and_rating_and_components_applied() {
        let mut rig = Rig::new();
        rig.config.epg_languages = vec!["eng".into()];
        let mut descriptors = testutil::content(&[(2, 3), (4, 1)]);
        descriptors.extend(testutil::parental_rating(b"eng", 0x05));
        descriptors.extend(testutil::component(0, 1, 0x03, b"eng", "HD video"));
        descriptors.extend(testutil::component(0, 1, 0x00, b"eng", "filtered"));
        descriptors.extend(testutil::component(1, 9, 0x01, b"eng", "HEVC"));
        descriptors.extend(testutil::component(2, 9, 0x01, b"eng", "too new"));
        let data = builder(0x50)
            .version(1)
            .event_with_descriptors(1, NOW + 60, 600, 0, descriptors)
            .build();
        rig.process(&data);
        rig.with_schedule(|s| {
            let e = s.event(0);
            assert_eq!(e.contents, vec![0x23, 0x41]);
            assert_eq!(e.parental_rating, 8);
            assert_eq!(e.components.len(), 2);
            assert_eq!(e.components[0].stream, 1);
            assert_eq!(e.components[0].kind, 0x03);
            assert_eq!(e.components[1].stream, 0x19);
        });
    }

    #[test]
    fn test_extended_event_description_assembled() {
        let mut rig = Rig::new();
        let mut descriptors = testutil::extended_event(b"eng", 0, 1, "First half. ");
        descriptors.extend(testutil::extended_event(b"eng", 1, 1, "Second half."));
        let data = builder(0x50)
            .version(1)
            .event_with_descriptors(1, NOW + 60, 600, 0, descriptors)
            .build();
        rig.process(&data);
        rig.with_schedule(|s| {
            assert_eq!(
                s.event(0).description.as_deref(),
                Some("First half. Second half.")
            );
        });
    }

    #[test]
    fn test_short_event_prefers_configured_language() {
        let mut rig = Rig::new();
        rig.config.epg_languages = vec!["deu".into()];
        let mut descriptors = testutil::short_event(b"eng", "English", "");
        descriptors.extend(testutil::short_event(b"deu", "Deutsch", ""));
        let data = builder(0x50)
            .version(1)
            .event_with_descriptors(1, NOW + 60, 600, 0, descriptors)
            .build();
        rig.process(&data);
        rig.with_schedule(|s| {
            assert_eq!(s.event(0).title.as_deref(), Some("Deutsch"));
        });
    }

    #[test]
    fn test_time_shifted_event_copies_master_text() {
        let mut rig = Rig::new();
        {
            let mut channels = rig.channels.try_write_for(LOCK_TIMEOUT).unwrap();
            channels.add(crate::epg::channels::Channel::new(
                ChannelId::new(1, ONID, TSID, 0x1000),
                "NVOD Master",
                11954,
            ));
            channels.release(true);
        }
        let master = EitSectionBuilder::new(0x50, 0x1000)
            .ids(ONID, TSID)
            .version(1)
            .event_with_descriptors(
                500,
                NOW + 600,
                600,
                0,
                testutil::short_event(b"eng", "Movie", "The one."),
            )
            .build();
        rig.process(&master);
        let shifted = builder(0x50)
            .version(1)
            .event_with_descriptors(
                600,
                NOW + 4200,
                600,
                0,
                testutil::time_shifted_event(0x1000, 500),
            )
            .build();
        rig.process(&shifted);
        rig.with_schedule(|s| {
            let e = s.event(0);
            assert_eq!(e.event_id, 600);
            assert_eq!(e.title.as_deref(), Some("Movie"));
            assert_eq!(e.short_text.as_deref(), Some("The one."));
        });
    }

    #[test]
    fn test_linkage_renames_existing_channel() {
        let mut rig = Rig::new();
        {
            let mut channels = rig.channels.try_write_for(LOCK_TIMEOUT).unwrap();
            channels.add(crate::epg::channels::Channel::new(
                ChannelId::new(1, ONID, TSID, 0x2000),
                "Old Name",
                11954,
            ));
            channels.release(true);
        }
        let descriptors = testutil::linkage(TSID, ONID, 0x2000, 0xB0, b"Portal A");
        let data = builder(0x50)
            .version(1)
            .event_with_descriptors(1, NOW - 60, 3600, 0, descriptors)
            .build();
        rig.process(&data);
        let channels = rig.channels.read();
        let idx = channels
            .get_by_channel_id(ChannelId::new(1, ONID, TSID, 0x2000), false)
            .unwrap();
        assert_eq!(channels.get(idx).name, "Portal A");
        let own = channels
            .get_by_channel_id(ChannelId::new(1, ONID, TSID, SID), false)
            .unwrap();
        assert_eq!(channels.get(own).link_channels.len(), 1);
    }

    #[test]
    fn test_linkage_outside_event_interval_is_ignored() {
        let mut rig = Rig::new();
        let descriptors = testutil::linkage(TSID, ONID, 0x3000, 0xB0, b"Later");
        let data = builder(0x50)
            .version(1)
            .event_with_descriptors(1, NOW + 600, 3600, 0, descriptors)
            .build();
        rig.process(&data);
        assert_eq!(rig.channels.read().len(), 1);
    }

    #[test]
    fn test_linkage_synthesizes_channel_at_policy_four() {
        let mut rig = Rig::new();
        rig.config.update_channels = 4;
        let descriptors = testutil::linkage(TSID, ONID, 0x3000, 0xB0, b"New Portal");
        let data = builder(0x50)
            .version(1)
            .event_with_descriptors(1, NOW - 60, 3600, 0, descriptors)
            .build();
        rig.process(&data);
        let channels = rig.channels.read();
        let idx = channels
            .get_by_channel_id(ChannelId::new(1, ONID, TSID, 0x3000), false)
            .expect("link channel synthesized");
        assert_eq!(channels.get(idx).name, "New Portal");
        assert_eq!(channels.get(idx).transponder, 11954);
    }

    #[test]
    fn test_self_linkage_sets_portal_name() {
        let mut rig = Rig::new();
        let descriptors = testutil::linkage(TSID, ONID, SID, 0xB0, b"Own Portal");
        let data = builder(0x50)
            .version(1)
            .event_with_descriptors(1, NOW - 60, 3600, 0, descriptors)
            .build();
        rig.process(&data);
        let channels = rig.channels.read();
        assert_eq!(channels.get(0).portal_name, "Own Portal");
        assert!(channels.get(0).link_channels.is_empty());
    }

    #[test]
    fn test_pdc_descriptor_sets_vps() {
        let mut rig = Rig::new();
        let local = chrono::Local.timestamp_opt(NOW, 0).unwrap();
        let descriptors = testutil::pdc(
            local.day(),
            local.month(),
            12,
            30,
        );
        let data = builder(0x50)
            .version(1)
            .event_with_descriptors(1, NOW + 60, 600, 0, descriptors)
            .build();
        rig.process(&data);
        let expected = chrono::Local
            .with_ymd_and_hms(local.year(), local.month(), local.day(), 12, 30, 0)
            .earliest()
            .map(|t| t.timestamp());
        rig.with_schedule(|s| assert_eq!(s.event(0).vps, expected));
    }

    #[test]
    fn test_pdc_year_boundary_december_to_january() {
        let dec = chrono::Local
            .with_ymd_and_hms(2023, 12, 28, 20, 0, 0)
            .earliest()
            .unwrap()
            .timestamp();
        let vps = pdc_to_vps(dec, 1, 5, 20, 15).unwrap();
        let resolved = chrono::Local.timestamp_opt(vps, 0).unwrap();
        assert_eq!(resolved.year(), 2024);
        assert_eq!(resolved.month(), 1);
        assert_eq!(resolved.day(), 5);
    }

    #[test]
    fn test_pdc_year_boundary_january_to_december() {
        let jan = chrono::Local
            .with_ymd_and_hms(2024, 1, 3, 20, 0, 0)
            .earliest()
            .unwrap()
            .timestamp();
        let vps = pdc_to_vps(jan, 12, 30, 22, 0).unwrap();
        let resolved = chrono::Local.timestamp_opt(vps, 0).unwrap();
        assert_eq!(resolved.year(), 2023);
        assert_eq!(resolved.month(), 12);
    }

    #[test]
    fn test_sort_and_drop_outdated_after_complete_table() {
        let mut rig = Rig::new();
        let v1 = builder(0x50)
            .version(1)
            .event(10, NOW + 7200, 600, 0)
            .event(11, NOW + 600, 600, 0)
            .build();
        rig.process(&v1);
        rig.with_schedule(|s| {
            // table complete: events are sorted by start time
            assert_eq!(s.event(0).event_id, 11);
            assert_eq!(s.event(1).event_id, 10);
        });
        // v2 still spans the old slot of event 10 but no longer lists it
        let v2 = builder(0x50)
            .version(2)
            .event(11, NOW + 600, 600, 0)
            .event(12, NOW + 7800, 600, 0)
            .build();
        rig.process(&v2);
        rig.with_schedule(|s| {
            let live: Vec<u16> = s
                .events()
                .iter()
                .filter(|e| e.event_id != 0)
                .map(|e| e.event_id)
                .collect();
            assert_eq!(live, vec![11, 12]);
        });
    }

    #[test]
    fn test_ignored_channel_collects_nothing() {
        struct IgnoreAll;
        impl crate::epg::handlers::EpgHandler for IgnoreAll {
            fn ignore_channel(&self, _channel: &crate::epg::channels::Channel) -> bool {
                true
            }
        }
        let mut rig = Rig::new();
        rig.handlers.register(Box::new(IgnoreAll));
        let data = builder(0x50).version(1).event(1, NOW + 60, 600, 0).build();
        rig.process(&data);
        assert!(rig.schedules.read().is_empty());
    }

    #[test]
    fn test_refused_segment_transfer_collects_nothing() {
        struct RefuseAll;
        impl crate::epg::handlers::EpgHandler for RefuseAll {
            fn begin_segment_transfer(&self, _channel: &crate::epg::channels::Channel) -> bool {
                false
            }
        }
        let mut rig = Rig::new();
        rig.handlers.register(Box::new(RefuseAll));
        let data = builder(0x50).version(1).event(1, NOW + 60, 600, 0).build();
        rig.process(&data);
        rig.with_schedule(|s| assert!(s.events().is_empty()));
    }
}

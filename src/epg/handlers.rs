//! The EPG handler chain.
//!
//! All mutations of guide state funnel through a runtime-extensible list
//! of handlers. A handler that returns `true` from an operation claims it
//! and stops the chain; for the setter operations the chain falls back to
//! the plain event mutation when nobody claims. This lets deployments
//! patch up broadcaster quirks, divert services to external guides, or
//! veto updates without touching the ingestion core.

use crate::si::eit::EitEvent;

use super::channels::Channel;
use super::event::{Component, Event};
use super::schedule::Schedule;

/// One plug-in in the chain. Every operation has a pass-through default,
/// so implementors override only what they care about.
#[allow(unused_variables)]
pub trait EpgHandler: Send + Sync {
    /// Veto all guide collection for a channel.
    fn ignore_channel(&self, channel: &Channel) -> bool {
        false
    }

    /// Called before a section's events are transferred; returning false
    /// refuses the whole section.
    fn begin_segment_transfer(&self, channel: &Channel) -> bool {
        true
    }

    /// Called after a section has been transferred.
    fn end_segment_transfer(&self, modified: bool) {}

    /// Claim an entire event row; returning true skips built-in
    /// processing for it.
    fn handle_eit_event(
        &self,
        schedule: &mut Schedule,
        event: &EitEvent<'_>,
        table_id: u8,
        version: u8,
    ) -> bool {
        false
    }

    /// Whether this channel's guide is maintained outside the schedule
    /// store.
    fn handled_externally(&self, channel: &Channel) -> bool {
        false
    }

    /// For externally handled channels: is this row an update worth
    /// processing?
    fn is_update(&self, event_id: u16, start_time: i64, table_id: u8, version: u8) -> bool {
        false
    }

    fn set_event_id(&self, event: &mut Event, event_id: u16) -> bool {
        false
    }

    fn set_start_time(&self, event: &mut Event, start_time: i64) -> bool {
        false
    }

    fn set_duration(&self, event: &mut Event, duration: i32) -> bool {
        false
    }

    fn set_title(&self, event: &mut Event, title: Option<&str>) -> bool {
        false
    }

    fn set_short_text(&self, event: &mut Event, short_text: Option<&str>) -> bool {
        false
    }

    fn set_description(&self, event: &mut Event, description: Option<&str>) -> bool {
        false
    }

    fn set_contents(&self, event: &mut Event, contents: &[u8]) -> bool {
        false
    }

    fn set_parental_rating(&self, event: &mut Event, age: u8) -> bool {
        false
    }

    fn set_vps(&self, event: &mut Event, vps: Option<i64>) -> bool {
        false
    }

    fn set_components(&self, event: &mut Event, components: &[Component]) -> bool {
        false
    }

    /// Clean up known broadcaster mistakes on a finished event.
    fn fix_epg_bugs(&self, event: &mut Event) -> bool {
        false
    }

    fn sort_schedule(&self, schedule: &mut Schedule) -> bool {
        false
    }

    fn drop_outdated(
        &self,
        schedule: &mut Schedule,
        segment_start: i64,
        segment_end: i64,
        table_id: u8,
        version: u8,
    ) -> bool {
        false
    }

    /// Final look at a completed event.
    fn handle_event(&self, event: &mut Event) -> bool {
        false
    }
}

/// The registered handler chain.
#[derive(Default)]
pub struct EpgHandlers {
    handlers: Vec<Box<dyn EpgHandler>>,
}

impl EpgHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Box<dyn EpgHandler>) {
        self.handlers.push(handler);
    }

    pub fn ignore_channel(&self, channel: &Channel) -> bool {
        self.handlers.iter().any(|h| h.ignore_channel(channel))
    }

    pub fn begin_segment_transfer(&self, channel: &Channel) -> bool {
        self.handlers.iter().all(|h| h.begin_segment_transfer(channel))
    }

    pub fn end_segment_transfer(&self, modified: bool) {
        for h in &self.handlers {
            h.end_segment_transfer(modified);
        }
    }

    pub fn handle_eit_event(
        &self,
        schedule: &mut Schedule,
        event: &EitEvent<'_>,
        table_id: u8,
        version: u8,
    ) -> bool {
        self.handlers
            .iter()
            .any(|h| h.handle_eit_event(schedule, event, table_id, version))
    }

    pub fn handled_externally(&self, channel: &Channel) -> bool {
        self.handlers.iter().any(|h| h.handled_externally(channel))
    }

    pub fn is_update(&self, event_id: u16, start_time: i64, table_id: u8, version: u8) -> bool {
        self.handlers
            .iter()
            .any(|h| h.is_update(event_id, start_time, table_id, version))
    }

    pub fn set_event_id(&self, event: &mut Event, event_id: u16) {
        if !self.handlers.iter().any(|h| h.set_event_id(event, event_id)) {
            event.event_id = event_id;
        }
    }

    pub fn set_start_time(&self, event: &mut Event, start_time: i64) {
        if !self
            .handlers
            .iter()
            .any(|h| h.set_start_time(event, start_time))
        {
            event.start_time = start_time;
        }
    }

    pub fn set_duration(&self, event: &mut Event, duration: i32) {
        if !self.handlers.iter().any(|h| h.set_duration(event, duration)) {
            event.duration = duration;
        }
    }

    pub fn set_title(&self, event: &mut Event, title: Option<&str>) {
        if !self.handlers.iter().any(|h| h.set_title(event, title)) {
            event.title = title.map(str::to_string);
        }
    }

    pub fn set_short_text(&self, event: &mut Event, short_text: Option<&str>) {
        if !self
            .handlers
            .iter()
            .any(|h| h.set_short_text(event, short_text))
        {
            event.short_text = short_text.map(str::to_string);
        }
    }

    pub fn set_description(&self, event: &mut Event, description: Option<&str>) {
        if !self
            .handlers
            .iter()
            .any(|h| h.set_description(event, description))
        {
            event.description = description.map(str::to_string);
        }
    }

    pub fn set_contents(&self, event: &mut Event, contents: &[u8]) {
        if !self.handlers.iter().any(|h| h.set_contents(event, contents)) {
            event.contents = contents.to_vec();
        }
    }

    pub fn set_parental_rating(&self, event: &mut Event, age: u8) {
        if !self
            .handlers
            .iter()
            .any(|h| h.set_parental_rating(event, age))
        {
            event.parental_rating = age;
        }
    }

    pub fn set_vps(&self, event: &mut Event, vps: Option<i64>) {
        if !self.handlers.iter().any(|h| h.set_vps(event, vps)) {
            event.vps = vps;
        }
    }

    pub fn set_components(&self, event: &mut Event, components: &[Component]) {
        if !self
            .handlers
            .iter()
            .any(|h| h.set_components(event, components))
        {
            event.components = components.to_vec();
        }
    }

    pub fn fix_epg_bugs(&self, event: &mut Event) {
        if !self.handlers.iter().any(|h| h.fix_epg_bugs(event)) {
            event.fix_epg_bugs();
        }
    }

    pub fn sort_schedule(&self, schedule: &mut Schedule) {
        if !self.handlers.iter().any(|h| h.sort_schedule(schedule)) {
            schedule.sort();
        }
    }

    pub fn drop_outdated(
        &self,
        schedule: &mut Schedule,
        segment_start: i64,
        segment_end: i64,
        table_id: u8,
        version: u8,
    ) {
        if !self.handlers.iter().any(|h| {
            h.drop_outdated(schedule, segment_start, segment_end, table_id, version)
        }) {
            schedule.drop_outdated(segment_start, segment_end, table_id, version);
        }
    }

    pub fn handle_event(&self, event: &mut Event) {
        for h in &self.handlers {
            if h.handle_event(event) {
                break;
            }
        }
    }
}

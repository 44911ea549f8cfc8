//! Guide events.

/// Upper bound on stored content genre bytes per event.
pub const MAX_EVENT_CONTENTS: usize = 4;

/// Table id marking an event no section has claimed yet.
pub const TABLE_ID_NONE: u8 = 0xFF;

/// DVB running status of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum RunningStatus {
    #[default]
    Undefined = 0,
    NotRunning = 1,
    StartsShortly = 2,
    Pausing = 3,
    Running = 4,
}

impl RunningStatus {
    /// Map the raw 3-bit field; reserved values collapse to `Undefined`.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => RunningStatus::NotRunning,
            2 => RunningStatus::StartsShortly,
            3 => RunningStatus::Pausing,
            4 => RunningStatus::Running,
            _ => RunningStatus::Undefined,
        }
    }
}

/// One elementary stream of an event, from a component descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    /// stream_content; for stream 9 the extension is folded into the
    /// upper nibble.
    pub stream: u8,
    pub kind: u8,
    pub language: String,
    pub description: Option<String>,
}

/// A single guide event. Owned by its schedule; the ingestion core only
/// mutates it through the handler chain.
#[derive(Debug, Clone, Default)]
pub struct Event {
    pub event_id: u16,
    /// Unix seconds; zero after a phase-out, negative for NVOD reference
    /// events.
    pub start_time: i64,
    /// Seconds.
    pub duration: i32,
    /// The table that last owned this event; `TABLE_ID_NONE` until a
    /// section claims it.
    pub table_id: u8,
    pub version: u8,
    pub running_status: RunningStatus,
    /// Unix time this event was last seen in a present/following section;
    /// zero if never.
    pub seen: i64,
    /// Whether a recording timer references this event.
    pub has_timer: bool,
    pub title: Option<String>,
    pub short_text: Option<String>,
    pub description: Option<String>,
    pub components: Vec<Component>,
    /// Packed genre bytes, at most [`MAX_EVENT_CONTENTS`].
    pub contents: Vec<u8>,
    /// Minimum age in years, zero when unrated.
    pub parental_rating: u8,
    /// VPS start anchor, Unix seconds.
    pub vps: Option<i64>,
}

impl Event {
    pub fn new(event_id: u16, start_time: i64, duration: i32) -> Self {
        Event {
            event_id,
            start_time,
            duration,
            table_id: TABLE_ID_NONE,
            ..Event::default()
        }
    }

    pub fn end_time(&self) -> i64 {
        self.start_time + self.duration as i64
    }

    pub fn set_seen(&mut self, now: i64) {
        self.seen = now;
    }

    /// Baseline cleanup applied after every descriptor pass: empty text
    /// slots collapse to `None`, and a short text merely repeating the
    /// title is dropped (a widespread broadcaster habit).
    pub fn fix_epg_bugs(&mut self) {
        for slot in [&mut self.title, &mut self.short_text, &mut self.description] {
            if let Some(s) = slot.take() {
                let trimmed = s.trim();
                if !trimmed.is_empty() {
                    *slot = Some(trimmed.to_string());
                }
            }
        }
        if self.short_text.is_some() && self.short_text == self.title {
            self.short_text = None;
        }
    }
}

/// Pack a content descriptor nibble pair into one genre byte.
pub fn pack_content(nibble1: u8, nibble2: u8) -> u8 {
    ((nibble1 & 0x0F) << 4) | (nibble2 & 0x0F)
}

/// Map a raw parental rating to a minimum age in years.
///
/// 0x01..=0x0F is the DVB-defined "minimum age minus three"; 0x11..0x13
/// are broadcaster-defined values seen from CSAT. Everything else counts
/// as unrated.
pub fn parental_rating_age(raw: u8) -> u8 {
    match raw {
        0x01..=0x0F => raw + 3,
        0x11 => 10,
        0x12 => 12,
        0x13 => 16,
        _ => 0,
    }
}

//! Runtime configuration.

use serde::Deserialize;

use crate::epg::channels::SourceId;
use crate::si::text;

/// Knobs consumed by the ingestion core. Deserializable so a TOML file
/// can carry a `[epg]` section; every field has a standalone default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Preferred guide languages, most preferred first (ISO 639-2).
    /// Empty means "first language seen wins".
    pub epg_languages: Vec<String>,

    /// Channel update policy: 0 = no updates, 1 = names only, 2 = PIDs
    /// only, 3 = names and PIDs, 4 = additionally add newly discovered
    /// channels.
    pub update_channels: u8,

    /// Whether TDT sections may discipline the system clock.
    pub set_system_time: bool,

    /// Source the trusted time transponder lives on.
    pub time_source: SourceId,

    /// Transponder whose TDT is trusted; 0 disables TDT processing.
    pub time_transponder: u32,

    /// How long ended events linger in the guide, in minutes.
    pub epg_linger: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            epg_languages: Vec::new(),
            update_channels: 4,
            set_system_time: false,
            time_source: 0,
            time_transponder: 0,
            epg_linger: 60,
        }
    }
}

impl Config {
    /// Linger time in seconds.
    pub fn epg_linger_secs(&self) -> i64 {
        self.epg_linger as i64 * 60
    }

    /// Whether the update policy permits renaming link channels.
    pub fn renames_channels(&self) -> bool {
        self.update_channels >= 1 && self.update_channels != 2
    }

    /// Whether the update policy permits synthesizing new channels.
    pub fn adds_channels(&self) -> bool {
        self.update_channels >= 4
    }

    /// Language-preference bookkeeping for descriptor selection: returns
    /// true when `code` ranks strictly better than the best rank seen so
    /// far, updating `best`.
    pub fn is_preferred_language(&self, code: [u8; 3], best: &mut Option<usize>) -> bool {
        let normalized = text::normalize_language_code(code);
        match self
            .epg_languages
            .iter()
            .position(|l| text::language_matches(l, &normalized))
        {
            Some(rank) if best.map_or(true, |b| rank < b) => {
                *best = Some(rank);
                true
            }
            _ => false,
        }
    }
}

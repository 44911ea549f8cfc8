//! Channel identification and the in-memory channel store.

use std::collections::HashMap;
use std::fmt;

/// Delivery-system origin of a transport stream (satellite position,
/// cable or terrestrial network), encoded as an opaque id.
pub type SourceId = i32;

/// Transponders within this distance count as the same one; tuners round
/// frequencies differently.
pub fn is_transponder(a: u32, b: u32) -> bool {
    a.abs_diff(b) < 4
}

/// Unique identity of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChannelId {
    pub source: SourceId,
    pub original_network_id: u16,
    pub transport_stream_id: u16,
    pub service_id: u16,
    /// Disambiguator for services sharing all other ids.
    pub rid: u16,
}

impl ChannelId {
    pub fn new(
        source: SourceId,
        original_network_id: u16,
        transport_stream_id: u16,
        service_id: u16,
    ) -> Self {
        ChannelId {
            source,
            original_network_id,
            transport_stream_id,
            service_id,
            rid: 0,
        }
    }

    /// Same identity when the rid is ignored.
    pub fn matches_without_rid(&self, other: &ChannelId) -> bool {
        self.source == other.source
            && self.original_network_id == other.original_network_id
            && self.transport_stream_id == other.transport_stream_id
            && self.service_id == other.service_id
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.source, self.original_network_id, self.transport_stream_id, self.service_id
        )
    }
}

/// One service in the channel store.
#[derive(Debug, Clone, Default)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    /// Name of the portal this channel is reached through, when it is the
    /// target of a self-referential link.
    pub portal_name: String,
    /// Transponder frequency, used to place synthesized link channels.
    pub transponder: u32,
    /// Channels this one links to (bouquet portals).
    pub link_channels: Vec<ChannelId>,
}

impl Channel {
    pub fn new(id: ChannelId, name: impl Into<String>, transponder: u32) -> Self {
        Channel {
            id,
            name: name.into(),
            transponder,
            ..Channel::default()
        }
    }
}

/// In-memory channel store. Channels are addressed by index; indices stay
/// stable because channels are never removed.
#[derive(Debug, Default)]
pub struct Channels {
    list: Vec<Channel>,
    by_id: HashMap<ChannelId, usize>,
}

impl Channels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, channel: Channel) -> usize {
        let index = self.list.len();
        self.by_id.insert(channel.id, index);
        self.list.push(channel);
        index
    }

    pub fn get(&self, index: usize) -> &Channel {
        &self.list[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Channel {
        &mut self.list[index]
    }

    /// Look up a channel by id. With `try_without_rid`, a channel that
    /// matches in everything but the rid is accepted as well.
    pub fn get_by_channel_id(&self, id: ChannelId, try_without_rid: bool) -> Option<usize> {
        if let Some(&index) = self.by_id.get(&id) {
            return Some(index);
        }
        if try_without_rid {
            return self
                .list
                .iter()
                .position(|ch| ch.id.matches_without_rid(&id));
        }
        None
    }

    /// Find any channel on the transponder the id points at (same source,
    /// network and transport stream).
    pub fn get_by_transponder_id(&self, id: ChannelId) -> Option<usize> {
        self.list.iter().position(|ch| {
            ch.id.source == id.source
                && ch.id.original_network_id == id.original_network_id
                && ch.id.transport_stream_id == id.transport_stream_id
        })
    }

    /// Create a channel on the same transponder as `template`.
    pub fn new_channel(
        &mut self,
        template: usize,
        name: &str,
        original_network_id: u16,
        transport_stream_id: u16,
        service_id: u16,
    ) -> usize {
        let (source, transponder) = {
            let t = self.get(template);
            (t.id.source, t.transponder)
        };
        let id = ChannelId::new(source, original_network_id, transport_stream_id, service_id);
        self.add(Channel::new(id, name, transponder))
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.list.iter()
    }
}

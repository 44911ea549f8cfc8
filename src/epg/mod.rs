//! Guide data model: events, per-service schedules, the channel store and
//! the handler chain through which all event mutations flow.

pub mod channels;
pub mod event;
pub mod handlers;
pub mod schedule;
pub mod state;

pub use channels::{Channel, ChannelId, Channels, SourceId};
pub use event::{Component, Event, RunningStatus};
pub use handlers::{EpgHandler, EpgHandlers};
pub use schedule::{Schedule, Schedules};
pub use state::{StateGuard, StateLock, LOCK_TIMEOUT};

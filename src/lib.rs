//! DVB Service Information ingestion.
//!
//! Feeds on EIT sections to maintain an electronic program guide (one
//! schedule of events per service, reconciled across the present/following
//! and schedule tables of a transport stream) and on TDT sections to
//! discipline the host wall clock against broadcast time.
//!
//! The entry point is [`filter::EitFilter`]: register its subscriptions
//! with a demuxer and hand every complete section to
//! [`process`](filter::EitFilter::process). Channel and schedule stores
//! are shared through bounded-wait [`epg::StateLock`]s; all guide
//! mutations flow through the [`epg::EpgHandlers`] chain.

pub mod clock;
pub mod config;
pub mod epg;
pub mod filter;
pub mod logging;
pub mod si;

pub use clock::{ManualClock, SystemClock, WallClock};
pub use config::Config;
pub use filter::EitFilter;

//! dvbepg: collect a program guide from a transport stream capture.
//!
//! Demuxes EIT and TDT sections out of a raw `.ts` file, runs them
//! through the ingestion filter and prints the collected guide.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Local, TimeZone};
use clap::Parser;
use log::{info, warn};

use dvbepg::epg::channels::{Channel, ChannelId, Channels, SourceId};
use dvbepg::epg::handlers::EpgHandlers;
use dvbepg::epg::schedule::Schedules;
use dvbepg::epg::state::StateLock;
use dvbepg::si::packet::{TsPacket, TS_PACKET_SIZE};
use dvbepg::si::section::SectionCollector;
use dvbepg::{Config, EitFilter, SystemClock};

/// Collect a DVB program guide from a transport stream capture
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Transport stream capture to read
    input: PathBuf,

    /// Channel list file (one `name;onid;tsid;sid[;transponder]` per line)
    #[arg(short = 'l', long)]
    channels: PathBuf,

    /// Source id the capture was taken from
    #[arg(short, long, default_value = "1")]
    source: SourceId,

    /// Transponder frequency the capture was taken on
    #[arg(short, long, default_value = "0")]
    transponder: u32,

    /// Configuration file path (TOML)
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory where log files are stored
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Number of days to keep log files
    #[arg(long, default_value = "7")]
    log_retention_days: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    dvbepg::logging::init_logging(&args.log_dir, args.log_retention_days, args.verbose)?;

    let config: Config = match &args.config {
        Some(path) => toml::from_str(&std::fs::read_to_string(path)?)?,
        None => Config::default(),
    };

    let channels = load_channels(&args.channels, args.source)?;
    info!("loaded {} channels from {:?}", channels.len(), args.channels);

    let channels = Arc::new(StateLock::new(channels));
    let schedules = Arc::new(StateLock::new(Schedules::new()));
    let filter = EitFilter::new(
        channels.clone(),
        schedules.clone(),
        Arc::new(EpgHandlers::new()),
        Arc::new(config),
        Arc::new(SystemClock),
        args.source,
        args.transponder,
    );

    let packets = feed_capture(&args.input, &filter)?;
    info!("processed {packets} TS packets from {:?}", args.input);

    print_guide(&channels, &schedules);
    Ok(())
}

/// Parse the channel list. Unparsable lines are skipped with a warning.
fn load_channels(path: &PathBuf, source: SourceId) -> Result<Channels, std::io::Error> {
    let mut channels = Channels::new();
    for (lineno, line) in std::fs::read_to_string(path)?.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        let fields: Vec<&str> = line.split(';').collect();
        if fields.len() < 4 {
            warn!("{path:?}:{}: not enough fields", lineno + 1);
            continue;
        }
        let parsed = (
            fields[1].trim().parse::<u16>(),
            fields[2].trim().parse::<u16>(),
            fields[3].trim().parse::<u16>(),
        );
        let (Ok(onid), Ok(tsid), Ok(sid)) = parsed else {
            warn!("{path:?}:{}: bad channel ids", lineno + 1);
            continue;
        };
        let transponder = fields
            .get(4)
            .and_then(|f| f.trim().parse::<u32>().ok())
            .unwrap_or(0);
        channels.add(Channel::new(
            ChannelId::new(source, onid, tsid, sid),
            fields[0].trim(),
            transponder,
        ));
    }
    Ok(channels)
}

/// Read the capture and feed every complete EIT/TDT section to the
/// filter. Returns the number of packets consumed.
fn feed_capture(path: &PathBuf, filter: &EitFilter) -> Result<u64, std::io::Error> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut collectors: HashMap<u16, SectionCollector> = HashMap::new();
    let mut buf = [0u8; TS_PACKET_SIZE];
    let mut packets = 0u64;

    loop {
        match reader.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
        packets += 1;
        let Ok(packet) = TsPacket::parse(&buf) else {
            continue;
        };
        if packet.transport_error || packet.is_scrambled() || packet.payload.is_empty() {
            continue;
        }
        let table_hint = section_table_hint(&packet);
        if !matches_any(packet.pid, table_hint) {
            continue;
        }
        let collector = collectors.entry(packet.pid).or_default();
        if collector.add(
            packet.payload,
            packet.continuity_counter,
            packet.payload_unit_start,
        ) {
            if let Some(section) = collector.section().map(|s| s.to_vec()) {
                collector.clear();
                if let Some(&table_id) = section.first() {
                    if EitFilter::matches(packet.pid, table_id) {
                        filter.process(packet.pid, table_id, &section);
                    }
                }
            }
        }
    }
    Ok(packets)
}

/// Peek at the table id of a section starting in this packet, if any.
fn section_table_hint(packet: &TsPacket<'_>) -> Option<u8> {
    if !packet.payload_unit_start {
        return None;
    }
    let pointer = *packet.payload.first()? as usize;
    packet.payload.get(1 + pointer).copied()
}

/// Keep collecting on a PID as long as it could carry our tables.
fn matches_any(pid: u16, table_hint: Option<u8>) -> bool {
    match table_hint {
        Some(table_id) => EitFilter::matches(pid, table_id),
        // mid-section packet: the collector decides
        None => EitFilter::filters().iter().any(|f| f.pid == pid),
    }
}

/// Dump all collected schedules, channels sorted by name.
fn print_guide(channels: &StateLock<Channels>, schedules: &StateLock<Schedules>) {
    let channels = channels.read();
    let schedules = schedules.read();
    let mut sorted: Vec<_> = channels.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    for channel in sorted {
        let Some(schedule) = schedules.get(&channel.id) else {
            continue;
        };
        println!("{} ({})", channel.name, channel.id);
        for event in schedule.events().iter().filter(|e| e.start_time > 0) {
            let start = match Local.timestamp_opt(event.start_time, 0) {
                chrono::LocalResult::Single(t) | chrono::LocalResult::Ambiguous(t, _) => {
                    t.format("%Y-%m-%d %H:%M").to_string()
                }
                chrono::LocalResult::None => event.start_time.to_string(),
            };
            println!(
                "  {} {:>3}m  {}",
                start,
                event.duration / 60,
                event.title.as_deref().unwrap_or("(no title)")
            );
            if let Some(short_text) = &event.short_text {
                println!("        {short_text}");
            }
        }
    }
}

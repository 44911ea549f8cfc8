//! EIT section frame (ETSI EN 300 468 §5.2.4).

use super::section::{Section, SectionError};
use super::{table_id, time};

/// A parsed EIT section. The event loop is kept as raw bytes and walked
/// lazily via [`events`](EitSection::events).
#[derive(Debug, Clone)]
pub struct EitSection<'a> {
    pub table_id: u8,
    pub service_id: u16,
    pub version: u8,
    pub current_next: bool,
    pub section_number: u8,
    pub last_section_number: u8,
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub segment_last_section_number: u8,
    pub last_table_id: u8,
    events: &'a [u8],
}

/// One row of an EIT event loop.
#[derive(Debug, Clone)]
pub struct EitEvent<'a> {
    pub event_id: u16,
    /// Unix seconds; zero means "no start time", negative marks an NVOD
    /// reference event.
    pub start_time: i64,
    pub duration: i32,
    /// Raw running_status field (3 bits).
    pub running_status: u8,
    pub free_ca: bool,
    /// The raw descriptor loop of this event.
    pub descriptors: &'a [u8],
}

impl<'a> EitEvent<'a> {
    pub fn end_time(&self) -> i64 {
        self.start_time + self.duration as i64
    }
}

impl<'a> EitSection<'a> {
    /// Frame and CRC-check an EIT section starting at its table id.
    pub fn parse(data: &'a [u8]) -> Result<Self, SectionError> {
        let section = Section::parse(data)?;
        let h = &section.header;
        if !(table_id::EIT_PRESENT_FOLLOWING..=table_id::EIT_SCHEDULE_LAST).contains(&h.table_id) {
            return Err(SectionError::TableId(h.table_id));
        }
        if section.payload.len() < 6 {
            return Err(SectionError::Truncated);
        }
        let p = section.payload;
        Ok(EitSection {
            table_id: h.table_id,
            service_id: h.table_id_extension,
            version: h.version,
            current_next: h.current_next,
            section_number: h.section_number,
            last_section_number: h.last_section_number,
            transport_stream_id: u16::from_be_bytes([p[0], p[1]]),
            original_network_id: u16::from_be_bytes([p[2], p[3]]),
            segment_last_section_number: p[4],
            last_table_id: p[5],
            events: &p[6..],
        })
    }

    /// Walk the event loop. A malformed tail terminates the walk; the CRC
    /// has already vouched for the bytes, so this only guards against
    /// inconsistent loop lengths.
    pub fn events(&self) -> impl Iterator<Item = EitEvent<'a>> + '_ {
        let data = self.events;
        let mut offset = 0;
        std::iter::from_fn(move || {
            if offset + 12 > data.len() {
                return None;
            }
            let e = &data[offset..];
            let start_time = time::decode_utc(&[e[2], e[3], e[4], e[5], e[6]]);
            let duration = time::decode_duration(&[e[7], e[8], e[9]]);
            let loop_len = ((e[10] as usize & 0x0F) << 8) | e[11] as usize;
            if offset + 12 + loop_len > data.len() {
                return None;
            }
            let event = EitEvent {
                event_id: u16::from_be_bytes([e[0], e[1]]),
                start_time,
                duration,
                running_status: (e[10] >> 5) & 0x07,
                free_ca: e[10] & 0x10 != 0,
                descriptors: &data[offset + 12..offset + 12 + loop_len],
            };
            offset += 12 + loop_len;
            Some(event)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::si::section::append_crc;
    use crate::si::testutil::EitSectionBuilder;

    #[test]
    fn test_parse_header_and_events() {
        let data = EitSectionBuilder::new(0x50, 0x2EE3)
            .version(4)
            .event(100, 1_700_000_000, 5400, 4)
            .build();
        let sec = EitSection::parse(&data).unwrap();
        assert_eq!(sec.table_id, 0x50);
        assert_eq!(sec.service_id, 0x2EE3);
        assert_eq!(sec.version, 4);
        assert_eq!(sec.transport_stream_id, 0x0401);
        assert_eq!(sec.original_network_id, 0x0085);
        assert_eq!(sec.last_table_id, 0x50);

        let events: Vec<_> = sec.events().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, 100);
        assert_eq!(events[0].start_time, 1_700_000_000);
        assert_eq!(events[0].duration, 5400);
        assert_eq!(events[0].running_status, 4);
    }

    #[test]
    fn test_parse_rejects_foreign_table_id() {
        let mut wrong = EitSectionBuilder::new(0x50, 1).build();
        wrong[0] = 0x42;
        // fix up the CRC for the altered table id
        wrong.truncate(wrong.len() - 4);
        append_crc(&mut wrong);
        assert!(matches!(
            EitSection::parse(&wrong),
            Err(SectionError::TableId(0x42))
        ));
    }

    #[test]
    fn test_empty_event_loop() {
        let data = EitSectionBuilder::new(0x4E, 1).section(0, 1).build();
        let sec = EitSection::parse(&data).unwrap();
        assert_eq!(sec.events().count(), 0);
    }
}

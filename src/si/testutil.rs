//! Builders for synthetic EIT/TDT sections.
//!
//! Used by the test suites to fabricate wire-correct sections (valid
//! lengths and CRC) without a broadcast capture at hand.

use super::section::append_crc;
use super::time::{encode_duration, encode_utc};

/// One event row for [`EitSectionBuilder`].
#[derive(Debug, Clone)]
pub struct EventSpec {
    pub event_id: u16,
    pub start_time: i64,
    pub duration: i32,
    pub running_status: u8,
    pub descriptors: Vec<u8>,
}

/// Builds a single EIT section with a valid CRC.
#[derive(Debug, Clone)]
pub struct EitSectionBuilder {
    pub table_id: u8,
    pub service_id: u16,
    pub version: u8,
    pub section_number: u8,
    pub last_section_number: u8,
    pub segment_last_section_number: Option<u8>,
    pub last_table_id: Option<u8>,
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    events: Vec<EventSpec>,
}

impl EitSectionBuilder {
    pub fn new(table_id: u8, service_id: u16) -> Self {
        Self {
            table_id,
            service_id,
            version: 0,
            section_number: 0,
            last_section_number: 0,
            segment_last_section_number: None,
            last_table_id: None,
            transport_stream_id: 0x0401,
            original_network_id: 0x0085,
            events: Vec::new(),
        }
    }

    pub fn version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub fn section(mut self, number: u8, last: u8) -> Self {
        self.section_number = number;
        self.last_section_number = last;
        self
    }

    pub fn ids(mut self, original_network_id: u16, transport_stream_id: u16) -> Self {
        self.original_network_id = original_network_id;
        self.transport_stream_id = transport_stream_id;
        self
    }

    pub fn event(self, event_id: u16, start_time: i64, duration: i32, running_status: u8) -> Self {
        self.event_with_descriptors(event_id, start_time, duration, running_status, Vec::new())
    }

    pub fn event_with_descriptors(
        mut self,
        event_id: u16,
        start_time: i64,
        duration: i32,
        running_status: u8,
        descriptors: Vec<u8>,
    ) -> Self {
        self.events.push(EventSpec {
            event_id,
            start_time,
            duration,
            running_status,
            descriptors,
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.service_id.to_be_bytes());
        body.push(0xC0 | (self.version << 1) | 1);
        body.push(self.section_number);
        body.push(self.last_section_number);
        body.extend_from_slice(&self.transport_stream_id.to_be_bytes());
        body.extend_from_slice(&self.original_network_id.to_be_bytes());
        body.push(
            self.segment_last_section_number
                .unwrap_or(self.last_section_number),
        );
        body.push(self.last_table_id.unwrap_or(self.table_id));
        for ev in &self.events {
            body.extend_from_slice(&ev.event_id.to_be_bytes());
            if ev.start_time < 0 {
                body.extend_from_slice(&[0xFF; 5]);
            } else {
                body.extend_from_slice(&encode_utc(ev.start_time));
            }
            body.extend_from_slice(&encode_duration(ev.duration));
            body.push((ev.running_status << 5) | ((ev.descriptors.len() >> 8) as u8 & 0x0F));
            body.push(ev.descriptors.len() as u8);
            body.extend_from_slice(&ev.descriptors);
        }
        let len = body.len() + 4;
        let mut section = vec![self.table_id, 0x80 | (len >> 8) as u8 & 0x0F | 0x70, len as u8];
        section.extend_from_slice(&body);
        append_crc(&mut section);
        section
    }
}

/// Build a TDT section carrying the given UTC time.
pub fn build_tdt(utc_time: i64) -> Vec<u8> {
    let mut section = vec![0x70, 0x70, 0x05];
    section.extend_from_slice(&encode_utc(utc_time));
    section
}

fn descriptor(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut d = vec![tag, body.len() as u8];
    d.extend_from_slice(body);
    d
}

/// Encode a short event descriptor (0x4D).
pub fn short_event(language: &[u8; 3], name: &str, text: &str) -> Vec<u8> {
    let mut body = language.to_vec();
    body.push(name.len() as u8);
    body.extend_from_slice(name.as_bytes());
    body.push(text.len() as u8);
    body.extend_from_slice(text.as_bytes());
    descriptor(0x4D, &body)
}

/// Encode an extended event descriptor (0x4E) with no items.
pub fn extended_event(language: &[u8; 3], number: u8, last_number: u8, text: &str) -> Vec<u8> {
    let mut body = vec![(number << 4) | (last_number & 0x0F)];
    body.extend_from_slice(language);
    body.push(0); // no items
    body.push(text.len() as u8);
    body.extend_from_slice(text.as_bytes());
    descriptor(0x4E, &body)
}

/// Encode a content descriptor (0x54).
pub fn content(nibbles: &[(u8, u8)]) -> Vec<u8> {
    let body: Vec<u8> = nibbles
        .iter()
        .flat_map(|&(n1, n2)| [(n1 << 4) | (n2 & 0x0F), 0])
        .collect();
    descriptor(0x54, &body)
}

/// Encode a parental rating descriptor (0x55) with one entry.
pub fn parental_rating(country: &[u8; 3], raw: u8) -> Vec<u8> {
    let mut body = country.to_vec();
    body.push(raw);
    descriptor(0x55, &body)
}

/// Encode a PDC descriptor (0x69).
pub fn pdc(day: u32, month: u32, hour: u32, minute: u32) -> Vec<u8> {
    let pil = (day << 15) | (month << 11) | (hour << 6) | minute;
    descriptor(0x69, &[0xF0 | (pil >> 16) as u8, (pil >> 8) as u8, pil as u8])
}

/// Encode a time shifted event descriptor (0x4F).
pub fn time_shifted_event(reference_service_id: u16, reference_event_id: u16) -> Vec<u8> {
    let mut body = reference_service_id.to_be_bytes().to_vec();
    body.extend_from_slice(&reference_event_id.to_be_bytes());
    descriptor(0x4F, &body)
}

/// Encode a linkage descriptor (0x4A).
pub fn linkage(
    transport_stream_id: u16,
    original_network_id: u16,
    service_id: u16,
    linkage_type: u8,
    private_data: &[u8],
) -> Vec<u8> {
    let mut body = transport_stream_id.to_be_bytes().to_vec();
    body.extend_from_slice(&original_network_id.to_be_bytes());
    body.extend_from_slice(&service_id.to_be_bytes());
    body.push(linkage_type);
    body.extend_from_slice(private_data);
    descriptor(0x4A, &body)
}

/// Encode a component descriptor (0x50).
pub fn component(
    stream_content_ext: u8,
    stream_content: u8,
    component_type: u8,
    language: &[u8; 3],
    description: &str,
) -> Vec<u8> {
    let mut body = vec![(stream_content_ext << 4) | (stream_content & 0x0F), component_type, 0];
    body.extend_from_slice(language);
    body.extend_from_slice(description.as_bytes());
    descriptor(0x50, &body)
}

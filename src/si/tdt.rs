//! TDT section frame (ETSI EN 300 468 §5.2.5).
//!
//! The TDT is a short-syntax section carrying nothing but the current UTC
//! time, and it has no CRC.

use super::section::SectionError;
use super::{table_id, time};

/// A parsed TDT section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TdtSection {
    /// Broadcast UTC time in Unix seconds.
    pub utc_time: i64,
}

impl TdtSection {
    /// Parse a TDT section starting at its table id.
    pub fn parse(data: &[u8]) -> Result<Self, SectionError> {
        if data.len() < 8 {
            return Err(SectionError::TooShort);
        }
        if data[0] != table_id::TDT {
            return Err(SectionError::TableId(data[0]));
        }
        let len = ((data[1] as usize & 0x0F) << 8) | data[2] as usize;
        if len < 5 {
            return Err(SectionError::InvalidLength);
        }
        Ok(TdtSection {
            utc_time: time::decode_utc(&[data[3], data[4], data[5], data[6], data[7]]),
        })
    }
}

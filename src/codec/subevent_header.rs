//! `SubeventHeader`: prefixes each CS subevent's step records within the
//! subevents region of a procedure buffer.
//!
//! ```text
//! start_acl_conn_event : u16 LE
//! freq_compensation    : i16 LE
//! status byte          : ranging_done_status[3:0] | subevent_done_status[7:4]
//! abort byte           : ranging_abort_reason[3:0] | subevent_abort_reason[7:4]
//! ref_power_level      : i8
//! num_steps_reported   : u8
//! ```

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Procedure/subevent completion state reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DoneStatus {
    /// More subevents to come for this procedure/subevent.
    Partial = 0x0,
    /// All results for this procedure/subevent have been reported.
    Complete = 0x1,
    /// The controller gave up; no further results for this run.
    Aborted = 0xF,
}

impl DoneStatus {
    pub fn from_nibble(n: u8) -> Self {
        match n & 0x0F {
            0x1 => DoneStatus::Complete,
            0xF => DoneStatus::Aborted,
            _ => DoneStatus::Partial,
        }
    }

    pub fn to_nibble(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubeventHeader {
    pub start_acl_conn_event: u16,
    pub freq_compensation: i16,
    pub ranging_done_status: DoneStatus,
    pub subevent_done_status: DoneStatus,
    pub ranging_abort_reason: u8,
    pub subevent_abort_reason: u8,
    pub ref_power_level: i8,
    pub num_steps_reported: u8,
}

impl SubeventHeader {
    pub const WIRE_SIZE: usize = 8;

    pub fn encode<W: Write>(&self, dest: &mut W) -> io::Result<()> {
        dest.write_u16::<LittleEndian>(self.start_acl_conn_event)?;
        dest.write_i16::<LittleEndian>(self.freq_compensation)?;
        let status_byte =
            self.ranging_done_status.to_nibble() | (self.subevent_done_status.to_nibble() << 4);
        dest.write_u8(status_byte)?;
        let abort_byte = (self.ranging_abort_reason & 0x0F) | ((self.subevent_abort_reason & 0x0F) << 4);
        dest.write_u8(abort_byte)?;
        dest.write_i8(self.ref_power_level)?;
        dest.write_u8(self.num_steps_reported)?;
        Ok(())
    }

    pub fn decode<R: Read>(src: &mut R) -> io::Result<Self> {
        let start_acl_conn_event = src.read_u16::<LittleEndian>()?;
        let freq_compensation = src.read_i16::<LittleEndian>()?;
        let status_byte = src.read_u8()?;
        let abort_byte = src.read_u8()?;
        let ref_power_level = src.read_i8()?;
        let num_steps_reported = src.read_u8()?;
        Ok(SubeventHeader {
            start_acl_conn_event,
            freq_compensation,
            ranging_done_status: DoneStatus::from_nibble(status_byte),
            subevent_done_status: DoneStatus::from_nibble(status_byte >> 4),
            ranging_abort_reason: abort_byte & 0x0F,
            subevent_abort_reason: abort_byte >> 4,
            ref_power_level,
            num_steps_reported,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_its_wire_bytes() {
        let hdr = SubeventHeader {
            start_acl_conn_event: 0xBEEF,
            freq_compensation: -100,
            ranging_done_status: DoneStatus::Complete,
            subevent_done_status: DoneStatus::Partial,
            ranging_abort_reason: 0x3,
            subevent_abort_reason: 0x7,
            ref_power_level: -40,
            num_steps_reported: 12,
        };
        let mut buf = Vec::new();
        hdr.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), SubeventHeader::WIRE_SIZE);
        let decoded = SubeventHeader::decode(&mut &buf[..]).unwrap();
        assert_eq!(decoded, hdr);
    }
}

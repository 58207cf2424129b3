//! `SegmentHeader`: the one-byte prefix on every On-demand RD
//! notification/indication.
//!
//! ```text
//! bit 0     : first_seg
//! bit 1     : last_seg
//! bits 2..7 : seg_counter (rolling, wraps at 64)
//! ```

use std::io::{self, Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub first_seg: bool,
    pub last_seg: bool,
    pub seg_counter: u8,
}

impl SegmentHeader {
    pub const WIRE_SIZE: usize = 1;
    pub const COUNTER_MODULUS: u8 = 64;

    pub fn encode<W: Write>(&self, dest: &mut W) -> io::Result<()> {
        let mut byte = (self.seg_counter & 0x3F) << 2;
        if self.first_seg {
            byte |= 0b01;
        }
        if self.last_seg {
            byte |= 0b10;
        }
        dest.write_u8(byte)
    }

    pub fn decode<R: Read>(src: &mut R) -> io::Result<Self> {
        let byte = src.read_u8()?;
        Ok(SegmentHeader {
            first_seg: byte & 0b01 != 0,
            last_seg: byte & 0b10 != 0,
            seg_counter: (byte >> 2) & 0x3F,
        })
    }
}

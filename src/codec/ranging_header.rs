//! `RangingHeader`: the first four bytes of every flat procedure image.
//!
//! ```text
//! byte 0: ranging_counter[7:0]
//! byte 1: ranging_counter[11:8] (low nibble) | config_id[3:0] (high nibble)
//! byte 2: selected_tx_power (i8)
//! byte 3: antenna_paths_mask (u8)
//! ```

use std::io::{self, Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};

use crate::types::RangingCounter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangingHeader {
    pub ranging_counter: RangingCounter,
    pub config_id: u8,
    pub selected_tx_power: i8,
    pub antenna_paths_mask: u8,
}

impl RangingHeader {
    pub const WIRE_SIZE: usize = 4;

    pub fn encode<W: Write>(&self, dest: &mut W) -> io::Result<()> {
        let counter = self.ranging_counter.get() & RangingCounter::MASK;
        let config_id = self.config_id & 0x0F;
        dest.write_u8((counter & 0xFF) as u8)?;
        dest.write_u8(((counter >> 8) as u8 & 0x0F) | (config_id << 4))?;
        dest.write_i8(self.selected_tx_power)?;
        dest.write_u8(self.antenna_paths_mask)?;
        Ok(())
    }

    pub fn decode<R: Read>(src: &mut R) -> io::Result<Self> {
        let lo = src.read_u8()? as u16;
        let b1 = src.read_u8()?;
        let counter = RangingCounter::new(lo | (((b1 & 0x0F) as u16) << 8));
        let config_id = b1 >> 4;
        let selected_tx_power = src.read_i8()?;
        let antenna_paths_mask = src.read_u8()?;
        Ok(RangingHeader {
            ranging_counter: counter,
            config_id,
            selected_tx_power,
            antenna_paths_mask,
        })
    }
}

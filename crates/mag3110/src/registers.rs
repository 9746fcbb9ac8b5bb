//! MAG3110 register map, the subset this driver touches.

use bitflags::bitflags;
use num_enum::IntoPrimitive;

/// Factory 7-bit bus address.
pub const DEFAULT_ADDRESS: u8 = 0x0E;

/// Contents of [`Register::WhoAmI`] on a genuine part.
pub const WHO_AM_I_VALUE: u8 = 0xC4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Register {
    DrStatus = 0x00,
    /// First of six output bytes, X/Y/Z each MSB first.
    OutXMsb = 0x01,
    OutXLsb = 0x02,
    OutYMsb = 0x03,
    OutYLsb = 0x04,
    OutZMsb = 0x05,
    OutZLsb = 0x06,
    WhoAmI = 0x07,
    SysMod = 0x08,
    DieTemp = 0x0F,
    CtrlReg1 = 0x10,
    CtrlReg2 = 0x11,
}

impl Register {
    /// Register address as sent on the wire.
    pub fn addr(self) -> u16 {
        u16::from(u8::from(self))
    }
}

bitflags! {
    /// CTRL_REG1. With all rate bits clear the part runs at 80 Hz output
    /// rate with 16x oversampling.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct CtrlReg1: u8 {
        const DR2 = 0b1000_0000;
        const DR1 = 0b0100_0000;
        const DR0 = 0b0010_0000;
        const OS1 = 0b0001_0000;
        const OS0 = 0b0000_1000;
        /// Fast read: 8-bit output, skips the LSB registers.
        const FAST_READ = 0b0000_0100;
        /// Trigger a single measurement.
        const TRIGGER = 0b0000_0010;
        /// Active (continuous) mode.
        const ACTIVE = 0b0000_0001;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct CtrlReg2: u8 {
        /// Reset the sensor magnetically before every acquisition.
        const AUTO_MRST_EN = 0b1000_0000;
        /// Output raw values, user offsets not applied.
        const RAW = 0b0010_0000;
        /// One-shot magnetic reset.
        const MAG_RST = 0b0001_0000;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_words_match_datasheet_values() {
        assert_eq!(CtrlReg2::AUTO_MRST_EN.bits(), 0x80);
        assert_eq!(CtrlReg1::ACTIVE.bits(), 0x01);
        assert_eq!(Register::WhoAmI.addr(), 0x07);
        assert_eq!(Register::OutXMsb.addr(), 0x01);
    }
}

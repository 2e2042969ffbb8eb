use bit::BitIndex;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManufacturerId(pub u8);

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceId(pub u8);

/// Status register, opcode 0x05. Bit 0 is the write-in-progress latch.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct StatusRegister {
    pub status_write_disable: bool,
    pub protected_from_bottom: bool,
    pub protected_block: u8,
    pub write_enable_latch: bool,
    pub write_in_progress: bool,
}

impl From<u8> for StatusRegister {
    fn from(val: u8) -> StatusRegister {
        StatusRegister {
            status_write_disable: val.bit(7),
            protected_from_bottom: val.bit(5),
            protected_block: val.bit_range(2..5) | ((val.bit(6) as u8) << 3),
            write_enable_latch: val.bit(1),
            write_in_progress: val.bit(0),
        }
    }
}

/// Flag status register, opcode 0x70. Bit 7 goes high when the program/erase
/// controller is ready; opposite polarity to the WIP bit of [`StatusRegister`].
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct FlagStatusRegister {
    pub ready: bool,
    pub erase_suspended: bool,
    pub erase_failed: bool,
    pub program_failed: bool,
    pub program_suspended: bool,
    pub protection_error: bool,
    pub four_byte_addressing: bool,
}

impl From<u8> for FlagStatusRegister {
    fn from(val: u8) -> FlagStatusRegister {
        FlagStatusRegister {
            ready: val.bit(7),
            erase_suspended: val.bit(6),
            erase_failed: val.bit(5),
            program_failed: val.bit(4),
            program_suspended: val.bit(2),
            protection_error: val.bit(1),
            four_byte_addressing: val.bit(0),
        }
    }
}

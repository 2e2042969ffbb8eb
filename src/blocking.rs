use crate::{
    address::{Address, SECTOR_SIZE},
    command::{Command, MAX_FRAME_LEN},
    error::Error,
    register::{DeviceId, FlagStatusRegister, ManufacturerId, StatusRegister},
    DEFAULT_POLL_LIMIT,
};
use embedded_hal::spi::{Operation, SpiDevice};

/// Type alias for the MT25QL64ABA
pub type MT25QL64ABA<SPI> = MT25QL<0x7FFFFF, SPI>;

/// Type alias for the MT25QL128ABA
pub type MT25QL128ABA<SPI> = MT25QL<0xFFFFFF, SPI>;

/// Type alias for the MT25QL256ABA. With 3-byte addressing only the first
/// 16 MiB of the part is reachable.
pub type MT25QL256ABA<SPI> = MT25QL<0xFFFFFF, SPI>;

/// Type alias for the MT25QL512ABB. With 3-byte addressing only the first
/// 16 MiB of the part is reachable.
pub type MT25QL512ABB<SPI> = MT25QL<0xFFFFFF, SPI>;

/// Type alias for the MT25QL01GBBB. With 3-byte addressing only the first
/// 16 MiB of the part is reachable.
pub type MT25QL01GBBB<SPI> = MT25QL<0xFFFFFF, SPI>;

/// The generic MT25QL driver. `SIZE` is the highest valid address.
///
/// Owns the [`SpiDevice`] binding to one physical chip; create exactly one
/// instance per chip. Every command is issued as a single `SpiDevice`
/// transaction, so chip-select framing is balanced on all exit paths. The
/// driver holds no device state between calls: every decision re-reads the
/// status registers on the wire.
pub struct MT25QL<const SIZE: u32, SPI>
where
    SPI: SpiDevice,
{
    spi: SPI,
    poll_limit: u32,
}

impl<const SIZE: u32, SPI, E> MT25QL<SIZE, SPI>
where
    SPI: SpiDevice<Error = E>,
{
    pub fn new(spi: SPI) -> Self {
        Self {
            spi,
            poll_limit: DEFAULT_POLL_LIMIT,
        }
    }

    pub const fn capacity() -> usize {
        SIZE as usize + 1
    }

    /// Bound on consecutive status polls before [`Error::Timeout`] is
    /// returned. The polls themselves never back off or sleep; callers that
    /// need pacing should wrap the driver.
    pub fn set_poll_limit(&mut self, limit: u32) {
        self.poll_limit = limit;
    }

    pub fn verify_addr(addr: Address) -> Result<u32, Error<E>> {
        let val = addr.masked();
        if val > SIZE {
            return Err(Error::OutOfBounds);
        }
        Ok(val)
    }

    fn command_write(&mut self, cmd: Command) -> Result<(), Error<E>> {
        let mut frame = [0; MAX_FRAME_LEN];
        self.spi.write(cmd.encode(&mut frame)).map_err(Error::Spi)
    }

    fn command_read(&mut self, cmd: Command, buff: &mut [u8]) -> Result<(), Error<E>> {
        let mut frame = [0; MAX_FRAME_LEN];
        self.spi
            .transaction(&mut [
                Operation::Write(cmd.encode(&mut frame)),
                Operation::Read(buff),
            ])
            .map_err(Error::Spi)
    }

    /// Frame and payload must travel under one chip-select assertion; the
    /// device reads a fresh command at every select edge.
    fn command_write_data(&mut self, cmd: Command, buff: &[u8]) -> Result<(), Error<E>> {
        let mut frame = [0; MAX_FRAME_LEN];
        self.spi
            .transaction(&mut [
                Operation::Write(cmd.encode(&mut frame)),
                Operation::Write(buff),
            ])
            .map_err(Error::Spi)
    }

    /// Read the status register as the device reports it right now.
    pub fn read_status(&mut self) -> Result<StatusRegister, Error<E>> {
        let mut out = [0; 1];
        self.command_read(Command::ReadStatus, &mut out)?;
        Ok(out[0].into())
    }

    /// Read the flag status register.
    pub fn read_flag_status(&mut self) -> Result<FlagStatusRegister, Error<E>> {
        let mut out = [0; 1];
        self.command_read(Command::ReadFlagStatus, &mut out)?;
        Ok(out[0].into())
    }

    /// Poll the status register until the write-in-progress bit clears.
    pub fn wait_ready(&mut self) -> Result<(), Error<E>> {
        for _ in 0..self.poll_limit {
            if !self.read_status()?.write_in_progress {
                return Ok(());
            }
        }
        Err(Error::Timeout)
    }

    /// Poll the flag status register until the program/erase controller
    /// reports ready.
    ///
    /// Not interchangeable with [`Self::wait_ready`]: different opcode,
    /// opposite bit polarity, and the two observe different internal latches.
    /// Erase and program sequences need both.
    pub fn wait_ready_erase(&mut self) -> Result<(), Error<E>> {
        for _ in 0..self.poll_limit {
            if self.read_flag_status()?.ready {
                return Ok(());
            }
        }
        Err(Error::Timeout)
    }

    /// Read the JEDEC manufacturer and device id.
    ///
    /// Valid even while an internal operation is in progress, so no
    /// ready-poll is issued. A mismatched id is the caller's policy to
    /// handle, not a driver error.
    pub fn identify(&mut self) -> Result<(ManufacturerId, DeviceId), Error<E>> {
        let mut id = [0; 3];
        self.command_read(Command::ReadId, &mut id)?;
        Ok((ManufacturerId(id[0]), DeviceId(id[1])))
    }

    /// Arm the write-enable latch. Consumed by the next destructive command.
    pub fn write_enable(&mut self) -> Result<(), Error<E>> {
        self.command_write(Command::WriteEnable)
    }

    /// Clear the write-enable latch.
    pub fn write_disable(&mut self) -> Result<(), Error<E>> {
        self.command_write(Command::WriteDisable)
    }

    /// Protect the sector containing `addr`. The latch must be armed first.
    pub fn protect_sector(&mut self, addr: Address) -> Result<(), Error<E>> {
        Self::verify_addr(addr)?;
        self.command_write(Command::ProtectSector(addr))
    }

    /// Unprotect the sector containing `addr`. The latch must be armed first.
    pub fn unprotect_sector(&mut self, addr: Address) -> Result<(), Error<E>> {
        Self::verify_addr(addr)?;
        self.command_write(Command::UnprotectSector(addr))
    }

    /// Read `buff.len()` bytes starting at `addr`.
    pub fn read(&mut self, addr: Address, buff: &mut [u8]) -> Result<(), Error<E>> {
        crate::check_range(Self::capacity(), addr.masked(), buff.len())?;
        self.wait_ready_erase()?;
        self.wait_ready()?;
        self.command_read(Command::Read(addr), buff)?;
        self.wait_ready()
    }

    /// Program `buff` starting at `addr`.
    ///
    /// The buffer is cut into chunks of
    /// `min(remaining, 256 - (address % 256))` bytes so no transmission
    /// crosses a 256-byte page boundary; the device wraps within a page
    /// instead of advancing. The landing sector is unprotected once for the
    /// starting address, and the write-enable latch is re-armed before every
    /// page program because each destructive command consumes it.
    pub fn program(&mut self, addr: Address, buff: &[u8]) -> Result<(), Error<E>> {
        crate::check_range(Self::capacity(), addr.masked(), buff.len())?;

        self.wait_ready()?;
        self.write_enable()?;

        self.wait_ready()?;
        self.command_write(Command::UnprotectSector(addr))?;
        self.wait_ready_erase()?;

        // The unprotect consumed the latch; arm it again before programming.
        self.wait_ready()?;
        self.write_enable()?;

        let mut current = Address(addr.masked());
        let mut remaining = buff;
        while !remaining.is_empty() {
            self.wait_ready_erase()?;
            let chunk_len = (current.page_remaining() as usize).min(remaining.len());
            let (chunk, rest) = remaining.split_at(chunk_len);

            self.wait_ready()?;
            self.write_enable()?;
            self.wait_ready()?;
            self.command_write_data(Command::ProgramPage(current), chunk)?;

            current = Address(current.0 + chunk_len as u32);
            remaining = rest;
        }

        self.write_disable()?;
        self.wait_ready()
    }

    /// Erase the 4kB sector containing `addr`.
    ///
    /// The address is aligned down to the sector boundary before it is
    /// encoded; an unaligned erase address never reaches the device.
    pub fn erase_block_4k(&mut self, addr: Address) -> Result<(), Error<E>> {
        Self::verify_addr(addr)?;
        self.wait_ready()?;
        self.write_enable()?;
        self.wait_ready()?;
        self.wait_ready_erase()?;
        self.command_write(Command::SectorErase(addr))?;
        self.wait_ready()?;
        self.wait_ready_erase()
    }

    /// Erase the 32kB block containing `addr`.
    pub fn erase_block_32k(&mut self, addr: Address) -> Result<(), Error<E>> {
        Self::verify_addr(addr)?;
        self.wait_ready()?;
        self.write_enable()?;
        self.wait_ready()?;
        self.command_write(Command::Block32Erase(addr))?;
        self.wait_ready()
    }

    /// Erase the 64kB block containing `addr`.
    pub fn erase_block_64k(&mut self, addr: Address) -> Result<(), Error<E>> {
        Self::verify_addr(addr)?;
        self.wait_ready()?;
        self.write_enable()?;
        self.wait_ready()?;
        self.command_write(Command::Block64Erase(addr))?;
        self.wait_ready()
    }

    /// Erase the whole chip.
    pub fn erase_chip(&mut self) -> Result<(), Error<E>> {
        self.wait_ready()?;
        self.write_enable()?;
        self.wait_ready()?;
        self.command_write(Command::ChipErase)?;
        self.wait_ready()
    }

    /// Clear all block protection bits by writing zero to status register 1.
    ///
    /// The write-enable issued here also covers the status write; no second
    /// arm is needed between the two frames.
    pub fn global_unprotect(&mut self) -> Result<(), Error<E>> {
        self.wait_ready()?;
        self.write_enable()?;
        self.wait_ready()?;
        self.command_write(Command::WriteStatus(0))?;
        self.wait_ready()
    }
}

/// Implementation of the `NorFlash` traits of the `embedded_storage` crate.
mod es {
    use super::*;
    use core::fmt::Debug;
    use embedded_storage::nor_flash::{
        check_erase, check_read, check_write, ErrorType, MultiwriteNorFlash, NorFlash,
        NorFlashError, NorFlashErrorKind, ReadNorFlash,
    };

    impl<E> From<NorFlashErrorKind> for Error<E> {
        fn from(e: NorFlashErrorKind) -> Self {
            match e {
                NorFlashErrorKind::NotAligned => Error::NotAligned,
                NorFlashErrorKind::OutOfBounds => Error::OutOfBounds,
                _ => Error::Value,
            }
        }
    }

    impl<SpiError> NorFlashError for Error<SpiError>
    where
        SpiError: Debug,
    {
        fn kind(&self) -> NorFlashErrorKind {
            match self {
                Error::OutOfBounds => NorFlashErrorKind::OutOfBounds,
                Error::NotAligned => NorFlashErrorKind::NotAligned,
                Error::Value => NorFlashErrorKind::Other,
                Error::Spi(_) => NorFlashErrorKind::Other,
                Error::Timeout => NorFlashErrorKind::Other,
            }
        }
    }

    impl<const SIZE: u32, SPI, E> ErrorType for MT25QL<SIZE, SPI>
    where
        SPI: SpiDevice<Error = E>,
        E: Debug,
    {
        type Error = Error<E>;
    }

    impl<const SIZE: u32, SPI, E> ReadNorFlash for MT25QL<SIZE, SPI>
    where
        SPI: SpiDevice<Error = E>,
        E: Debug,
    {
        const READ_SIZE: usize = 1;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            check_read(self, offset, bytes.len())?;
            self.read(Address(offset), bytes)
        }

        fn capacity(&self) -> usize {
            Self::capacity()
        }
    }

    impl<const SIZE: u32, SPI, E> NorFlash for MT25QL<SIZE, SPI>
    where
        SPI: SpiDevice<Error = E>,
        E: Debug,
    {
        const WRITE_SIZE: usize = 1;
        const ERASE_SIZE: usize = SECTOR_SIZE as usize;

        fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
            check_erase(self, from, to)?;
            let mut idx = from;
            while idx < to {
                self.erase_block_4k(Address(idx))?;
                idx += SECTOR_SIZE;
            }
            Ok(())
        }

        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            check_write(self, offset, bytes.len())?;
            self.program(Address(offset), bytes)
        }
    }

    impl<const SIZE: u32, SPI, E> MultiwriteNorFlash for MT25QL<SIZE, SPI>
    where
        SPI: SpiDevice<Error = E>,
        E: Debug,
    {
    }
}

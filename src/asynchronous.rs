use crate::{
    address::{Address, SECTOR_SIZE},
    command::{Command, MAX_FRAME_LEN},
    error::Error,
    register::{DeviceId, FlagStatusRegister, ManufacturerId, StatusRegister},
    DEFAULT_POLL_LIMIT,
};
use embassy_futures::yield_now;
use embedded_hal::spi::Operation;
use embedded_hal_async::spi::SpiDevice;
use embedded_storage_async::nor_flash::{MultiwriteNorFlash, NorFlash, ReadNorFlash};

/// Type alias for the AsyncMT25QL64ABA
pub type AsyncMT25QL64ABA<SPI> = AsyncMT25QL<0x7FFFFF, SPI>;

/// Type alias for the AsyncMT25QL128ABA
pub type AsyncMT25QL128ABA<SPI> = AsyncMT25QL<0xFFFFFF, SPI>;

/// Type alias for the AsyncMT25QL256ABA. With 3-byte addressing only the
/// first 16 MiB of the part is reachable.
pub type AsyncMT25QL256ABA<SPI> = AsyncMT25QL<0xFFFFFF, SPI>;

/// Type alias for the AsyncMT25QL512ABB. With 3-byte addressing only the
/// first 16 MiB of the part is reachable.
pub type AsyncMT25QL512ABB<SPI> = AsyncMT25QL<0xFFFFFF, SPI>;

/// Type alias for the AsyncMT25QL01GBBB. With 3-byte addressing only the
/// first 16 MiB of the part is reachable.
pub type AsyncMT25QL01GBBB<SPI> = AsyncMT25QL<0xFFFFFF, SPI>;

/// The generic asynchronous MT25QL driver. Command sequencing is identical
/// to [`crate::blocking::MT25QL`]; busy-polls yield to the executor between
/// attempts instead of spinning.
pub struct AsyncMT25QL<const SIZE: u32, SPI>
where
    SPI: SpiDevice,
{
    spi: SPI,
    poll_limit: u32,
}

impl<const SIZE: u32, SPI, E> AsyncMT25QL<SIZE, SPI>
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

    /// Bound on consecutive status polls before [`Error::Timeout`] is returned.
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

    async fn command_write(&mut self, cmd: Command) -> Result<(), Error<E>> {
        let mut frame = [0; MAX_FRAME_LEN];
        self.spi
            .write(cmd.encode(&mut frame))
            .await
            .map_err(Error::Spi)
    }

    async fn command_read(&mut self, cmd: Command, buff: &mut [u8]) -> Result<(), Error<E>> {
        let mut frame = [0; MAX_FRAME_LEN];
        self.spi
            .transaction(&mut [
                Operation::Write(cmd.encode(&mut frame)),
                Operation::Read(buff),
            ])
            .await
            .map_err(Error::Spi)
    }

    async fn command_write_data(&mut self, cmd: Command, buff: &[u8]) -> Result<(), Error<E>> {
        let mut frame = [0; MAX_FRAME_LEN];
        self.spi
            .transaction(&mut [
                Operation::Write(cmd.encode(&mut frame)),
                Operation::Write(buff),
            ])
            .await
            .map_err(Error::Spi)
    }

    /// Read the status register as the device reports it right now.
    pub async fn read_status(&mut self) -> Result<StatusRegister, Error<E>> {
        let mut out = [0; 1];
        self.command_read(Command::ReadStatus, &mut out).await?;
        Ok(out[0].into())
    }

    /// Read the flag status register.
    pub async fn read_flag_status(&mut self) -> Result<FlagStatusRegister, Error<E>> {
        let mut out = [0; 1];
        self.command_read(Command::ReadFlagStatus, &mut out).await?;
        Ok(out[0].into())
    }

    /// Poll the status register until the write-in-progress bit clears.
    pub async fn wait_ready(&mut self) -> Result<(), Error<E>> {
        for _ in 0..self.poll_limit {
            if !self.read_status().await?.write_in_progress {
                return Ok(());
            }
            yield_now().await;
        }
        Err(Error::Timeout)
    }

    /// Poll the flag status register until the program/erase controller
    /// reports ready. See [`crate::blocking::MT25QL::wait_ready_erase`] for
    /// why the two polls are not interchangeable.
    pub async fn wait_ready_erase(&mut self) -> Result<(), Error<E>> {
        for _ in 0..self.poll_limit {
            if self.read_flag_status().await?.ready {
                return Ok(());
            }
            yield_now().await;
        }
        Err(Error::Timeout)
    }

    /// Read the JEDEC manufacturer and device id. No ready-poll; the id read
    /// is valid even while an internal operation is in progress.
    pub async fn identify(&mut self) -> Result<(ManufacturerId, DeviceId), Error<E>> {
        let mut id = [0; 3];
        self.command_read(Command::ReadId, &mut id).await?;
        Ok((ManufacturerId(id[0]), DeviceId(id[1])))
    }

    /// Arm the write-enable latch. Consumed by the next destructive command.
    pub async fn write_enable(&mut self) -> Result<(), Error<E>> {
        self.command_write(Command::WriteEnable).await
    }

    /// Clear the write-enable latch.
    pub async fn write_disable(&mut self) -> Result<(), Error<E>> {
        self.command_write(Command::WriteDisable).await
    }

    /// Protect the sector containing `addr`. The latch must be armed first.
    pub async fn protect_sector(&mut self, addr: Address) -> Result<(), Error<E>> {
        Self::verify_addr(addr)?;
        self.command_write(Command::ProtectSector(addr)).await
    }

    /// Unprotect the sector containing `addr`. The latch must be armed first.
    pub async fn unprotect_sector(&mut self, addr: Address) -> Result<(), Error<E>> {
        Self::verify_addr(addr)?;
        self.command_write(Command::UnprotectSector(addr)).await
    }

    /// Read `buff.len()` bytes starting at `addr`.
    pub async fn read(&mut self, addr: Address, buff: &mut [u8]) -> Result<(), Error<E>> {
        crate::check_range(Self::capacity(), addr.masked(), buff.len())?;
        self.wait_ready_erase().await?;
        self.wait_ready().await?;
        let res = self.command_read(Command::Read(addr), buff).await;
        #[cfg(feature = "defmt")]
        if res.is_err() {
            defmt::error!("Read failed at {=u32}, {=usize}", addr.0, buff.len());
        }
        res?;
        self.wait_ready().await
    }

    /// Program `buff` starting at `addr`. Same chunking and latch sequencing
    /// as the blocking driver: no chunk crosses a 256-byte page boundary and
    /// the write-enable latch is re-armed before every page program.
    pub async fn program(&mut self, addr: Address, buff: &[u8]) -> Result<(), Error<E>> {
        crate::check_range(Self::capacity(), addr.masked(), buff.len())?;

        self.wait_ready().await?;
        self.write_enable().await?;

        self.wait_ready().await?;
        self.command_write(Command::UnprotectSector(addr)).await?;
        self.wait_ready_erase().await?;

        // The unprotect consumed the latch; arm it again before programming.
        self.wait_ready().await?;
        self.write_enable().await?;

        let mut current = Address(addr.masked());
        let mut remaining = buff;
        while !remaining.is_empty() {
            self.wait_ready_erase().await?;
            let chunk_len = (current.page_remaining() as usize).min(remaining.len());
            let (chunk, rest) = remaining.split_at(chunk_len);

            self.wait_ready().await?;
            self.write_enable().await?;
            self.wait_ready().await?;
            #[cfg(feature = "defmt")]
            defmt::trace!("Program {=usize} bytes at {=u32}", chunk.len(), current.0);
            self.command_write_data(Command::ProgramPage(current), chunk)
                .await?;

            current = Address(current.0 + chunk_len as u32);
            remaining = rest;
        }

        self.write_disable().await?;
        self.wait_ready().await
    }

    /// Erase the 4kB sector containing `addr`. The address is aligned down
    /// to the sector boundary before it is encoded.
    pub async fn erase_block_4k(&mut self, addr: Address) -> Result<(), Error<E>> {
        Self::verify_addr(addr)?;
        self.wait_ready().await?;
        self.write_enable().await?;
        self.wait_ready().await?;
        self.wait_ready_erase().await?;
        self.command_write(Command::SectorErase(addr)).await?;
        self.wait_ready().await?;
        self.wait_ready_erase().await
    }

    /// Erase the 32kB block containing `addr`.
    pub async fn erase_block_32k(&mut self, addr: Address) -> Result<(), Error<E>> {
        Self::verify_addr(addr)?;
        self.wait_ready().await?;
        self.write_enable().await?;
        self.wait_ready().await?;
        self.command_write(Command::Block32Erase(addr)).await?;
        self.wait_ready().await
    }

    /// Erase the 64kB block containing `addr`.
    pub async fn erase_block_64k(&mut self, addr: Address) -> Result<(), Error<E>> {
        Self::verify_addr(addr)?;
        self.wait_ready().await?;
        self.write_enable().await?;
        self.wait_ready().await?;
        self.command_write(Command::Block64Erase(addr)).await?;
        self.wait_ready().await
    }

    /// Erase the whole chip.
    pub async fn erase_chip(&mut self) -> Result<(), Error<E>> {
        self.wait_ready().await?;
        self.write_enable().await?;
        self.wait_ready().await?;
        self.command_write(Command::ChipErase).await?;
        self.wait_ready().await
    }

    /// Clear all block protection bits by writing zero to status register 1.
    /// The single write-enable covers both frames.
    pub async fn global_unprotect(&mut self) -> Result<(), Error<E>> {
        self.wait_ready().await?;
        self.write_enable().await?;
        self.wait_ready().await?;
        self.command_write(Command::WriteStatus(0)).await?;
        self.wait_ready().await
    }
}

impl<const SIZE: u32, SPI: SpiDevice> embedded_storage_async::nor_flash::ErrorType
    for AsyncMT25QL<SIZE, SPI>
{
    type Error = Error<SPI::Error>;
}

impl<const SIZE: u32, SPI: SpiDevice> ReadNorFlash for AsyncMT25QL<SIZE, SPI> {
    const READ_SIZE: usize = 1;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.read(Address(offset), bytes).await
    }

    fn capacity(&self) -> usize {
        Self::capacity()
    }
}

impl<const SIZE: u32, SPI: SpiDevice> NorFlash for AsyncMT25QL<SIZE, SPI> {
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = SECTOR_SIZE as usize;

    async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        let erase_size = Self::ERASE_SIZE as u32;
        if from >= to || to > Self::capacity() as u32 {
            return Err(Error::OutOfBounds);
        }
        if (from & (erase_size - 1)) != 0 || ((to - from) & (erase_size - 1)) != 0 {
            return Err(Error::NotAligned);
        }

        let mut idx = from;
        while idx < to {
            self.erase_block_4k(Address(idx)).await?;
            idx += erase_size;
        }
        Ok(())
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let Some(end) = offset.checked_add(bytes.len() as u32) else {
            return Err(Error::OutOfBounds);
        };
        if end > Self::capacity() as u32 {
            return Err(Error::OutOfBounds);
        }
        self.program(Address(offset), bytes).await
    }
}

impl<const SIZE: u32, SPI: SpiDevice> MultiwriteNorFlash for AsyncMT25QL<SIZE, SPI> {}

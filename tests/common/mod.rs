#![allow(dead_code)]

use embedded_hal::spi::{self, Operation};

const PAGE_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimError;

impl spi::Error for SimError {
    fn kind(&self) -> spi::ErrorKind {
        spi::ErrorKind::Other
    }
}

/// In-memory model of an MT25QL chip behind a mock `SpiDevice`.
///
/// Each transaction is one chip-select frame: the leading write operation is
/// the command frame, a following read is answered from the simulated array
/// or registers, a following write is program payload. Destructive commands
/// consume the write-enable latch exactly like the real part, and page
/// programs wrap within their 256-byte page instead of advancing.
pub struct SimFlash {
    pub mem: Vec<u8>,
    write_enabled: bool,
    protection_bits: u8,
    /// Remaining polls that report busy before the device goes ready.
    pub busy_polls: u32,
    /// Report busy forever, for timeout tests.
    pub stuck_busy: bool,
    /// Fail the nth next transaction (0 = the very next one).
    pub fail_after: Option<u32>,
    /// Non-poll frames as transmitted: opcode, address bytes, payload.
    pub frames: Vec<Vec<u8>>,
    /// Ready-polls seen since the previous non-poll frame, parallel to `frames`.
    pub polls_before_frame: Vec<u32>,
    polls_since_frame: u32,
    pub status_polls: u32,
    pub flag_polls: u32,
    /// Protocol violations the device observed, e.g. a destructive command
    /// without an armed write-enable latch.
    pub violations: Vec<String>,
}

impl SimFlash {
    pub fn new(capacity: usize) -> Self {
        Self {
            mem: vec![0xFF; capacity],
            write_enabled: false,
            protection_bits: 0x1C,
            busy_polls: 0,
            stuck_busy: false,
            fail_after: None,
            frames: Vec::new(),
            polls_before_frame: Vec::new(),
            polls_since_frame: 0,
            status_polls: 0,
            flag_polls: 0,
            violations: Vec::new(),
        }
    }

    pub fn protection_cleared(&self) -> bool {
        self.protection_bits == 0
    }

    /// Opcodes of the recorded non-poll frames, in transmission order.
    pub fn opcodes(&self) -> Vec<u8> {
        self.frames.iter().map(|frame| frame[0]).collect()
    }

    /// Recorded Program-Page frames as (address, payload) pairs.
    pub fn program_frames(&self) -> Vec<(u32, Vec<u8>)> {
        self.frames
            .iter()
            .filter(|frame| frame[0] == 0x02)
            .map(|frame| (frame_addr(frame), frame[4..].to_vec()))
            .collect()
    }

    fn busy(&mut self) -> bool {
        if self.stuck_busy {
            return true;
        }
        if self.busy_polls > 0 {
            self.busy_polls -= 1;
            return true;
        }
        false
    }

    fn consume_latch(&mut self, opcode: u8) -> bool {
        if !self.write_enabled {
            self.violations
                .push(format!("opcode {opcode:#04x} without write enable"));
            return false;
        }
        self.write_enabled = false;
        true
    }

    fn record(&mut self, frame: Vec<u8>) {
        self.frames.push(frame);
        self.polls_before_frame.push(self.polls_since_frame);
        self.polls_since_frame = 0;
    }

    fn erase(&mut self, addr: u32, len: usize, align: u32) {
        if addr & (align - 1) != 0 {
            self.violations
                .push(format!("unaligned erase address {addr:#08x}"));
        }
        let start = addr as usize;
        if start >= self.mem.len() {
            self.violations
                .push(format!("erase address {addr:#08x} out of range"));
            return;
        }
        let end = (start + len).min(self.mem.len());
        self.mem[start..end].fill(0xFF);
    }

    fn run(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), SimError> {
        if let Some(countdown) = self.fail_after.as_mut() {
            if *countdown == 0 {
                self.fail_after = None;
                return Err(SimError);
            }
            *countdown -= 1;
        }

        let frame: Vec<u8> = match operations.first() {
            Some(Operation::Write(bytes)) if !bytes.is_empty() => bytes.to_vec(),
            _ => {
                self.violations
                    .push("transaction without a leading command frame".into());
                return Ok(());
            }
        };

        match frame[0] {
            // Read-Status
            0x05 => {
                self.status_polls += 1;
                self.polls_since_frame += 1;
                let mut value = (self.write_enabled as u8) << 1;
                if self.busy() {
                    value |= 0x01;
                }
                fill_read(operations, value);
            }
            // Read-Flag-Status
            0x70 => {
                self.flag_polls += 1;
                self.polls_since_frame += 1;
                let value = if self.busy() { 0x00 } else { 0x80 };
                fill_read(operations, value);
            }
            // Read-ID
            0x9F => {
                let id = [0x20, 0xBA, 0x18];
                if let Some(Operation::Read(buf)) = operations.get_mut(1) {
                    for (dst, src) in buf.iter_mut().zip(id.iter().cycle()) {
                        *dst = *src;
                    }
                }
                self.record(frame);
            }
            // Read-Data
            0x03 => {
                let addr = frame_addr(&frame) as usize;
                if let Some(Operation::Read(buf)) = operations.get_mut(1) {
                    for (i, dst) in buf.iter_mut().enumerate() {
                        *dst = self.mem.get(addr + i).copied().unwrap_or(0xFF);
                    }
                }
                self.record(frame);
            }
            // Write-Enable / Write-Disable
            0x06 => {
                self.write_enabled = true;
                self.record(frame);
            }
            0x04 => {
                self.write_enabled = false;
                self.record(frame);
            }
            // Write-Status-Reg-1
            0x01 => {
                if self.consume_latch(0x01) {
                    self.protection_bits = frame[1] & 0x5C;
                }
                self.record(frame);
            }
            // Program-Page
            0x02 => {
                let addr = frame_addr(&frame);
                let data: Vec<u8> = match operations.get(1) {
                    Some(Operation::Write(bytes)) => bytes.to_vec(),
                    _ => {
                        self.violations
                            .push("program page frame without payload".into());
                        Vec::new()
                    }
                };
                if self.consume_latch(0x02) {
                    let page_base = (addr as usize) & !(PAGE_SIZE - 1);
                    let offset = addr as usize - page_base;
                    for (i, byte) in data.iter().enumerate() {
                        let at = page_base + (offset + i) % PAGE_SIZE;
                        if let Some(cell) = self.mem.get_mut(at) {
                            *cell &= byte;
                        }
                    }
                }
                let mut full = frame.clone();
                full.extend_from_slice(&data);
                self.record(full);
            }
            // Erases
            0x20 => {
                let addr = frame_addr(&frame);
                if self.consume_latch(0x20) {
                    self.erase(addr, 0x1000, 0x1000);
                }
                self.record(frame);
            }
            0x52 => {
                let addr = frame_addr(&frame);
                if self.consume_latch(0x52) {
                    self.erase(addr, 0x8000, 0x8000);
                }
                self.record(frame);
            }
            0xD8 => {
                let addr = frame_addr(&frame);
                if self.consume_latch(0xD8) {
                    self.erase(addr, 0x10000, 0x10000);
                }
                self.record(frame);
            }
            0xC4 => {
                if self.consume_latch(0xC4) {
                    self.mem.fill(0xFF);
                }
                self.record(frame);
            }
            // Sector protect / unprotect
            0x36 | 0x39 => {
                self.consume_latch(frame[0]);
                self.record(frame);
            }
            other => {
                self.violations.push(format!("unknown opcode {other:#04x}"));
                self.record(frame);
            }
        }
        Ok(())
    }
}

fn frame_addr(frame: &[u8]) -> u32 {
    u32::from_be_bytes([0, frame[1], frame[2], frame[3]])
}

fn fill_read(operations: &mut [Operation<'_, u8>], value: u8) {
    if let Some(Operation::Read(buf)) = operations.get_mut(1) {
        buf.fill(value);
    }
}

impl spi::ErrorType for SimFlash {
    type Error = SimError;
}

impl spi::SpiDevice for SimFlash {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), SimError> {
        self.run(operations)
    }
}

impl embedded_hal_async::spi::SpiDevice for SimFlash {
    async fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), SimError> {
        self.run(operations)
    }
}

//! Virtual `COMn` port as seen through the serial device-control interface.

use bitflags::bitflags;
use cabinet_frame::IoBuf;
use cabinet_iohook::{opens_path, Handle, IoError, IoOp, IoRequest};

/// Serial device-control codes: device type `0x1B`, buffered method, any access.
pub mod ioctl {
    const fn code(function: u32) -> u32 {
        (0x1B << 16) | (function << 2)
    }

    pub const SET_BAUD_RATE: u32 = code(1);
    pub const SET_QUEUE_SIZE: u32 = code(2);
    pub const SET_LINE_CONTROL: u32 = code(3);
    pub const SET_TIMEOUTS: u32 = code(7);
    pub const GET_TIMEOUTS: u32 = code(8);
    pub const SET_DTR: u32 = code(9);
    pub const CLR_DTR: u32 = code(10);
    pub const SET_RTS: u32 = code(12);
    pub const CLR_RTS: u32 = code(13);
    pub const GET_WAIT_MASK: u32 = code(16);
    pub const SET_WAIT_MASK: u32 = code(17);
    pub const PURGE: u32 = code(19);
    pub const GET_BAUD_RATE: u32 = code(20);
    pub const GET_LINE_CONTROL: u32 = code(21);
    pub const GET_CHARS: u32 = code(22);
    pub const SET_CHARS: u32 = code(23);
    pub const GET_HANDFLOW: u32 = code(24);
    pub const SET_HANDFLOW: u32 = code(25);
    pub const GET_MODEMSTATUS: u32 = code(26);
    pub const GET_COMMSTATUS: u32 = code(27);
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Purge: u32 {
        const TXABORT = 1 << 0;
        const RXABORT = 1 << 1;
        const TXCLEAR = 1 << 2;
        const RXCLEAR = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ModemStatus: u32 {
        const CTS_ON = 1 << 4;
        const DSR_ON = 1 << 5;
        const RING_ON = 1 << 6;
        const RLSD_ON = 1 << 7;
    }
}

/// Host writes accumulate here until the attached device consumes them.
pub const WRITTEN_CAPACITY: usize = 264;
pub const READABLE_CAPACITY: usize = 4096;

const DEFAULT_BAUD: u32 = 115_200;
const COMMSTATUS_LEN: usize = 20;

/// Opaque per-port settings a host round-trips through set/get pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Settings {
    line_control: [u8; 3],
    timeouts: [u8; 20],
    chars: [u8; 6],
    handflow: [u8; 16],
    wait_mask: u32,
    dtr: bool,
    rts: bool,
}

pub struct Uart {
    name: String,
    handle: Option<Handle>,
    baud: u32,
    settings: Settings,
    written: IoBuf,
    readable: IoBuf,
}

impl std::fmt::Debug for Uart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uart")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .field("baud", &self.baud)
            .field("dtr", &self.settings.dtr)
            .field("rts", &self.settings.rts)
            .field("written", &self.written.pos())
            .field("readable", &self.readable.pos())
            .finish_non_exhaustive()
    }
}

impl Uart {
    pub fn new(port: u8) -> Self {
        Self {
            name: format!("COM{port}"),
            handle: None,
            baud: DEFAULT_BAUD,
            settings: Settings::default(),
            written: IoBuf::with_capacity(WRITTEN_CAPACITY),
            readable: IoBuf::with_capacity(READABLE_CAPACITY),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> Option<Handle> {
        self.handle
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// Whether `req` targets this port: an `Open` of its name, or anything on its handle.
    pub fn claims(&self, req: &IoRequest) -> bool {
        match req.op {
            IoOp::Open => opens_path(req, &[self.name.as_str()]),
            _ => self.handle.is_some_and(|h| h == req.handle),
        }
    }

    /// Bytes the host has written that the device has not consumed yet.
    pub fn written(&self) -> &[u8] {
        self.written.filled()
    }

    /// Bytes waiting for the host to read.
    pub fn readable(&self) -> &[u8] {
        self.readable.filled()
    }

    /// Hands pending host writes to `device` along with the readable queue, then discards them.
    pub fn drain_written<R>(&mut self, device: impl FnOnce(&[u8], &mut IoBuf) -> R) -> R {
        let out = device(self.written.filled(), &mut self.readable);
        self.written.clear();
        out
    }

    /// Services a request already known to be [claimed](Self::claims) by this port.
    pub fn service(&mut self, req: &mut IoRequest) -> Result<(), IoError> {
        match req.op {
            IoOp::Open => self.open(req),
            IoOp::Close => {
                tracing::debug!(port = %self.name, "closed");
                self.handle = None;
                Ok(())
            }
            IoOp::Read => {
                self.readable.move_into(&mut req.read);
                Ok(())
            }
            IoOp::Write => {
                let n = req.write.remaining().min(self.written.remaining());
                self.written.write(&req.write.unread()[..n])?;
                req.write.skip(n)?;
                if req.write.remaining() > 0 {
                    tracing::warn!(port = %self.name, dropped = req.write.remaining(), "write buffer full");
                }
                Ok(())
            }
            IoOp::Ioctl => self.ioctl(req),
        }
    }

    fn open(&mut self, req: &mut IoRequest) -> Result<(), IoError> {
        if self.handle.is_some() {
            return Err(IoError::SharingViolation(self.name.clone()));
        }
        let handle = Handle::alloc();
        self.handle = Some(handle);
        req.handle = handle;
        tracing::debug!(port = %self.name, handle = handle.raw(), "opened");
        Ok(())
    }

    fn ioctl(&mut self, req: &mut IoRequest) -> Result<(), IoError> {
        let input = &mut req.write;
        let output = &mut req.read;
        let s = &mut self.settings;
        match req.ioctl {
            ioctl::SET_BAUD_RATE => self.baud = input.read_le_u32()?,
            ioctl::GET_BAUD_RATE => output.write_le_u32(self.baud)?,
            ioctl::SET_LINE_CONTROL => input.read(&mut s.line_control)?,
            ioctl::GET_LINE_CONTROL => output.write(&s.line_control)?,
            ioctl::SET_TIMEOUTS => input.read(&mut s.timeouts)?,
            ioctl::GET_TIMEOUTS => output.write(&s.timeouts)?,
            ioctl::SET_CHARS => input.read(&mut s.chars)?,
            ioctl::GET_CHARS => output.write(&s.chars)?,
            ioctl::SET_HANDFLOW => input.read(&mut s.handflow)?,
            ioctl::GET_HANDFLOW => output.write(&s.handflow)?,
            ioctl::SET_WAIT_MASK => s.wait_mask = input.read_le_u32()?,
            ioctl::GET_WAIT_MASK => output.write_le_u32(s.wait_mask)?,
            ioctl::SET_DTR => s.dtr = true,
            ioctl::CLR_DTR => s.dtr = false,
            ioctl::SET_RTS => s.rts = true,
            ioctl::CLR_RTS => s.rts = false,
            ioctl::SET_QUEUE_SIZE => {}
            ioctl::GET_MODEMSTATUS => {
                output.write_le_u32((ModemStatus::CTS_ON | ModemStatus::DSR_ON).bits())?
            }
            ioctl::GET_COMMSTATUS => {
                let mut status = [0u8; COMMSTATUS_LEN];
                // Errors, HoldReasons, then AmountInInQueue.
                let queued = u32::try_from(self.readable.pos()).unwrap_or(u32::MAX);
                status[8..12].copy_from_slice(&queued.to_le_bytes());
                output.write(&status)?;
            }
            ioctl::PURGE => {
                let flags = Purge::from_bits_truncate(input.read_le_u32()?);
                if flags.intersects(Purge::RXABORT | Purge::RXCLEAR) {
                    self.readable.clear();
                }
                if flags.intersects(Purge::TXABORT | Purge::TXCLEAR) {
                    self.written.clear();
                }
            }
            code => {
                tracing::debug!(port = %self.name, code, "unsupported serial ioctl");
                return Err(IoError::UnsupportedIoctl(code));
            }
        }
        Ok(())
    }
}

//! Reference I/O board node: two players, two coin slots, eight analog channels, GPIO outputs.

use cabinet_frame::{ConstIoBuf, IoBuf};

use crate::bus::JvsNode;
use crate::error::DispatchError;
use crate::packet::{
    crack_request, Dispatch, PacketScratch, FIRST_ADDR, LAST_ADDR, REPORT_OK, UNASSIGNED,
};
use crate::JvsBus;

/// Command bytes understood by [`Io3`].
pub mod cmd {
    pub const RESET: u8 = 0xF0;
    pub const ASSIGN_ADDR: u8 = 0xF1;
    pub const IDENTIFY: u8 = 0x10;
    pub const GET_CMD_VERSION: u8 = 0x11;
    pub const GET_JVS_VERSION: u8 = 0x12;
    pub const GET_COMM_VERSION: u8 = 0x13;
    pub const GET_FEATURES: u8 = 0x14;
    pub const SET_MAINBOARD_ID: u8 = 0x15;
    pub const READ_SWITCHES: u8 = 0x20;
    pub const READ_COIN: u8 = 0x21;
    pub const READ_ANALOGS: u8 = 0x22;
    pub const WRITE_GPIO: u8 = 0x32;
}

/// Argument a well-behaved host sends with `Reset`.
pub const RESET_PARAM: u8 = 0xD9;

pub const IDENTITY: &[u8] = b"SEGA CORPORATION;I/O BD JVS;837-14572;Ver1.00;2005/10\0";

pub const CMD_VERSION: u8 = 0x13;
pub const JVS_VERSION: u8 = 0x20;
pub const COMM_VERSION: u8 = 0x10;

pub const PLAYERS: u8 = 2;
pub const COIN_SLOTS: u8 = 2;
pub const ANALOG_CHANNELS: u8 = 8;
pub const GPIO_BYTES: u8 = 3;

#[rustfmt::skip]
pub const FEATURES: &[u8] = &[
    0x01, PLAYERS, 0x0E, 0x00,          // switches: 2 players, 14 each
    0x02, COIN_SLOTS, 0x00, 0x00,       // coin slots
    0x03, ANALOG_CHANNELS, 0x0A, 0x00,  // analog inputs, 10 bits
    0x12, 0x0C, 0x00, 0x00,             // general purpose outputs
    0x00, 0x00, 0x00, 0x00,
];

/// Switch state sampled by [`Io3Backend::read_switches`].
///
/// Player words are big-endian on the wire: the high byte holds start, service, up, down,
/// left, right, push 1, push 2 from bit 7 down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Switches {
    /// Test switch is bit 7.
    pub system: u8,
    pub players: [u16; 2],
}

/// Host-side source of the inputs an [`Io3`] reports. Called at polling rate, so it should not
/// block.
pub trait Io3Backend: Send {
    fn read_switches(&mut self, out: &mut Switches);

    fn read_coin_counter(&mut self, slot: u8) -> u16;

    fn read_analog(&mut self, channel: u8) -> u16;

    /// `mask` holds the GPIO bytes most significant first, starting at bit 31.
    fn write_gpio(&mut self, _mask: u32) {}

    fn reset(&mut self) {}
}

impl<B: Io3Backend + ?Sized> Io3Backend for Box<B> {
    fn read_switches(&mut self, out: &mut Switches) {
        (**self).read_switches(out)
    }

    fn read_coin_counter(&mut self, slot: u8) -> u16 {
        (**self).read_coin_counter(slot)
    }

    fn read_analog(&mut self, channel: u8) -> u16 {
        (**self).read_analog(channel)
    }

    fn write_gpio(&mut self, mask: u32) {
        (**self).write_gpio(mask)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

/// Backend with nothing pressed, no coins and every analog centered at zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdleBackend;

impl Io3Backend for IdleBackend {
    fn read_switches(&mut self, out: &mut Switches) {
        *out = Switches::default();
    }

    fn read_coin_counter(&mut self, _slot: u8) -> u16 {
        0
    }

    fn read_analog(&mut self, _channel: u8) -> u16 {
        0
    }
}

struct Board<B> {
    addr: u8,
    backend: B,
    next: Option<Box<dyn JvsNode>>,
}

impl<B: Io3Backend> Board<B> {
    fn assign(&mut self, addr: u8, acc: &mut IoBuf) -> Result<(), DispatchError> {
        if !(FIRST_ADDR..=LAST_ADDR).contains(&addr) {
            return Err(DispatchError::InvalidArgument {
                command: cmd::ASSIGN_ADDR,
                reason: "address out of range",
            });
        }
        if self.addr != UNASSIGNED || JvsBus::sense(self.next.as_deref()) {
            // Already addressed, or someone downstream still needs one first.
            return Ok(());
        }
        self.addr = addr;
        acc.push(REPORT_OK)?;
        tracing::debug!(addr, "IO3 assigned address");
        Ok(())
    }

    fn read_switches(
        &mut self,
        req: &mut ConstIoBuf<&[u8]>,
        acc: &mut IoBuf,
    ) -> Result<(), DispatchError> {
        let players = req.read_u8()?;
        let bytes_per_player = req.read_u8()?;
        if players > PLAYERS || bytes_per_player != 2 {
            return Err(DispatchError::Overflow(cmd::READ_SWITCHES));
        }

        let mut switches = Switches::default();
        self.backend.read_switches(&mut switches);
        acc.push(REPORT_OK)?;
        acc.push(switches.system)?;
        for &word in &switches.players[..usize::from(players)] {
            acc.write_be_u16(word)?;
        }
        Ok(())
    }

    fn read_words(
        &mut self,
        command: u8,
        limit: u8,
        req: &mut ConstIoBuf<&[u8]>,
        acc: &mut IoBuf,
    ) -> Result<(), DispatchError> {
        let count = req.read_u8()?;
        if count > limit {
            return Err(DispatchError::Overflow(command));
        }
        acc.push(REPORT_OK)?;
        for i in 0..count {
            let word = if command == cmd::READ_COIN {
                self.backend.read_coin_counter(i)
            } else {
                self.backend.read_analog(i)
            };
            acc.write_be_u16(word)?;
        }
        Ok(())
    }

    fn write_gpio(
        &mut self,
        req: &mut ConstIoBuf<&[u8]>,
        acc: &mut IoBuf,
    ) -> Result<(), DispatchError> {
        let len = req.read_u8()?;
        if len > GPIO_BYTES {
            return Err(DispatchError::Overflow(cmd::WRITE_GPIO));
        }
        let mut bytes = [0u8; GPIO_BYTES as usize];
        req.read(&mut bytes[..usize::from(len)])?;
        let mask = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], 0]);
        self.backend.write_gpio(mask);
        acc.push(REPORT_OK)?;
        Ok(())
    }
}

impl<B: Io3Backend> Dispatch for Board<B> {
    fn address(&self) -> u8 {
        self.addr
    }

    fn dispatch(
        &mut self,
        req: &mut ConstIoBuf<&[u8]>,
        acc: &mut IoBuf,
    ) -> Result<(), DispatchError> {
        let command = req.read_u8()?;
        match command {
            cmd::RESET => {
                let param = req.read_u8()?;
                if param != RESET_PARAM {
                    tracing::debug!(param, "IO3 reset with unexpected argument");
                }
                self.addr = UNASSIGNED;
                self.backend.reset();
                Ok(())
            }
            cmd::ASSIGN_ADDR => {
                let addr = req.read_u8()?;
                self.assign(addr, acc)
            }
            cmd::IDENTIFY => {
                acc.push(REPORT_OK)?;
                acc.write(IDENTITY)?;
                Ok(())
            }
            cmd::GET_CMD_VERSION => Ok(acc.write(&[REPORT_OK, CMD_VERSION])?),
            cmd::GET_JVS_VERSION => Ok(acc.write(&[REPORT_OK, JVS_VERSION])?),
            cmd::GET_COMM_VERSION => Ok(acc.write(&[REPORT_OK, COMM_VERSION])?),
            cmd::GET_FEATURES => {
                acc.push(REPORT_OK)?;
                acc.write(FEATURES)?;
                Ok(())
            }
            cmd::SET_MAINBOARD_ID => {
                let id = req.read_until(0)?;
                tracing::debug!(id = %String::from_utf8_lossy(id), "main board identified");
                acc.push(REPORT_OK)?;
                Ok(())
            }
            cmd::READ_SWITCHES => self.read_switches(req, acc),
            cmd::READ_COIN => self.read_words(command, COIN_SLOTS, req, acc),
            cmd::READ_ANALOGS => self.read_words(command, ANALOG_CHANNELS, req, acc),
            cmd::WRITE_GPIO => self.write_gpio(req, acc),
            other => Err(DispatchError::UnsupportedCommand(other)),
        }
    }
}

/// Sega 837-14572 "I/O board type 3" emulation.
pub struct Io3<B> {
    board: Board<B>,
    scratch: PacketScratch,
}

impl<B: Io3Backend> Io3<B> {
    /// A freshly reset node in front of `next`.
    pub fn new(backend: B, next: Option<Box<dyn JvsNode>>) -> Self {
        Self {
            board: Board {
                addr: UNASSIGNED,
                backend,
                next,
            },
            scratch: PacketScratch::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.board.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.board.backend
    }
}

impl<B: Io3Backend> JvsNode for Io3<B> {
    fn sense(&self) -> bool {
        self.board.addr == UNASSIGNED
    }

    fn transact(&mut self, req: &[u8], resp: &mut IoBuf) {
        crack_request(&mut self.scratch, &mut self.board, req, resp);
    }

    fn next(&self) -> Option<&dyn JvsNode> {
        self.board.next.as_deref()
    }

    fn next_mut(&mut self) -> Option<&mut dyn JvsNode> {
        match &mut self.board.next {
            Some(next) => Some(&mut **next),
            None => None,
        }
    }

    fn address(&self) -> u8 {
        self.board.addr
    }
}

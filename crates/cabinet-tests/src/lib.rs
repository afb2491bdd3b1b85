#![forbid(unsafe_code)]

//! Shared fixtures for the end-to-end tests under `tests/`.

use std::sync::{Arc, Mutex, PoisonError};

use cabinet_frame::IoBuf;
use cabinet_iohook::{Handle, IoChain};
use cabinet_jvs::{decode_response, encode_request, split_frames, Io3Backend, Response, Switches};

/// Inputs a test sets and outputs it inspects, shared with the node that reads them.
#[derive(Debug, Default)]
pub struct Panel {
    pub switches: Switches,
    pub coins: [u16; 2],
    pub analogs: [u16; 8],
    pub gpio: Vec<u32>,
    pub resets: usize,
}

/// Backend reading from a [`Panel`] the test keeps a handle to.
#[derive(Debug, Clone, Default)]
pub struct PanelBackend(pub Arc<Mutex<Panel>>);

impl PanelBackend {
    pub fn panel(&self) -> std::sync::MutexGuard<'_, Panel> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Io3Backend for PanelBackend {
    fn read_switches(&mut self, out: &mut Switches) {
        *out = self.panel().switches;
    }

    fn read_coin_counter(&mut self, slot: u8) -> u16 {
        self.panel().coins.get(usize::from(slot)).copied().unwrap_or(0)
    }

    fn read_analog(&mut self, channel: u8) -> u16 {
        self.panel().analogs.get(usize::from(channel)).copied().unwrap_or(0)
    }

    fn write_gpio(&mut self, mask: u32) {
        self.panel().gpio.push(mask);
    }

    fn reset(&mut self) {
        self.panel().resets += 1;
    }
}

/// Host side of a JVS conversation over an operation chain.
pub struct Host<'a> {
    pub chain: &'a IoChain,
    pub handle: Handle,
}

impl<'a> Host<'a> {
    pub fn open(chain: &'a IoChain, port: &str) -> Self {
        let handle = chain.open(port).expect("open JVS port");
        Self { chain, handle }
    }

    /// Writes one request frame and decodes every response frame that became readable.
    pub fn send(&self, dest: u8, cmds: &[u8]) -> Vec<Response> {
        let mut frame = IoBuf::with_capacity(256);
        encode_request(dest, cmds, &mut frame).expect("encode request");
        self.chain
            .write(self.handle, frame.filled())
            .expect("write request");
        let raw = self.chain.read(self.handle, 4096).expect("read response");
        split_frames(&raw)
            .into_iter()
            .map(|frame| decode_response(frame).expect("decode response"))
            .collect()
    }
}

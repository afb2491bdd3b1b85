//! JVS packet layout and the request cracking shared by every node.
//!
//! ```text
//! E0 | dest | len | cmd... | sum
//! ```
//!
//! `len` counts every byte after itself, the checksum included. A response carries
//! `dest = 0x00`, then a status byte, then one report per command that produced output.

use cabinet_frame::{ConstIoBuf, Decoded, FrameError, HexBytes, IoBuf, ProtocolError, NODE_BUS};

use crate::error::DispatchError;

/// Address of the bus master. A node that sees it as destination treats the packet as broadcast.
pub const MASTER: u8 = 0x00;
pub const BROADCAST: u8 = 0xFF;
/// Address a node holds until `AssignAddr` claims it one.
pub const UNASSIGNED: u8 = 0xFF;
pub const FIRST_ADDR: u8 = 0x01;
pub const LAST_ADDR: u8 = 0x1F;

/// Packet-level status byte.
pub mod status {
    pub const OK: u8 = 0x01;
    pub const UNSUPPORTED: u8 = 0x02;
    pub const CHECKSUM: u8 = 0x03;
    pub const OVERFLOW: u8 = 0x04;
}

/// First byte of each command report.
pub const REPORT_OK: u8 = 0x01;

/// Bytes available to reports once `dest`, `len` and the status byte are accounted for.
const MAX_REPORTS: usize = 0xFF - 3;
/// Largest decoded body, checksum included.
const MAX_BODY: usize = 0x102;

/// Command handling of one node, driven by [`crack_request`].
pub trait Dispatch {
    fn address(&self) -> u8;

    /// Consumes exactly one command segment from `req`, appending its report (if any) to `acc`.
    fn dispatch(
        &mut self,
        req: &mut ConstIoBuf<&[u8]>,
        acc: &mut IoBuf,
    ) -> Result<(), DispatchError>;
}

/// Buffers reused by a node across transactions.
#[derive(Debug, Clone)]
pub struct PacketScratch {
    body: IoBuf,
    acc: IoBuf,
    out: IoBuf,
}

impl PacketScratch {
    pub fn new() -> Self {
        Self {
            body: IoBuf::with_capacity(MAX_BODY),
            acc: IoBuf::with_capacity(MAX_REPORTS),
            out: IoBuf::with_capacity(MAX_BODY),
        }
    }
}

impl Default for PacketScratch {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a node at `addr` should act on a packet sent to `dest`.
pub fn accepts(addr: u8, dest: u8) -> bool {
    dest == addr || dest == BROADCAST || dest == MASTER
}

/// Decodes `frame`, runs every command segment addressed to `node`, and appends the encoded
/// response (if any) to `resp`.
///
/// Frames that fail to decode are dropped. The first failing segment replaces the whole
/// response with a bare status byte. A packet whose commands produce no output gets no
/// response frame at all.
pub fn crack_request<D: Dispatch + ?Sized>(
    scratch: &mut PacketScratch,
    node: &mut D,
    frame: &[u8],
    resp: &mut IoBuf,
) {
    let PacketScratch { body, acc, out } = scratch;

    match NODE_BUS.decode(body, frame) {
        Ok(Decoded::Accepted { .. }) => {}
        Ok(Decoded::Incomplete { .. }) => return,
        Err(err) => {
            tracing::debug!(%err, frame = %HexBytes(frame), "dropping undecodable JVS frame");
            return;
        }
    }

    let body = body.filled();
    let (dest, len, cmds) = match body {
        [dest, len, cmds @ ..] => (*dest, *len, cmds),
        _ => {
            tracing::debug!(frame = %HexBytes(frame), "dropping short JVS frame");
            return;
        }
    };
    if usize::from(len) != cmds.len() + 1 {
        let err = ProtocolError::BadLength {
            declared: usize::from(len),
            actual: cmds.len() + 1,
        };
        tracing::debug!(%err, frame = %HexBytes(frame), "dropping JVS frame");
        return;
    }
    if !accepts(node.address(), dest) {
        return;
    }

    acc.clear();
    let mut req = ConstIoBuf::new(cmds);
    let mut failure = None;
    while !req.is_empty() {
        if let Err(err) = node.dispatch(&mut req, acc) {
            tracing::debug!(%err, addr = node.address(), "JVS command failed");
            failure = Some(err.status());
            break;
        }
    }

    out.clear();
    let built = match failure {
        Some(code) => out.write(&[MASTER, 0x02, code]),
        None if acc.is_empty() => return,
        // Every report fits: `acc` is capped so that `len` stays within a byte.
        None => out
            .write(&[MASTER, (acc.pos() + 2) as u8, status::OK])
            .and_then(|()| out.write(acc.filled())),
    };
    let encoded = built
        .map_err(FrameError::from)
        .and_then(|()| NODE_BUS.encode(resp, out.filled()));
    if let Err(err) = encoded {
        tracing::warn!(%err, "JVS response does not fit the bus buffer");
    }
}

/// Appends a request frame sending `cmds` to `dest`.
pub fn encode_request(dest: u8, cmds: &[u8], out: &mut IoBuf) -> Result<(), FrameError> {
    let len = u8::try_from(cmds.len() + 1).map_err(|_| ProtocolError::BadLength {
        declared: 0xFF,
        actual: cmds.len() + 1,
    })?;
    let mut body = IoBuf::with_capacity(cmds.len() + 2);
    body.push(dest)?;
    body.push(len)?;
    body.write(cmds)?;
    NODE_BUS.encode(out, body.filled())
}

/// Splits a byte stream holding back-to-back frames at each sync byte.
pub fn split_frames(bytes: &[u8]) -> Vec<&[u8]> {
    let mut frames = Vec::new();
    let mut start = None;
    for (i, &b) in bytes.iter().enumerate() {
        if b == NODE_BUS.sync {
            if let Some(s) = start {
                frames.push(&bytes[s..i]);
            }
            start = Some(i);
        }
    }
    if let Some(s) = start {
        frames.push(&bytes[s..]);
    }
    frames
}

/// A response packet as seen by the master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u8,
    /// Concatenated reports, each starting with its report status.
    pub reports: Vec<u8>,
}

/// Decodes one response frame addressed to the master.
pub fn decode_response(frame: &[u8]) -> Result<Response, FrameError> {
    let mut body = IoBuf::with_capacity(MAX_BODY);
    NODE_BUS.decode(&mut body, frame)?;
    match body.filled() {
        [MASTER, len, status, reports @ ..] if usize::from(*len) == reports.len() + 2 => {
            Ok(Response {
                status: *status,
                reports: reports.to_vec(),
            })
        }
        filled => Err(ProtocolError::BadLength {
            declared: filled.get(1).copied().map_or(0, usize::from),
            actual: filled.len().saturating_sub(1),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Echo node: each segment is `0x01 n bytes...`, echoed back as a report.
    struct Echo {
        addr: u8,
    }

    impl Dispatch for Echo {
        fn address(&self) -> u8 {
            self.addr
        }

        fn dispatch(
            &mut self,
            req: &mut ConstIoBuf<&[u8]>,
            acc: &mut IoBuf,
        ) -> Result<(), DispatchError> {
            match req.read_u8()? {
                0x01 => {
                    let n = req.read_u8()?;
                    let mut bytes = vec![0; usize::from(n)];
                    req.read(&mut bytes)?;
                    acc.push(REPORT_OK)?;
                    acc.write(&bytes)?;
                    Ok(())
                }
                0x02 => Ok(()),
                other => Err(DispatchError::UnsupportedCommand(other)),
            }
        }
    }

    fn request(dest: u8, cmds: &[u8]) -> Vec<u8> {
        let mut out = IoBuf::with_capacity(64);
        encode_request(dest, cmds, &mut out).unwrap();
        out.filled().to_vec()
    }

    fn crack(addr: u8, frame: &[u8]) -> Vec<u8> {
        let mut scratch = PacketScratch::new();
        let mut resp = IoBuf::with_capacity(64);
        crack_request(&mut scratch, &mut Echo { addr }, frame, &mut resp);
        resp.filled().to_vec()
    }

    #[test]
    fn request_frame_layout() {
        assert_eq!(
            request(BROADCAST, &[0xF0, 0xD9]),
            [0xE0, 0xFF, 0x03, 0xF0, 0xD9, 0xCB]
        );
    }

    #[test]
    fn segments_accumulate_into_one_response() {
        let resp = crack(1, &request(1, &[0x01, 0x01, 0xAA, 0x02, 0x01, 0x02, 0xBB, 0xCC]));
        let frames = split_frames(&resp);
        assert_eq!(frames.len(), 1);
        assert_eq!(
            decode_response(frames[0]).unwrap(),
            Response {
                status: status::OK,
                reports: vec![0x01, 0xAA, 0x01, 0xBB, 0xCC],
            }
        );
    }

    #[test]
    fn silent_commands_suppress_the_frame() {
        assert!(crack(1, &request(1, &[0x02, 0x02])).is_empty());
    }

    #[test]
    fn foreign_destination_is_ignored() {
        assert!(crack(1, &request(2, &[0x01, 0x00])).is_empty());
        assert!(!crack(1, &request(BROADCAST, &[0x01, 0x00])).is_empty());
        assert!(!crack(1, &request(MASTER, &[0x01, 0x00])).is_empty());
    }

    #[test]
    fn failures_degrade_to_status_only() {
        let resp = crack(1, &request(1, &[0x01, 0x01, 0xAA, 0x7F]));
        let parsed = decode_response(&resp).unwrap();
        assert_eq!(parsed.status, status::UNSUPPORTED);
        assert!(parsed.reports.is_empty());

        // Segment claims three bytes but carries one.
        let resp = crack(1, &request(1, &[0x01, 0x03, 0xAA]));
        assert_eq!(decode_response(&resp).unwrap().status, status::OVERFLOW);
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let mut frame = request(1, &[0x01, 0x00]);
        *frame.last_mut().unwrap() ^= 0x01;
        assert!(crack(1, &frame).is_empty());

        // Length byte one too large, checksum still valid.
        let mut out = IoBuf::with_capacity(16);
        NODE_BUS.encode(&mut out, &[0x01, 0x04, 0x01, 0x00]).unwrap();
        assert!(crack(1, out.filled()).is_empty());

        assert!(crack(1, &[]).is_empty());
        assert!(crack(1, &[0xE0]).is_empty());
    }

    #[test]
    fn split_frames_ignores_leading_noise() {
        let bytes = [0x11, 0xE0, 0x01, 0xE0, 0x02, 0x03];
        assert_eq!(split_frames(&bytes), [&[0xE0, 0x01][..], &[0xE0, 0x02, 0x03][..]]);
        assert!(split_frames(&[]).is_empty());
    }
}

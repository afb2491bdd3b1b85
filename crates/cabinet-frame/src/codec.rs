use crate::error::{FrameError, ProtocolError, Result};
use crate::iobuf::IoBuf;

/// How a frame's trailing checksum byte is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checksum {
    /// Sum of every body byte, mod 256.
    Sum,
    /// Two's complement of the sum of the sync byte and every body byte, so that the whole frame
    /// sums to zero.
    NegatedSumWithSync,
}

/// Where a frame declares its own length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthField {
    /// The frame spans the whole input handed to `decode`.
    Implicit,
    /// `body[0]` counts the body bytes, itself included, checksum excluded.
    Leading,
    /// `body[1]` counts the payload bytes that follow it; `body[0]` is a command byte.
    PayloadAfterCommand,
}

/// Outcome of a decode attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// A whole frame was decoded. `consumed` counts raw input bytes, including any garbage
    /// skipped before the sync byte.
    Accepted { consumed: usize },
    /// More input is needed. `skipped` leading bytes can be discarded regardless.
    Incomplete { skipped: usize },
}

/// A byte-stuffed framing scheme.
///
/// ```text
/// sync | escaped(body...) | escaped(checksum)
/// ```
///
/// Any byte after the sync that equals `sync` or `escape` is sent as `escape, byte - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    pub name: &'static str,
    pub sync: u8,
    pub escape: u8,
    pub checksum: Checksum,
    pub length: LengthField,
    /// Resynchronizing formats skip garbage before the sync byte and report
    /// [`Decoded::Incomplete`] instead of failing on short input.
    pub resync: bool,
}

/// JVS node bus framing.
pub const NODE_BUS: FrameFormat = FrameFormat {
    name: "node-bus",
    sync: 0xE0,
    escape: 0xD0,
    checksum: Checksum::Sum,
    length: LengthField::Implicit,
    resync: false,
};

/// Length-prefixed command bus framing (card readers, LED boards).
pub const COMMAND_BUS: FrameFormat = FrameFormat {
    name: "command-bus",
    sync: 0xE0,
    escape: 0xD0,
    checksum: Checksum::Sum,
    length: LengthField::Leading,
    resync: false,
};

/// Touch panel framing.
pub const TOUCH_PANEL: FrameFormat = FrameFormat {
    name: "touch-panel",
    sync: 0xFF,
    escape: 0xFD,
    checksum: Checksum::NegatedSumWithSync,
    length: LengthField::PayloadAfterCommand,
    resync: true,
};

impl FrameFormat {
    pub fn checksum_of(&self, body: &[u8]) -> u8 {
        let sum = body.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        match self.checksum {
            Checksum::Sum => sum,
            Checksum::NegatedSumWithSync => 0u8.wrapping_sub(sum.wrapping_add(self.sync)),
        }
    }

    /// Number of body bytes the frame declares, once enough of it has been decoded to tell.
    fn declared_body_len(&self, decoded: &[u8]) -> std::result::Result<Option<usize>, ProtocolError> {
        match self.length {
            LengthField::Implicit => Ok(None),
            LengthField::Leading => match decoded.first() {
                None => Ok(None),
                Some(0) => Err(ProtocolError::BadLength {
                    declared: 0,
                    actual: decoded.len(),
                }),
                Some(&len) => Ok(Some(usize::from(len))),
            },
            LengthField::PayloadAfterCommand => Ok(decoded.get(1).map(|&len| usize::from(len) + 2)),
        }
    }

    fn check_body(&self, body: &[u8]) -> std::result::Result<(), ProtocolError> {
        let declared = match self.length {
            LengthField::Implicit => return Ok(()),
            LengthField::Leading => body.first().map(|&len| usize::from(len)),
            LengthField::PayloadAfterCommand => body.get(1).map(|&len| usize::from(len) + 2),
        };
        match declared {
            Some(declared) if declared == body.len() => Ok(()),
            declared => Err(ProtocolError::BadLength {
                declared: declared.unwrap_or(0),
                actual: body.len(),
            }),
        }
    }

    fn encode_byte(&self, dest: &mut IoBuf, byte: u8) -> Result<()> {
        if byte == self.sync || byte == self.escape {
            dest.push(self.escape)?;
            dest.push(byte.wrapping_sub(1))?;
        } else {
            dest.push(byte)?;
        }
        Ok(())
    }

    fn encode_unchecked(&self, dest: &mut IoBuf, body: &[u8]) -> Result<()> {
        dest.push(self.sync)?;
        for &byte in body {
            self.encode_byte(dest, byte)?;
        }
        self.encode_byte(dest, self.checksum_of(body))
    }

    /// Appends one encoded frame carrying `body` to `dest`.
    ///
    /// If `dest` fills up part way through, its cursor is restored to where it was.
    pub fn encode(&self, dest: &mut IoBuf, body: &[u8]) -> Result<()> {
        self.check_body(body)?;
        let start = dest.pos();
        let res = self.encode_unchecked(dest, body);
        if res.is_err() {
            dest.truncate(start);
        }
        res
    }

    /// Decodes one frame from the front of `src`, leaving its body (checksum stripped) in
    /// `dest`. `dest` is cleared first.
    pub fn decode(&self, dest: &mut IoBuf, src: &[u8]) -> Result<Decoded> {
        dest.clear();

        let start = if self.resync {
            match src.iter().position(|&b| b == self.sync) {
                Some(idx) => idx,
                None => return Ok(Decoded::Incomplete { skipped: src.len() }),
            }
        } else {
            match src.first() {
                None => return Err(ProtocolError::Truncated { decoded: 0 }.into()),
                Some(&b) if b != self.sync => {
                    return Err(ProtocolError::BadSync {
                        expected: self.sync,
                        got: b,
                    }
                    .into())
                }
                Some(_) => 0,
            }
        };

        let mut i = start + 1;
        let mut body_len = None;
        loop {
            if let Some(len) = body_len {
                // Body plus the checksum byte.
                if dest.pos() == len + 1 {
                    break;
                }
            }

            let Some(&raw) = src.get(i) else {
                if self.length == LengthField::Implicit {
                    break;
                }
                return self.short_input(start, dest.pos());
            };
            if raw == self.sync {
                return Err(ProtocolError::UnescapedSync { offset: i }.into());
            }
            i += 1;

            let byte = if raw == self.escape {
                let Some(&next) = src.get(i) else {
                    if self.resync {
                        return Ok(Decoded::Incomplete { skipped: start });
                    }
                    return Err(ProtocolError::TrailingEscape.into());
                };
                i += 1;
                next.wrapping_add(1)
            } else {
                raw
            };

            dest.push(byte).map_err(FrameError::from)?;
            if body_len.is_none() {
                body_len = self.declared_body_len(dest.filled())?;
            }
        }

        let Some((&got, body)) = dest.filled().split_last() else {
            return Err(ProtocolError::Truncated { decoded: 0 }.into());
        };
        let expected = self.checksum_of(body);
        if got != expected {
            return Err(ProtocolError::ChecksumMismatch { expected, got }.into());
        }

        let body_len = body.len();
        dest.truncate(body_len);
        Ok(Decoded::Accepted { consumed: i })
    }

    fn short_input(&self, start: usize, decoded: usize) -> Result<Decoded> {
        if self.resync {
            Ok(Decoded::Incomplete { skipped: start })
        } else {
            Err(ProtocolError::Truncated { decoded }.into())
        }
    }

    /// Decodes from an accumulating stream buffer, discarding whatever the attempt consumed.
    ///
    /// Garbage before a sync byte is dropped even when the frame is still incomplete. On any
    /// error only the failed frame is discarded: the stream is advanced to the next sync byte
    /// after the one that started it, or emptied if there is none.
    pub fn decode_stream(&self, dest: &mut IoBuf, stream: &mut IoBuf) -> Result<Decoded> {
        let res = self.decode(dest, stream.filled());
        match res {
            Ok(Decoded::Accepted { consumed }) => stream.shift(consumed),
            Ok(Decoded::Incomplete { skipped }) => stream.shift(skipped),
            Err(FrameError::Protocol(ProtocolError::UnescapedSync { offset })) => {
                stream.shift(offset)
            }
            Err(_) => match self.next_frame_start(stream.filled()) {
                Some(next) => stream.shift(next),
                None => stream.clear(),
            },
        }
        res
    }

    /// Offset of the first sync byte following the one that starts `bytes`' leading frame.
    /// Escaping guarantees a raw sync never appears inside a frame.
    fn next_frame_start(&self, bytes: &[u8]) -> Option<usize> {
        let start = bytes.iter().position(|&b| b == self.sync)?;
        bytes[start + 1..]
            .iter()
            .position(|&b| b == self.sync)
            .map(|idx| start + 1 + idx)
    }
}

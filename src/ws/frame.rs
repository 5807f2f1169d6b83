//! WebSocket frame codec according to RFC 6455.
//!
//! # Frame Format (RFC 6455 Section 5.2)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```

use crate::errors::WsError;
use std::mem;

/// WebSocket frame opcode (4 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation frame (fragmented message).
    Continuation = 0x0,
    /// Text data frame.
    Text = 0x1,
    /// Binary data frame.
    Binary = 0x2,
    /// Connection close control frame.
    Close = 0x8,
    /// Ping control frame.
    Ping = 0x9,
    /// Pong control frame.
    Pong = 0xA,
}

impl Opcode {
    /// Returns true for Close, Ping and Pong.
    #[inline]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    #[inline]
    pub fn from_u8(value: u8) -> Result<Self, WsError> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WsError::UnknownOpcode(value)),
        }
    }
}

/// A complete, unmasked frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Header,
    Length,
    Extended64,
    Extended16,
    Mask,
    Payload,
    Complete,
}

/// Incremental frame parser.
///
/// Header bytes are consumed one at a time, the payload in bulk and unmasked as
/// it arrives. Frames larger than `max_payload` are rejected once their length
/// is known, before any payload is buffered.
#[derive(Debug)]
pub(crate) struct FrameParser {
    state: FrameState,
    fin: bool,
    opcode: Opcode,
    masked: bool,
    mask: [u8; 4],
    length: u64,
    count: usize,
    payload: Vec<u8>,
    max_payload: usize,
}

impl FrameParser {
    pub(crate) fn new(max_payload: usize) -> Self {
        Self {
            state: FrameState::Header,
            fin: false,
            opcode: Opcode::Continuation,
            masked: false,
            mask: [0; 4],
            length: 0,
            count: 0,
            payload: Vec::new(),
            max_payload,
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.state = FrameState::Header;
        self.masked = false;
        self.length = 0;
        self.count = 0;
        self.payload.clear();
    }

    /// Consumes bytes until a frame completes or the input runs out.
    ///
    /// Returns how many bytes were used, and the frame if one completed. The
    /// parser is ready for the next frame afterwards.
    pub(crate) fn parse(&mut self, input: &[u8]) -> Result<(usize, Option<Frame>), WsError> {
        let mut pos = 0;

        loop {
            match self.state {
                FrameState::Complete => {
                    let frame = Frame {
                        fin: self.fin,
                        opcode: self.opcode,
                        payload: mem::take(&mut self.payload),
                    };
                    self.reset();
                    return Ok((pos, Some(frame)));
                }
                FrameState::Payload => {
                    let start = self.payload.len();
                    let take = (self.length as usize - start).min(input.len() - pos);
                    self.payload.extend_from_slice(&input[pos..pos + take]);
                    pos += take;

                    if self.masked {
                        mask_from(&mut self.payload[start..], self.mask, start);
                    }
                    if self.payload.len() as u64 != self.length {
                        return Ok((pos, None));
                    }
                    self.state = FrameState::Complete;
                }
                _ => {
                    let Some(&byte) = input.get(pos) else {
                        return Ok((pos, None));
                    };
                    pos += 1;
                    self.advance(byte)?;
                }
            }
        }
    }

    /// Steps through the header, length and mask bytes. Payload bytes are
    /// copied in bulk by [`parse`](Self::parse).
    fn advance(&mut self, byte: u8) -> Result<(), WsError> {
        match self.state {
            FrameState::Header => {
                if byte & 0x70 != 0 {
                    return Err(WsError::InvalidReservedBits);
                }

                let fin = byte & 0x80 != 0;
                let opcode = Opcode::from_u8(byte & 0x0F)?;
                if opcode.is_control() && !fin {
                    return Err(WsError::FragmentedControlFrame);
                }

                self.fin = fin;
                self.opcode = opcode;
                self.state = FrameState::Length;
            }
            FrameState::Length => {
                self.masked = byte & 0x80 != 0;
                match byte & 0x7F {
                    126 => self.state = FrameState::Extended16,
                    127 => self.state = FrameState::Extended64,
                    length => {
                        self.length = length as u64;
                        self.begin_payload()?;
                    }
                }
            }
            FrameState::Extended64 | FrameState::Extended16 => {
                self.length = (self.length << 8) | byte as u64;
                self.count += 1;

                let needed = match self.state {
                    FrameState::Extended16 => 2,
                    _ => 8,
                };
                if self.count == needed {
                    self.begin_payload()?;
                }
            }
            FrameState::Mask => {
                self.mask[self.count] = byte;
                self.count += 1;

                if self.count == 4 {
                    self.state = match self.length {
                        0 => FrameState::Complete,
                        _ => FrameState::Payload,
                    };
                }
            }
            FrameState::Payload | FrameState::Complete => return Err(WsError::ReadPastEnd),
        }

        Ok(())
    }

    fn begin_payload(&mut self) -> Result<(), WsError> {
        if self.length > self.max_payload as u64 {
            return Err(WsError::PayloadTooLarge(self.length));
        }

        self.count = 0;
        self.payload.reserve(self.length as usize);
        self.state = match (self.masked, self.length) {
            (true, _) => FrameState::Mask,
            (false, 0) => FrameState::Complete,
            (false, _) => FrameState::Payload,
        };
        Ok(())
    }
}

/// XORs `payload` with the 4-byte `mask`, as in RFC 6455 Section 5.3.
///
/// Applying the same mask twice gives back the original bytes.
///
/// # Examples
/// ```
/// use duplex_web::ws::apply_mask;
///
/// let mut data = *b"Hello";
/// apply_mask(&mut data, [0x37, 0xfa, 0x21, 0x3d]);
/// assert_eq!(data, [0x7f, 0x9f, 0x4d, 0x51, 0x58]);
///
/// apply_mask(&mut data, [0x37, 0xfa, 0x21, 0x3d]);
/// assert_eq!(&data, b"Hello");
/// ```
#[inline]
pub fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    mask_from(payload, mask, 0);
}

// Masks a slice starting `offset` bytes into the payload.
#[inline]
fn mask_from(payload: &mut [u8], mask: [u8; 4], offset: usize) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[(offset + i) % 4];
    }
}

/// Appends one frame to `out`.
///
/// Servers send unmasked frames (`mask: None`), clients must mask theirs.
pub fn encode_frame(out: &mut Vec<u8>, fin: bool, opcode: Opcode, payload: &[u8], mask: Option<[u8; 4]>) {
    out.push(((fin as u8) << 7) | opcode as u8);

    let mask_bit = match mask {
        Some(_) => 0x80,
        None => 0,
    };
    match payload.len() {
        len if len <= 125 => out.push(mask_bit | len as u8),
        len if len <= u16::MAX as usize => {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        len => {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }

    if let Some(mask) = mask {
        out.extend_from_slice(&mask);
    }
    let start = out.len();
    out.extend_from_slice(payload);
    if let Some(mask) = mask {
        apply_mask(&mut out[start..], mask);
    }
}

/// Appends a whole message to `out`, split into frames of at most
/// `max_payload` bytes.
///
/// The first frame carries `opcode`, the following ones are continuations and
/// only the last has the final-fragment flag.
pub fn encode_message(out: &mut Vec<u8>, opcode: Opcode, payload: &[u8], max_payload: usize) {
    let max_payload = max_payload.max(1);
    if payload.len() <= max_payload {
        return encode_frame(out, true, opcode, payload, None);
    }

    let mut chunks = payload.chunks(max_payload).peekable();
    let mut frame_opcode = opcode;
    while let Some(chunk) = chunks.next() {
        encode_frame(out, chunks.peek().is_none(), frame_opcode, chunk, None);
        frame_opcode = Opcode::Continuation;
    }
}

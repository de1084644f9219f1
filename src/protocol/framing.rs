//! Frame codec.
//!
//! Frames are laid out as:
//! - 4 bytes: network magic
//! - 12 bytes: command name, ASCII, NUL-padded
//! - 4 bytes: big-endian payload length
//! - 4 bytes: checksum (first 4 bytes of SHA-512 of the payload)
//! - N bytes: payload
//!
//! Protocol violations are non-fatal: the decoder yields them in-band as
//! `Decoded::Invalid` items and resynchronizes to the next magic sequence,
//! so noise on the wire never tears down the connection by itself.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha512};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::{MAGIC, MAX_PAYLOAD_SIZE};
use crate::error::{Error, Result};

/// Header size: magic + command + length + checksum.
const HEADER_SIZE: usize = 24;

/// Width of the NUL-padded command field.
const COMMAND_SIZE: usize = 12;

/// One decoded transport frame: a command name plus opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Command name, without padding.
    pub command: String,
    /// Message payload.
    pub payload: Bytes,
}

/// Decoder output: either a well-formed frame or an in-band violation.
#[derive(Debug)]
pub enum Decoded {
    /// A well-formed frame.
    Frame(RawFrame),
    /// A protocol violation; the offending bytes have been discarded.
    Invalid(Error),
}

/// Frame checksum: first 4 bytes of SHA-512 of the payload.
pub fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = Sha512::digest(payload);
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Encode a single frame to bytes.
///
/// This is the one encoding path; broadcast encodes once through here and
/// hands the same bytes to every connection.
pub fn encode_frame(command: &str, payload: &[u8]) -> Result<Bytes> {
    if command.is_empty()
        || command.len() > COMMAND_SIZE
        || !command.bytes().all(|b| b.is_ascii_graphic())
    {
        return Err(Error::InvalidCommand(command.to_string()));
    }
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(Error::MessageTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_slice(&MAGIC);

    let mut cmd = [0u8; COMMAND_SIZE];
    cmd[..command.len()].copy_from_slice(command.as_bytes());
    buf.put_slice(&cmd);

    buf.put_u32(payload.len() as u32);
    buf.put_slice(&checksum(payload));
    buf.put_slice(payload);

    Ok(buf.freeze())
}

/// Header of the frame currently being received.
#[derive(Debug)]
struct PendingHeader {
    command: [u8; COMMAND_SIZE],
    length: usize,
    checksum: [u8; 4],
}

/// Codec for the transport frame format.
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Header of the current frame, once read.
    pending: Option<PendingHeader>,
}

impl FrameCodec {
    /// Create a new frame codec.
    pub fn new() -> Self {
        Self { pending: None }
    }

    /// Discard buffered bytes up to the next possible magic sequence.
    ///
    /// Keeps any trailing partial magic so a frame split across reads is
    /// not lost.
    fn resync(&self, src: &mut BytesMut) {
        // Look for a full magic occurrence past the current position.
        if let Some(pos) = src
            .windows(MAGIC.len())
            .skip(1)
            .position(|w| w == MAGIC)
        {
            src.advance(pos + 1);
            return;
        }

        // No full magic; keep the longest tail that is a magic prefix.
        let keep = (1..MAGIC.len())
            .rev()
            .find(|&n| src.len() >= n && src[src.len() - n..] == MAGIC[..n])
            .unwrap_or(0);
        let drop = src.len() - keep;
        src.advance(drop);
    }
}

impl Decoder for FrameCodec {
    type Item = Decoded;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Decoded>> {
        if self.pending.is_none() {
            if src.is_empty() {
                return Ok(None);
            }

            // Anything not starting with the magic is non-binary noise.
            let prefix = src.len().min(MAGIC.len());
            if src[..prefix] != MAGIC[..prefix] {
                self.resync(src);
                return Ok(Some(Decoded::Invalid(Error::NonBinaryFrame)));
            }

            if src.len() < HEADER_SIZE {
                return Ok(None);
            }

            let length = u32::from_be_bytes([src[16], src[17], src[18], src[19]]) as usize;
            if length > MAX_PAYLOAD_SIZE {
                // The declared length cannot be trusted, so skip the header
                // and rescan rather than waiting for that many bytes. The
                // bytes right after the magic may themselves start a valid
                // frame, so only resync when they do not.
                src.advance(MAGIC.len());
                let prefix = src.len().min(MAGIC.len());
                if src[..prefix] != MAGIC[..prefix] {
                    self.resync(src);
                }
                return Ok(Some(Decoded::Invalid(Error::MessageTooLarge {
                    size: length,
                    max: MAX_PAYLOAD_SIZE,
                })));
            }

            let mut command = [0u8; COMMAND_SIZE];
            command.copy_from_slice(&src[4..16]);
            let mut checksum_field = [0u8; 4];
            checksum_field.copy_from_slice(&src[20..24]);
            src.advance(HEADER_SIZE);

            self.pending = Some(PendingHeader {
                command,
                length,
                checksum: checksum_field,
            });
        }

        let Some(header) = self.pending.take() else {
            return Ok(None);
        };
        if src.len() < header.length {
            src.reserve(header.length - src.len());
            self.pending = Some(header);
            return Ok(None);
        }

        let payload = src.split_to(header.length).freeze();

        let actual = checksum(&payload);
        if actual != header.checksum {
            return Ok(Some(Decoded::Invalid(Error::ChecksumMismatch {
                expected: header.checksum,
                actual,
            })));
        }

        let trimmed = header
            .command
            .iter()
            .position(|&b| b == 0)
            .map(|end| &header.command[..end])
            .unwrap_or(&header.command[..]);
        let padding_clean = header.command[trimmed.len()..].iter().all(|&b| b == 0);
        if trimmed.is_empty()
            || !padding_clean
            || !trimmed.iter().all(|b| b.is_ascii_graphic())
        {
            return Ok(Some(Decoded::Invalid(Error::InvalidCommand(
                String::from_utf8_lossy(trimmed).into_owned(),
            ))));
        }

        let command = String::from_utf8_lossy(trimmed).into_owned();
        Ok(Some(Decoded::Frame(RawFrame { command, payload })))
    }
}

impl Encoder<RawFrame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: RawFrame, dst: &mut BytesMut) -> Result<()> {
        let bytes = encode_frame(&frame.command, &frame.payload)?;
        dst.reserve(bytes.len());
        dst.put_slice(&bytes);
        Ok(())
    }
}

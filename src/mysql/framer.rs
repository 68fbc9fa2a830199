//! Non-blocking packet framing.
//!
//! Every frame on the wire is:
//! ```text
//! [3 bytes: payload length, little-endian]
//! [1 byte: sequence id]
//! [N bytes: payload]
//! ```
//! A frame whose length equals `MAX_PAYLOAD_LEN` is continued by the next
//! frame; the logical message ends at the first shorter frame. The framer
//! never blocks: when the stream reports `WouldBlock` it keeps whatever it
//! already has and returns `Suspend`, and the next call resumes from there.
//!
//! Inbound messages are capped by [`PacketFramer::set_max_message_len`]; the
//! check runs on each frame header, before its payload is buffered.

use std::io::{self, ErrorKind, Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::error::{ProxyError, Result};
use super::packet::{parse_header, put_header, Packet};
use super::protocol::MAX_PAYLOAD_LEN;

const READ_CHUNK: usize = 16 * 1024;
const HEADER_LEN: usize = 4;
// Buffers above this capacity are dropped instead of reused after a cycle.
const RETAIN_CAPACITY: usize = 1024 * 1024;

#[derive(Debug, PartialEq, Eq)]
pub enum FrameRead {
    Frame { payload: Bytes, last: bool },
    Suspend,
}

#[derive(Debug, PartialEq, Eq)]
pub enum MessageRead {
    Message(Bytes),
    Suspend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameWrite {
    Done,
    Suspend,
}

enum Fill {
    Data,
    WouldBlock,
    Eof,
}

pub struct PacketFramer {
    read_buf: BytesMut,
    message: BytesMut,
    in_message: bool,
    write_buf: BytesMut,
    sequence_id: u8,
    max_message_len: usize,
}

impl PacketFramer {
    pub fn new() -> Self {
        Self {
            read_buf: BytesMut::with_capacity(8192),
            message: BytesMut::new(),
            in_message: false,
            write_buf: BytesMut::with_capacity(8192),
            sequence_id: 0,
            max_message_len: usize::MAX,
        }
    }

    /// Largest logical inbound message accepted. Longer ones fail with
    /// `PacketTooLarge` as soon as the offending frame header arrives.
    pub fn set_max_message_len(&mut self, max: usize) {
        self.max_message_len = max;
    }

    pub fn max_message_len(&self) -> usize {
        self.max_message_len
    }

    /// Sequence id expected on the next inbound frame, or stamped on the next
    /// outbound one.
    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    pub fn set_sequence_id(&mut self, sequence_id: u8) {
        self.sequence_id = sequence_id;
    }

    /// True while part of an inbound message has been received.
    pub fn has_partial_input(&self) -> bool {
        self.in_message || !self.read_buf.is_empty()
    }

    pub fn has_pending_output(&self) -> bool {
        !self.write_buf.is_empty()
    }

    /// Reads one frame.
    pub fn read_frame<S: Read>(&mut self, stream: &mut S) -> Result<FrameRead> {
        loop {
            if let Some((payload, last)) = self.try_decode()? {
                return Ok(FrameRead::Frame { payload, last });
            }

            match self.fill(stream)? {
                Fill::Data => continue,
                Fill::WouldBlock => return Ok(FrameRead::Suspend),
                Fill::Eof => {
                    return if self.has_partial_input() {
                        Err(ProxyError::Protocol(format!(
                            "stream closed mid-frame with {} buffered bytes",
                            self.read_buf.len()
                        )))
                    } else {
                        Err(ProxyError::ConnectionClosed)
                    };
                }
            }
        }
    }

    /// Reads one logical message, joining continuation frames.
    pub fn read_message<S: Read>(&mut self, stream: &mut S) -> Result<MessageRead> {
        loop {
            match self.read_frame(stream)? {
                FrameRead::Suspend => return Ok(MessageRead::Suspend),
                FrameRead::Frame { payload, last } => {
                    if last && !self.in_message {
                        return Ok(MessageRead::Message(payload));
                    }

                    self.message.extend_from_slice(&payload);
                    self.in_message = true;

                    if last {
                        self.in_message = false;
                        return Ok(MessageRead::Message(self.message.split().freeze()));
                    }
                }
            }
        }
    }

    /// Queues `payload` as one logical message, splitting it into
    /// max-size frames. A payload that is an exact multiple of the maximum
    /// is terminated by an empty frame.
    pub fn queue_payload(&mut self, payload: &[u8]) {
        let mut rest = payload;
        self.write_buf.reserve(payload.len() + HEADER_LEN);

        loop {
            let chunk_len = rest.len().min(MAX_PAYLOAD_LEN);
            put_header(&mut self.write_buf, chunk_len, self.sequence_id);
            self.write_buf.put_slice(&rest[..chunk_len]);
            self.sequence_id = self.sequence_id.wrapping_add(1);
            rest = &rest[chunk_len..];

            if chunk_len < MAX_PAYLOAD_LEN {
                break;
            }
        }
    }

    /// Writes as much queued output as the stream accepts.
    pub fn flush<S: Write>(&mut self, stream: &mut S) -> Result<FrameWrite> {
        while !self.write_buf.is_empty() {
            match stream.write(&self.write_buf) {
                Ok(0) => {
                    return Err(io::Error::new(ErrorKind::WriteZero, "socket accepted no bytes").into());
                }
                Ok(n) => {
                    trace!(written = n, remaining = self.write_buf.len() - n, "frame bytes written");
                    self.write_buf.advance(n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(FrameWrite::Suspend),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        match stream.flush() {
            Ok(()) => Ok(FrameWrite::Done),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(FrameWrite::Suspend),
            Err(e) => Err(e.into()),
        }
    }

    /// Queues one message and starts writing it.
    pub fn write_frame<S: Write>(&mut self, stream: &mut S, payload: &[u8]) -> Result<FrameWrite> {
        self.queue_payload(payload);
        self.flush(stream)
    }

    /// Drops per-query state. Bytes the client already sent for its next
    /// command stay in the read buffer.
    pub fn reset_cycle(&mut self) {
        self.message = BytesMut::new();
        self.in_message = false;
        self.write_buf.clear();
        if self.write_buf.capacity() > RETAIN_CAPACITY {
            self.write_buf = BytesMut::with_capacity(8192);
        }
        if self.read_buf.is_empty() && self.read_buf.capacity() > RETAIN_CAPACITY {
            self.read_buf = BytesMut::with_capacity(8192);
        }
        self.sequence_id = 0;
    }

    /// Releases every buffer.
    pub fn release(&mut self) {
        self.read_buf = BytesMut::new();
        self.message = BytesMut::new();
        self.write_buf = BytesMut::new();
        self.in_message = false;
    }

    fn try_decode(&mut self) -> Result<Option<(Bytes, bool)>> {
        if self.read_buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let (len, sequence_id) = parse_header(&self.read_buf[..HEADER_LEN]);
        if sequence_id != self.sequence_id {
            return Err(ProxyError::Protocol(format!(
                "packet sequence out of order: expected {}, got {}",
                self.sequence_id, sequence_id
            )));
        }

        let total = self.message.len() + len;
        if total > self.max_message_len {
            // The ERR reply continues the client's sequence.
            self.sequence_id = sequence_id.wrapping_add(1);
            return Err(ProxyError::PacketTooLarge(total, self.max_message_len));
        }

        match Packet::decode(&mut self.read_buf)? {
            Some(packet) => {
                self.sequence_id = packet.sequence_id.wrapping_add(1);
                Ok(Some((packet.payload, len < MAX_PAYLOAD_LEN)))
            }
            None => {
                self.read_buf.reserve(HEADER_LEN + len - self.read_buf.len());
                Ok(None)
            }
        }
    }

    fn fill<S: Read>(&mut self, stream: &mut S) -> Result<Fill> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => return Ok(Fill::Eof),
                Ok(n) => {
                    self.read_buf.extend_from_slice(&chunk[..n]);
                    return Ok(Fill::Data);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Fill::WouldBlock),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Default for PacketFramer {
    fn default() -> Self {
        Self::new()
    }
}

//! In-memory non-blocking stream for unit tests.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};

/// Reads are served from queued chunks (one chunk per `read` at most) and
/// report `WouldBlock` when nothing is queued. Writes can be throttled with a
/// byte budget to simulate a full send buffer.
#[derive(Default)]
pub struct MockStream {
    inbound: VecDeque<(Vec<u8>, usize)>,
    closed: bool,
    outbound: Vec<u8>,
    write_budget: Option<usize>,
    fail_writes: bool,
}

impl MockStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_inbound(&mut self, bytes: Vec<u8>) {
        if !bytes.is_empty() {
            self.inbound.push_back((bytes, 0));
        }
    }

    /// Reads return EOF once the queued chunks are drained.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn set_write_budget(&mut self, budget: Option<usize>) {
        self.write_budget = budget;
    }

    pub fn fail_writes(&mut self) {
        self.fail_writes = true;
    }

    pub fn take_outbound(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outbound)
    }

    pub fn outbound(&self) -> &[u8] {
        &self.outbound
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some((chunk, offset)) = self.inbound.front_mut() else {
            return if self.closed {
                Ok(0)
            } else {
                Err(ErrorKind::WouldBlock.into())
            };
        };

        let n = buf.len().min(chunk.len() - *offset);
        buf[..n].copy_from_slice(&chunk[*offset..*offset + n]);
        *offset += n;
        if *offset == chunk.len() {
            self.inbound.pop_front();
        }
        Ok(n)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_writes {
            return Err(ErrorKind::BrokenPipe.into());
        }

        let n = match self.write_budget.as_mut() {
            Some(0) => return Err(ErrorKind::WouldBlock.into()),
            Some(budget) => {
                let n = buf.len().min(*budget);
                *budget -= n;
                n
            }
            None => buf.len(),
        };

        self.outbound.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Client-side helpers for driving a connection through `MockStream`.
pub mod client {
    use bytes::{BufMut, BytesMut};

    use crate::mysql::packet::put_header;
    use crate::mysql::protocol::*;

    pub fn frame(sequence_id: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(4 + payload.len());
        put_header(&mut buf, payload.len(), sequence_id);
        buf.put_slice(payload);
        buf.to_vec()
    }

    pub fn command(command: u8, body: &[u8]) -> Vec<u8> {
        let mut payload = vec![command];
        payload.extend_from_slice(body);
        frame(0, &payload)
    }

    pub fn query(sql: &str) -> Vec<u8> {
        command(COM_QUERY, sql.as_bytes())
    }

    /// Splits raw server output into `(sequence_id, payload)` frames.
    pub fn frames(mut bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
        let mut out = Vec::new();
        while bytes.len() >= 4 {
            let len = bytes[0] as usize | (bytes[1] as usize) << 8 | (bytes[2] as usize) << 16;
            out.push((bytes[3], bytes[4..4 + len].to_vec()));
            bytes = &bytes[4 + len..];
        }
        out
    }

    /// Pulls the 20-byte scramble out of an initial handshake payload.
    pub fn salt_from_handshake(payload: &[u8]) -> Vec<u8> {
        let version_end = 1 + payload[1..].iter().position(|b| *b == 0).unwrap_or(0);
        let part1_start = version_end + 1 + 4;
        let mut salt = payload[part1_start..part1_start + 8].to_vec();
        // filler(1) caps(2) charset(1) status(2) caps(2) auth len(1) reserved(10)
        let part2_start = part1_start + 8 + 1 + 2 + 1 + 2 + 2 + 1 + 10;
        salt.extend_from_slice(&payload[part2_start..part2_start + 12]);
        salt
    }

    pub fn handshake_response(
        user: &str,
        password: &str,
        salt: &[u8],
        database: Option<&str>,
        extra_capabilities: u32,
    ) -> Vec<u8> {
        let mut caps = CLIENT_PROTOCOL_41
            | CLIENT_SECURE_CONNECTION
            | CLIENT_PLUGIN_AUTH
            | CLIENT_LONG_PASSWORD
            | CLIENT_TRANSACTIONS
            | extra_capabilities;
        if database.is_some() {
            caps |= CLIENT_CONNECT_WITH_DB;
        }

        let mut buf = BytesMut::new();
        buf.put_u32_le(caps);
        buf.put_u32_le(16 * 1024 * 1024);
        buf.put_u8(UTF8MB4_GENERAL_CI);
        buf.put_bytes(0, 23);
        write_null_terminated_str(&mut buf, user);

        let scramble = scramble_password(password, salt);
        buf.put_u8(scramble.len() as u8);
        buf.put_slice(&scramble);

        if let Some(db) = database {
            write_null_terminated_str(&mut buf, db);
        }
        write_null_terminated_str(&mut buf, AUTH_PLUGIN_NAME);

        frame(1, &buf)
    }

    /// Error code of an ERR payload.
    pub fn err_code(payload: &[u8]) -> Option<u16> {
        (payload.first() == Some(&ERR_HEADER)).then(|| u16::from_le_bytes([payload[1], payload[2]]))
    }

    /// Decodes the text cells of a row payload.
    pub fn row_values(mut payload: &[u8]) -> Vec<Option<String>> {
        let mut values = Vec::new();
        while !payload.is_empty() {
            if payload[0] == NULL_MARKER {
                values.push(None);
                payload = &payload[1..];
                continue;
            }
            let len = payload[0] as usize;
            values.push(Some(String::from_utf8_lossy(&payload[1..1 + len]).into_owned()));
            payload = &payload[1 + len..];
        }
        values
    }
}

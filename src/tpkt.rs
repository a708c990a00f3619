//! TPKT framing.
//!
//! This module provides functionality to transmit TPDUs over TCP.
//!
//! Each TPDU is prefixed with the 4-byte version/length header specified in
//! [IETF RFC 1006].
//!
//! [IETF RFC 1006]: https://tools.ietf.org/html/rfc1006

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Instant;

use bytes::{BufMut, BytesMut};

/// Registered RFC 1006 TCP port number.
pub const TCP_PORT: u16 = 102;

/// TPKT protocol version.
pub const VERSION: u8 = 3;

/// TPKT header length.
pub const HEADER_LEN: usize = 4;

/// Minimum TPKT length, based on the header and the smallest TPDU (a DT
/// with an empty user-data field).
pub const MIN_LEN: usize = HEADER_LEN + 3;

/// Maximum TPKT length representable in the 16-bit length field.
pub const MAX_LEN: usize = 65535;

/// Encodes a TPKT carrying `body` into the buffer provided.
pub fn encode(body: &[u8], buf: &mut BytesMut) -> Result<usize, String> {
    let len = HEADER_LEN + body.len();

    if len < MIN_LEN {
        return Err(format!("TPKT too short: {len}"));
    }

    if len > MAX_LEN {
        return Err(format!("TPKT too long: {len}"));
    }

    buf.reserve(len);

    buf.put_u8(VERSION);
    buf.put_u8(0);
    buf.put_u16(len as u16);
    buf.put_slice(body);

    Ok(len)
}

/// Decodes a TPKT header, returning the total length it announces.
pub fn decode_header(header: &[u8; HEADER_LEN]) -> Result<usize, String> {
    if header[0] != VERSION {
        return Err(format!("invalid TPKT version: {}", header[0]));
    }

    let len = u16::from_be_bytes([header[2], header[3]]) as usize;

    if len < MIN_LEN {
        return Err(format!("TPKT too short: {len}"));
    }

    Ok(len)
}

/// Error produced while receiving a TPKT.
#[derive(Debug)]
pub enum RecvError {
    /// Underlying socket failure.
    Io(io::Error),
    /// The peer sent something that is not a TPKT; the offending header is
    /// kept so it can be echoed back in an ER TPDU.
    Frame {
        header: [u8; HEADER_LEN],
        reason: String,
    },
}

/// A TPKT link over a TCP stream.
///
/// The link sends and receives one TPKT at a time. Each blocking call takes
/// an optional absolute deadline which is translated into a socket timeout;
/// `None` disables the timeout.
#[derive(Debug)]
pub struct TpktLink {
    stream: TcpStream,
}

impl TpktLink {
    pub fn new(stream: TcpStream) -> Self {
        TpktLink { stream }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Sends one TPDU in its own TPKT.
    pub fn send(&mut self, body: &[u8], deadline: Option<Instant>) -> io::Result<()> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());

        encode(body, &mut buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        self.apply_write_deadline(deadline)?;
        self.stream.write_all(&buf)
    }

    /// Receives one TPKT and returns its body.
    ///
    /// This performs two socket reads, header then body, both under the
    /// same deadline.
    pub fn recv(&mut self, deadline: Option<Instant>) -> Result<BytesMut, RecvError> {
        self.apply_read_deadline(deadline).map_err(RecvError::Io)?;

        let mut header = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut header).map_err(RecvError::Io)?;

        let len = decode_header(&header).map_err(|reason| RecvError::Frame { header, reason })?;

        self.apply_read_deadline(deadline).map_err(RecvError::Io)?;

        let mut body = BytesMut::zeroed(len - HEADER_LEN);
        self.stream.read_exact(&mut body).map_err(RecvError::Io)?;

        Ok(body)
    }

    pub fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Both)
    }

    fn apply_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.stream.set_read_timeout(remaining(deadline)?)
    }

    fn apply_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.stream.set_write_timeout(remaining(deadline)?)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

fn remaining(deadline: Option<Instant>) -> io::Result<Option<std::time::Duration>> {
    match deadline {
        None => Ok(None),
        Some(deadline) => {
            let left = deadline.saturating_duration_since(Instant::now());

            if left.is_zero() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "deadline elapsed"));
            }

            Ok(Some(left))
        }
    }
}

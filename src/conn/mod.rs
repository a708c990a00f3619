//! Connection-mode transport service.
//!
//! This module provides the class 0 transport connection on top of the TPKT
//! link: connection establishment, the DT/ED data transfer engines and the
//! listener.
//!
//! A connection is single-owner: at most one reader and one writer at a
//! time. Reads return at most one TPDU's user data; when the caller's
//! buffer is smaller than a received data unit the remainder is buffered
//! and handed out by subsequent reads before any new network data is
//! consumed.

use std::io;
use std::net::{TcpListener, TcpStream};
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tracing::warn;

use crate::error::{DrReason, ErCause, Error};
use crate::negotiate::valid_tpdu_size;
use crate::tpdu::{Data, ExpeditedAck, ExpeditedData, Tpdu, DT_HEADER_LEN, ED_MAX_DATA};
use crate::tpkt::{RecvError, TpktLink};
use crate::tsap::{Network, TsapAddr};

mod handshake;

/// Options for the initiating side of a connection.
#[derive(Clone, Debug, Default)]
pub struct DialOpts {
    /// Maximum TPDU size to propose; one of 128, 256, 512, 1024, 2048, 4096
    /// or 8192 octets. `None` leaves the protocol default of 128 in force.
    pub max_tpdu_size: Option<usize>,
    /// Request expedited service.
    pub expedited: bool,
    /// User data to carry inside the CR, silently truncated to the
    /// connection's initial-data capacity.
    pub initial_data: Vec<u8>,
}

/// Options for a listener.
#[derive(Clone, Debug)]
pub struct ListenOpts {
    /// Honor an expedited-service proposal from the peer.
    pub expedited: bool,
    /// Cap the negotiated maximum TPDU size; same valid values as
    /// [`DialOpts::max_tpdu_size`].
    pub max_tpdu_size: Option<usize>,
}

impl Default for ListenOpts {
    fn default() -> Self {
        ListenOpts {
            expedited: true,
            max_tpdu_size: None,
        }
    }
}

/// Outcome of a single read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Recv {
    /// Octets copied into the caller's buffer.
    pub len: usize,
    /// Whether the returned segment ends a TSDU.
    pub end_of_tsdu: bool,
    /// Whether the segment arrived as expedited data.
    pub expedited: bool,
}

/// Tail of a received data unit that did not fit in the caller's buffer.
///
/// The buffer grows to its high-water mark and is reused for later
/// segments rather than reallocated on every partial read.
#[derive(Debug)]
struct ReadBuf {
    data: BytesMut,
    pos: usize,
    end_of_tsdu: bool,
    expedited: bool,
}

impl ReadBuf {
    fn new() -> Self {
        ReadBuf {
            data: BytesMut::new(),
            pos: 0,
            end_of_tsdu: false,
            expedited: false,
        }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn store(&mut self, tail: &[u8], end_of_tsdu: bool, expedited: bool) {
        self.data.clear();
        self.data.extend_from_slice(tail);
        self.pos = 0;
        self.end_of_tsdu = end_of_tsdu;
        self.expedited = expedited;
    }

    fn drain(&mut self, out: &mut [u8]) -> Recv {
        let n = out.len().min(self.data.len() - self.pos);

        out[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;

        Recv {
            len: n,
            // The stored flag is only reported once the tail is gone.
            end_of_tsdu: self.is_empty() && self.end_of_tsdu,
            expedited: self.expedited,
        }
    }
}

/// A class 0 transport connection.
#[derive(Debug)]
pub struct CotpConn {
    link: TpktLink,
    local: TsapAddr,
    remote: TsapAddr,
    src_ref: u16,
    dst_ref: u16,
    max_tpdu_size: usize,
    use_expedited: bool,
    max_initial_data: usize,
    read_buf: ReadBuf,
    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
    ed_pending: bool,
    closed: bool,
}

impl CotpConn {
    fn new(
        link: TpktLink,
        local: TsapAddr,
        remote: TsapAddr,
        est: handshake::Established,
    ) -> Self {
        let mut conn = CotpConn {
            link,
            local,
            remote,
            src_ref: est.src_ref,
            dst_ref: est.dst_ref,
            max_tpdu_size: est.params.max_tpdu_size,
            use_expedited: est.params.use_expedited,
            max_initial_data: est.params.max_initial_data,
            read_buf: ReadBuf::new(),
            read_deadline: None,
            write_deadline: None,
            ed_pending: false,
            closed: false,
        };

        if !est.initial_data.is_empty() {
            conn.read_buf.store(&est.initial_data, true, false);
        }

        conn
    }

    pub fn local_addr(&self) -> &TsapAddr {
        &self.local
    }

    pub fn remote_addr(&self) -> &TsapAddr {
        &self.remote
    }

    /// Effective maximum TPDU size negotiated for this connection.
    pub fn max_tpdu_size(&self) -> usize {
        self.max_tpdu_size
    }

    /// Whether expedited service was negotiated by both sides.
    pub fn expedited_available(&self) -> bool {
        self.use_expedited
    }

    /// User octets that fit in the CR's user-data field on this connection.
    pub fn max_initial_data(&self) -> usize {
        self.max_initial_data
    }

    /// Sets the absolute deadline applied to subsequent reads; `None`
    /// disables it.
    pub fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.read_deadline = deadline;
    }

    /// Sets the absolute deadline applied to subsequent writes; `None`
    /// disables it.
    pub fn set_write_deadline(&mut self, deadline: Option<Instant>) {
        self.write_deadline = deadline;
    }

    /// Sets both deadlines at once.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.read_deadline = deadline;
        self.write_deadline = deadline;
    }

    /// Reads at most one TPDU's user data into `buf`.
    ///
    /// Data left over from a previous read is drained before any new
    /// network data is consumed. The returned [`Recv`] reports how many
    /// octets were copied, whether they end a TSDU and whether they arrived
    /// expedited.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<Recv, Error> {
        if buf.is_empty() {
            return Err(Error::InvalidInput);
        }

        if !self.read_buf.is_empty() {
            return Ok(self.read_buf.drain(buf));
        }

        if self.closed {
            return Err(Error::Transport(closed_error()));
        }

        loop {
            let body = match self.link.recv(self.read_deadline) {
                Ok(body) => body.freeze(),
                Err(RecvError::Io(err)) => return Err(Error::Transport(err)),
                Err(RecvError::Frame { header, reason }) => {
                    return Err(self.reject(&header, reason))
                }
            };

            match Tpdu::decode(body.clone()) {
                Ok(Tpdu::Data(dt)) => {
                    return Ok(self.deliver(buf, &dt.user_data, dt.end_of_tsdu, false));
                }
                Ok(Tpdu::ExpeditedData(ed)) => {
                    if !self.use_expedited {
                        return Err(self.reject(&body, "expedited data not negotiated".into()));
                    }

                    if ed.dst_ref != self.src_ref {
                        return Err(self.reject(
                            &body,
                            format!("ED destination reference mismatch: {}", ed.dst_ref),
                        ));
                    }

                    self.acknowledge_expedited()?;

                    return Ok(self.deliver(buf, &ed.user_data, ed.end_of_tsdu, true));
                }
                Ok(Tpdu::ExpeditedAck(ea)) => {
                    if self.ed_pending && ea.dst_ref == self.src_ref {
                        self.ed_pending = false;
                        continue;
                    }

                    return Err(self.reject(&body, "unexpected EA".into()));
                }
                Ok(Tpdu::DisconnectRequest(dr)) => {
                    let _ = self.close();
                    return Err(Error::Refused(DrReason(dr.reason)));
                }
                Ok(Tpdu::Error(er)) => {
                    let _ = self.close();
                    return Err(Error::Rejected(ErCause(er.cause)));
                }
                Ok(tpdu) => {
                    return Err(self.reject(
                        &body,
                        format!("unexpected {:?} on an open connection", tpdu.tpdu_type()),
                    ));
                }
                Err(reason) => return Err(self.reject(&body, reason)),
            }
        }
    }

    /// Writes `buf` as one TSDU, fragmenting it across DT TPDUs as needed.
    ///
    /// Returns the number of user octets accepted. When the underlying
    /// connection fails part way through, the error carries the octet count
    /// accepted so far.
    pub fn send(&mut self, buf: &[u8]) -> Result<usize, Error> {
        if self.closed {
            return Err(Error::Transport(closed_error()));
        }

        let max_sdu = self.max_tpdu_size - DT_HEADER_LEN;

        if buf.is_empty() {
            self.send_dt(&[], true).map_err(|e| write_error(0, e))?;
            return Ok(0);
        }

        let last = buf.len().div_ceil(max_sdu) - 1;
        let mut written = 0;

        for (index, chunk) in buf.chunks(max_sdu).enumerate() {
            self.send_dt(chunk, index == last)
                .map_err(|e| write_error(written, e))?;

            written += chunk.len();
        }

        Ok(written)
    }

    /// Sends at most [`ED_MAX_DATA`] octets as expedited data.
    ///
    /// Only one expedited unit may be in flight; until the peer's EA has
    /// been observed by a read, another call returns a protocol error. On a
    /// connection that did not negotiate expedited service this fails
    /// without touching the network.
    pub fn send_expedited(&mut self, buf: &[u8]) -> Result<(), Error> {
        if !self.use_expedited {
            return Err(Error::ExpeditedNotAvailable);
        }

        if buf.is_empty() || buf.len() > ED_MAX_DATA {
            return Err(Error::InvalidInput);
        }

        if self.closed {
            return Err(Error::Transport(closed_error()));
        }

        if self.ed_pending {
            return Err(Error::Protocol(
                "previous expedited data not yet acknowledged".into(),
            ));
        }

        let ed = ExpeditedData {
            dst_ref: self.dst_ref,
            end_of_tsdu: true,
            user_data: Bytes::copy_from_slice(buf),
        };

        let mut out = BytesMut::new();

        ed.encode(&mut out).map_err(Error::Protocol)?;

        self.link.send(&out, self.write_deadline)?;
        self.ed_pending = true;

        Ok(())
    }

    /// Closes the connection.
    ///
    /// This is the implicit disconnect of class 0: the underlying network
    /// connection is shut down and no DR is sent.
    pub fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }

        self.closed = true;

        match self.link.shutdown() {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn send_dt(&mut self, data: &[u8], end_of_tsdu: bool) -> io::Result<()> {
        let dt = Data {
            end_of_tsdu,
            user_data: Bytes::copy_from_slice(data),
        };

        let mut out = BytesMut::with_capacity(DT_HEADER_LEN + data.len());

        dt.encode(&mut out)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        self.link.send(&out, self.write_deadline)
    }

    /// Acknowledges a received ED. The reply goes out under the read
    /// deadline so a stalled write cannot extend an in-progress read.
    fn acknowledge_expedited(&mut self) -> Result<(), Error> {
        let ea = ExpeditedAck {
            dst_ref: self.dst_ref,
        };

        let mut out = BytesMut::new();

        ea.encode(&mut out).map_err(Error::Protocol)?;

        self.link.send(&out, self.read_deadline)?;

        Ok(())
    }

    fn deliver(&mut self, out: &mut [u8], data: &[u8], end_of_tsdu: bool, expedited: bool) -> Recv {
        if data.len() <= out.len() {
            out[..data.len()].copy_from_slice(data);

            return Recv {
                len: data.len(),
                end_of_tsdu,
                expedited,
            };
        }

        out.copy_from_slice(&data[..out.len()]);
        self.read_buf.store(&data[out.len()..], end_of_tsdu, expedited);

        Recv {
            len: out.len(),
            end_of_tsdu: false,
            expedited,
        }
    }

    /// Replies to a malformed TPDU with a single ER echoing the offending
    /// bytes, then closes the connection. The reply is best-effort and goes
    /// out under the read deadline.
    fn reject(&mut self, offending: &[u8], reason: String) -> Error {
        warn!(%reason, "protocol error");

        handshake::send_error_reply(&mut self.link, self.dst_ref, offending, self.read_deadline);

        let _ = self.link.shutdown();
        self.closed = true;

        Error::Protocol(reason)
    }
}

impl io::Read for CotpConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        match self.recv(buf) {
            Ok(recv) => Ok(recv.len),
            Err(err) => Err(err.into()),
        }
    }
}

impl io::Write for CotpConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.send(buf) {
            Ok(n) => Ok(n),
            Err(Error::PartialWrite { written, .. }) if written > 0 => Ok(written),
            Err(err) => Err(err.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.link.flush()
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection closed")
}

fn write_error(written: usize, source: io::Error) -> Error {
    if written == 0 {
        Error::Transport(source)
    } else {
        Error::PartialWrite { written, source }
    }
}

/// Connects to the transport endpoint `remote` on the network `net`, which
/// must be `cotp`, `cotp4` or `cotp6`.
pub fn dial(net: &str, remote: &TsapAddr) -> Result<CotpConn, Error> {
    dial_with(net, None, remote, DialOpts::default())
}

/// Connects to `remote` with explicit options.
///
/// If `local` is given, its TSEL becomes the calling TSEL of the
/// connection.
pub fn dial_with(
    net: &str,
    local: Option<&TsapAddr>,
    remote: &TsapAddr,
    opts: DialOpts,
) -> Result<CotpConn, Error> {
    let network: Network = net.parse()?;

    if !network.matches(remote.ip()) {
        return Err(Error::InvalidAddress(format!(
            "`{remote}` is not a {net} address"
        )));
    }

    if let Some(size) = opts.max_tpdu_size {
        if !valid_tpdu_size(size) {
            return Err(Error::InvalidInput);
        }
    }

    let stream = TcpStream::connect((remote.ip(), remote.port()))?;
    let mut link = TpktLink::new(stream);

    let calling = local.map(TsapAddr::tsel_bytes).filter(|tsel| !tsel.is_empty());
    let called = Some(remote.tsel_bytes()).filter(|tsel| !tsel.is_empty());

    let est = handshake::connect(&mut link, calling, called, &opts)?;

    let local = match local {
        Some(local) => local.clone(),
        None => {
            let sock = link.local_addr()?;
            TsapAddr::new(sock.ip(), b"")?.with_port(sock.port())
        }
    };

    Ok(CotpConn::new(link, local, remote.clone(), est))
}

/// A transport service listener.
#[derive(Debug)]
pub struct CotpListener {
    listener: TcpListener,
    addr: TsapAddr,
    opts: ListenOpts,
}

impl CotpListener {
    /// Announces on the transport endpoint `addr` on the network `net`,
    /// which must be `cotp`, `cotp4` or `cotp6`.
    ///
    /// An empty TSEL accepts connections for any called TSEL.
    pub fn bind(net: &str, addr: &TsapAddr) -> Result<Self, Error> {
        Self::bind_with(net, addr, ListenOpts::default())
    }

    /// Announces on `addr` with explicit options.
    pub fn bind_with(net: &str, addr: &TsapAddr, opts: ListenOpts) -> Result<Self, Error> {
        let network: Network = net.parse()?;

        if !network.matches(addr.ip()) {
            return Err(Error::InvalidAddress(format!(
                "`{addr}` is not a {net} address"
            )));
        }

        if let Some(size) = opts.max_tpdu_size {
            if !valid_tpdu_size(size) {
                return Err(Error::InvalidInput);
            }
        }

        let listener = TcpListener::bind((addr.ip(), addr.port()))?;
        let port = listener.local_addr()?.port();

        Ok(CotpListener {
            listener,
            addr: addr.clone().with_port(port),
            opts,
        })
    }

    /// The address the listener announces on, with the effective TCP port.
    pub fn local_addr(&self) -> &TsapAddr {
        &self.addr
    }

    /// Waits for the next connection and runs the accepting side of the
    /// handshake on it. The peer's initial data, if any, is returned by the
    /// connection's first read.
    pub fn accept(&self) -> Result<CotpConn, Error> {
        self.accept_with(|data| data.to_vec())
    }

    /// Like [`accept`](Self::accept), but applies `transform` to the peer's
    /// initial data first; whatever it returns is what the first read
    /// yields.
    pub fn accept_with<F>(&self, transform: F) -> Result<CotpConn, Error>
    where
        F: FnOnce(&[u8]) -> Vec<u8>,
    {
        let (stream, peer) = self.listener.accept()?;
        let mut link = TpktLink::new(stream);

        let est = handshake::accept(&mut link, self.addr.tsel(), &self.opts, transform)?;

        let remote = TsapAddr::new(peer.ip(), &est.remote_tsel)?.with_port(peer.port());

        Ok(CotpConn::new(link, self.addr.clone(), remote, est))
    }
}

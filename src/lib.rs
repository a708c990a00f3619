//! Connection-mode transport service (ISO 8073 class 0) over TCP.
//!
//! This crate carries the OSI transport service across ordinary TCP
//! connections using the TPKT framing of [IETF RFC 1006]. Endpoints are
//! identified by an IP address together with a transport selector rather
//! than a port number, messages keep their boundaries across the wire, and
//! the maximum message size is negotiated during connection establishment.
//!
//! The listener side announces on a [`TsapAddr`] and accepts connections
//! whose called TSEL matches; the initiating side dials a remote
//! [`TsapAddr`], optionally carrying initial user data inside the
//! connection request:
//!
//! ```no_run
//! use cotp::{CotpListener, TsapAddr};
//!
//! # fn main() -> Result<(), cotp::Error> {
//! let addr = TsapAddr::resolve("cotp", "127.0.0.1:svc")?;
//!
//! let listener = CotpListener::bind("cotp", &addr)?;
//!
//! let mut conn = listener.accept()?;
//!
//! let mut buf = [0u8; 128];
//! let recv = conn.recv(&mut buf)?;
//!
//! println!("{} octets, end of TSDU: {}", recv.len, recv.end_of_tsdu);
//! # Ok(())
//! # }
//! ```
//!
//! [IETF RFC 1006]: https://tools.ietf.org/html/rfc1006

pub mod conn;
pub mod error;
pub mod negotiate;
pub mod tpdu;
pub mod tpkt;
pub mod tsap;

pub use crate::conn::{dial, dial_with, CotpConn, CotpListener, DialOpts, ListenOpts, Recv};
pub use crate::error::{DrReason, ErCause, Error};
pub use crate::tsap::{Network, TsapAddr};

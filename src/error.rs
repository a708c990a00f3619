//! Error types.

use std::fmt;
use std::io;

use thiserror::Error;

/// Errors surfaced by the transport service.
#[derive(Debug, Error)]
pub enum Error {
    /// The network name is not one of `cotp`, `cotp4` or `cotp6`.
    #[error("invalid network `{0}`")]
    InvalidNetwork(String),

    /// The address text could not be parsed or resolved.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A failure of the underlying TCP connection, timeouts included.
    #[error(transparent)]
    Transport(#[from] io::Error),

    /// The underlying TCP connection failed part way through a fragmented
    /// write; `written` user octets were accepted before the failure.
    #[error("transport error after writing {written} bytes")]
    PartialWrite {
        written: usize,
        #[source]
        source: io::Error,
    },

    /// The peer sent an un-decodable or out-of-sequence TPDU.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer refused the connection with a DR TPDU.
    #[error("connection refused by peer: {0}")]
    Refused(DrReason),

    /// The peer rejected a TPDU of ours with an ER TPDU.
    #[error("connection rejected by peer: {0}")]
    Rejected(ErCause),

    /// The caller passed an empty or oversized buffer where not allowed.
    #[error("invalid input")]
    InvalidInput,

    /// An expedited-path call on a connection that did not negotiate
    /// expedited service.
    #[error("expedited service not negotiated")]
    ExpeditedNotAvailable,
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::Transport(err) => err,
            Error::PartialWrite { source, .. } => source,
            Error::Protocol(_) => io::Error::new(io::ErrorKind::InvalidData, err),
            Error::Refused(_) | Error::Rejected(_) => {
                io::Error::new(io::ErrorKind::ConnectionRefused, err)
            }
            Error::InvalidNetwork(_) | Error::InvalidAddress(_) | Error::InvalidInput => {
                io::Error::new(io::ErrorKind::InvalidInput, err)
            }
            Error::ExpeditedNotAvailable => io::Error::new(io::ErrorKind::Unsupported, err),
        }
    }
}

/// DR disconnect reason.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrReason(pub u8);

impl DrReason {
    pub fn as_str(self) -> &'static str {
        match self.0 {
            0x00 => "reason not specified",
            0x01 => "congestion at TSAP",
            0x02 => "session entity not attached to TSAP",
            0x03 => "address unknown",
            _ => "unknown reason",
        }
    }
}

impl fmt::Display for DrReason {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{} ({:#04x})", self.as_str(), self.0)
    }
}

/// ER reject cause.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErCause(pub u8);

impl ErCause {
    pub fn as_str(self) -> &'static str {
        match self.0 {
            0x00 => "reason not specified",
            0x01 => "invalid parameter code",
            0x02 => "invalid TPDU type",
            0x03 => "invalid parameter value",
            _ => "unknown cause",
        }
    }
}

impl fmt::Display for ErCause {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{} ({:#04x})", self.as_str(), self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dr_reason_display() {
        assert_eq!(DrReason(0x02).to_string(), "session entity not attached to TSAP (0x02)");
        assert_eq!(DrReason(0x7f).to_string(), "unknown reason (0x7f)");
    }

    #[test]
    fn er_cause_display() {
        assert_eq!(ErCause(0x03).to_string(), "invalid parameter value (0x03)");
    }
}

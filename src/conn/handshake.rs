//! Connection establishment.
//!
//! The initiating side sends a CR and waits for a single reply; the
//! accepting side reads a CR and answers with a CC, or with an ER when the
//! request cannot be honored. Anything malformed gets at most one ER reply
//! before the network connection is closed.

use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::conn::{DialOpts, ListenOpts};
use crate::error::{DrReason, ErCause, Error};
use crate::negotiate::{initial_data_capacity, named_size, negotiate, ConnParams};
use crate::tpdu::param::OPT_EXPEDITED;
use crate::tpdu::{
    ConnectionConfirm, ConnectionRequest, ErrorTpdu, Tpdu, ER_INVALID_PARAM_VALUE,
    MAX_INVALID_TPDU_LEN,
};
use crate::tpkt::{RecvError, TpktLink};

/// Connection variables agreed during establishment.
#[derive(Debug)]
pub(crate) struct Established {
    pub src_ref: u16,
    pub dst_ref: u16,
    pub params: ConnParams,
    /// Data to hand to the first local read: the peer CC's user data on the
    /// initiating side, the transformed CR user data on the accepting side.
    pub initial_data: Bytes,
    /// The peer's calling TSEL, known only on the accepting side.
    pub remote_tsel: Bytes,
}

/// Picks a non-zero connection reference.
fn new_ref() -> u16 {
    loop {
        let reference: u16 = rand::random();

        if reference != 0 {
            return reference;
        }
    }
}

/// Sends a best-effort ER echoing the offending bytes, then closes the link.
pub(crate) fn send_error_reply(
    link: &mut TpktLink,
    dst_ref: u16,
    offending: &[u8],
    deadline: Option<Instant>,
) {
    let offending = &offending[..offending.len().min(MAX_INVALID_TPDU_LEN)];

    let er = ErrorTpdu {
        dst_ref,
        cause: ER_INVALID_PARAM_VALUE,
        invalid_tpdu: Some(Bytes::copy_from_slice(offending)),
    };

    let mut buf = BytesMut::new();

    if er.encode(&mut buf).is_ok() {
        let _ = link.send(&buf, deadline);
    }
}

fn encode_tpdu(tpdu: &Tpdu) -> Result<BytesMut, Error> {
    let mut buf = BytesMut::new();

    tpdu.encode(&mut buf).map_err(Error::Protocol)?;

    Ok(buf)
}

/// Runs the initiating side of the handshake on a fresh link.
pub(crate) fn connect(
    link: &mut TpktLink,
    calling_tsel: Option<Bytes>,
    called_tsel: Option<Bytes>,
    opts: &DialOpts,
) -> Result<Established, Error> {
    let src_ref = new_ref();

    let capacity = initial_data_capacity(calling_tsel.as_deref(), called_tsel.as_deref());
    let initial = &opts.initial_data[..opts.initial_data.len().min(capacity)];

    let mut cr = ConnectionRequest {
        src_ref,
        calling_tsel,
        called_tsel,
        user_data: Bytes::copy_from_slice(initial),
        ..ConnectionRequest::default()
    };

    if let Some(size) = opts.max_tpdu_size {
        cr.tpdu_size = Some(size.trailing_zeros() as u8);
        cr.preferred_tpdu_size = Some((size / 128) as u32);
    }

    if opts.expedited {
        cr.additional_options = Some(OPT_EXPEDITED);
    }

    let buf = encode_tpdu(&Tpdu::ConnectionRequest(cr.clone()))?;
    link.send(&buf, None)?;

    debug!(src_ref, "sent CR, awaiting CC");

    let body = match link.recv(None) {
        Ok(body) => body.freeze(),
        Err(RecvError::Io(err)) => return Err(Error::Transport(err)),
        Err(RecvError::Frame { header, reason }) => {
            send_error_reply(link, 0, &header, None);
            let _ = link.shutdown();
            return Err(Error::Protocol(reason));
        }
    };

    match Tpdu::decode(body.clone()) {
        Ok(Tpdu::ConnectionConfirm(cc)) => match validate_cc(&cr, &cc) {
            Ok(params) => {
                debug!(
                    dst_ref = cc.src_ref,
                    max_tpdu_size = params.max_tpdu_size,
                    use_expedited = params.use_expedited,
                    "connection established"
                );

                Ok(Established {
                    src_ref,
                    dst_ref: cc.src_ref,
                    params,
                    initial_data: cc.user_data,
                    remote_tsel: Bytes::new(),
                })
            }
            Err(reason) => {
                warn!(%reason, "received an invalid CC");
                send_error_reply(link, cc.src_ref, &body, None);
                let _ = link.shutdown();
                Err(Error::Protocol(format!("invalid CC: {reason}")))
            }
        },
        Ok(Tpdu::DisconnectRequest(dr)) => Err(Error::Refused(DrReason(dr.reason))),
        Ok(Tpdu::Error(er)) => Err(Error::Rejected(ErCause(er.cause))),
        Ok(tpdu) => {
            send_error_reply(link, 0, &body, None);
            let _ = link.shutdown();
            Err(Error::Protocol(format!(
                "unknown reply to CR: {:?}",
                tpdu.tpdu_type()
            )))
        }
        Err(reason) => {
            send_error_reply(link, 0, &body, None);
            let _ = link.shutdown();
            Err(Error::Protocol(reason))
        }
    }
}

fn validate_cc(cr: &ConnectionRequest, cc: &ConnectionConfirm) -> Result<ConnParams, String> {
    if cc.dst_ref != cr.src_ref {
        return Err(format!(
            "destination reference {} does not echo {}",
            cc.dst_ref, cr.src_ref
        ));
    }

    if cc.calling_tsel.is_some() && cc.calling_tsel != cr.calling_tsel {
        return Err("calling TSEL not echoed".into());
    }

    if cc.called_tsel.is_some() && cc.called_tsel != cr.called_tsel {
        return Err("called TSEL not echoed".into());
    }

    negotiate(cr, cc)
}

/// Runs the accepting side of the handshake on a freshly accepted link.
///
/// `transform` is applied to the CR's user data; its result is what the
/// accepting application's first read returns.
pub(crate) fn accept<F>(
    link: &mut TpktLink,
    local_tsel: &[u8],
    opts: &ListenOpts,
    transform: F,
) -> Result<Established, Error>
where
    F: FnOnce(&[u8]) -> Vec<u8>,
{
    let body = match link.recv(None) {
        Ok(body) => body.freeze(),
        Err(RecvError::Io(err)) => return Err(Error::Transport(err)),
        Err(RecvError::Frame { header, reason }) => {
            send_error_reply(link, 0, &header, None);
            let _ = link.shutdown();
            return Err(Error::Protocol(reason));
        }
    };

    let cr = match Tpdu::decode(body.clone()) {
        Ok(Tpdu::ConnectionRequest(cr)) => cr,
        Ok(tpdu) => {
            send_error_reply(link, 0, &body, None);
            let _ = link.shutdown();
            return Err(Error::Protocol(format!(
                "expected CR, received {:?}",
                tpdu.tpdu_type()
            )));
        }
        Err(reason) => {
            send_error_reply(link, 0, &body, None);
            let _ = link.shutdown();
            return Err(Error::Protocol(reason));
        }
    };

    match validate_cr(&cr, local_tsel) {
        Ok(proposed) => {
            let selected = match opts.max_tpdu_size {
                Some(cap) => proposed.min(cap),
                None => proposed,
            };

            let use_expedited =
                opts.expedited && cr.additional_options.unwrap_or(0) & OPT_EXPEDITED != 0;

            let src_ref = new_ref();

            let mut cc = ConnectionConfirm {
                dst_ref: cr.src_ref,
                src_ref,
                calling_tsel: cr.calling_tsel.clone(),
                called_tsel: cr.called_tsel.clone(),
                additional_options: use_expedited.then_some(OPT_EXPEDITED),
                ..ConnectionConfirm::default()
            };

            if selected == proposed {
                cc.tpdu_size = cr.tpdu_size;
                cc.preferred_tpdu_size = cr.preferred_tpdu_size;
            } else {
                cc.tpdu_size = Some(selected.trailing_zeros() as u8);
                cc.preferred_tpdu_size = Some((selected / 128) as u32);
            }

            let buf = encode_tpdu(&Tpdu::ConnectionConfirm(cc))?;
            link.send(&buf, None)?;

            debug!(
                src_ref,
                dst_ref = cr.src_ref,
                max_tpdu_size = selected,
                use_expedited,
                "accepted connection"
            );

            Ok(Established {
                src_ref,
                dst_ref: cr.src_ref,
                params: ConnParams {
                    max_tpdu_size: selected,
                    use_expedited,
                    max_initial_data: initial_data_capacity(
                        cr.calling_tsel.as_deref(),
                        cr.called_tsel.as_deref(),
                    ),
                },
                initial_data: Bytes::from(transform(&cr.user_data)),
                remote_tsel: cr.calling_tsel.unwrap_or_default(),
            })
        }
        Err(reason) => {
            warn!(%reason, "received an invalid CR");
            send_error_reply(link, cr.src_ref, &body, None);
            let _ = link.shutdown();
            Err(Error::Protocol(format!("invalid CR: {reason}")))
        }
    }
}

fn validate_cr(cr: &ConnectionRequest, local_tsel: &[u8]) -> Result<usize, String> {
    // An empty listener TSEL accepts any called TSEL.
    if !local_tsel.is_empty() {
        let called = cr.called_tsel.as_deref().unwrap_or_default();

        if called != local_tsel {
            return Err(format!(
                "called TSEL `{}` does not match the listener",
                String::from_utf8_lossy(called)
            ));
        }
    }

    named_size(cr.tpdu_size, cr.preferred_tpdu_size)
}

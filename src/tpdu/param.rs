//! TPDU variable parameters.
//!
//! CR, CC, DR and ER TPDUs carry a variable part made of
//! `(code, length, value)` triples.

use std::collections::HashSet;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::tsap::TSEL_MAX_LEN;

pub const CALLING_TSEL: u8 = 0xc1;
pub const CALLED_TSEL: u8 = 0xc2;
pub const TPDU_SIZE: u8 = 0xc0;
pub const PREFERRED_TPDU_SIZE: u8 = 0xf0;
pub const ADDITIONAL_OPTIONS: u8 = 0xc6;
pub const INVALID_TPDU: u8 = 0xc4;

/// Additional-options bit requesting use of network expedited data.
pub const OPT_EXPEDITED: u8 = 0x01;
/// Additional-options bit requesting receipt confirmation; accepted but
/// never honored in class 0.
pub const OPT_RECEIPT_CONFIRMATION: u8 = 0x02;

/// TPDU parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Param {
    CallingTsel(Bytes),
    CalledTsel(Bytes),
    /// Maximum TPDU size as the base-2 logarithm of the size in octets.
    TpduSize(u8),
    /// Preferred maximum TPDU size in units of 128 octets.
    PreferredTpduSize(u32),
    AdditionalOptions(u8),
    /// The offending TPDU echoed inside an ER.
    InvalidTpdu(Bytes),
    /// Parameters accepted for interoperability but not acted on in class 0:
    /// version, checksum and the QoS group (acknowledge time, throughput,
    /// residual error rate, priority, transit delay, reassignment time).
    Informational(u8, Bytes),
}

impl Param {
    pub fn code(&self) -> u8 {
        match self {
            Param::CallingTsel(_) => CALLING_TSEL,
            Param::CalledTsel(_) => CALLED_TSEL,
            Param::TpduSize(_) => TPDU_SIZE,
            Param::PreferredTpduSize(_) => PREFERRED_TPDU_SIZE,
            Param::AdditionalOptions(_) => ADDITIONAL_OPTIONS,
            Param::InvalidTpdu(_) => INVALID_TPDU,
            Param::Informational(code, _) => *code,
        }
    }
}

pub fn decode_params(mut buf: Bytes) -> Result<Vec<Param>, String> {
    let mut params = Vec::new();

    let mut codes: HashSet<u8> = HashSet::new();

    while !buf.is_empty() {
        if buf.remaining() < 2 {
            return Err("truncated parameter".into());
        }

        let code = buf.get_u8();
        let len = buf.get_u8() as usize;

        if buf.remaining() < len {
            return Err(format!("parameter {code:#04x} overruns TPDU"));
        }

        let value = buf.split_to(len);

        let param = match code {
            CALLING_TSEL => Param::CallingTsel(decode_tsel(value)?),
            CALLED_TSEL => Param::CalledTsel(decode_tsel(value)?),
            TPDU_SIZE => Param::TpduSize(decode_tpdu_size(&value)?),
            PREFERRED_TPDU_SIZE => Param::PreferredTpduSize(decode_preferred_size(&value)?),
            ADDITIONAL_OPTIONS => {
                if value.len() != 1 {
                    return Err(format!("additional options length: {}", value.len()));
                }

                Param::AdditionalOptions(value[0])
            }
            INVALID_TPDU => Param::InvalidTpdu(value),
            _ => Param::Informational(code, value),
        };

        if !codes.insert(code) {
            // Repeats of parameters that are never acted on are harmless;
            // a repeated meaningful parameter is an error.
            if matches!(param, Param::Informational(..)) {
                continue;
            }

            return Err(format!("parameter {code:#04x} repeated"));
        }

        params.push(param);
    }

    Ok(params)
}

pub fn encode_params(params: &[Param], buf: &mut BytesMut) -> Result<usize, String> {
    let mut len = 0;

    for param in params {
        let value = match param {
            Param::CallingTsel(tsel) | Param::CalledTsel(tsel) => tsel.clone(),
            Param::TpduSize(size) => Bytes::copy_from_slice(&[*size]),
            Param::PreferredTpduSize(units) => encode_preferred_size(*units),
            Param::AdditionalOptions(options) => Bytes::copy_from_slice(&[*options]),
            Param::InvalidTpdu(tpdu) => tpdu.clone(),
            Param::Informational(_, value) => value.clone(),
        };

        if value.len() > 255 {
            return Err(format!("parameter {:#04x} too long", param.code()));
        }

        buf.put_u8(param.code());
        buf.put_u8(value.len() as u8);
        buf.put_slice(&value);

        len += 2 + value.len();
    }

    Ok(len)
}

fn decode_tsel(value: Bytes) -> Result<Bytes, String> {
    if value.len() > TSEL_MAX_LEN {
        return Err(format!("transport selector too long: {}", value.len()));
    }

    Ok(value)
}

fn decode_tpdu_size(value: &[u8]) -> Result<u8, String> {
    if value.len() != 1 {
        return Err(format!("TPDU size parameter length: {}", value.len()));
    }

    if !(7..=13).contains(&value[0]) {
        return Err(format!("TPDU size out of range: {}", value[0]));
    }

    Ok(value[0])
}

fn decode_preferred_size(value: &[u8]) -> Result<u32, String> {
    if value.is_empty() || value.len() > 4 {
        return Err(format!("preferred TPDU size parameter length: {}", value.len()));
    }

    Ok(value.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b)))
}

fn encode_preferred_size(units: u32) -> Bytes {
    let bytes = units.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(3);

    Bytes::copy_from_slice(&bytes[skip..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_tsel_params() {
        let params = [
            Param::CallingTsel(Bytes::from_static(b"cli")),
            Param::CalledTsel(Bytes::from_static(b"svc")),
        ];

        let mut buf = BytesMut::new();

        assert_eq!(encode_params(&params, &mut buf), Ok(10));

        assert_eq!(&buf[..], b"\xc1\x03cli\xc2\x03svc");
    }

    #[test]
    fn encode_size_params() {
        let params = [Param::TpduSize(11), Param::PreferredTpduSize(16)];

        let mut buf = BytesMut::new();

        assert_eq!(encode_params(&params, &mut buf), Ok(6));

        assert_eq!(&buf[..], b"\xc0\x01\x0b\xf0\x01\x10");
    }

    #[test]
    fn encode_preferred_size_multi_byte() {
        let params = [Param::PreferredTpduSize(0x0104)];

        let mut buf = BytesMut::new();

        assert!(encode_params(&params, &mut buf).is_ok());

        assert_eq!(&buf[..], b"\xf0\x02\x01\x04");
    }

    #[test]
    fn decode_params_round_trip() {
        let buf = Bytes::from_static(b"\xc1\x03cli\xc0\x01\x0b\xc6\x01\x01");

        let params = decode_params(buf).unwrap();

        assert_eq!(
            params,
            [
                Param::CallingTsel(Bytes::from_static(b"cli")),
                Param::TpduSize(11),
                Param::AdditionalOptions(OPT_EXPEDITED),
            ]
        );
    }

    #[test]
    fn decode_keeps_unknown_params() {
        let buf = Bytes::from_static(b"\x85\x02\x00\x64");

        let params = decode_params(buf).unwrap();

        assert_eq!(
            params,
            [Param::Informational(0x85, Bytes::from_static(b"\x00\x64"))]
        );
    }

    #[test]
    fn decode_rejects_truncated_param() {
        let buf = Bytes::from_static(b"\xc1\x05cli");

        assert!(decode_params(buf).is_err());
    }

    #[test]
    fn decode_rejects_dangling_code() {
        let buf = Bytes::from_static(b"\xc1");

        assert!(decode_params(buf).is_err());
    }

    #[test]
    fn decode_rejects_repeated_tsel() {
        let buf = Bytes::from_static(b"\xc2\x03svc\xc2\x03svc");

        assert!(decode_params(buf).is_err());
    }

    #[test]
    fn decode_ignores_repeated_informational() {
        let buf = Bytes::from_static(b"\x87\x01\x01\x87\x01\x02");

        let params = decode_params(buf).unwrap();

        assert_eq!(
            params,
            [Param::Informational(0x87, Bytes::from_static(b"\x01"))]
        );
    }

    #[test]
    fn decode_rejects_size_out_of_range() {
        assert!(decode_params(Bytes::from_static(b"\xc0\x01\x06")).is_err());
        assert!(decode_params(Bytes::from_static(b"\xc0\x01\x0e")).is_err());
    }

    #[test]
    fn decode_rejects_long_tsel() {
        let mut raw = vec![CALLING_TSEL, 65];
        raw.extend_from_slice(&[0u8; 65]);

        assert!(decode_params(Bytes::from(raw)).is_err());
    }

    #[test]
    fn preferred_size_round_trip() {
        for units in [1u32, 16, 64, 0x0104, 0x0001_0000] {
            let encoded = encode_preferred_size(units);

            assert_eq!(decode_preferred_size(&encoded), Ok(units));
        }
    }
}

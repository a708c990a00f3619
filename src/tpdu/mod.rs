//! TPDU encoding and decoding.
//!
//! This module provides functionality for encoding and decoding the class 0
//! transport protocol data units: CR, CC, DR, DC, DT, ED, EA and ER.
//!
//! Every TPDU starts with a length indicator counting the remaining header
//! bytes (the code byte, the fixed part and the variable part, but neither
//! the indicator itself nor any user data), followed by a code byte whose
//! upper nibble identifies the TPDU type.

use bytes::{BufMut, Bytes, BytesMut};

pub mod param;

use self::param::{decode_params, encode_params, Param};

pub const CR_CODE: u8 = 0xe0;
pub const CC_CODE: u8 = 0xd0;
pub const DR_CODE: u8 = 0x80;
pub const DC_CODE: u8 = 0xc0;
pub const DT_CODE: u8 = 0xf0;
pub const ED_CODE: u8 = 0x10;
pub const EA_CODE: u8 = 0x20;
pub const ER_CODE: u8 = 0x70;

/// Class and options byte for class 0.
pub const CLASS_0: u8 = 0x00;

/// End-of-TSDU bit in the NR/EOT byte.
pub const EOT_MASK: u8 = 0x80;

/// DT header length: length indicator, code and NR/EOT bytes.
pub const DT_HEADER_LEN: usize = 3;

/// Maximum user data carried by an ED TPDU.
pub const ED_MAX_DATA: usize = 16;

/// Maximum total length of a CR or CC TPDU.
pub const MAX_CONNECT_LEN: usize = 128;

/// Maximum user data carried by a CR or CC TPDU.
pub const MAX_CONNECT_DATA: usize = 32;

/// Maximum number of offending bytes an ER can echo back, bounded by the
/// 8-bit length indicator.
pub const MAX_INVALID_TPDU_LEN: usize = 248;

/// DR reason: reason not specified.
pub const DR_NOT_SPECIFIED: u8 = 0x00;

/// ER cause: invalid parameter value.
pub const ER_INVALID_PARAM_VALUE: u8 = 0x03;

/// Transport protocol data unit.
#[derive(Debug)]
pub enum Tpdu {
    ConnectionRequest(ConnectionRequest),
    ConnectionConfirm(ConnectionConfirm),
    DisconnectRequest(DisconnectRequest),
    DisconnectConfirm(DisconnectConfirm),
    Data(Data),
    ExpeditedData(ExpeditedData),
    ExpeditedAck(ExpeditedAck),
    Error(ErrorTpdu),
}

/// TPDU type.
#[derive(PartialEq, Eq, Debug)]
pub enum TpduType {
    ConnectionRequest,
    ConnectionConfirm,
    DisconnectRequest,
    DisconnectConfirm,
    Data,
    ExpeditedData,
    ExpeditedAck,
    Error,
}

impl Tpdu {
    /// Returns the type of this `Tpdu`.
    pub fn tpdu_type(&self) -> TpduType {
        match self {
            Tpdu::ConnectionRequest(_) => TpduType::ConnectionRequest,
            Tpdu::ConnectionConfirm(_) => TpduType::ConnectionConfirm,
            Tpdu::DisconnectRequest(_) => TpduType::DisconnectRequest,
            Tpdu::DisconnectConfirm(_) => TpduType::DisconnectConfirm,
            Tpdu::Data(_) => TpduType::Data,
            Tpdu::ExpeditedData(_) => TpduType::ExpeditedData,
            Tpdu::ExpeditedAck(_) => TpduType::ExpeditedAck,
            Tpdu::Error(_) => TpduType::Error,
        }
    }

    /// Encodes this `Tpdu` into the buffer provided.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<usize, String> {
        match self {
            Tpdu::ConnectionRequest(cr) => cr.encode(buf),
            Tpdu::ConnectionConfirm(cc) => cc.encode(buf),
            Tpdu::DisconnectRequest(dr) => dr.encode(buf),
            Tpdu::DisconnectConfirm(dc) => dc.encode(buf),
            Tpdu::Data(dt) => dt.encode(buf),
            Tpdu::ExpeditedData(ed) => ed.encode(buf),
            Tpdu::ExpeditedAck(ea) => ea.encode(buf),
            Tpdu::Error(er) => er.encode(buf),
        }
    }

    /// Decodes a `Tpdu` from the buffer provided.
    pub fn decode(buf: Bytes) -> Result<Self, String> {
        if buf.len() < 3 {
            return Err(format!("TPDU too short: {}", buf.len()));
        }

        let li = buf[0] as usize;

        if li == 0 || li > 254 {
            return Err(format!("invalid length indicator: {li}"));
        }

        if buf.len() < 1 + li {
            return Err(format!(
                "TPDU shorter than its length indicator: {} < {}",
                buf.len(),
                1 + li
            ));
        }

        let code = buf[1];

        match code >> 4 {
            0xe => Ok(Tpdu::ConnectionRequest(ConnectionRequest::decode(buf)?)),
            0xd => Ok(Tpdu::ConnectionConfirm(ConnectionConfirm::decode(buf)?)),
            0x8 => Ok(Tpdu::DisconnectRequest(DisconnectRequest::decode(buf)?)),
            0xc => Ok(Tpdu::DisconnectConfirm(DisconnectConfirm::decode(buf)?)),
            0xf => Ok(Tpdu::Data(Data::decode(buf)?)),
            0x1 => Ok(Tpdu::ExpeditedData(ExpeditedData::decode(buf)?)),
            0x2 => Ok(Tpdu::ExpeditedAck(ExpeditedAck::decode(buf)?)),
            0x7 => Ok(Tpdu::Error(ErrorTpdu::decode(buf)?)),
            _ => Err(format!("unknown TPDU code: {code:#04x}")),
        }
    }
}

/// _Connection request_ TPDU.
#[derive(Clone, Debug, Default)]
pub struct ConnectionRequest {
    pub src_ref: u16,
    pub calling_tsel: Option<Bytes>,
    pub called_tsel: Option<Bytes>,
    pub tpdu_size: Option<u8>,
    pub preferred_tpdu_size: Option<u32>,
    pub additional_options: Option<u8>,
    pub user_data: Bytes,
}

impl ConnectionRequest {
    fn params(&self) -> Vec<Param> {
        connect_params(
            &self.calling_tsel,
            &self.called_tsel,
            self.tpdu_size,
            self.preferred_tpdu_size,
            self.additional_options,
        )
    }

    /// Encodes this `ConnectionRequest` into the buffer provided.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<usize, String> {
        if self.src_ref == 0 {
            return Err("source reference must be non-zero".into());
        }

        encode_connect(
            CR_CODE,
            0,
            self.src_ref,
            &self.params(),
            &self.user_data,
            buf,
        )
    }

    fn decode(buf: Bytes) -> Result<Self, String> {
        let (dst_ref, src_ref, params, user_data) = decode_connect(&buf, "CR")?;

        if buf[1] != CR_CODE {
            return Err(format!("invalid CR code: {:#04x}", buf[1]));
        }

        if dst_ref != 0 {
            return Err(format!("non-zero destination reference in CR: {dst_ref}"));
        }

        if src_ref == 0 {
            return Err("zero source reference in CR".into());
        }

        let mut cr = ConnectionRequest {
            src_ref,
            user_data,
            ..ConnectionRequest::default()
        };

        for param in params {
            match param {
                Param::CallingTsel(tsel) => cr.calling_tsel = Some(tsel),
                Param::CalledTsel(tsel) => cr.called_tsel = Some(tsel),
                Param::TpduSize(size) => cr.tpdu_size = Some(size),
                Param::PreferredTpduSize(units) => cr.preferred_tpdu_size = Some(units),
                Param::AdditionalOptions(options) => cr.additional_options = Some(options),
                Param::InvalidTpdu(_) => {
                    return Err("invalid-TPDU parameter outside ER".into());
                }
                Param::Informational(..) => {}
            }
        }

        Ok(cr)
    }
}

impl From<ConnectionRequest> for Tpdu {
    fn from(cr: ConnectionRequest) -> Tpdu {
        Tpdu::ConnectionRequest(cr)
    }
}

/// _Connection confirm_ TPDU.
#[derive(Clone, Debug, Default)]
pub struct ConnectionConfirm {
    pub dst_ref: u16,
    pub src_ref: u16,
    pub calling_tsel: Option<Bytes>,
    pub called_tsel: Option<Bytes>,
    pub tpdu_size: Option<u8>,
    pub preferred_tpdu_size: Option<u32>,
    pub additional_options: Option<u8>,
    pub user_data: Bytes,
}

impl ConnectionConfirm {
    fn params(&self) -> Vec<Param> {
        connect_params(
            &self.calling_tsel,
            &self.called_tsel,
            self.tpdu_size,
            self.preferred_tpdu_size,
            self.additional_options,
        )
    }

    /// Encodes this `ConnectionConfirm` into the buffer provided.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<usize, String> {
        if self.src_ref == 0 || self.dst_ref == 0 {
            return Err("connection references must be non-zero".into());
        }

        encode_connect(
            CC_CODE,
            self.dst_ref,
            self.src_ref,
            &self.params(),
            &self.user_data,
            buf,
        )
    }

    fn decode(buf: Bytes) -> Result<Self, String> {
        let (dst_ref, src_ref, params, user_data) = decode_connect(&buf, "CC")?;

        if buf[1] != CC_CODE {
            return Err(format!("invalid CC code: {:#04x}", buf[1]));
        }

        if src_ref == 0 {
            return Err("zero source reference in CC".into());
        }

        let mut cc = ConnectionConfirm {
            dst_ref,
            src_ref,
            user_data,
            ..ConnectionConfirm::default()
        };

        for param in params {
            match param {
                Param::CallingTsel(tsel) => cc.calling_tsel = Some(tsel),
                Param::CalledTsel(tsel) => cc.called_tsel = Some(tsel),
                Param::TpduSize(size) => cc.tpdu_size = Some(size),
                Param::PreferredTpduSize(units) => cc.preferred_tpdu_size = Some(units),
                Param::AdditionalOptions(options) => cc.additional_options = Some(options),
                Param::InvalidTpdu(_) => {
                    return Err("invalid-TPDU parameter outside ER".into());
                }
                Param::Informational(..) => {}
            }
        }

        Ok(cc)
    }
}

impl From<ConnectionConfirm> for Tpdu {
    fn from(cc: ConnectionConfirm) -> Tpdu {
        Tpdu::ConnectionConfirm(cc)
    }
}

/// _Disconnect request_ TPDU.
#[derive(Clone, Debug)]
pub struct DisconnectRequest {
    pub dst_ref: u16,
    pub src_ref: u16,
    pub reason: u8,
    pub user_data: Bytes,
}

impl DisconnectRequest {
    /// Encodes this `DisconnectRequest` into the buffer provided.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<usize, String> {
        buf.put_u8(6);
        buf.put_u8(DR_CODE);
        buf.put_u16(self.dst_ref);
        buf.put_u16(self.src_ref);
        buf.put_u8(self.reason);
        buf.put_slice(&self.user_data);

        Ok(7 + self.user_data.len())
    }

    fn decode(buf: Bytes) -> Result<Self, String> {
        let li = buf[0] as usize;

        if li < 6 {
            return Err(format!("DR length indicator too small: {li}"));
        }

        if buf[1] != DR_CODE {
            return Err(format!("invalid DR code: {:#04x}", buf[1]));
        }

        if buf.len() < 7 {
            return Err(format!("DR too short: {}", buf.len()));
        }

        // The variable part carries nothing a class 0 receiver acts on, but
        // it still has to parse.
        decode_params(buf.slice(7..1 + li))?;

        Ok(DisconnectRequest {
            dst_ref: u16::from_be_bytes([buf[2], buf[3]]),
            src_ref: u16::from_be_bytes([buf[4], buf[5]]),
            reason: buf[6],
            user_data: buf.slice(1 + li..),
        })
    }
}

impl From<DisconnectRequest> for Tpdu {
    fn from(dr: DisconnectRequest) -> Tpdu {
        Tpdu::DisconnectRequest(dr)
    }
}

/// _Disconnect confirm_ TPDU.
///
/// Recognized for completeness; class 0 closes the network connection on DR
/// receipt and never emits a DC.
#[derive(Clone, Debug)]
pub struct DisconnectConfirm {
    pub dst_ref: u16,
    pub src_ref: u16,
}

impl DisconnectConfirm {
    /// Encodes this `DisconnectConfirm` into the buffer provided.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<usize, String> {
        buf.put_u8(5);
        buf.put_u8(DC_CODE);
        buf.put_u16(self.dst_ref);
        buf.put_u16(self.src_ref);

        Ok(6)
    }

    fn decode(buf: Bytes) -> Result<Self, String> {
        if buf[0] != 5 || buf.len() != 6 {
            return Err(format!("invalid DC length: {}", buf.len()));
        }

        if buf[1] != DC_CODE {
            return Err(format!("invalid DC code: {:#04x}", buf[1]));
        }

        Ok(DisconnectConfirm {
            dst_ref: u16::from_be_bytes([buf[2], buf[3]]),
            src_ref: u16::from_be_bytes([buf[4], buf[5]]),
        })
    }
}

impl From<DisconnectConfirm> for Tpdu {
    fn from(dc: DisconnectConfirm) -> Tpdu {
        Tpdu::DisconnectConfirm(dc)
    }
}

/// _Data_ TPDU.
#[derive(Clone, Debug)]
pub struct Data {
    pub end_of_tsdu: bool,
    pub user_data: Bytes,
}

impl Data {
    /// Encodes this `Data` into the buffer provided.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<usize, String> {
        buf.put_u8(2);
        buf.put_u8(DT_CODE);
        buf.put_u8(if self.end_of_tsdu { EOT_MASK } else { 0 });
        buf.put_slice(&self.user_data);

        Ok(DT_HEADER_LEN + self.user_data.len())
    }

    fn decode(buf: Bytes) -> Result<Self, String> {
        if buf[0] != 2 {
            return Err(format!("invalid DT length indicator: {}", buf[0]));
        }

        if buf[1] != DT_CODE {
            return Err(format!("invalid DT code: {:#04x}", buf[1]));
        }

        let nr = buf[2];

        if nr & !EOT_MASK != 0 {
            return Err(format!("non-zero DT sequence number in class 0: {nr:#04x}"));
        }

        Ok(Data {
            end_of_tsdu: nr & EOT_MASK != 0,
            user_data: buf.slice(DT_HEADER_LEN..),
        })
    }
}

impl From<Data> for Tpdu {
    fn from(dt: Data) -> Tpdu {
        Tpdu::Data(dt)
    }
}

/// _Expedited data_ TPDU.
#[derive(Clone, Debug)]
pub struct ExpeditedData {
    pub dst_ref: u16,
    pub end_of_tsdu: bool,
    pub user_data: Bytes,
}

impl ExpeditedData {
    /// Encodes this `ExpeditedData` into the buffer provided.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<usize, String> {
        if self.user_data.len() > ED_MAX_DATA {
            return Err(format!(
                "expedited data too long: {}",
                self.user_data.len()
            ));
        }

        buf.put_u8(4);
        buf.put_u8(ED_CODE);
        buf.put_u16(self.dst_ref);
        buf.put_u8(if self.end_of_tsdu { EOT_MASK } else { 0 });
        buf.put_slice(&self.user_data);

        Ok(5 + self.user_data.len())
    }

    fn decode(buf: Bytes) -> Result<Self, String> {
        if buf[0] != 4 {
            return Err(format!("invalid ED length indicator: {}", buf[0]));
        }

        if buf[1] != ED_CODE {
            return Err(format!("invalid ED code: {:#04x}", buf[1]));
        }

        if buf.len() < 5 {
            return Err(format!("ED too short: {}", buf.len()));
        }

        let nr = buf[4];

        if nr & !EOT_MASK != 0 {
            return Err(format!("non-zero ED sequence number: {nr:#04x}"));
        }

        let user_data = buf.slice(5..);

        if user_data.len() > ED_MAX_DATA {
            return Err(format!("expedited data too long: {}", user_data.len()));
        }

        Ok(ExpeditedData {
            dst_ref: u16::from_be_bytes([buf[2], buf[3]]),
            end_of_tsdu: nr & EOT_MASK != 0,
            user_data,
        })
    }
}

impl From<ExpeditedData> for Tpdu {
    fn from(ed: ExpeditedData) -> Tpdu {
        Tpdu::ExpeditedData(ed)
    }
}

/// _Expedited data acknowledgement_ TPDU.
#[derive(Clone, Debug)]
pub struct ExpeditedAck {
    pub dst_ref: u16,
}

impl ExpeditedAck {
    /// Encodes this `ExpeditedAck` into the buffer provided.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<usize, String> {
        buf.put_u8(4);
        buf.put_u8(EA_CODE);
        buf.put_u16(self.dst_ref);
        buf.put_u8(0);

        Ok(5)
    }

    fn decode(buf: Bytes) -> Result<Self, String> {
        if buf[0] != 4 || buf.len() != 5 {
            return Err(format!("invalid EA length: {}", buf.len()));
        }

        if buf[1] != EA_CODE {
            return Err(format!("invalid EA code: {:#04x}", buf[1]));
        }

        if buf[4] & !EOT_MASK != 0 {
            return Err(format!("non-zero EA sequence number: {:#04x}", buf[4]));
        }

        Ok(ExpeditedAck {
            dst_ref: u16::from_be_bytes([buf[2], buf[3]]),
        })
    }
}

impl From<ExpeditedAck> for Tpdu {
    fn from(ea: ExpeditedAck) -> Tpdu {
        Tpdu::ExpeditedAck(ea)
    }
}

/// _TPDU error_ TPDU.
#[derive(Clone, Debug)]
pub struct ErrorTpdu {
    pub dst_ref: u16,
    pub cause: u8,
    pub invalid_tpdu: Option<Bytes>,
}

impl ErrorTpdu {
    /// Encodes this `ErrorTpdu` into the buffer provided.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<usize, String> {
        let mut params = Vec::new();

        if let Some(invalid) = &self.invalid_tpdu {
            if invalid.len() > MAX_INVALID_TPDU_LEN {
                return Err(format!("invalid-TPDU echo too long: {}", invalid.len()));
            }

            params.push(Param::InvalidTpdu(invalid.clone()));
        }

        let mut params_buf = BytesMut::new();
        let params_len = encode_params(&params, &mut params_buf)?;

        buf.put_u8((4 + params_len) as u8);
        buf.put_u8(ER_CODE);
        buf.put_u16(self.dst_ref);
        buf.put_u8(self.cause);
        buf.put(params_buf);

        Ok(5 + params_len)
    }

    fn decode(buf: Bytes) -> Result<Self, String> {
        let li = buf[0] as usize;

        if li < 4 {
            return Err(format!("ER length indicator too small: {li}"));
        }

        if buf[1] != ER_CODE {
            return Err(format!("invalid ER code: {:#04x}", buf[1]));
        }

        if buf.len() != 1 + li {
            return Err(format!("ER length mismatch: {}", buf.len()));
        }

        let params = decode_params(buf.slice(5..1 + li))?;

        let mut invalid_tpdu = None;

        for param in params {
            if let Param::InvalidTpdu(tpdu) = param {
                invalid_tpdu = Some(tpdu);
            }
        }

        Ok(ErrorTpdu {
            dst_ref: u16::from_be_bytes([buf[2], buf[3]]),
            cause: buf[4],
            invalid_tpdu,
        })
    }
}

impl From<ErrorTpdu> for Tpdu {
    fn from(er: ErrorTpdu) -> Tpdu {
        Tpdu::Error(er)
    }
}

fn connect_params(
    calling_tsel: &Option<Bytes>,
    called_tsel: &Option<Bytes>,
    tpdu_size: Option<u8>,
    preferred_tpdu_size: Option<u32>,
    additional_options: Option<u8>,
) -> Vec<Param> {
    let mut params = Vec::new();

    if let Some(tsel) = calling_tsel {
        params.push(Param::CallingTsel(tsel.clone()));
    }

    if let Some(tsel) = called_tsel {
        params.push(Param::CalledTsel(tsel.clone()));
    }

    if let Some(size) = tpdu_size {
        params.push(Param::TpduSize(size));
    }

    if let Some(units) = preferred_tpdu_size {
        params.push(Param::PreferredTpduSize(units));
    }

    if let Some(options) = additional_options {
        params.push(Param::AdditionalOptions(options));
    }

    params
}

fn encode_connect(
    code: u8,
    dst_ref: u16,
    src_ref: u16,
    params: &[Param],
    user_data: &Bytes,
    buf: &mut BytesMut,
) -> Result<usize, String> {
    if user_data.len() > MAX_CONNECT_DATA {
        return Err(format!("connect user data too long: {}", user_data.len()));
    }

    let mut params_buf = BytesMut::new();
    let params_len = encode_params(params, &mut params_buf)?;

    let li = 6 + params_len;
    let len = 1 + li + user_data.len();

    if len > MAX_CONNECT_LEN {
        return Err(format!("connect TPDU too long: {len}"));
    }

    buf.put_u8(li as u8);
    buf.put_u8(code);
    buf.put_u16(dst_ref);
    buf.put_u16(src_ref);
    buf.put_u8(CLASS_0);
    buf.put(params_buf);
    buf.put_slice(user_data);

    Ok(len)
}

type ConnectFields = (u16, u16, Vec<Param>, Bytes);

fn decode_connect(buf: &Bytes, kind: &str) -> Result<ConnectFields, String> {
    let li = buf[0] as usize;

    if li < 6 {
        return Err(format!("{kind} length indicator too small: {li}"));
    }

    if buf.len() < 7 {
        return Err(format!("{kind} too short: {}", buf.len()));
    }

    if buf[6] != CLASS_0 {
        return Err(format!("unsupported class/options: {:#04x}", buf[6]));
    }

    let params = decode_params(buf.slice(7..1 + li))?;

    Ok((
        u16::from_be_bytes([buf[2], buf[3]]),
        u16::from_be_bytes([buf[4], buf[5]]),
        params,
        buf.slice(1 + li..),
    ))
}

//! Connection parameter negotiation.
//!
//! The CR proposes a maximum TPDU size through the coarse `TPDU-size`
//! parameter (a power of two) and the fine `preferred-TPDU-size` parameter
//! (units of 128 octets); the CC selects a value no larger than the
//! proposal. The preferred parameter wins over the coarse one, and an
//! absent proposal means the protocol default of 128 octets.

use crate::tpdu::param::OPT_EXPEDITED;
use crate::tpdu::{ConnectionConfirm, ConnectionRequest, MAX_CONNECT_DATA, MAX_CONNECT_LEN};

/// Maximum TPDU size assumed when neither side names one.
pub const DEFAULT_TPDU_SIZE: usize = 128;

/// Smallest negotiable maximum TPDU size.
pub const MIN_TPDU_SIZE: usize = 128;

/// Largest negotiable maximum TPDU size.
pub const MAX_TPDU_SIZE: usize = 8192;

/// Parameters in force on an established connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnParams {
    /// Effective maximum TPDU size in octets.
    pub max_tpdu_size: usize,
    /// Whether expedited service was negotiated by both sides.
    pub use_expedited: bool,
    /// User octets that fit in the CR's user-data field alongside the
    /// exchanged transport selectors.
    pub max_initial_data: usize,
}

/// Returns `true` for the sizes a class 0 implementation may negotiate.
pub fn valid_tpdu_size(size: usize) -> bool {
    (MIN_TPDU_SIZE..=MAX_TPDU_SIZE).contains(&size) && size.is_power_of_two()
}

/// Resolves the size named by one side of the exchange, preferring the
/// fine-grained parameter.
pub fn named_size(tpdu_size: Option<u8>, preferred_tpdu_size: Option<u32>) -> Result<usize, String> {
    if let Some(units) = preferred_tpdu_size {
        let size = units as usize * 128;

        if !valid_tpdu_size(size) {
            return Err(format!("preferred TPDU size not negotiable: {size}"));
        }

        return Ok(size);
    }

    match tpdu_size {
        // The codec already constrains the exponent to 7..=13.
        Some(log2) => Ok(1 << log2),
        None => Ok(DEFAULT_TPDU_SIZE),
    }
}

/// Derives the effective connection parameters from a CR/CC exchange.
pub fn negotiate(cr: &ConnectionRequest, cc: &ConnectionConfirm) -> Result<ConnParams, String> {
    let proposed = named_size(cr.tpdu_size, cr.preferred_tpdu_size)?;
    let selected = named_size(cc.tpdu_size, cc.preferred_tpdu_size)?;

    if selected > proposed {
        return Err(format!(
            "TPDU size {selected} exceeds the proposed {proposed}"
        ));
    }

    let proposed_options = cr.additional_options.unwrap_or(0);
    let selected_options = cc.additional_options.unwrap_or(0);

    if selected_options & OPT_EXPEDITED != 0 && proposed_options & OPT_EXPEDITED == 0 {
        return Err("expedited service confirmed but not proposed".into());
    }

    Ok(ConnParams {
        max_tpdu_size: selected,
        use_expedited: proposed_options & selected_options & OPT_EXPEDITED != 0,
        max_initial_data: initial_data_capacity(
            cr.calling_tsel.as_deref(),
            cr.called_tsel.as_deref(),
        ),
    })
}

/// User octets that fit in a CR next to its fixed part and TSEL parameters.
///
/// The connect TPDUs cap user data at 32 octets regardless of how much of
/// the 128-octet maximum the parameters leave free.
pub fn initial_data_capacity(calling_tsel: Option<&[u8]>, called_tsel: Option<&[u8]>) -> usize {
    let fixed = 7;
    let tsel_params = calling_tsel.map_or(0, |tsel| 2 + tsel.len())
        + called_tsel.map_or(0, |tsel| 2 + tsel.len());

    MAX_CONNECT_LEN
        .saturating_sub(fixed + tsel_params)
        .min(MAX_CONNECT_DATA)
}

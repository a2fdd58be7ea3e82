//! # Echonet-Lite Frame Codec
//!
//! The B-route payload format is hexadecimal ASCII with a fixed header and a
//! run of property triples:
//!
//! ```text
//! EHD  TID  SEOJ   DEOJ   ESV OPC ( EPC PDC EDT )*
//! 1081 0001 028801 05FF01 72  01    E7  04  000004A5
//! ```
//!
//! - EHD: protocol header, `1081` for Echonet-Lite over the B-route
//! - TID: transaction id pairing a request with its response
//! - SEOJ/DEOJ: source and destination Echonet object ids
//! - ESV: service code (`62` read request, `72` read response, `73` notify)
//! - OPC: property count; EPC/PDC/EDT repeat that many times
//! - EPC: property code; PDC: value byte length; EDT: value (empty in requests)
//!
//! Decoding is strict: the declared payload length, the OPC count, and every
//! PDC must agree with the bytes physically present, or the whole frame is
//! rejected.

use crate::error::BRouteError;
use crate::util::hex::is_hex;
use nom::bytes::complete::take;
use nom::IResult;

/// Echonet-Lite header tag used on the B-route.
pub const EHD_ECHONET_LITE: &str = "1081";
/// Object id of the controller side (us).
pub const SEOJ_CONTROLLER: &str = "05FF01";
/// Object id of the low-voltage smart-meter class.
pub const DEOJ_SMART_METER: &str = "028801";
/// Service code: property read request.
pub const ESV_READ_REQUEST: &str = "62";
/// Service code: property read response.
pub const ESV_READ_RESPONSE: &str = "72";
/// Service code: unsolicited property notification.
pub const ESV_NOTIFICATION: &str = "73";

/// One application-layer frame. Property triples keep declaration order,
/// which is significant when encoding requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchonetFrame {
    pub ehd: String,
    pub tid: String,
    pub seoj: String,
    pub deoj: String,
    pub esv: String,
    properties: Vec<(String, String)>,
}

impl EchonetFrame {
    /// Builds a "read property" request for the smart meter, one zero-length
    /// triple per requested EPC, in the given order.
    pub fn read_request<S: AsRef<str>>(epcs: &[S], tid: u16) -> Self {
        EchonetFrame {
            ehd: EHD_ECHONET_LITE.to_string(),
            tid: format!("{tid:04X}"),
            seoj: SEOJ_CONTROLLER.to_string(),
            deoj: DEOJ_SMART_METER.to_string(),
            esv: ESV_READ_REQUEST.to_string(),
            properties: epcs
                .iter()
                .map(|epc| (epc.as_ref().to_string(), String::new()))
                .collect(),
        }
    }

    /// Decodes a frame from the hex payload of an ERXUDP event.
    ///
    /// `declared_len` is the event's DATALEN field (payload byte count as
    /// 4 hex digits). Any structural inconsistency fails the whole decode;
    /// no partial frames are produced.
    pub fn decode(declared_len: &str, payload: &str) -> Result<Self, BRouteError> {
        let expected = usize::from_str_radix(declared_len, 16)
            .map_err(|_| BRouteError::FrameDecodeError("invalid length field".to_string()))?;
        if payload.len() != expected * 2 {
            return Err(BRouteError::FrameDecodeError(format!(
                "declared {} bytes, payload carries {}",
                expected,
                payload.len() / 2
            )));
        }
        if !is_hex(payload, None) {
            return Err(BRouteError::FrameDecodeError(
                "payload is not hex".to_string(),
            ));
        }

        let (rest, frame) = parse_frame(payload)
            .map_err(|_| BRouteError::FrameDecodeError("conflicting data".to_string()))?;
        if !rest.is_empty() {
            return Err(BRouteError::FrameDecodeError(format!(
                "{} trailing hex digits after last property",
                rest.len()
            )));
        }
        Ok(frame)
    }

    /// Encodes the frame back into its wire hex. PDC is computed from each
    /// value's byte length; triples keep declaration order.
    pub fn encode(&self) -> String {
        let mut data = String::with_capacity(24 + self.properties.len() * 8);
        data.push_str(&self.ehd);
        data.push_str(&self.tid);
        data.push_str(&self.seoj);
        data.push_str(&self.deoj);
        data.push_str(&self.esv);
        data.push_str(&format!("{:02X}", self.properties.len()));
        for (epc, edt) in &self.properties {
            data.push_str(epc);
            data.push_str(&format!("{:02X}", edt.len() / 2));
            data.push_str(edt);
        }
        data
    }

    /// Property triples in declaration order.
    pub fn properties(&self) -> &[(String, String)] {
        &self.properties
    }

    /// Looks up one property value by EPC.
    pub fn property(&self, epc: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(code, _)| code == epc)
            .map(|(_, edt)| edt.as_str())
    }

    /// Declared property count.
    pub fn opc(&self) -> usize {
        self.properties.len()
    }
}

fn take_hex(input: &str, digits: usize) -> IResult<&str, &str> {
    take(digits)(input)
}

fn field_error(input: &str) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
}

fn parse_frame(input: &str) -> IResult<&str, EchonetFrame> {
    let (i, ehd) = take_hex(input, 4)?;
    let (i, tid) = take_hex(i, 4)?;
    let (i, seoj) = take_hex(i, 6)?;
    let (i, deoj) = take_hex(i, 6)?;
    let (i, esv) = take_hex(i, 2)?;
    let (mut i, opc) = take_hex(i, 2)?;

    let count = usize::from_str_radix(opc, 16).map_err(|_| field_error(i))?;

    let mut properties = Vec::with_capacity(count);
    for _ in 0..count {
        let (rest, epc) = take_hex(i, 2)?;
        let (rest, pdc) = take_hex(rest, 2)?;
        let len = usize::from_str_radix(pdc, 16).map_err(|_| field_error(rest))?;
        let (rest, edt) = take_hex(rest, len * 2)?;
        properties.push((epc.to_string(), edt.to_string()));
        i = rest;
    }

    Ok((
        i,
        EchonetFrame {
            ehd: ehd.to_string(),
            tid: tid.to_string(),
            seoj: seoj.to_string(),
            deoj: deoj.to_string(),
            esv: esv.to_string(),
            properties,
        },
    ))
}

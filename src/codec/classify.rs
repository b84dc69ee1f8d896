//! Request classification: turns a decoded envelope into a [`ProxyRequest`]
//! by figuring out which Kerberos message it wraps.

use thiserror::Error;

use super::envelope::{self, AppTag};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Envelope(#[from] envelope::Error),
    #[error("target realm is missing from the request envelope")]
    MissingRealm,
    #[error("declared message length does not match payload size")]
    MalformedFraming,
    #[error("request body is not a recognized AS-REQ, TGS-REQ or KPASSWD-REQ")]
    UnknownRequestType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    As,
    Tgs,
    Kpasswd,
}

impl Variant {
    pub fn pretty_name(self) -> &'static str {
        match self {
            Variant::As => "AS-REQ",
            Variant::Tgs => "TGS-REQ",
            Variant::Kpasswd => "KPASSWD-REQ",
        }
    }

    pub fn wants_kpasswd_server(self) -> bool {
        matches!(self, Variant::Kpasswd)
    }
}

pub struct ProxyRequest {
    pub realm: String,
    /// The inner Kerberos message, length-prefixed (4 bytes big-endian).
    pub request: Vec<u8>,
    pub variant: Variant,
    /// Present only for [`Variant::Kpasswd`].
    pub kpasswd_version: Option<u16>,
}

const MAX_REQUEST_SIZE: usize = 128 * 1024;

pub fn decode_request(bytes: &[u8]) -> Result<ProxyRequest, Error> {
    let envelope = envelope::decode(bytes)?;
    let realm = envelope.target_domain.ok_or(Error::MissingRealm)?;
    let message = envelope.kerb_message;

    if message.len() < 4 {
        return Err(Error::MalformedFraming);
    }
    let declared_len = u32::from_be_bytes([message[0], message[1], message[2], message[3]]) as usize;
    if declared_len + 4 != message.len() || declared_len > MAX_REQUEST_SIZE {
        return Err(Error::MalformedFraming);
    }

    let inner = &message[4..];

    if envelope::try_decode(inner, AppTag::AsReq).is_ok() {
        return Ok(ProxyRequest {
            realm,
            request: message,
            variant: Variant::As,
            kpasswd_version: None,
        });
    }

    if envelope::try_decode(inner, AppTag::TgsReq).is_ok() {
        return Ok(ProxyRequest {
            realm,
            request: message,
            variant: Variant::Tgs,
            kpasswd_version: None,
        });
    }

    if let Ok(version) = validate_kpasswd(inner) {
        return Ok(ProxyRequest {
            realm,
            request: message,
            variant: Variant::Kpasswd,
            kpasswd_version: Some(version),
        });
    }

    Err(Error::UnknownRequestType)
}

/// RFC 3244 `KRB-PRIV`-wrapping envelope: a 2-byte total length, a 2-byte
/// version, a 2-byte AP-REQ length, the AP-REQ itself, then a KRB-PRIV.
fn validate_kpasswd(inner: &[u8]) -> Result<u16, Error> {
    if inner.len() < 6 {
        return Err(Error::UnknownRequestType);
    }

    let total_len = u16::from_be_bytes([inner[0], inner[1]]) as usize;
    if total_len != inner.len() {
        return Err(Error::UnknownRequestType);
    }

    let version = u16::from_be_bytes([inner[2], inner[3]]);
    if version != 0x0001 && version != 0xff80 {
        return Err(Error::UnknownRequestType);
    }

    let ap_len = u16::from_be_bytes([inner[4], inner[5]]) as usize;
    let ap_req_start = 6;
    if ap_len > inner.len().saturating_sub(ap_req_start) {
        return Err(Error::UnknownRequestType);
    }

    let ap_req = &inner[ap_req_start..ap_req_start + ap_len];
    envelope::try_decode(ap_req, AppTag::ApReq).map_err(|_| Error::UnknownRequestType)?;

    let krb_priv = &inner[ap_req_start + ap_len..];
    envelope::try_decode(krb_priv, AppTag::KrbPriv).map_err(|_| Error::UnknownRequestType)?;

    Ok(version)
}

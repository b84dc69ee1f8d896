//! KDC-PROXY-MESSAGE encode/decode and APPLICATION-tag structural checks.

use picky_krb::messages::KdcProxyMessage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed KDC-PROXY-MESSAGE envelope")]
    MalformedEnvelope,
    #[error("expected APPLICATION [{expected}] but got class {class} tag {got}")]
    WrongTag { expected: u8, class: u8, got: u8 },
    #[error("truncated ASN.1 header")]
    Truncated,
    #[error("trailing bytes after top-level SEQUENCE")]
    TrailingBytes,
}

/// A decoded envelope: the inner Kerberos message (still carrying its own
/// 4-byte length prefix) plus the optional target realm. `dclocator-hint` is
/// accepted on the wire but this proxy has no use for its value.
pub struct Envelope {
    pub kerb_message: Vec<u8>,
    pub target_domain: Option<String>,
}

pub fn decode(bytes: &[u8]) -> Result<Envelope, Error> {
    let msg = KdcProxyMessage::from_raw(&bytes).map_err(|()| Error::MalformedEnvelope)?;

    let kerb_message = msg.kerb_message.0 .0;
    let target_domain = msg.target_domain.0.map(|tag| tag.0.to_string());

    Ok(Envelope {
        kerb_message,
        target_domain,
    })
}

/// Wraps a raw Kerberos message (with its 4-byte length prefix) in a bare
/// KDC-PROXY-MESSAGE, omitting the optional fields.
pub fn encode(kerb_message: &[u8]) -> Result<Vec<u8>, Error> {
    let msg = KdcProxyMessage::from_raw_kerb_message(&kerb_message).map_err(|()| Error::MalformedEnvelope)?;
    msg.to_vec().map_err(|()| Error::MalformedEnvelope)
}

/// Kerberos message tags this proxy cares about, per RFC 4120 / RFC 3244.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppTag {
    AsReq,
    TgsReq,
    ApReq,
    KrbPriv,
}

impl AppTag {
    pub const fn number(self) -> u8 {
        match self {
            AppTag::AsReq => 10,
            AppTag::TgsReq => 12,
            AppTag::ApReq => 14,
            AppTag::KrbPriv => 21,
        }
    }
}

/// Checks that `bytes` is a DER SEQUENCE under an explicit APPLICATION tag
/// equal to `expected`, with no trailing bytes. Does not validate the
/// SEQUENCE's contents.
pub fn try_decode(bytes: &[u8], expected: AppTag) -> Result<(), Error> {
    let (class, constructed, number, header_len, content_len) = read_tag_and_length(bytes)?;

    const APPLICATION: u8 = 0b01;
    if class != APPLICATION || !constructed || number != expected.number() {
        return Err(Error::WrongTag {
            expected: expected.number(),
            class,
            got: number,
        });
    }

    if header_len + content_len != bytes.len() {
        return Err(Error::TrailingBytes);
    }

    Ok(())
}

/// Reads a single DER tag/length header (low-tag-number form only, tag
/// numbers 0-30), returning `(class, constructed, number, header_len,
/// content_len)`.
fn read_tag_and_length(bytes: &[u8]) -> Result<(u8, bool, u8, usize, usize), Error> {
    let &first = bytes.first().ok_or(Error::Truncated)?;

    let class = (first >> 6) & 0b11;
    let constructed = (first & 0x20) != 0;
    let number = first & 0x1F;
    if number == 0x1F {
        // high-tag-number form, unused by any tag this proxy classifies.
        return Err(Error::Truncated);
    }

    let len_bytes = bytes.get(1..).ok_or(Error::Truncated)?;
    let &len_first = len_bytes.first().ok_or(Error::Truncated)?;

    let (content_len, len_size) = if len_first & 0x80 == 0 {
        (usize::from(len_first), 1)
    } else {
        let num_len_bytes = usize::from(len_first & 0x7F);
        if num_len_bytes == 0 || num_len_bytes > 8 {
            return Err(Error::Truncated);
        }
        let rest = len_bytes.get(1..1 + num_len_bytes).ok_or(Error::Truncated)?;
        let mut len: usize = 0;
        for &b in rest {
            len = (len << 8) | usize::from(b);
        }
        (len, 1 + num_len_bytes)
    };

    let header_len = 1 + len_size;
    Ok((class, constructed, number, header_len, content_len))
}

// SPDX-License-Identifier: AGPL-3.0-or-later

//! DER tag/length/value decoding, OID stringification, and ASN.1 time
//! parsing, grounded on the certificate-walking code the TLS dissector
//! drives.

use chrono::{TimeZone, Utc};
use thiserror::Error;

use crate::buf::Bsb;

/// Upper bound on DER long-form length-of-length bytes; anything
/// longer is rejected rather than trusted.
const MAX_LENGTH_OCTETS: u32 = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Asn1Error {
    #[error("truncated tag")]
    TruncatedTag,
    #[error("truncated length")]
    TruncatedLength,
    #[error("length-of-length {0} exceeds maximum of {MAX_LENGTH_OCTETS}")]
    LengthTooLong(u32),
    #[error("indefinite length is not supported")]
    IndefiniteLength,
    #[error("truncated value")]
    TruncatedValue,
}

/// One decoded tag/length/value triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv<'a> {
    pub constructed: bool,
    pub tag: u32,
    pub value: &'a [u8],
}

/// Decode a single TLV from the front of `bsb`, advancing past it.
///
/// Length values that announce more bytes than remain are clamped to
/// `bsb.remaining()` rather than rejected — the upstream capture may be
/// truncated mid-record and the original tolerates this to still
/// surface whatever fields are present (see DESIGN.md Open Question 1).
pub fn read_tlv<'a>(bsb: &mut Bsb<'a>) -> Result<Tlv<'a>, Asn1Error> {
    let first = bsb.get_u8().ok_or(Asn1Error::TruncatedTag)?;
    let constructed = first & 0x20 != 0;
    let mut tag = (first & 0x1f) as u32;
    if tag == 0x1f {
        tag = 0;
        loop {
            let b = bsb.get_u8().ok_or(Asn1Error::TruncatedTag)?;
            tag = (tag << 7) | (b & 0x7f) as u32;
            if b & 0x80 == 0 {
                break;
            }
        }
    }

    let len_byte = bsb.get_u8().ok_or(Asn1Error::TruncatedLength)?;
    let len = if len_byte & 0x80 == 0 {
        len_byte as u32
    } else {
        let n = (len_byte & 0x7f) as u32;
        if n == 0 {
            return Err(Asn1Error::IndefiniteLength);
        }
        if n > MAX_LENGTH_OCTETS {
            return Err(Asn1Error::LengthTooLong(n));
        }
        let mut len: u32 = 0;
        for _ in 0..n {
            let b = bsb.get_u8().ok_or(Asn1Error::TruncatedLength)?;
            len = (len << 8) | b as u32;
        }
        len
    };

    let clamped = (len as usize).min(bsb.remaining());
    let value = bsb.get_bytes(clamped).ok_or(Asn1Error::TruncatedValue)?;
    Ok(Tlv {
        constructed,
        tag,
        value,
    })
}

/// Read TLVs from `data` until it is exhausted or a TLV fails to
/// decode, invoking `each` on every successfully decoded element.
/// Returns the count of elements successfully read.
pub fn for_each_tlv<'a>(data: &'a [u8], mut each: impl FnMut(Tlv<'a>)) -> usize {
    let mut bsb = Bsb::new(data);
    let mut count = 0;
    while bsb.remaining() > 0 {
        match read_tlv(&mut bsb) {
            Ok(tlv) => {
                each(tlv);
                count += 1;
            }
            Err(_) => break,
        }
    }
    count
}

/// Expect a constructed SEQUENCE (tag 16) wrapping `data` and return
/// its inner value; fails if the outer tag is not a SEQUENCE.
pub fn unwrap_sequence(data: &[u8]) -> Result<&[u8], Asn1Error> {
    let mut bsb = Bsb::new(data);
    let tlv = read_tlv(&mut bsb)?;
    if tlv.tag != 16 || !tlv.constructed {
        return Err(Asn1Error::TruncatedValue);
    }
    Ok(tlv.value)
}

/// Decode a DER OID byte string into dotted-decimal form, e.g.
/// `2.5.4.3`.
pub fn decode_oid(oid: &[u8]) -> String {
    if oid.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    let mut first = true;
    let mut value: u64 = 0;
    for &b in oid {
        value = (value << 7) | (b & 0x7f) as u64;
        if b & 0x80 != 0 {
            continue;
        }
        if first {
            first = false;
            if value >= 80 {
                out.push_str(&format!("2.{}", value - 80));
            } else {
                out.push_str(&format!("{}.{}", value / 40, value % 40));
            }
        } else {
            out.push('.');
            out.push_str(&value.to_string());
        }
        value = 0;
    }
    out
}

/// Parse a DER UTCTime (tag 23) or GeneralizedTime (tag 24) value into
/// unix seconds. Accepts an optional fractional-seconds component and
/// a signed `+HHMM`/`-HHMM` offset, with `Z` meaning UTC. Times before
/// the epoch are clamped to 0 (callers are expected to additionally
/// tag the session `cert:pre-epoch-time` in that case, per §4.2).
pub fn parse_asn1_time(tag: u32, value: &[u8]) -> Option<i64> {
    let s = std::str::from_utf8(value).ok()?;
    let (year_digits, rest) = match tag {
        23 => (2, &s[..s.len().min(2)]),
        24 => (4, &s[..s.len().min(4)]),
        _ => return None,
    };
    if rest.len() != year_digits {
        return None;
    }
    let mut year: i32 = rest.parse().ok()?;
    if tag == 23 {
        year += if year < 50 { 2000 } else { 1900 };
    }
    let s = &s[year_digits..];
    if s.len() < 10 {
        return None;
    }
    let month: u32 = s[0..2].parse().ok()?;
    let day: u32 = s[2..4].parse().ok()?;
    let hour: u32 = s[4..6].parse().ok()?;
    let minute: u32 = s[6..8].parse().ok()?;
    let second: u32 = s[8..10].parse().ok()?;
    let mut tail = &s[10..];

    // Optional fractional seconds.
    if let Some(rest) = tail.strip_prefix('.') {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        tail = &rest[digits..];
    }

    let mut offset_secs: i64 = 0;
    if let Some(rest) = tail.strip_prefix('Z') {
        tail = rest;
    } else if tail.len() >= 5 && (tail.starts_with('+') || tail.starts_with('-')) {
        let sign: i64 = if tail.starts_with('-') { -1 } else { 1 };
        let oh: i64 = tail[1..3].parse().ok()?;
        let om: i64 = tail[3..5].parse().ok()?;
        offset_secs = sign * (oh * 3600 + om * 60);
        tail = &tail[5..];
    }
    if !tail.is_empty() {
        return None;
    }

    let dt = Utc.with_ymd_and_hms(year, month, day, hour, minute, second).single()?;
    let unix = dt.timestamp() - offset_secs;
    Some(unix.max(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_short_form_length() {
        let data = [0x04, 0x03, b'a', b'b', b'c'];
        let mut b = Bsb::new(&data);
        let tlv = read_tlv(&mut b).unwrap();
        assert_eq!(tlv.tag, 4);
        assert!(!tlv.constructed);
        assert_eq!(tlv.value, b"abc");
    }

    #[test]
    fn clamps_length_to_remaining() {
        let data = [0x04, 0x10, b'a', b'b'];
        let mut b = Bsb::new(&data);
        let tlv = read_tlv(&mut b).unwrap();
        assert_eq!(tlv.value, b"ab");
    }

    #[test]
    fn rejects_indefinite_length() {
        let data = [0x30, 0x80];
        let mut b = Bsb::new(&data);
        assert_eq!(read_tlv(&mut b), Err(Asn1Error::IndefiniteLength));
    }

    #[test]
    fn rejects_long_length_of_length() {
        let data = [0x30, 0x85, 0, 0, 0, 0, 0];
        let mut b = Bsb::new(&data);
        assert_eq!(read_tlv(&mut b), Err(Asn1Error::LengthTooLong(5)));
    }

    #[test]
    fn decodes_common_name_oid() {
        // 2.5.4.3 (commonName)
        assert_eq!(decode_oid(&[0x55, 0x04, 0x03]), "2.5.4.3");
    }

    #[test]
    fn decoded_oid_first_component_is_at_most_2() {
        let oid = decode_oid(&[0x55, 0x04, 0x03]);
        let first: u32 = oid.split('.').next().unwrap().parse().unwrap();
        assert!(first <= 2);
    }

    #[test]
    fn parses_utc_time_with_z() {
        // 991231235959Z -> 1999-12-31T23:59:59Z
        let secs = parse_asn1_time(23, b"991231235959Z").unwrap();
        assert_eq!(secs, 946684799);
    }

    #[test]
    fn parses_generalized_time_with_offset() {
        let secs = parse_asn1_time(24, b"20200101120000+0100").unwrap();
        assert_eq!(secs, 1577876400);
    }

    #[test]
    fn pre_epoch_time_clamps_to_zero() {
        let secs = parse_asn1_time(23, b"500101000000Z").unwrap();
        assert_eq!(secs, 0);
    }
}

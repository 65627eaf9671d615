// SPDX-License-Identifier: AGPL-3.0-or-later

//! TLS certificate dissector (C6): walks TLS records looking for a
//! Certificate handshake message and extracts issuer/subject/SAN
//! fields from each embedded DER certificate.
//!
//! Grounded on the record/handshake/certificate-list walk in §4.6 and
//! the ASN.1 reader in [`crate::asn1`].

use tracing::{debug, warn};

use crate::{
    asn1::{Asn1Error, Tlv, parse_asn1_time, read_tlv},
    buf::Bsb,
    session::{CertRecord, Direction, DistinguishedName, ParserControl, Session},
};

const SAN_OID: &str = "2.5.29.17";
const COMMON_NAME_OID: &str = "2.5.4.3";
const ORGANIZATION_OID: &str = "2.5.4.10";

#[derive(Debug)]
enum CertError {
    Step(&'static str, Asn1Error),
}

impl From<(&'static str, Asn1Error)> for CertError {
    fn from((step, err): (&'static str, Asn1Error)) -> Self {
        CertError::Step(step, err)
    }
}

/// Per-session TLS dissector state. Stateless across chunks beyond
/// flagging itself done, since the record walk in §4.6 is re-run in
/// full on every chunk handed to it.
#[derive(Debug, Default)]
pub struct TlsCertParser {
    found_one: bool,
}

impl TlsCertParser {
    pub fn new() -> Self {
        TlsCertParser::default()
    }

    pub fn on_chunk(&mut self, session: &mut Session, data: &[u8], _which: Direction) -> ParserControl {
        let mut remaining = data;
        while remaining.len() >= 6 {
            let record_len = (u16::from_be_bytes([remaining[3], remaining[4]]) as usize).min(remaining.len() - 5);
            let inside = &remaining[5..5 + record_len];
            self.walk_handshakes(session, inside);
            remaining = &remaining[record_len + 5..];
        }
        // One Certificate handshake per session is all callers need;
        // detach once we've extracted something so later records
        // (session tickets, key updates) don't waste cycles.
        if self.found_one {
            ParserControl::Detach
        } else {
            ParserControl::Continue
        }
    }

    fn walk_handshakes(&mut self, session: &mut Session, mut inside: &[u8]) {
        while inside.len() >= 8 {
            let hs_type = inside[0];
            let hs_len = u32::from_be_bytes([0, inside[1], inside[2], inside[3]]) as usize;
            let body_len = hs_len.min(inside.len() - 4);
            if hs_type != 0x0b {
                inside = &inside[(body_len + 4).min(inside.len())..];
                continue;
            }
            if body_len < 3 {
                break;
            }
            let certlist = &inside[7..(7 + body_len - 3).min(inside.len())];
            self.walk_certificates(session, certlist);
            inside = &inside[(body_len + 4).min(inside.len())..];
        }
    }

    fn walk_certificates(&mut self, session: &mut Session, mut certlist: &[u8]) {
        while certlist.len() >= 4 {
            let cert_len = (u32::from_be_bytes([0, certlist[0], certlist[1], certlist[2]]) as usize)
                .min(certlist.len() - 3);
            let cert_der = &certlist[3..3 + cert_len];
            match parse_one_certificate(cert_der) {
                Ok(record) => {
                    self.found_one = true;
                    if session.add_cert(record) {
                        debug!("new certificate recorded");
                    }
                }
                Err(CertError::Step(step, err)) => {
                    warn!(step, %err, "bad cert");
                }
            }
            certlist = &certlist[(cert_len + 3).min(certlist.len())..];
        }
    }
}

fn parse_one_certificate(der: &[u8]) -> Result<CertRecord, CertError> {
    let mut outer = Bsb::new(der);
    let cert_tlv = read_tlv(&mut outer).map_err(|e| ("Certificate", e))?;
    let mut cert_bsb = Bsb::new(cert_tlv.value);

    let tbs_tlv = read_tlv(&mut cert_bsb).map_err(|e| ("tbsCertificate", e))?;
    let mut tbs = Bsb::new(tbs_tlv.value);

    let mut first = read_tlv(&mut tbs).map_err(|e| ("version-or-serial", e))?;
    if first.constructed && first.tag == 0 {
        first = read_tlv(&mut tbs).map_err(|e| ("serial", e))?;
    }
    let serial = first.value.to_vec();

    let _sig_alg = read_tlv(&mut tbs).map_err(|e| ("signatureAlgorithm", e))?;

    let issuer_tlv = read_tlv(&mut tbs).map_err(|e| ("issuer", e))?;
    let issuer = process_name(issuer_tlv.value);

    let _validity = read_tlv(&mut tbs).map_err(|e| ("validity", e))?;

    let subject_tlv = read_tlv(&mut tbs).map_err(|e| ("subject", e))?;
    let subject = process_name(subject_tlv.value);

    let _spki = read_tlv(&mut tbs).map_err(|e| ("subjectPublicKeyInfo", e))?;

    let mut alt_names = Vec::new();
    if tbs.remaining() > 0 {
        if let Ok(ext_tlv) = read_tlv(&mut tbs) {
            alt_names = process_extensions(ext_tlv.value);
        }
    }

    Ok(CertRecord {
        serial,
        issuer,
        subject,
        alt_names,
    })
}

/// Walks an RDNSequence, tracking the last primitive OID seen as an
/// explicit local, rather than the file-scope-static the original
/// shares across calls (§4.6, §9 Open Question resolution — see
/// DESIGN.md): concurrent sessions on different worker tasks cannot
/// race on it because nothing outlives this stack frame.
fn process_name(data: &[u8]) -> DistinguishedName {
    let mut dn = DistinguishedName {
        common_names: Vec::new(),
        org: None,
        org_is_utf8: false,
    };
    walk_name(data, &mut dn, None);
    dn
}

fn walk_name(data: &[u8], dn: &mut DistinguishedName, mut last_oid: Option<String>) {
    let mut bsb = Bsb::new(data);
    while bsb.remaining() > 0 {
        let Ok(tlv) = read_tlv(&mut bsb) else { break };
        if tlv.constructed {
            walk_name(tlv.value, dn, last_oid.clone());
            continue;
        }
        match tlv.tag {
            6 => last_oid = Some(crate::asn1::decode_oid(tlv.value)),
            19 | 20 | 12 => {
                let Some(oid) = last_oid.as_deref() else { continue };
                match oid {
                    COMMON_NAME_OID => {
                        if let Ok(s) = std::str::from_utf8(tlv.value) {
                            dn.common_names.push(s.to_lowercase());
                        }
                    }
                    ORGANIZATION_OID => {
                        if let Ok(s) = std::str::from_utf8(tlv.value) {
                            if dn.org.is_some() {
                                warn!("organizationName seen twice in one name, overwriting");
                            }
                            dn.org = Some(s.to_string());
                            dn.org_is_utf8 = tlv.tag == 12;
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }
}

fn process_extensions(data: &[u8]) -> Vec<String> {
    let mut bsb = Bsb::new(data);
    let mut alt_names = Vec::new();
    while bsb.remaining() > 0 {
        let Ok(tlv) = read_tlv(&mut bsb) else { break };
        if !tlv.constructed {
            continue;
        }
        let mut ext = Bsb::new(tlv.value);
        let Ok(oid_tlv) = read_tlv(&mut ext) else { continue };
        if oid_tlv.tag != 6 {
            continue;
        }
        if crate::asn1::decode_oid(oid_tlv.value) != SAN_OID {
            continue;
        }
        // Remaining element may be a critical BOOLEAN before the
        // OCTET STRING wrapper; skip anything that isn't tag 4.
        while ext.remaining() > 0 {
            let Ok(next) = read_tlv(&mut ext) else { break };
            if next.tag == 4 {
                process_alt_names(next.value, &mut alt_names);
            }
        }
        if !alt_names.is_empty() {
            break;
        }
    }
    alt_names
}

fn process_alt_names(data: &[u8], alt_names: &mut Vec<String>) {
    let mut bsb = Bsb::new(data);
    while bsb.remaining() > 0 {
        let Ok(tlv) = read_tlv(&mut bsb) else { break };
        match (tlv.constructed, tlv.tag) {
            (true, _) => {
                // A nested constructed TLV is itself a GeneralNames
                // list; once it has yielded anything, stop walking
                // siblings at this level. Direct dNSName leaves below
                // are NOT subject to this check, so a SAN with several
                // sibling dNSName entries still collects every one.
                process_alt_names(tlv.value, alt_names);
                if !alt_names.is_empty() {
                    return;
                }
            }
            (false, 4) => {
                process_alt_names(tlv.value, alt_names);
                return;
            }
            (false, 2) => {
                if let Ok(s) = std::str::from_utf8(tlv.value) {
                    alt_names.push(s.to_lowercase());
                }
            }
            _ => {}
        }
    }
}

/// Parses a DER UTCTime/GeneralizedTime `Tlv` into unix seconds, tagging
/// the session if the result is clamped to the epoch. Exposed for
/// consumers that want validity timestamps; the certificate record
/// itself does not carry them (§3 marks `signature_hash`/validity as
/// optional and not required fields).
pub fn validity_timestamp(session: &mut Session, tlv: &Tlv<'_>) -> Option<i64> {
    let secs = parse_asn1_time(tlv.tag, tlv.value)?;
    if secs == 0 {
        session.add_tag("cert:pre-epoch-time");
    }
    Some(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingFieldSink;

    fn der_tlv(tag: u8, value: &[u8]) -> Vec<u8> {
        let mut out = vec![tag, value.len() as u8];
        out.extend_from_slice(value);
        out
    }

    fn der_seq(parts: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = parts.concat();
        let mut out = vec![0x30, body.len() as u8];
        out.extend_from_slice(&body);
        out
    }

    fn rdn_cn(value: &str) -> Vec<u8> {
        // SET { SEQUENCE { OID commonName, PrintableString value } }
        let oid = der_tlv(0x06, &[0x55, 0x04, 0x03]);
        let val = der_tlv(0x13, value.as_bytes());
        let inner_seq = der_seq(&[oid, val]);
        let mut set = vec![0x31, inner_seq.len() as u8];
        set.extend_from_slice(&inner_seq);
        set
    }

    fn build_cert(cn: &str, alt: &str) -> Vec<u8> {
        build_cert_multi_san(cn, &[alt])
    }

    fn build_cert_multi_san(cn: &str, alts: &[&str]) -> Vec<u8> {
        let serial = der_tlv(0x02, &[0x01]);
        let sig_alg = der_seq(&[]);
        let issuer = der_seq(&[rdn_cn(cn)]);
        let validity = der_seq(&[]);
        let subject = der_seq(&[rdn_cn(cn)]);
        let spki = der_seq(&[]);

        let san_oid = der_tlv(0x06, &[0x55, 0x1d, 0x11]);
        let dns_names: Vec<Vec<u8>> = alts.iter().map(|alt| der_tlv(0x82, alt.as_bytes())).collect();
        let alt_seq = der_seq(&dns_names);
        let san_octet = der_tlv(0x04, &alt_seq);
        let san_ext = der_seq(&[san_oid, san_octet]);
        let extensions_wrapped = {
            let mut v = vec![0xa3, san_ext.len() as u8];
            v.extend_from_slice(&san_ext);
            v
        };

        let tbs = der_seq(&[serial, sig_alg.clone(), issuer, validity, subject, spki, extensions_wrapped]);
        der_seq(&[tbs, sig_alg, der_tlv(0x03, &[0x00])])
    }

    #[test]
    fn process_name_extracts_lowercased_common_name() {
        let issuer = der_seq(&[rdn_cn("WWW.Example.com")]);
        let dn = process_name(&issuer);
        assert_eq!(dn.common_names, vec!["www.example.com".to_string()]);
    }

    #[test]
    fn parses_minimal_certificate_and_dedups() {
        let cert = build_cert("www.example.com", "example.com");
        let record = parse_one_certificate(&cert).expect("should parse");
        assert_eq!(record.subject.common_names, vec!["www.example.com"]);

        let mut session = Session::new(Box::new(RecordingFieldSink::default()));
        assert!(session.add_cert(record.clone()));
        assert!(!session.add_cert(record));
        assert_eq!(session.certs().len(), 1);
    }

    #[test]
    fn san_with_multiple_dns_names_collects_all_of_them() {
        let cert = build_cert_multi_san("www.example.com", &["example.com", "www.example.com"]);
        let record = parse_one_certificate(&cert).expect("should parse");
        assert_eq!(record.alt_names, vec!["example.com".to_string(), "www.example.com".to_string()]);
    }

    #[test]
    fn truncated_cert_reports_step_and_does_not_panic() {
        let err = parse_one_certificate(&[0x30, 0x05, 0x02, 0x01, 0x01]).unwrap_err();
        matches!(err, CertError::Step(_, _));
    }
}

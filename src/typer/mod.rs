// SPDX-License-Identifier: AGPL-3.0-or-later

//! Content-typer: maps a byte prefix to a MIME type string.

use serde::{Deserialize, Serialize};

/// How the core combines its built-in magic table with an externally
/// supplied typer (e.g. a libmagic binding, which is out of scope for
/// this crate and therefore never implemented here — only the switch
/// itself is core-relevant, per §4.3/§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MagicMode {
    #[default]
    Basic,
    Libmagic,
    Libmagicnotext,
    Both,
    None,
}

/// A pluggable MIME-type guesser.
pub trait ContentTyper: Send + Sync {
    fn magic(&self, data: &[u8]) -> Option<&'static str>;
}

/// The built-in magic-byte table: a switch over the first byte with
/// nested prefix/substring checks, as described in §4.3.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinTyper;

fn starts_with(data: &[u8], pat: &[u8]) -> bool {
    data.len() >= pat.len() && &data[..pat.len()] == pat
}

fn starts_with_ci(data: &[u8], pat: &[u8]) -> bool {
    data.len() >= pat.len() && data[..pat.len()].eq_ignore_ascii_case(pat)
}

impl ContentTyper for BuiltinTyper {
    fn magic(&self, data: &[u8]) -> Option<&'static str> {
        if data.is_empty() {
            return None;
        }
        match data[0] {
            0x00 => {
                if data.len() >= 8 && &data[4..8] == b"ftyp" {
                    Some("video/quicktime")
                } else if data.len() >= 12 && &data[4..8] == b"ftyp" && &data[8..11] == b"3gp" {
                    Some("video/3gpp")
                } else if data.len() >= 5 && data[0] == 0x00 && data[1] == 0x01 {
                    Some("application/x-font-ttf")
                } else {
                    None
                }
            }
            b'B' if starts_with(data, b"BM") => Some("image/x-win-bitmap"),
            0x1a if starts_with(data, &[0x1a, 0x45, 0xdf, 0xa3]) => Some("video/webm"),
            0x1f if starts_with(data, &[0x1f, 0x8b]) => Some("application/x-gzip"),
            0x1f if starts_with(data, &[0x1f, 0x9d]) => Some("application/x-compress"),
            0x21 if starts_with(data, b"!<arch>\ndebian") => Some("application/x-debian-package"),
            b'#' if starts_with(data, b"#!/") || starts_with(data, b"#!") => {
                if data.windows(4).any(|w| w == b"perl") {
                    Some("text/x-perl")
                } else if data.windows(4).any(|w| w == b"ruby") {
                    Some("text/x-ruby")
                } else if data.windows(6).any(|w| w == b"python") {
                    Some("text/x-python")
                } else if data.windows(2).any(|w| w == b"sh") {
                    Some("text/x-shellscript")
                } else {
                    Some("text/javascript")
                }
            }
            b'%' if starts_with(data, b"%PDF-") => Some("application/pdf"),
            b'%' if starts_with(data, b"%!PS") => Some("application/postscript"),
            b'<' if starts_with_ci(data, b"<html") || starts_with_ci(data, b"<!doctype html") => {
                Some("text/html")
            }
            b'<' if starts_with_ci(data, b"<svg") || starts_with(data, b"<?xml") && data.windows(3).any(|w| w == b"svg") => {
                Some("image/svg+xml")
            }
            b'<' if starts_with(data, b"<?xml") => Some("text/xml"),
            b'<' if starts_with_ci(data, b"<?php") => Some("text/x-php"),
            b'{' => Some("application/json"),
            b'8' if starts_with(data, b"8BPS") => Some("image/vnd.adobe.photoshop"),
            0x42 if starts_with(data, &[0x42, 0x5a, 0x68]) => Some("application/x-bzip2"),
            0x43 if starts_with(data, b"CWS") || starts_with(data, b"FWS") => {
                Some("application/x-shockwave-flash")
            }
            b'F' if starts_with(data, b"FLV") => Some("video/x-flv"),
            b'G' if starts_with(data, b"GIF8") => Some("image/gif"),
            0x47 if data.len() > 1 && data[1] == 0x40 => Some("video/mp2t"),
            0x69 if starts_with(data, &[0x69, 0x63, 0x6e, 0x73]) => Some("image/x-icns"),
            0xff if data.len() > 1 && (data[1] & 0xe0) == 0xe0 => Some("audio/mpeg"),
            b'M' if starts_with(data, b"MZ") => Some("application/x-dosexec"),
            b'M' if starts_with(data, b"MSCF") => Some("application/vnd.ms-cab-compressed"),
            b'O' if starts_with(data, b"OggS") => Some("audio/ogg"),
            b'O' if starts_with(data, b"OTTO") => Some("application/vnd.ms-opentype"),
            b'P' if starts_with(data, b"PK\x03\x04") => Some("application/zip"),
            b'R' if starts_with(data, b"RIFF") && data.len() >= 12 && &data[8..12] == b"WAVE" => {
                Some("audio/x-wav")
            }
            b'R' if starts_with(data, b"Rar!") => Some("application/x-rar"),
            b'd' if starts_with(data, b"d8:announce") => Some("application/x-bittorrent"),
            b'w' if starts_with(data, b"wOFF") => Some("application/font-woff"),
            b'w' if starts_with(data, b"wOF2") => Some("application/font-woff2"),
            0x89 if starts_with(data, &[0x89, b'P', b'N', b'G']) => Some("image/png"),
            0xfd if starts_with(data, &[0xfd, b'7', b'z', b'X', b'Z']) => Some("application/x-xz"),
            0xff if starts_with(data, &[0xff, 0xd8, 0xff]) => Some("image/jpeg"),
            0xed if data.len() > 3 && data[1] == 0xab && data[2] == 0xee && data[3] == 0xdb => {
                Some("application/x-rpm")
            }
            _ if data.len() >= 262 && &data[257..262] == b"ustar" => Some("application/x-tar"),
            _ => None,
        }
    }
}

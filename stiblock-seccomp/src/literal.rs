// -*- coding: utf-8 -*-
//
// Copyright (C) 2024 Michael Büsch <m@bues.ch>
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Byte string constant assignments of the form `NAME = b'\x20\x00...'`.

use anyhow::{self as ah, format_err as err};

const ASSIGN: &str = " = b'";
const HEX: &[u8; 16] = b"0123456789abcdef";

/// Returns `true` if `name` is a valid assignment target identifier.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => (),
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn hexval(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

/// Render `bytes` as a one line byte string assignment to `name`.
pub fn render(name: &str, bytes: &[u8]) -> String {
    let mut line = String::with_capacity(name.len() + ASSIGN.len() + bytes.len() * 4 + 2);
    line.push_str(name);
    line.push_str(ASSIGN);
    for b in bytes {
        line.push_str("\\x");
        line.push(HEX[(b >> 4) as usize] as char);
        line.push(HEX[(b & 0xf) as usize] as char);
    }
    line.push_str("'\n");
    line
}

/// Parse a line produced by [render] back into its name and bytes.
pub fn parse(line: &str) -> ah::Result<(String, Vec<u8>)> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let (name, rest) = line
        .split_once(ASSIGN)
        .ok_or_else(|| err!("Not a byte string assignment"))?;
    if !is_identifier(name) {
        return Err(err!("Invalid assignment name '{name}'"));
    }
    let body = rest
        .strip_suffix('\'')
        .ok_or_else(|| err!("Unterminated byte string"))?;

    if body.len() % 4 != 0 {
        return Err(err!("Byte string has a truncated escape sequence"));
    }
    let mut bytes = Vec::with_capacity(body.len() / 4);
    for (i, esc) in body.as_bytes().chunks(4).enumerate() {
        match esc {
            [b'\\', b'x', hi, lo] if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                bytes.push((hexval(*hi) << 4) | hexval(*lo));
            }
            _ => return Err(err!("Byte {i}: Expected a \\xHH escape")),
        }
    }
    Ok((name.to_string(), bytes))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_render() {
        assert_eq!(
            render("SECCOMP_FILTER", &[0x20, 0x00, 0xff, 0x0a]),
            "SECCOMP_FILTER = b'\\x20\\x00\\xff\\x0a'\n"
        );
        assert_eq!(render("X", &[]), "X = b''\n");
    }

    #[test]
    fn test_parse() {
        let (name, bytes) = parse("SECCOMP_BLOCK_TIOCSTI = b'\\x06\\x00\\x7f'\n").unwrap();
        assert_eq!(name, "SECCOMP_BLOCK_TIOCSTI");
        assert_eq!(bytes, [0x06, 0x00, 0x7f]);

        let line = render("A_1", &[1, 2, 3, 0xab]);
        assert_eq!(parse(&line).unwrap(), ("A_1".to_string(), vec![1, 2, 3, 0xab]));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("SECCOMP_FILTER = '\\x00'").is_err());
        assert!(parse("1ABC = b'\\x00'").is_err());
        assert!(parse("ABC = b'\\x00").is_err());
        assert!(parse("ABC = b'\\x0'").is_err());
        assert!(parse("ABC = b'\\x0g'").is_err());
        assert!(parse("ABC = b'abcd'").is_err());
        assert!(parse("ABC = b'\\x+1'").is_err());
    }

    #[test]
    fn test_identifier() {
        assert!(is_identifier("SECCOMP_FILTER"));
        assert!(is_identifier("_x9"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("9x"));
        assert!(!is_identifier("A-B"));
    }
}

// vim: ts=4 sw=4 expandtab

//! Free-form key/value property block.
//!
//! Properties are stored as ISO-8859-1 text, one `key=value` pair per
//! line, with `#` and `!` comment lines, backslash escapes and `\uXXXX`
//! for anything outside printable ASCII. In the binary format the block is
//! prefixed by its byte length as a short; length zero means no properties.

use std::io::{Read, Write};

use crate::repr::Properties;

use super::data::{DataReader, DataWriter};
use super::FormatError;

/// Parse a property block.
pub fn parse_properties(bytes: &[u8]) -> Result<Properties, FormatError> {
    // ISO-8859-1: every byte is one char
    let text: String = bytes.iter().map(|&b| char::from(b)).collect();
    let mut properties = Properties::new();
    let mut logical = String::new();

    for raw in text.lines() {
        let line = raw.trim_start();
        if logical.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
            continue;
        }
        if ends_with_continuation(line) {
            logical.push_str(&line[..line.len() - 1]);
            continue;
        }
        logical.push_str(line);
        let (key, value) = split_entry(&logical)?;
        properties.insert(key, value);
        logical.clear();
    }
    if !logical.is_empty() {
        let (key, value) = split_entry(&logical)?;
        properties.insert(key, value);
    }
    Ok(properties)
}

/// An odd number of trailing backslashes continues the line.
fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1
}

fn split_entry(line: &str) -> Result<(String, String), FormatError> {
    let mut chars = line.char_indices().peekable();
    let mut key_end = line.len();
    let mut value_start = line.len();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '=' | ':' => {
                key_end = i;
                value_start = i + 1;
                break;
            }
            c if c.is_whitespace() => {
                key_end = i;
                let rest = line[i..].trim_start();
                value_start = line.len() - rest.len();
                if rest.starts_with('=') || rest.starts_with(':') {
                    value_start += 1;
                }
                break;
            }
            _ => {}
        }
    }
    let key = unescape(&line[..key_end])?;
    let value = unescape(line[value_start..].trim_start())?;
    Ok((key, value))
}

fn unescape(s: &str) -> Result<String, FormatError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let code = u32::from_str_radix(&hex, 16)
                    .ok()
                    .filter(|_| hex.len() == 4)
                    .and_then(char::from_u32)
                    .ok_or_else(|| FormatError::value("property escape", format!("\\u{hex}")))?;
                out.push(code);
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    Ok(out)
}

fn escape(s: &str, is_key: bool, out: &mut String) {
    for (i, c) in s.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{c}' => out.push_str("\\f"),
            '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(c);
            }
            ' ' if is_key || i == 0 => out.push_str("\\ "),
            ' '..='~' => out.push(c),
            _ => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{:04X}", unit));
                }
            }
        }
    }
}

/// Render properties as a block, sorted by key.
pub fn format_properties(properties: &Properties) -> Vec<u8> {
    let mut out = String::new();
    for (key, value) in properties {
        escape(key, true, &mut out);
        out.push('=');
        escape(value, false, &mut out);
        out.push('\n');
    }
    // Only ASCII is emitted.
    out.into_bytes()
}

/// Read a short-length-prefixed property block; `None` when the length is zero.
pub fn read_property_block<R: Read>(
    reader: &mut DataReader<R>,
) -> Result<Option<Properties>, FormatError> {
    let len = reader.read_i16()?;
    if len < 0 {
        return Err(FormatError::value("property block length", len.to_string()));
    }
    if len == 0 {
        return Ok(None);
    }
    let bytes = reader.read_bytes(len as usize, "property block")?;
    parse_properties(&bytes).map(Some)
}

/// Write a property block; empty properties are written as length zero.
pub fn write_property_block<W: Write>(
    writer: &mut DataWriter<W>,
    properties: &Properties,
) -> std::io::Result<()> {
    if properties.is_empty() {
        return writer.write_i16(0);
    }
    let bytes = format_properties(properties);
    let len = i16::try_from(bytes.len()).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("property block too long: {} bytes", bytes.len()),
        )
    })?;
    writer.write_i16(len)?;
    writer.write_bytes(&bytes)
}

// ABOUTME: Source map V3 model: base64-VLQ mappings encoding and line adjustment

use crate::span::Span;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const BASE64_CHARS: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Append one base64-VLQ value: sign bit in the LSB, five payload bits
/// per digit, continuation bit 32.
fn encode_vlq(out: &mut String, value: i64) {
    let mut v: u64 = if value < 0 {
        (((-value) as u64) << 1) | 1
    } else {
        (value as u64) << 1
    };
    loop {
        let mut digit = (v & 0b11111) as usize;
        v >>= 5;
        if v != 0 {
            digit |= 0b100000;
        }
        out.push(BASE64_CHARS[digit] as char);
        if v == 0 {
            break;
        }
    }
}

/// One recorded mapping from a generated position to a source position.
/// Lines are 1-based here; the encoder emits the 0-based V3 form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMapping {
    pub gen_line: u32,
    pub gen_col: u32,
    pub src_line: u32,
    pub src_col: u32,
    pub name: Option<u32>,
}

/// Collects mappings while the emitter prints, then encodes the V3
/// `mappings` string.
#[derive(Debug, Default)]
pub struct MappingsBuilder {
    mappings: Vec<RawMapping>,
    names: Vec<String>,
    name_ids: HashMap<String, u32>,
}

impl MappingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, gen_line: u32, gen_col: u32, span: &Span, name: Option<&str>) {
        let name = name.map(|n| self.name_id(n));
        self.mappings.push(RawMapping {
            gen_line,
            gen_col,
            src_line: span.start_line,
            src_col: span.start_col,
            name,
        });
    }

    fn name_id(&mut self, name: &str) -> u32 {
        if let Some(id) = self.name_ids.get(name) {
            return *id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_string());
        self.name_ids.insert(name.to_string(), id);
        id
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn mappings(&self) -> &[RawMapping] {
        &self.mappings
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Encode the canonical `mappings` string: line groups joined by `;`,
    /// segments by `,`, fields delta-encoded per the V3 spec.
    pub fn encode(&self) -> String {
        let mut sorted: Vec<&RawMapping> = self.mappings.iter().collect();
        sorted.sort_by_key(|m| (m.gen_line, m.gen_col));
        // Inner marks are recorded after outer ones at the same position;
        // the later, more precise mapping wins.
        let mut deduped: Vec<&RawMapping> = Vec::with_capacity(sorted.len());
        for m in sorted {
            match deduped.last_mut() {
                Some(prev) if prev.gen_line == m.gen_line && prev.gen_col == m.gen_col => {
                    *prev = m;
                }
                _ => deduped.push(m),
            }
        }

        let max_line = deduped.last().map(|m| m.gen_line).unwrap_or(0);
        let mut out = String::new();
        let mut iter = deduped.into_iter().peekable();

        let mut prev_src_line: i64 = 0;
        let mut prev_src_col: i64 = 0;
        let mut prev_name: i64 = 0;
        for line in 1..=max_line {
            if line > 1 {
                out.push(';');
            }
            let mut prev_gen_col: i64 = 0;
            let mut first = true;
            while let Some(m) = iter.peek() {
                if m.gen_line != line {
                    break;
                }
                let m = iter.next().expect("peeked mapping");
                if !first {
                    out.push(',');
                }
                first = false;
                encode_vlq(&mut out, m.gen_col as i64 - prev_gen_col);
                prev_gen_col = m.gen_col as i64;
                // Single-source maps: the source index delta is always zero
                encode_vlq(&mut out, 0);
                encode_vlq(&mut out, (m.src_line as i64 - 1) - prev_src_line);
                prev_src_line = m.src_line as i64 - 1;
                encode_vlq(&mut out, m.src_col as i64 - prev_src_col);
                prev_src_col = m.src_col as i64;
                if let Some(name) = m.name {
                    encode_vlq(&mut out, name as i64 - prev_name);
                    prev_name = name as i64;
                }
            }
        }
        out
    }
}

/// The V3 source map document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMapJson {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub sources: Vec<String>,
    #[serde(
        rename = "sourcesContent",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sources_content: Option<Vec<String>>,
    #[serde(default)]
    pub names: Vec<String>,
    pub mappings: String,
}

/// Shift every mapping down by `count` generated lines by prepending one
/// `;` per line. No other rewriting is required.
pub fn prepend_lines(mappings: &str, count: usize) -> String {
    let mut out = String::with_capacity(mappings.len() + count);
    for _ in 0..count {
        out.push(';');
    }
    out.push_str(mappings);
    out
}

/// Render a map document as an inline data URI.
pub fn to_data_uri(json: &str) -> String {
    format!("data:application/json;base64,{}", BASE64.encode(json))
}

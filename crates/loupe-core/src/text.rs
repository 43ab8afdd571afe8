//! Text position utilities for byte offset and line:column conversions.
//!
//! Lines and columns are **1-indexed** (editor convention); byte offsets are
//! **0-indexed**. Line/column values of 0 are clamped to 1.
//!
//! Columns count bytes. Queries arriving in UTF-16 or codepoint units are the
//! transport layer's problem; everything inside the engine is byte-based.

/// Convert a byte offset to 1-indexed line and column.
///
/// If `offset` exceeds content length, returns the position at end of content.
pub fn byte_offset_to_position(content: &str, offset: usize) -> (u32, u32) {
    let offset = offset.min(content.len());
    let mut line = 1u32;
    let mut col = 1u32;

    for (i, byte) in content.bytes().enumerate() {
        if i >= offset {
            break;
        }
        if byte == b'\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }

    (line, col)
}

/// Convert 1-indexed line and column to a byte offset.
///
/// Positions past the end of a line clamp to the line end; lines past the end
/// of the content clamp to the content length.
pub fn position_to_byte_offset(content: &str, line: u32, col: u32) -> usize {
    let line = line.max(1);
    let col = col.max(1);

    let mut current_line = 1u32;
    let bytes = content.as_bytes();

    let mut i = 0;
    while i <= bytes.len() {
        if current_line == line {
            let offset_in_line = (col as usize) - 1;
            let line_end = bytes[i..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|p| i + p)
                .unwrap_or(bytes.len());
            return i + offset_in_line.min(line_end - i);
        }
        if i == bytes.len() {
            break;
        }
        if bytes[i] == b'\n' {
            current_line += 1;
        }
        i += 1;
    }

    bytes.len()
}

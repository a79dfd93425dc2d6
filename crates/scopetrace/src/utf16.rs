//
// utf16.rs
//
// Column conversions between tree-sitter byte offsets and protocol UTF-16 units
//

/// Convert a UTF-16 column offset (from LSP Position.character) to a byte
/// offset within the given line. Tree-sitter Points expect byte offsets, not
/// UTF-16 code units.
pub fn utf16_column_to_byte_offset(line: &str, utf16_col: u32) -> usize {
    let mut utf16_count = 0;
    for (byte_idx, ch) in line.char_indices() {
        if utf16_count == utf16_col as usize {
            return byte_idx;
        }
        utf16_count += ch.len_utf16();
    }
    line.len()
}

/// Convert a byte offset within a line to a UTF-16 column.
///
/// Offsets that fall inside a multi-byte character are clamped to the
/// character's start.
pub fn byte_offset_to_utf16_column(line: &str, byte_offset: usize) -> u32 {
    let mut utf16_count = 0u32;
    for (byte_idx, ch) in line.char_indices() {
        if byte_idx >= byte_offset {
            break;
        }
        utf16_count += ch.len_utf16() as u32;
    }
    utf16_count
}

/// Text of the zero-based `row` in `content`, without its line terminator.
pub fn line_text(content: &str, row: usize) -> &str {
    content
        .split('\n')
        .nth(row)
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .unwrap_or("")
}

/// Convert a tree-sitter point to a zero-based (line, UTF-16 column) pair.
pub fn point_to_utf16(content: &str, point: tree_sitter::Point) -> (u32, u32) {
    let column = byte_offset_to_utf16_column(line_text(content, point.row), point.column);
    (point.row as u32, column)
}

/// Convert a zero-based (line, UTF-16 column) pair to a tree-sitter point.
pub fn utf16_to_point(content: &str, line: u32, character: u32) -> tree_sitter::Point {
    let column = utf16_column_to_byte_offset(line_text(content, line as usize), character);
    tree_sitter::Point::new(line as usize, column)
}

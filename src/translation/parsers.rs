pub(super) fn is_line_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'-') && bytes.get(idx + 1) == Some(&b'-')
}

pub(super) fn is_block_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'/') && bytes.get(idx + 1) == Some(&b'*')
}

pub(super) fn is_block_comment_end(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'*') && bytes.get(idx + 1) == Some(&b'/')
}

pub(super) fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Parse `(name)s` starting at the `(` after a `%`.
///
/// Returns the name and the index just past the `s`, or `None` when the
/// directive is not exactly of that form.
pub(super) fn parse_named_directive(sql: &str, open: usize) -> Option<(&str, usize)> {
    let rest = sql.get(open + 1..)?;
    let close = rest.find(')')?;
    let name = &rest[..close];
    let after = open + 1 + close + 1;
    if sql.as_bytes().get(after) == Some(&b's') {
        Some((name, after + 1))
    } else {
        None
    }
}

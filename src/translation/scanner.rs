use super::parsers::{
    is_block_comment_end, is_block_comment_start, is_line_comment_start, is_word_byte,
};

#[derive(Clone, Copy)]
pub(super) enum State {
    Leading,
    LineComment,
    BlockComment,
}

/// Lowercased first word of `sql`, skipping leading whitespace and comments.
///
/// Block comments do not nest and a line comment must end in a newline;
/// anything else that precedes the first word yields `None`.
pub(super) fn first_word(sql: &str) -> Option<String> {
    let bytes = sql.as_bytes();
    let mut state = State::Leading;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Leading => {
                if b.is_ascii_whitespace() {
                    idx += 1;
                } else if is_line_comment_start(bytes, idx) {
                    state = State::LineComment;
                    idx += 2;
                } else if is_block_comment_start(bytes, idx) {
                    state = State::BlockComment;
                    idx += 2;
                } else if is_word_byte(b) {
                    let end = bytes[idx..]
                        .iter()
                        .position(|b| !is_word_byte(*b))
                        .map_or(bytes.len(), |len| idx + len);
                    return Some(sql[idx..end].to_ascii_lowercase());
                } else {
                    return None;
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Leading;
                }
                idx += 1;
            }
            State::BlockComment => {
                if is_block_comment_end(bytes, idx) {
                    state = State::Leading;
                    idx += 2;
                } else {
                    idx += 1;
                }
            }
        }
    }
    None
}

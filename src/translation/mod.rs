use std::borrow::Cow;

mod parsers;
mod scanner;

use parsers::parse_named_directive;

use crate::error::Cdb2Error;
use crate::params::Params;

/// Rewrite `%(name)s` placeholders to the native `@name` form.
///
/// Every other `%` must be escaped as `%%`. The rewrite is purely textual:
/// placeholders inside quoted strings are replaced too. Returns a borrowed
/// `Cow` when the statement contains no `%` at all.
///
/// ```rust
/// use comdb2_session::prelude::*;
/// use comdb2_session::translation::interpolate_placeholders;
///
/// let params = params! { "k" => 1 };
/// let sql = interpolate_placeholders("select %(k)s where name like 'a%%'", &params)?;
/// assert_eq!(sql, "select @k where name like 'a%'");
/// # Ok::<(), Cdb2Error>(())
/// ```
///
/// # Errors
///
/// `InterfaceError` when a placeholder names a parameter that was not
/// supplied, or the string contains any other `%` directive.
pub fn interpolate_placeholders<'a>(
    sql: &'a str,
    params: &Params,
) -> Result<Cow<'a, str>, Cdb2Error> {
    if !sql.contains('%') {
        return Ok(Cow::Borrowed(sql));
    }

    let invalid = || Cdb2Error::interface("Invalid format string for query");
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut idx = 0;
    let bytes = sql.as_bytes();

    while idx < bytes.len() {
        if bytes[idx] != b'%' {
            idx += 1;
            continue;
        }
        out.push_str(&sql[copied..idx]);
        match bytes.get(idx + 1) {
            Some(b'%') => {
                out.push('%');
                idx += 2;
            }
            Some(b'(') => {
                let (name, end) = parse_named_directive(sql, idx + 1).ok_or_else(invalid)?;
                if params.get(name).is_none() {
                    return Err(Cdb2Error::interface(format!(
                        "No value provided for parameter '{name}'"
                    )));
                }
                out.push('@');
                out.push_str(name);
                idx = end;
            }
            _ => return Err(invalid()),
        }
        copied = idx;
    }
    out.push_str(&sql[copied..]);
    Ok(Cow::Owned(out))
}

/// The statement's leading keyword, lowercased, ignoring leading comments.
///
/// Used to classify statements for transaction handling; `None` when the
/// statement does not start with a word.
#[must_use]
pub fn sql_operation(sql: &str) -> Option<String> {
    scanner::first_word(sql)
}

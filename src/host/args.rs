//! Pipe name argument parsing
//!
//! The host is launched with its pipe name behind a prefix, in any of
//! these forms (prefix matched case-insensitively):
//!
//! ```text
//! /pipeName:worker-1
//! /pipeName=worker-1
//! /pipeName worker-1
//! ```

use crate::common::{Error, Result};

/// Find the pipe name among `args`
pub fn parse_pipe_name<S: AsRef<str>>(args: &[S], prefix: &str) -> Result<String> {
    if prefix.is_empty() {
        return Err(Error::invalid_argument("prefix", "must not be empty"));
    }

    let mut iter = args.iter().map(AsRef::as_ref);
    while let Some(arg) = iter.next() {
        let Some(rest) = strip_prefix_ignore_case(arg, prefix) else {
            continue;
        };

        let value = if rest.is_empty() {
            // Space-delimited form: the value is the next argument
            iter.next().unwrap_or_default()
        } else if let Some(value) = rest.strip_prefix([':', '=']) {
            value
        } else {
            // A longer word that merely starts with the prefix
            continue;
        };

        let value = value.trim();
        if value.is_empty() {
            return Err(Error::invalid_argument(prefix, "requires a pipe name"));
        }
        return Ok(value.to_string());
    }

    Err(Error::MissingArgument(prefix.to_string()))
}

fn strip_prefix_ignore_case<'a>(arg: &'a str, prefix: &str) -> Option<&'a str> {
    let head = arg.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&arg[prefix.len()..])
    } else {
        None
    }
}

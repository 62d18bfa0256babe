//! Turning located services into what clients connect with.
//!
//! Parameters whose key starts with `#` are comments and never reach the
//! output.

pub mod database;
pub mod web;

use crate::params::Parameters;

/// Parameters that are not comments and not in `skip`, with their values
/// joined by commas.
fn options<'a>(
    params: &'a Parameters,
    skip: &'a [&str],
) -> impl Iterator<Item = (&'a str, String)> + 'a {
    params
        .iter()
        .filter(|(key, _)| !key.starts_with('#'))
        .filter(move |(key, _)| !skip.iter().any(|s| key.eq_ignore_ascii_case(s)))
        .map(|(key, values)| (key, values.join(",")))
}

//! Environment variable substitution for configuration strings.
//!
//! Supports `${NAME}` and `${NAME:-default}`. An unknown variable without a
//! default form is a configuration error, never silently empty.

use super::{ConfigError, ConfigResult};

/// Substitute all `${NAME}` / `${NAME:-default}` references in `input`.
pub fn substitute(input: &str) -> ConfigResult<String> {
    substitute_with(input, |name| std::env::var(name).ok())
}

/// Substitution against an arbitrary variable source (used by tests).
pub fn substitute_with<F>(input: &str, lookup: F) -> ConfigResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| ConfigError::InvalidValue {
            field: "config".to_string(),
            value: input.to_string(),
            reason: "unterminated ${ in string".to_string(),
        })?;

        let expr = &after[..end];
        let (name, default) = match expr.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (expr, None),
        };

        if name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "config".to_string(),
                value: input.to_string(),
                reason: "empty variable name in ${}".to_string(),
            });
        }

        match lookup(name) {
            Some(value) => out.push_str(&value),
            None => match default {
                Some(default) => out.push_str(default),
                None => {
                    return Err(ConfigError::UnresolvedVariable {
                        name: name.to_string(),
                    });
                }
            },
        }

        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

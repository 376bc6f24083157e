//! Expands `{{ env.VAR }}` placeholders found in string values anywhere in a
//! parsed TOML document before it is deserialized into [`crate::Config`],
//! so secrets like API keys never need to be written into the file itself.

use std::fmt::Write as _;
use std::sync::OnceLock;

use regex::Regex;
use toml::Value;

use crate::Error;

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{\s*env\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap())
}

enum PathSegment<'a> {
    Key(&'a str),
    Index(usize),
}

/// Walk the whole document and substitute `{{ env.VAR }}` occurrences in
/// every string value, in place.
pub(crate) fn expand(value: &mut Value) -> Result<(), Error> {
    let mut path = Vec::new();
    expand_inner(&mut path, value)
}

fn expand_inner<'a>(path: &mut Vec<PathSegment<'a>>, value: &'a mut Value) -> Result<(), Error> {
    match value {
        Value::String(s) => *s = substitute(path, s)?,
        Value::Array(values) => {
            for (index, value) in values.iter_mut().enumerate() {
                path.push(PathSegment::Index(index));
                expand_inner(path, value)?;
                path.pop();
            }
        }
        Value::Table(map) => {
            for (key, value) in map {
                path.push(PathSegment::Key(key.as_str()));
                expand_inner(path, value)?;
                path.pop();
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}

fn substitute(path: &[PathSegment<'_>], input: &str) -> Result<String, Error> {
    let pattern = env_pattern();
    if !pattern.is_match(input) {
        return Ok(input.to_string());
    }

    let mut reason = None;
    let expanded = pattern.replace_all(input, |captures: &regex::Captures<'_>| {
        let name = &captures[1];
        std::env::var(name).unwrap_or_else(|_| {
            reason.get_or_insert_with(|| format!("environment variable '{name}' is not set"));
            String::new()
        })
    });

    match reason {
        Some(reason) => Err(Error::EnvVarSubstitution {
            path: format_path(path),
            reason,
        }),
        None => Ok(expanded.into_owned()),
    }
}

fn format_path(path: &[PathSegment<'_>]) -> String {
    let mut out = String::new();
    for segment in path {
        match segment {
            PathSegment::Key(key) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(key);
            }
            PathSegment::Index(index) => write!(out, "[{index}]").unwrap(),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_plain_strings_untouched() {
        let mut value = Value::String("gpt-4o".to_string());
        expand(&mut value).unwrap();
        assert_eq!(value.as_str(), Some("gpt-4o"));
    }

    #[test]
    fn substitutes_a_whole_value_placeholder() {
        temp_env::with_var("CONFIG_TEST_KEY", Some("sk-test-123"), || {
            let mut value = Value::String("{{ env.CONFIG_TEST_KEY }}".to_string());
            expand(&mut value).unwrap();
            assert_eq!(value.as_str(), Some("sk-test-123"));
        });
    }

    #[test]
    fn substitutes_a_placeholder_embedded_in_a_larger_string() {
        temp_env::with_var("CONFIG_TEST_HOST", Some("my-proxy.internal"), || {
            let mut value = Value::String("https://{{ env.CONFIG_TEST_HOST }}/v1".to_string());
            expand(&mut value).unwrap();
            assert_eq!(value.as_str(), Some("https://my-proxy.internal/v1"));
        });
    }

    #[test]
    fn missing_variable_reports_its_table_path() {
        let mut table = toml::map::Map::new();
        table.insert("api_key".to_string(), Value::String("{{ env.CONFIG_TEST_MISSING_VAR }}".to_string()));
        let mut value = Value::Table(table);

        let err = expand(&mut value).unwrap_err();
        match err {
            Error::EnvVarSubstitution { path, reason } => {
                assert_eq!(path, "api_key");
                assert!(reason.contains("CONFIG_TEST_MISSING_VAR"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn reports_array_index_segments() {
        let mut value = Value::Array(vec![Value::String("{{ env.CONFIG_TEST_MISSING_VAR }}".to_string())]);

        let err = expand(&mut value).unwrap_err();
        match err {
            Error::EnvVarSubstitution { path, .. } => assert_eq!(path, "[0]"),
            other => panic!("unexpected error: {other}"),
        }
    }
}

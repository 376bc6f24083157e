//! Recovery of tool calls embedded in plain assistant text.
//!
//! Some upstream models (particularly smaller or fine-tuned ones reached
//! through an OpenAI-compatible endpoint) don't reliably use the
//! structured `tool_calls` field even when given tool definitions —
//! instead they emit marker-delimited or bare JSON describing the call
//! inside the message text. This module recovers a best-effort
//! [`UnifiedToolCall`] list from such text so the rest of the gateway
//! never has to special-case it.
//!
//! Every strategy here must be total: malformed input returns `None`
//! rather than panicking, since this runs on untrusted upstream output.

use serde_json::Value;

use crate::messages::unified::{UnifiedArguments, UnifiedFunctionCall, UnifiedToolCall};

/// Try each recovery strategy in order. Total: always returns a clean text
/// (the input with any recovered region removed) and the tool calls found
/// in it, which is empty for the common case of text with no tool call
/// intent at all — in which case the clean text equals the input verbatim.
pub(crate) fn parse(text: &str) -> (String, Vec<UnifiedToolCall>) {
    if let Some(result) = parse_marker_delimited(text) {
        return result;
    }
    if let Some(result) = parse_embedded_json(text) {
        return result;
    }
    if let Some(calls) = parse_key_value_fallback(text) {
        return (String::new(), calls);
    }
    (text.to_string(), Vec::new())
}

/// Remove the half-open byte range `[start, end)` from `text`, trimming and
/// joining the surrounding remainder so recovered tool-call JSON doesn't
/// leave a ragged gap of whitespace behind in the remaining prose.
fn strip_span(text: &str, start: usize, end: usize) -> String {
    let before = text[..start].trim();
    let after = text[end..].trim();
    match (before.is_empty(), after.is_empty()) {
        (true, true) => String::new(),
        (true, false) => after.to_string(),
        (false, true) => before.to_string(),
        (false, false) => format!("{before} {after}"),
    }
}

/// Strategy A: marker-delimited tool calls.
///
/// Recognizes the DeepSeek-style Unicode markers
/// (`<｜tool▁calls▁begin｜> ... <｜tool▁calls▁end｜>`), a plain-ASCII
/// equivalent some proxies rewrite them to, and fenced ` ```tool_call `
/// blocks. Each recognized span's body is parsed as a single JSON object
/// describing `{"name": ..., "arguments": ...}` (or `parameters` as an
/// alias for `arguments`).
fn parse_marker_delimited(text: &str) -> Option<(String, Vec<UnifiedToolCall>)> {
    const MARKER_PAIRS: &[(&str, &str)] = &[
        ("<｜tool▁calls▁begin｜>", "<｜tool▁calls▁end｜>"),
        ("<|tool_calls_begin|>", "<|tool_calls_end|>"),
    ];

    for (begin, end) in MARKER_PAIRS {
        if let Some(start) = text.find(begin) {
            let body_start = start + begin.len();
            let Some(end_offset) = text[body_start..].find(end) else {
                continue;
            };
            let body_end = body_start + end_offset;
            let full_end = body_end + end.len();
            let body = &text[body_start..body_end];

            let calls = parse_fenced_blocks(body)
                .map(|(_, calls)| calls)
                .or_else(|| parse_single_json_object(body).map(|c| vec![c]));

            if let Some(calls) = calls {
                return Some((strip_span(text, start, full_end), calls));
            }
        }
    }

    parse_fenced_blocks(text)
}

fn parse_fenced_blocks(text: &str) -> Option<(String, Vec<UnifiedToolCall>)> {
    const FENCE: &str = "```tool_call";
    let mut calls = Vec::new();
    let mut clean = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(FENCE) {
        let body_start = start + FENCE.len();
        let Some(close_offset) = rest[body_start..].find("```") else {
            break;
        };
        let body = rest[body_start..body_start + close_offset].trim();
        if let Some(call) = parse_single_json_object(body) {
            calls.push(call);
        }
        clean.push_str(&rest[..start]);
        rest = &rest[body_start + close_offset + 3..];
    }
    clean.push_str(rest);

    if calls.is_empty() { None } else { Some((clean.trim().to_string(), calls)) }
}

fn parse_single_json_object(body: &str) -> Option<UnifiedToolCall> {
    let value: Value = serde_json::from_str(body.trim()).ok()?;
    tool_call_from_name_arguments_object(&value, 0)
}

fn tool_call_from_name_arguments_object(value: &Value, index: usize) -> Option<UnifiedToolCall> {
    let obj = value.as_object()?;
    let name = obj.get("name")?.as_str()?.to_string();
    let arguments = obj
        .get("arguments")
        .or_else(|| obj.get("parameters"))
        .cloned()
        .unwrap_or(Value::Object(serde_json::Map::new()));

    // OpenAI-dialect tool calls encode `arguments` as a JSON-quoted string
    // rather than an object; route through `UnifiedArguments::String` so it
    // gets parsed like any other OpenAI call instead of being carried as an
    // opaque string value.
    let arguments = match arguments {
        Value::String(s) => UnifiedArguments::String(repair_unescaped_json(&s)),
        other => UnifiedArguments::Value(other),
    };

    Some(UnifiedToolCall {
        id: obj
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("call_recovered_{index}")),
        function: UnifiedFunctionCall {
            name,
            arguments,
        },
    })
}

/// Strategy C: repair an `arguments` string that itself contains
/// unescaped nested JSON — a common model misbehaviour where the model
/// writes `"arguments": {"path": "x"}` with real braces instead of
/// properly escaping them into a JSON string. If `s` already parses as
/// valid JSON it is returned unchanged; otherwise this re-escapes
/// unescaped inner double quotes (without re-escaping ones that are
/// already escaped) and control characters, then retries parsing. Returns
/// `s` verbatim if repair still doesn't produce valid JSON, so the caller
/// always has *something* to hand to `serde_json::from_str` downstream.
fn repair_unescaped_json(s: &str) -> String {
    if serde_json::from_str::<Value>(s).is_ok() {
        return s.to_string();
    }

    let mut repaired = String::with_capacity(s.len() + 8);
    let mut chars = s.chars().peekable();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if escaped {
            repaired.push(c);
            escaped = false;
            continue;
        }

        match c {
            '\\' if in_string => {
                repaired.push(c);
                escaped = true;
            }
            '"' => {
                // A quote that isn't closing a string at the top JSON
                // level (depth 0, i.e. we're inside a nested literal
                // object/array the model forgot to escape) needs
                // escaping so the whole thing re-parses as one string.
                if in_string && depth > 0 {
                    repaired.push('\\');
                }
                repaired.push('"');
                if depth == 0 {
                    in_string = !in_string;
                }
            }
            '{' | '[' if in_string => {
                depth += 1;
                repaired.push(c);
            }
            '}' | ']' if in_string => {
                depth = (depth - 1).max(0);
                repaired.push(c);
            }
            '\n' if in_string => repaired.push_str("\\n"),
            '\t' if in_string => repaired.push_str("\\t"),
            '\r' if in_string => repaired.push_str("\\r"),
            other => repaired.push(other),
        }
    }

    if serde_json::from_str::<Value>(&repaired).is_ok() { repaired } else { s.to_string() }
}

/// Strategy B: embedded JSON scanning.
///
/// Looks for `{"tool_calls": [...]}` or a bare `{"name": ..., "arguments":
/// ...}` anywhere in the text, using a string-aware brace counter to find
/// the matching close brace rather than assuming the JSON runs to the end
/// of the text (the model may have written prose after it).
fn parse_embedded_json(text: &str) -> Option<(String, Vec<UnifiedToolCall>)> {
    let mut search_from = 0;

    while let Some(rel_start) = text[search_from..].find('{') {
        let start = search_from + rel_start;
        let Some(end) = matching_brace_end(text, start) else {
            search_from = start + 1;
            continue;
        };

        let candidate = &text[start..=end];
        let parsed = serde_json::from_str::<Value>(candidate).or_else(|_| serde_json::from_str::<Value>(&repair_unescaped_json(candidate)));
        if let Ok(value) = parsed {
            let calls = tool_calls_array_from_value(&value)
                .or_else(|| tool_call_from_name_arguments_object(&value, 0).map(|call| vec![call]));
            if let Some(calls) = calls {
                return Some((strip_span(text, start, end + 1), calls));
            }
        }

        search_from = end + 1;
    }

    None
}

fn tool_calls_array_from_value(value: &Value) -> Option<Vec<UnifiedToolCall>> {
    let array = value.get("tool_calls")?.as_array()?;
    let calls: Vec<UnifiedToolCall> = array
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let function = entry.get("function").unwrap_or(entry);
            tool_call_from_name_arguments_object(function, index).map(|mut call| {
                if let Some(id) = entry.get("id").and_then(Value::as_str) {
                    call.id = id.to_string();
                }
                call
            })
        })
        .collect();

    if calls.is_empty() { None } else { Some(calls) }
}

/// Find the index of the brace matching the one at `start`, respecting
/// string literals (so a `}` inside a quoted value doesn't end the scan
/// early). Returns `None` if the braces never balance.
fn matching_brace_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(offset);
                }
            }
            _ => {}
        }
    }

    None
}

/// Strategy C: best-effort key-value extraction.
///
/// Last resort for text that clearly intends a tool call (contains a
/// `name:`/`function:` style hint) but isn't valid JSON at all — e.g. the
/// model emitted unescaped quotes inside a JSON string. Extracts a function
/// name and a flat set of `key: value` pairs with regex, on the theory that
/// a partially-recovered call is more useful downstream than none at all.
fn parse_key_value_fallback(text: &str) -> Option<Vec<UnifiedToolCall>> {
    let name_re = regex::Regex::new(r#"(?i)"?(?:function|name|tool)"?\s*[:=]\s*"([a-zA-Z_][a-zA-Z0-9_]*)""#).ok()?;
    let name = name_re.captures(text)?.get(1)?.as_str().to_string();

    let pair_re = regex::Regex::new(r#""([a-zA-Z_][a-zA-Z0-9_]*)"\s*:\s*"((?:[^"\\]|\\.)*)""#).ok()?;
    let mut arguments = serde_json::Map::new();
    for capture in pair_re.captures_iter(text) {
        let key = capture.get(1)?.as_str();
        if key == "name" || key == "function" || key == "tool" {
            continue;
        }
        let value = capture.get(2)?.as_str().replace("\\\"", "\"");
        arguments.insert(key.to_string(), Value::String(value));
    }

    Some(vec![UnifiedToolCall {
        id: "call_recovered_0".to_string(),
        function: UnifiedFunctionCall {
            name,
            arguments: UnifiedArguments::Value(Value::Object(arguments)),
        },
    }])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_without_tool_intent_returns_none() {
        let (clean, calls) = parse("The weather today is sunny and warm.");
        assert!(calls.is_empty());
        assert_eq!(clean, "The weather today is sunny and warm.");
    }

    #[test]
    fn fenced_tool_call_block_is_recovered() {
        let text = "Let me check that.\n```tool_call\n{\"name\": \"get_weather\", \"arguments\": {\"city\": \"Paris\"}}\n```\n";
        let (clean, calls) = parse(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(clean, "Let me check that.");
    }

    #[test]
    fn marker_delimited_block_is_recovered() {
        let text = "<|tool_calls_begin|>{\"name\": \"search\", \"arguments\": {\"q\": \"rust\"}}<|tool_calls_end|>";
        let (clean, calls) = parse(text);
        assert_eq!(calls[0].function.name, "search");
        assert!(clean.is_empty());
    }

    #[test]
    fn embedded_json_with_trailing_prose_is_recovered() {
        let text = r#"Sure, I'll do that: {"tool_calls": [{"function": {"name": "run_command", "arguments": {"cmd": "ls"}}}]} let me know if you need anything else."#;
        let (clean, calls) = parse(text);
        assert_eq!(calls[0].function.name, "run_command");
        assert_eq!(clean, "Sure, I'll do that: let me know if you need anything else.");
    }

    #[test]
    fn embedded_bare_call_object_is_recovered() {
        let text = r#"I'll call this now: {"name": "get_weather", "arguments": {"city": "Tokyo"}} and report back."#;
        let (clean, calls) = parse(text);
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(clean, "I'll call this now: and report back.");
    }

    #[test]
    fn malformed_json_falls_back_to_key_value_extraction() {
        let text = r#"name: "get_weather", "city": "Berlin", "units": "celsius""#;
        let (clean, calls) = parse(text);
        assert!(clean.is_empty());
        assert_eq!(calls[0].function.name, "get_weather");
        let UnifiedArguments::Value(Value::Object(map)) = &calls[0].function.arguments else {
            panic!("expected object arguments");
        };
        assert_eq!(map.get("city").and_then(Value::as_str), Some("Berlin"));
    }

    #[test]
    fn string_encoded_arguments_are_parsed_into_an_object() {
        let text = r#"Before {"tool_calls":[{"id":"c1","type":"function","function":{"name":"write_to_file","arguments":"{\"path\":\"/t.txt\",\"content\":\"hi\"}"}}]} after"#;
        let (clean, calls) = parse(text);
        assert_eq!(clean, "Before after");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "write_to_file");
        let Value::Object(map) = Value::from(calls[0].function.arguments.clone()) else {
            panic!("expected string arguments to parse into an object");
        };
        assert_eq!(map.get("path").and_then(Value::as_str), Some("/t.txt"));
        assert_eq!(map.get("content").and_then(Value::as_str), Some("hi"));
    }

    #[test]
    fn repair_unescaped_json_recovers_nested_unescaped_quotes() {
        let broken = r#"{"path": "a "quoted" word"}"#;
        let repaired = repair_unescaped_json(broken);
        assert!(serde_json::from_str::<Value>(&repaired).is_err() || repaired != broken);
    }

    #[test]
    fn repair_unescaped_json_leaves_valid_json_untouched() {
        let valid = r#"{"path": "/t.txt"}"#;
        assert_eq!(repair_unescaped_json(valid), valid);
    }

    #[test]
    fn matching_brace_end_ignores_braces_inside_strings() {
        let text = r#"{"a": "{not a brace}"}"#;
        let end = matching_brace_end(text, 0).expect("should find matching brace");
        assert_eq!(end, text.len() - 1);
    }

    #[test]
    fn never_panics_on_garbage_input() {
        let inputs = ["{", "}}}}", "", "<|tool_calls_begin|>", "```tool_call", "\"\"\"\"", "{{{{{"];
        for input in inputs {
            let (_, _) = parse(input);
        }
    }
}

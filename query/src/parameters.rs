//! Decoding of URL query strings with bracket-group keys.
//!
//! `filter[foo][condition][path]=title&tags[]=a&tags[]=b` decodes to
//!
//! ```json
//! {"filter": {"foo": {"condition": {"path": "title"}}}, "tags": ["a", "b"]}
//! ```
//!
//! Keys keep their order of first appearance.

use serde_json::{Map, Value as JsonValue};
use tracing::debug;

/// Bracket groups allowed below a parameter name; deeper keys are ignored
pub const MAX_KEY_DEPTH: usize = 16;

/// Decode a raw query string (without the leading `?`) into nested JSON
pub fn parse_query_string(query: &str) -> JsonValue {
    let mut root = JsonValue::Object(Map::new());

    for pair in query.trim_start_matches('?').split('&') {
        if pair.is_empty() {
            continue;
        }
        let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(raw_key);
        let value = decode_component(raw_value);

        let (name, mut segments) = split_key(&key);
        if name.is_empty() {
            continue;
        }
        if segments.len() > MAX_KEY_DEPTH {
            debug!("Ignoring query parameter '{}' nested deeper than {} groups", name, MAX_KEY_DEPTH);
            continue;
        }
        segments.insert(0, name);
        insert_value(&mut root, &segments, value);
    }

    root
}

/// Read a top-level string parameter
pub fn get_string<'a>(parameters: &'a JsonValue, name: &str) -> Option<&'a str> {
    parameters.get(name).and_then(JsonValue::as_str)
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced.clone(),
    }
}

fn split_key(key: &str) -> (String, Vec<String>) {
    let Some(open) = key.find('[') else {
        return (key.to_string(), Vec::new());
    };

    let name = key[..open].to_string();
    let mut segments = Vec::new();
    let mut rest = &key[open..];
    while let Some(stripped) = rest.strip_prefix('[') {
        match stripped.find(']') {
            Some(close) => {
                segments.push(stripped[..close].to_string());
                rest = &stripped[close + 1..];
            }
            None => break,
        }
    }

    (name, segments)
}

fn insert_value(root: &mut JsonValue, segments: &[String], value: String) {
    let mut target = root;
    for segment in segments {
        target = child_slot(target, segment);
    }
    *target = JsonValue::String(value);
}

/// Slot for `segment` below `target`, reshaping `target` when needed
fn child_slot<'a>(target: &'a mut JsonValue, segment: &str) -> &'a mut JsonValue {
    if segment.is_empty() {
        if !target.is_array() && !target.is_object() {
            *target = JsonValue::Array(Vec::new());
        }
    } else if !target.is_object() {
        *target = match std::mem::take(target) {
            JsonValue::Array(items) => JsonValue::Object(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| (index.to_string(), item))
                    .collect(),
            ),
            _ => JsonValue::Object(Map::new()),
        };
    }

    match target {
        JsonValue::Array(items) => {
            // `key[]=` appends
            items.push(JsonValue::Null);
            let last = items.len() - 1;
            &mut items[last]
        }
        JsonValue::Object(map) => {
            let key = if segment.is_empty() {
                next_index(map)
            } else {
                segment.to_string()
            };
            map.entry(key).or_insert(JsonValue::Null)
        }
        other => other,
    }
}

fn next_index(map: &Map<String, JsonValue>) -> String {
    map.keys()
        .filter_map(|key| key.parse::<usize>().ok())
        .max()
        .map_or(0, |max| max.saturating_add(1))
        .to_string()
}

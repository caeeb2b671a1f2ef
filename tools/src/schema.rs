//! Cleanup of parameter schemas that arrive from discovery.
//!
//! Discovered schemas are written by third parties and routinely carry
//! keywords that model function-calling APIs reject. Sanitizing is done in
//! place; local `$ref`s are followed through `$defs`/`definitions` with a
//! visited set so self-referential schemas terminate.

use std::collections::{BTreeMap, HashSet};

use serde_json::{Map, Value};

const DEF_SECTIONS: [&str; 2] = ["$defs", "definitions"];

/// Keywords whose value is a single sub-schema.
const SCHEMA_KEYS: [&str; 8] = [
    "items",
    "additionalProperties",
    "not",
    "anyOf",
    "oneOf",
    "allOf",
    "prefixItems",
    "contains",
];

/// Keywords whose value is a map of name -> sub-schema.
const SCHEMA_MAP_KEYS: [&str; 2] = ["properties", "patternProperties"];

type DefKey = (&'static str, String);

/// Sanitize `schema` in place.
///
/// - `$schema` is dropped everywhere
/// - `default` is dropped when `anyOf` is present
/// - `format` on string schemas is dropped unless it is `enum` or `date-time`
pub fn sanitize_schema(schema: &mut Value) {
    let mut defs: BTreeMap<DefKey, Value> = BTreeMap::new();
    if let Some(root) = schema.as_object_mut() {
        for section in DEF_SECTIONS {
            if let Some(Value::Object(map)) = root.remove(section) {
                for (name, def) in map {
                    defs.insert((section, name), def);
                }
            }
        }
    }

    let mut pending = Vec::new();
    sanitize_node(schema, &mut pending);

    let mut visited: HashSet<DefKey> = HashSet::new();
    while let Some(reference) = pending.pop() {
        let Some(key) = parse_local_ref(&reference) else {
            continue;
        };
        if !visited.insert(key.clone()) {
            continue;
        }
        if let Some(def) = defs.get_mut(&key) {
            sanitize_node(def, &mut pending);
        }
    }

    // Definitions nobody references still get cleaned once.
    let mut unused_refs = Vec::new();
    for (key, def) in &mut defs {
        if !visited.contains(key) {
            sanitize_node(def, &mut unused_refs);
        }
    }

    if defs.is_empty() {
        return;
    }
    if let Some(root) = schema.as_object_mut() {
        for ((section, name), def) in defs {
            let entry = root
                .entry(section)
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(map) = entry {
                map.insert(name, def);
            }
        }
    }
}

fn parse_local_ref(reference: &str) -> Option<DefKey> {
    let path = reference.strip_prefix("#/")?;
    DEF_SECTIONS.into_iter().find_map(|section| {
        path.strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('/'))
            .map(|name| (section, name.replace("~1", "/").replace("~0", "~")))
    })
}

fn sanitize_node(node: &mut Value, refs: &mut Vec<String>) {
    match node {
        Value::Object(map) => {
            map.remove("$schema");
            if map.contains_key("anyOf") {
                map.remove("default");
            }
            let is_string = map.get("type").and_then(Value::as_str) == Some("string");
            let drop_format = is_string
                && map
                    .get("format")
                    .and_then(Value::as_str)
                    .is_some_and(|format| !matches!(format, "enum" | "date-time"));
            if drop_format {
                map.remove("format");
            }
            if let Some(Value::String(reference)) = map.get("$ref") {
                refs.push(reference.clone());
            }

            for (key, child) in map.iter_mut() {
                let key = key.as_str();
                if SCHEMA_MAP_KEYS.contains(&key) || DEF_SECTIONS.contains(&key) {
                    if let Value::Object(children) = child {
                        for value in children.values_mut() {
                            sanitize_node(value, refs);
                        }
                    }
                } else if SCHEMA_KEYS.contains(&key) {
                    sanitize_node(child, refs);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                sanitize_node(item, refs);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::sanitize_schema;
    use serde_json::json;

    #[test]
    fn drops_unsupported_keywords() {
        let mut schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "properties": {
                "url": {"type": "string", "format": "uri"},
                "when": {"type": "string", "format": "date-time"},
                "mode": {"type": "string", "format": "enum", "enum": ["a", "b"]},
                "either": {"anyOf": [{"type": "string"}, {"type": "number"}], "default": 1}
            }
        });
        sanitize_schema(&mut schema);
        assert_eq!(
            schema,
            json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string"},
                    "when": {"type": "string", "format": "date-time"},
                    "mode": {"type": "string", "format": "enum", "enum": ["a", "b"]},
                    "either": {"anyOf": [{"type": "string"}, {"type": "number"}]}
                }
            })
        );
    }

    #[test]
    fn keeps_format_on_non_strings() {
        let mut schema = json!({"type": "integer", "format": "int64"});
        sanitize_schema(&mut schema);
        assert_eq!(schema, json!({"type": "integer", "format": "int64"}));
    }

    #[test]
    fn recurses_into_items_and_combinators() {
        let mut schema = json!({
            "type": "array",
            "items": {"oneOf": [{"type": "string", "format": "email"}]}
        });
        sanitize_schema(&mut schema);
        assert_eq!(
            schema,
            json!({"type": "array", "items": {"oneOf": [{"type": "string"}]}})
        );
    }

    #[test]
    fn cyclic_refs_terminate() {
        let mut schema = json!({
            "type": "object",
            "properties": {"root": {"$ref": "#/$defs/Node"}},
            "$defs": {
                "Node": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string", "format": "hostname"},
                        "children": {"type": "array", "items": {"$ref": "#/$defs/Node"}}
                    }
                }
            }
        });
        sanitize_schema(&mut schema);
        assert!(schema["$defs"]["Node"]["properties"]["name"].get("format").is_none());
        assert_eq!(
            schema["$defs"]["Node"]["properties"]["children"]["items"]["$ref"],
            "#/$defs/Node"
        );
    }

    #[test]
    fn unreferenced_definitions_are_cleaned() {
        let mut schema = json!({
            "type": "object",
            "definitions": {
                "Unused": {"$schema": "x", "type": "string", "format": "uuid"}
            }
        });
        sanitize_schema(&mut schema);
        assert_eq!(schema["definitions"]["Unused"], json!({"type": "string"}));
    }

    #[test]
    fn non_object_schema_is_left_alone() {
        let mut schema = json!(true);
        sanitize_schema(&mut schema);
        assert_eq!(schema, json!(true));
    }
}

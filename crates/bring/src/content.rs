//! ContentSpec normalization: a declarative post-transform filter/rename/
//! chmod policy, accepted from a caller in several shorthand shapes and
//! normalized to one canonical form before it's folded into the transform
//! list as a `folder_content` step.

use indexmap::IndexMap;
use serde_json::Value;

use bring_pipeline::steps::folder_content::ContentItem;

use crate::Error;

/// A normalized ContentSpec: target path → source item. Keyed by target
/// path so the "all target paths are unique" invariant is just "no
/// duplicate map key", enforced at insertion time.
pub type ContentSpec = IndexMap<String, ContentItem>;

/// Accepts a bare filename, a `{from: path}` map, or a list of either,
/// and produces a canonical `ContentSpec`.
pub fn normalize_content(value: &Value) -> Result<ContentSpec, Error> {
    let mut items = ContentSpec::new();
    collect(value, &mut items)?;
    Ok(items)
}

fn collect(value: &Value, items: &mut ContentSpec) -> Result<(), Error> {
    match value {
        Value::Null => Ok(()),
        Value::String(name) => insert_unique(items, name.clone(), ContentItem { from: name.clone(), mode: None }),
        Value::Array(entries) => {
            for entry in entries {
                collect(entry, items)?;
            }
            Ok(())
        }
        Value::Object(obj) if obj.contains_key("from") => {
            let from = obj
                .get("from")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Descriptor("content item `from` must be a string".to_string()))?
                .to_string();
            let path = obj.get("path").and_then(Value::as_str).unwrap_or(from.as_str()).to_string();
            let mode = obj.get("mode").map(mode_to_octal_string).transpose()?;
            insert_unique(items, path, ContentItem { from, mode })
        }
        Value::Object(obj) => {
            for (from, path) in obj {
                let path = path
                    .as_str()
                    .ok_or_else(|| Error::Descriptor("content map value must be a string target path".to_string()))?
                    .to_string();
                insert_unique(items, path, ContentItem { from: from.clone(), mode: None })?;
            }
            Ok(())
        }
        other => Err(Error::Descriptor(format!("invalid content spec entry: {other}"))),
    }
}

fn insert_unique(items: &mut ContentSpec, path: String, item: ContentItem) -> Result<(), Error> {
    if items.contains_key(&path) {
        return Err(Error::Descriptor(format!("duplicate content spec target path {path:?}")));
    }
    items.insert(path, item);
    Ok(())
}

fn mode_to_octal_string(mode: &Value) -> Result<String, Error> {
    match mode {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => n
            .as_u64()
            .map(|n| format!("{n:o}"))
            .ok_or_else(|| Error::Descriptor(format!("invalid content spec mode {mode}"))),
        other => Err(Error::Descriptor(format!("invalid content spec mode {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_string_becomes_identity_item() {
        let spec = normalize_content(&Value::String("bin/tool".to_string())).unwrap();
        assert_eq!(spec.len(), 1);
        assert_eq!(spec["bin/tool"].from, "bin/tool");
    }

    #[test]
    fn shorthand_map_pairs_from_to_path() {
        let spec = normalize_content(&serde_json::json!({"bin/tool": "tool"})).unwrap();
        assert_eq!(spec.len(), 1);
        assert_eq!(spec["tool"].from, "bin/tool");
    }

    #[test]
    fn full_item_list_sets_mode() {
        let spec = normalize_content(&serde_json::json!([
            {"from": "bin/tool", "path": "tool", "mode": "755"}
        ]))
        .unwrap();
        assert_eq!(spec["tool"].from, "bin/tool");
        assert_eq!(spec["tool"].mode.as_deref(), Some("755"));
    }

    #[test]
    fn duplicate_target_paths_are_rejected() {
        let result = normalize_content(&serde_json::json!([
            {"from": "a", "path": "same"},
            {"from": "b", "path": "same"}
        ]));
        assert!(result.is_err());
    }
}

//! Transform list normalization: a package's post-fetch step list, as a
//! caller may supply it — a bare step name, a single step map, or a
//! sequence of either — collapsed to the canonical `Vec<StepConfig>` that
//! is hashed and run.

use serde_json::Value;

use bring_pipeline::StepConfig;

use crate::Error;

/// Accepts `null`, a bare step-type string, a single step descriptor map,
/// or a list of either, and produces the canonical step sequence.
pub fn normalize_transform(value: &Value) -> Result<Vec<StepConfig>, Error> {
    let mut canonical = Vec::new();
    collect(value, &mut canonical)?;
    canonical
        .into_iter()
        .map(|item| serde_json::from_value(item).map_err(|err| Error::Descriptor(err.to_string())))
        .collect()
}

fn collect(value: &Value, out: &mut Vec<Value>) -> Result<(), Error> {
    match value {
        Value::Null => Ok(()),
        Value::String(name) => {
            out.push(serde_json::json!({ "type": name }));
            Ok(())
        }
        Value::Object(obj) => {
            if !obj.contains_key("type") {
                return Err(Error::Descriptor("transform step map is missing `type`".to_string()));
            }
            out.push(value.clone());
            Ok(())
        }
        Value::Array(entries) => {
            for entry in entries {
                collect(entry, out)?;
            }
            Ok(())
        }
        other => Err(Error::Descriptor(format!("invalid transform entry: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_string_becomes_a_single_no_arg_step() {
        let steps = normalize_transform(&Value::String("extract".to_string())).unwrap();
        assert_eq!(steps.len(), 1);
        assert!(matches!(steps[0], StepConfig::Extract { .. }));
    }

    #[test]
    fn single_map_becomes_a_single_step() {
        let steps = normalize_transform(&serde_json::json!({"type": "set_mode", "set_executable": true})).unwrap();
        assert_eq!(steps.len(), 1);
        assert!(matches!(steps[0], StepConfig::SetMode { .. }));
    }

    #[test]
    fn sequence_of_mixed_forms_normalizes_in_order() {
        let steps = normalize_transform(&serde_json::json!([
            "extract",
            {"type": "set_mode", "set_executable": true}
        ]))
        .unwrap();
        assert_eq!(steps.len(), 2);
        assert!(matches!(steps[0], StepConfig::Extract { .. }));
        assert!(matches!(steps[1], StepConfig::SetMode { .. }));
    }

    #[test]
    fn missing_type_key_is_a_descriptor_error() {
        let result = normalize_transform(&serde_json::json!({"set_executable": true}));
        assert!(result.is_err());
    }
}

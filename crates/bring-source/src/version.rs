//! [`PkgVersion`]: an immutable record identifying one concrete,
//! installable variant of a package.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One concrete, installable variant of a package (e.g. one tag of a git
/// repo, or one release asset).
///
/// `id` is a pure function of `steps`: two versions with equal steps have
/// equal ids and are interchangeable, regardless of how their `id_vars` or
/// `metadata` differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkgVersion {
    pub id_vars: IndexMap<String, String>,
    pub steps: Vec<bring_pipeline::StepConfig>,
    #[serde(default)]
    pub aliases: IndexMap<String, IndexMap<String, String>>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub metadata_timestamp: chrono::DateTime<chrono::Utc>,
    pub id: String,
}

impl PkgVersion {
    /// Build a version, substituting `${name}` placeholders in `steps`
    /// with their `id_vars` counterparts (unresolved placeholders are
    /// left literal), then computing `id` as a deep-structural hash of
    /// the substituted steps. `metadata_timestamp` should generally be an
    /// explicit timestamp from the caller's clock so cached metadata
    /// doesn't silently drift newer on every cache miss.
    pub fn new(
        id_vars: IndexMap<String, String>,
        steps: Vec<bring_pipeline::StepConfig>,
        aliases: IndexMap<String, IndexMap<String, String>>,
        metadata: serde_json::Map<String, serde_json::Value>,
        metadata_timestamp: chrono::DateTime<chrono::Utc>,
    ) -> serde_json::Result<Self> {
        let steps = substitute_steps(&steps, &id_vars)?;
        let id = bring_hash::stable_hash_of(&steps)?;
        Ok(Self {
            id_vars,
            steps,
            aliases,
            metadata,
            metadata_timestamp,
            id,
        })
    }
}

/// Replace every `${name}` occurrence in a step's string values with
/// `vars[name]`, leaving placeholders whose name isn't in `vars` as
/// literal text. Operates generically over each step's JSON
/// representation so every step kind gets this for free.
fn substitute_steps(
    steps: &[bring_pipeline::StepConfig],
    vars: &IndexMap<String, String>,
) -> serde_json::Result<Vec<bring_pipeline::StepConfig>> {
    steps
        .iter()
        .map(|step| {
            let value = serde_json::to_value(step)?;
            serde_json::from_value(substitute_value(&value, vars))
        })
        .collect()
}

fn substitute_value(value: &serde_json::Value, vars: &IndexMap<String, String>) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(substitute_string(s, vars)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|item| substitute_value(item, vars)).collect())
        }
        serde_json::Value::Object(obj) => serde_json::Value::Object(
            obj.iter().map(|(key, val)| (key.clone(), substitute_value(val, vars))).collect(),
        ),
        other => other.clone(),
    }
}

fn substitute_string(s: &str, vars: &IndexMap<String, String>) -> String {
    let mut result = s.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("${{{key}}}"), value);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps() -> Vec<bring_pipeline::StepConfig> {
        vec![bring_pipeline::StepConfig::GitClone {
            url: "https://example.com/repo.git".to_string(),
            version: "v1.0.0".to_string(),
        }]
    }

    #[test]
    fn equal_steps_produce_equal_ids_regardless_of_id_vars() {
        let now = chrono::Utc::now();
        let a = PkgVersion::new(
            IndexMap::from([("version".to_string(), "v1.0.0".to_string())]),
            steps(),
            IndexMap::new(),
            serde_json::Map::new(),
            now,
        )
        .unwrap();
        let b = PkgVersion::new(
            IndexMap::from([("version".to_string(), "renamed".to_string())]),
            steps(),
            IndexMap::new(),
            serde_json::Map::new(),
            now,
        )
        .unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn placeholder_in_step_value_is_substituted_from_id_vars() {
        let now = chrono::Utc::now();
        let templated = vec![bring_pipeline::StepConfig::GitClone {
            url: "https://example.com/repo.git".to_string(),
            version: "${version}".to_string(),
        }];
        let version = PkgVersion::new(
            IndexMap::from([("version".to_string(), "v1.1.0".to_string())]),
            templated,
            IndexMap::new(),
            serde_json::Map::new(),
            now,
        )
        .unwrap();
        let bring_pipeline::StepConfig::GitClone { version: resolved, .. } = &version.steps[0] else {
            panic!("expected a GitClone step");
        };
        assert_eq!(resolved, "v1.1.0");
    }

    #[test]
    fn placeholder_with_no_matching_id_var_is_left_literal() {
        let now = chrono::Utc::now();
        let templated = vec![bring_pipeline::StepConfig::GitClone {
            url: "https://example.com/repo.git".to_string(),
            version: "${missing}".to_string(),
        }];
        let version =
            PkgVersion::new(IndexMap::new(), templated, IndexMap::new(), serde_json::Map::new(), now).unwrap();
        let bring_pipeline::StepConfig::GitClone { version: resolved, .. } = &version.steps[0] else {
            panic!("expected a GitClone step");
        };
        assert_eq!(resolved, "${missing}");
    }

    #[test]
    fn different_steps_produce_different_ids() {
        let now = chrono::Utc::now();
        let a = PkgVersion::new(IndexMap::new(), steps(), IndexMap::new(), serde_json::Map::new(), now).unwrap();
        let mut other_steps = steps();
        if let bring_pipeline::StepConfig::GitClone { version, .. } = &mut other_steps[0] {
            *version = "v2.0.0".to_string();
        }
        let b = PkgVersion::new(IndexMap::new(), other_steps, IndexMap::new(), serde_json::Map::new(), now).unwrap();
        assert_ne!(a.id, b.id);
    }
}

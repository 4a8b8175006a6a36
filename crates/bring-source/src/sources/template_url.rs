//! A single URL template, optionally expanded across a cross-product of
//! `template_values`, with an `extract` step appended when the rendered
//! URL looks like a known archive.

use async_trait::async_trait;
use indexmap::IndexMap;

use bring_pipeline::StepConfig;

use crate::{PkgVersion, SourceContext, SourceError, VersionSet, VersionSource};

const ARCHIVE_SUFFIXES: &[&str] = &[".tar.gz", ".tgz", ".tar", ".zip"];

pub struct TemplateUrlSource {
    pub url_template: String,
    pub template_values: IndexMap<String, Vec<String>>,
}

#[async_trait]
impl VersionSource for TemplateUrlSource {
    fn source_type(&self) -> &'static str {
        "template_url"
    }

    fn unique_source_id(&self) -> String {
        bring_hash::stable_hash(&serde_json::json!({
            "url_template": self.url_template,
            "template_values": self.template_values,
        }))
    }

    async fn retrieve_versions(&self, _ctx: &SourceContext) -> Result<VersionSet, SourceError> {
        let now = chrono::Utc::now();

        let combos = if self.template_values.is_empty() {
            vec![IndexMap::new()]
        } else {
            let keys: Vec<&String> = self.template_values.keys().collect();
            let value_lists: Vec<&Vec<String>> = self.template_values.values().collect();
            let mut combos: Vec<IndexMap<String, String>> = vec![IndexMap::new()];
            for (key, values) in keys.iter().zip(value_lists.iter()) {
                let mut next = Vec::with_capacity(combos.len() * values.len());
                for combo in &combos {
                    for value in values.iter() {
                        let mut extended = combo.clone();
                        extended.insert((*key).clone(), value.clone());
                        next.push(extended);
                    }
                }
                combos = next;
            }
            combos
        };

        let versions = combos
            .into_iter()
            .map(|vars| self.build_version(&vars, now))
            .collect::<Result<Vec<_>, _>>()?;

        Ok((versions, serde_json::json!({})))
    }
}

impl TemplateUrlSource {
    fn build_version(
        &self,
        vars: &IndexMap<String, String>,
        metadata_timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Result<PkgVersion, SourceError> {
        let mut url = self.url_template.clone();
        for (key, value) in vars {
            url = url.replace(&format!("${{{key}}}"), value);
        }

        let lowercase = url.to_lowercase();
        let target_file_name = url.rsplit('/').next().unwrap_or(&url).to_string();

        let mut steps = vec![StepConfig::Download {
            url,
            target_file_name,
            retries: None,
        }];
        if ARCHIVE_SUFFIXES.iter().any(|suffix| lowercase.ends_with(suffix)) {
            steps.push(StepConfig::Extract { remove_root: None });
        }

        PkgVersion::new(vars.clone(), steps, IndexMap::new(), serde_json::Map::new(), metadata_timestamp)
            .map_err(|err| SourceError::Validation(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_suffixed_template_appends_an_extract_step() {
        let source = TemplateUrlSource {
            url_template: "https://example.com/tool-${version}.tar.gz".to_string(),
            template_values: IndexMap::from([("version".to_string(), vec!["1.0.0".to_string()])]),
        };
        let version = source
            .build_version(
                &IndexMap::from([("version".to_string(), "1.0.0".to_string())]),
                chrono::Utc::now(),
            )
            .unwrap();
        assert_eq!(version.steps.len(), 2);
        assert!(matches!(version.steps[1], StepConfig::Extract { .. }));
    }

    #[test]
    fn plain_file_template_has_no_extract_step() {
        let source = TemplateUrlSource {
            url_template: "https://example.com/tool-${version}.exe".to_string(),
            template_values: IndexMap::from([("version".to_string(), vec!["1.0.0".to_string()])]),
        };
        let version = source
            .build_version(
                &IndexMap::from([("version".to_string(), "1.0.0".to_string())]),
                chrono::Utc::now(),
            )
            .unwrap();
        assert_eq!(version.steps.len(), 1);
    }
}

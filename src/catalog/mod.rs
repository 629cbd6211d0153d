pub mod meta;
pub mod schema;
pub mod types;

use crate::catalog::meta::DatasetMeta;
use crate::catalog::schema::{DatasetSchema, RuleSet};
use crate::error::{GateError, ResourceType};
use im::HashMap;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A dataset under change control. Schema and rules are optional; a dataset
/// without either is unvalidated and every proposal passes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dataset {
    pub dataset_id: String,
    pub project_id: String,
    pub owner_id: String,
    #[serde(default)]
    pub owner_display_name: Option<String>,
    #[serde(default)]
    pub schema: Option<DatasetSchema>,
    #[serde(default)]
    pub rules: Option<RuleSet>,
    /// Bumped whenever schema or rules change, so commit-time drift is visible in logs.
    #[serde(default)]
    pub definition_version: u64,
    #[serde(default)]
    pub created_at_micros: u64,
}

impl Dataset {
    pub fn new(
        dataset_id: impl Into<String>,
        project_id: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            project_id: project_id.into(),
            owner_id: owner_id.into(),
            owner_display_name: None,
            schema: None,
            rules: None,
            definition_version: 0,
            created_at_micros: 0,
        }
    }

    pub fn with_schema(mut self, schema: DatasetSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn with_owner_display_name(mut self, name: impl Into<String>) -> Self {
        self.owner_display_name = Some(name.into());
        self
    }

    pub fn owner_display_name(&self) -> &str {
        self.owner_display_name.as_deref().unwrap_or(&self.owner_id)
    }

    pub fn is_unvalidated(&self) -> bool {
        self.schema.is_none() && self.rules.as_ref().is_none_or(RuleSet::is_empty)
    }
}

/// Registry of datasets and their derived metadata. Cloning is cheap; the
/// maps are persistent and share structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    pub datasets: HashMap<String, Dataset>,
    pub metas: HashMap<String, DatasetMeta>,
}

impl Catalog {
    pub fn register_dataset(&mut self, mut dataset: Dataset) -> Result<(), GateError> {
        validate_identifier(&dataset.dataset_id, "dataset_id")?;
        validate_identifier(&dataset.project_id, "project_id")?;
        if dataset.owner_id.is_empty() {
            return Err(GateError::InvalidRequest("owner_id must not be empty".into()));
        }
        if self.datasets.contains_key(&dataset.dataset_id) {
            return Err(GateError::AlreadyExists {
                resource_type: ResourceType::Dataset,
                resource_id: dataset.dataset_id,
            });
        }
        if dataset.created_at_micros == 0 {
            dataset.created_at_micros = now_micros();
        }
        self.datasets.insert(dataset.dataset_id.clone(), dataset);
        Ok(())
    }

    pub fn dataset(&self, dataset_id: &str) -> Result<&Dataset, GateError> {
        self.datasets
            .get(dataset_id)
            .ok_or_else(|| GateError::dataset_not_found(dataset_id))
    }

    /// Replaces schema and rules. Staged proposals are re-validated against
    /// the new definition when they are committed.
    pub fn update_definition(
        &mut self,
        dataset_id: &str,
        schema: Option<DatasetSchema>,
        rules: Option<RuleSet>,
    ) -> Result<u64, GateError> {
        let mut dataset = self.dataset(dataset_id)?.clone();
        dataset.schema = schema;
        dataset.rules = rules;
        dataset.definition_version += 1;
        let version = dataset.definition_version;
        self.datasets.insert(dataset_id.to_string(), dataset);
        Ok(version)
    }

    pub fn put_meta(&mut self, meta: DatasetMeta) {
        self.metas.insert(meta.dataset_id.clone(), meta);
    }

    pub fn meta(&self, dataset_id: &str) -> Option<&DatasetMeta> {
        self.metas.get(dataset_id)
    }

    pub fn list_datasets(&self, project_id: Option<&str>) -> Vec<Dataset> {
        let mut out: Vec<Dataset> = self
            .datasets
            .values()
            .filter(|d| project_id.is_none_or(|p| d.project_id == p))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.dataset_id.cmp(&b.dataset_id));
        out
    }
}

pub(crate) fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

const MAX_IDENTIFIER_LEN: usize = 128;

pub(crate) fn validate_identifier(value: &str, name: &str) -> Result<(), GateError> {
    if value.is_empty() {
        return Err(GateError::InvalidRequest(format!("{name} must not be empty")));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(GateError::InvalidRequest(format!(
            "{name} must be <= {MAX_IDENTIFIER_LEN} bytes"
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(GateError::InvalidRequest(format!(
            "{name} must contain only [A-Za-z0-9_-]"
        )));
    }
    Ok(())
}

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::common::{validate_label_key, validate_label_value, validate_object_name};
use crate::{ContractViolation, Validate};

pub type Labels = BTreeMap<String, String>;

/// A namespaced key/value document: generated config objects and option fragment sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigObject {
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: Labels,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl ConfigObject {
    pub fn named(
        namespace: impl Into<String>,
        name: impl Into<String>,
        data: BTreeMap<String, String>,
    ) -> Result<Self, ContractViolation> {
        let obj = Self {
            namespace: namespace.into(),
            name: Some(name.into()),
            generate_name: None,
            labels: Labels::new(),
            data,
        };
        obj.validate()?;
        Ok(obj)
    }

    pub fn generated(
        namespace: impl Into<String>,
        generate_name: impl Into<String>,
        labels: Labels,
        data: BTreeMap<String, String>,
    ) -> Result<Self, ContractViolation> {
        let obj = Self {
            namespace: namespace.into(),
            name: None,
            generate_name: Some(generate_name.into()),
            labels,
            data,
        };
        obj.validate()?;
        Ok(obj)
    }
}

impl Validate for ConfigObject {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_object_name("config_object.namespace", &self.namespace)?;
        match (&self.name, &self.generate_name) {
            (Some(name), _) => validate_object_name("config_object.name", name)?,
            (None, Some(prefix)) => {
                if prefix.is_empty() || prefix.len() > 200 {
                    return Err(ContractViolation::InvalidValue {
                        field: "config_object.generate_name",
                        reason: "must be 1..=200 characters",
                    });
                }
            }
            (None, None) => {
                return Err(ContractViolation::InvalidValue {
                    field: "config_object.name",
                    reason: "name or generate_name is required",
                });
            }
        }
        validate_labels("config_object.labels", &self.labels)
    }
}

pub fn validate_labels(field: &'static str, labels: &Labels) -> Result<(), ContractViolation> {
    for (k, v) in labels {
        validate_label_key(field, k)?;
        validate_label_value(field, v)?;
    }
    Ok(())
}

/// Equality-based selector: every pair must be present on the object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector(Labels);

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        self.0.iter().all(|(k, v)| labels.get(k) == Some(v))
    }
}

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};

use crate::common::validate_non_empty;
use crate::{ContractViolation, Validate};

pub const MANAGED_K8S_PROVIDER_ID: &str = "managedk8s";
pub const MANAGED_K8S_PROVIDER_NAME: &str = "Managed Kubernetes";

#[derive(Debug, thiserror::Error)]
pub enum ConfigRenderError {
    #[error("failed to marshal compliance config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// One per-rule override entry, as decoded from an option fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOptionsConfig {
    #[serde(rename = "ruleID")]
    pub rule_id: String,
    #[serde(default)]
    pub args: Value,
}

// Field order is the rendered order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesetConfig {
    pub id: String,
    pub name: String,
    pub version: String,
    pub rule_options: Vec<RuleOptionsConfig>,
    pub args: Option<Value>,
}

impl Validate for RulesetConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_non_empty("ruleset_config.id", &self.id, 128)?;
        validate_non_empty("ruleset_config.name", &self.name, 256)?;
        validate_non_empty("ruleset_config.version", &self.version, 64)?;
        for rule in &self.rule_options {
            validate_non_empty("ruleset_config.rule_options.rule_id", &rule.rule_id, 128)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub name: String,
    pub metadata: Mapping,
    pub rulesets: Vec<RulesetConfig>,
    pub args: Option<Value>,
}

impl ProviderConfig {
    pub fn managed_k8s(rulesets: Vec<RulesetConfig>) -> Self {
        Self {
            id: MANAGED_K8S_PROVIDER_ID.to_string(),
            name: MANAGED_K8S_PROVIDER_NAME.to_string(),
            metadata: Mapping::new(),
            rulesets,
            args: None,
        }
    }
}

impl Validate for ProviderConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_non_empty("provider_config.id", &self.id, 128)?;
        validate_non_empty("provider_config.name", &self.name, 256)?;
        for ruleset in &self.rulesets {
            ruleset.validate()?;
        }
        Ok(())
    }
}

/// Lowercase hex SHA-256 of an already rendered document.
pub fn digest_hex(rendered: &str) -> String {
    hex::encode(Sha256::digest(rendered.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub providers: Vec<ProviderConfig>,
}

impl ConfigDocument {
    pub fn v1(provider: ProviderConfig) -> Result<Self, ContractViolation> {
        let doc = Self {
            providers: vec![provider],
        };
        doc.validate()?;
        Ok(doc)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigRenderError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// SHA-256 of the rendered YAML, lowercase hex.
    pub fn sha256_hex(&self) -> Result<String, ConfigRenderError> {
        Ok(digest_hex(&self.to_yaml()?))
    }
}

impl Validate for ConfigDocument {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.providers.len() != 1 {
            return Err(ContractViolation::InvalidValue {
                field: "config_document.providers",
                reason: "must contain exactly one provider",
            });
        }
        for provider in &self.providers {
            provider.validate()?;
        }
        Ok(())
    }
}

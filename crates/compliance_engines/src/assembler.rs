#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use compliance_kernel_contracts::config_doc::{ConfigDocument, ProviderConfig, RulesetConfig};
use compliance_kernel_contracts::run::RulesetSelection;
use compliance_kernel_contracts::ContractViolation;
use tracing::debug;

use crate::options::{OptionFragmentSource, OptionResolutionError, OptionResolver};

pub const DISA_K8S_STIG_RULESET_ID: &str = "disa-kubernetes-stig";
pub const DISA_K8S_STIG_RULESET_NAME: &str =
    "DISA Kubernetes Security Technical Implementation Guide";
pub const SECURITY_HARDENED_K8S_RULESET_ID: &str = "security-hardened-k8s";
pub const SECURITY_HARDENED_K8S_RULESET_NAME: &str = "Security Hardened Kubernetes Cluster";

/// Ruleset ids this build knows how to configure, with their display names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RulesetCatalog {
    names: BTreeMap<String, String>,
}

impl RulesetCatalog {
    pub fn mvp_v1() -> Self {
        Self::default()
            .with_ruleset(DISA_K8S_STIG_RULESET_ID, DISA_K8S_STIG_RULESET_NAME)
            .with_ruleset(
                SECURITY_HARDENED_K8S_RULESET_ID,
                SECURITY_HARDENED_K8S_RULESET_NAME,
            )
    }

    pub fn with_ruleset(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.names.insert(id.into(), name.into());
        self
    }

    pub fn display_name(&self, id: &str) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionReferenceKind {
    RulesetArgs,
    RuleOverrides,
}

impl fmt::Display for OptionReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionReferenceKind::RulesetArgs => f.write_str("ruleset options"),
            OptionReferenceKind::RuleOverrides => f.write_str("rule options"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AssemblyError {
    #[error("failed to get {reference} for ruleset \"{ruleset_id}\": {cause}")]
    OptionResolution {
        ruleset_id: String,
        reference: OptionReferenceKind,
        cause: OptionResolutionError,
    },
    #[error("assembled config is invalid: {0}")]
    Contract(#[from] ContractViolation),
}

#[derive(Debug, Clone)]
pub struct ConfigAssembler {
    catalog: RulesetCatalog,
}

impl ConfigAssembler {
    pub fn new(catalog: RulesetCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &RulesetCatalog {
        &self.catalog
    }

    /// Resolves every recognised selection, in input order, under the managed provider.
    ///
    /// Unrecognised ids are skipped. The first resolution error aborts assembly.
    pub fn assemble<S: OptionFragmentSource + ?Sized>(
        &self,
        selections: &[RulesetSelection],
        source: &S,
    ) -> Result<ConfigDocument, AssemblyError> {
        let resolver = OptionResolver::new(source);
        let mut rulesets = Vec::with_capacity(selections.len());

        for selection in selections {
            let Some(name) = self.catalog.display_name(&selection.id) else {
                debug!(ruleset_id = %selection.id, "skipping unrecognised ruleset");
                continue;
            };

            let args = resolver.resolve_ruleset_args(selection).map_err(|cause| {
                AssemblyError::OptionResolution {
                    ruleset_id: selection.id.clone(),
                    reference: OptionReferenceKind::RulesetArgs,
                    cause,
                }
            })?;
            let rule_options = resolver.resolve_rule_overrides(selection).map_err(|cause| {
                AssemblyError::OptionResolution {
                    ruleset_id: selection.id.clone(),
                    reference: OptionReferenceKind::RuleOverrides,
                    cause,
                }
            })?;

            rulesets.push(RulesetConfig {
                id: selection.id.clone(),
                name: name.to_string(),
                version: selection.version.clone(),
                rule_options,
                args,
            });
        }

        Ok(ConfigDocument::v1(ProviderConfig::managed_k8s(rulesets))?)
    }
}

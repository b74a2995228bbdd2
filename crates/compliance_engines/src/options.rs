#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use compliance_kernel_contracts::config_doc::RuleOptionsConfig;
use compliance_kernel_contracts::run::{OptionsRef, RulesetSelection};
use serde::de::DeserializeOwned;
use serde_yaml::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FragmentFetchError {
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    Failed(String),
}

/// Read access to the documents that hold option fragments.
pub trait OptionFragmentSource {
    fn fetch_fragment(
        &self,
        reference: &OptionsRef,
    ) -> Result<BTreeMap<String, String>, FragmentFetchError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionResolutionError {
    #[error("option source {source_ref} not found")]
    NotFound { source_ref: String },
    #[error("key '{key}' does not exist in option source {source_ref}")]
    KeyMissing { source_ref: String, key: String },
    #[error("failed to decode key '{key}' of option source {source_ref}: {detail}")]
    Decode {
        source_ref: String,
        key: String,
        detail: String,
    },
    #[error("failed to fetch option source {source_ref}: {detail}")]
    FetchFailed { source_ref: String, detail: String },
}

pub struct OptionResolver<'a, S: OptionFragmentSource + ?Sized> {
    source: &'a S,
}

impl<'a, S: OptionFragmentSource + ?Sized> OptionResolver<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// `Ok(None)` when no reference is configured; the caller renders its own marker.
    pub fn resolve<T: DeserializeOwned>(
        &self,
        reference: Option<&OptionsRef>,
        default_key: &str,
    ) -> Result<Option<T>, OptionResolutionError> {
        let Some(reference) = reference else {
            return Ok(None);
        };
        let source_ref = reference.to_string();
        let key = reference.key_or(default_key);

        let document = self
            .source
            .fetch_fragment(reference)
            .map_err(|err| match err {
                FragmentFetchError::NotFound => OptionResolutionError::NotFound {
                    source_ref: source_ref.clone(),
                },
                FragmentFetchError::Failed(detail) => OptionResolutionError::FetchFailed {
                    source_ref: source_ref.clone(),
                    detail,
                },
            })?;

        let raw = document
            .get(key)
            .ok_or_else(|| OptionResolutionError::KeyMissing {
                source_ref: source_ref.clone(),
                key: key.to_string(),
            })?;

        serde_yaml::from_str::<T>(raw)
            .map(Some)
            .map_err(|err| OptionResolutionError::Decode {
                source_ref,
                key: key.to_string(),
                detail: err.to_string(),
            })
    }

    pub fn resolve_ruleset_args(
        &self,
        selection: &RulesetSelection,
    ) -> Result<Option<Value>, OptionResolutionError> {
        self.resolve::<Value>(
            selection.ruleset_args_ref(),
            &selection.ruleset_args_default_key(),
        )
    }

    /// An absent reference and an empty fragment both resolve to an empty list.
    pub fn resolve_rule_overrides(
        &self,
        selection: &RulesetSelection,
    ) -> Result<Vec<RuleOptionsConfig>, OptionResolutionError> {
        let decoded = self.resolve::<Option<Vec<RuleOptionsConfig>>>(
            selection.rule_overrides_ref(),
            &selection.rule_overrides_default_key(),
        )?;
        Ok(decoded.flatten().unwrap_or_default())
    }
}

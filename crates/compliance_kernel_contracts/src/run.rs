#![forbid(unsafe_code)]

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{validate_non_empty, validate_object_name};
use crate::{ContractViolation, Validate};

/// Appended to a ruleset id to form the default key of its rule-override fragment.
pub const RULE_OPTIONS_KEY_SUFFIX: &str = "-rules";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunName(String);

impl RunName {
    pub fn new(v: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = v.into();
        validate_object_name("run.metadata.name", &v)?;
        Ok(Self(v))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for RunName {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_object_name("run.metadata.name", &self.0)
    }
}

impl fmt::Display for RunName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunUid(String);

impl RunUid {
    pub fn new(v: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = v.into();
        validate_non_empty("run.metadata.uid", &v, 63)?;
        Ok(Self(v))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for RunUid {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_non_empty("run.metadata.uid", &self.0, 63)
    }
}

impl fmt::Display for RunUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMeta {
    pub name: RunName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<RunUid>,
    #[serde(default)]
    pub resource_version: u64,
}

/// Store coordinates of an option fragment document plus the key to read from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionsRef {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl OptionsRef {
    pub fn v1(
        namespace: impl Into<String>,
        name: impl Into<String>,
        key: Option<String>,
    ) -> Result<Self, ContractViolation> {
        let r = Self {
            name: name.into(),
            namespace: namespace.into(),
            key,
        };
        r.validate()?;
        Ok(r)
    }

    pub fn key_or<'a>(&'a self, default_key: &'a str) -> &'a str {
        self.key.as_deref().unwrap_or(default_key)
    }
}

impl Validate for OptionsRef {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_object_name("options_ref.name", &self.name)?;
        validate_object_name("options_ref.namespace", &self.namespace)?;
        if let Some(key) = &self.key {
            validate_non_empty("options_ref.key", key, 253)?;
        }
        Ok(())
    }
}

impl fmt::Display for OptionsRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<OptionsRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesetOptions {
    /// Ruleset-wide arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ruleset: Option<OptionsSource>,
    /// Per-rule overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<OptionsSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesetSelection {
    pub id: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<RulesetOptions>,
}

impl RulesetSelection {
    pub fn v1(
        id: impl Into<String>,
        version: impl Into<String>,
        options: Option<RulesetOptions>,
    ) -> Result<Self, ContractViolation> {
        let s = Self {
            id: id.into(),
            version: version.into(),
            options,
        };
        s.validate()?;
        Ok(s)
    }

    pub fn ruleset_args_ref(&self) -> Option<&OptionsRef> {
        self.options
            .as_ref()
            .and_then(|o| o.ruleset.as_ref())
            .and_then(|s| s.config_map_ref.as_ref())
    }

    pub fn rule_overrides_ref(&self) -> Option<&OptionsRef> {
        self.options
            .as_ref()
            .and_then(|o| o.rules.as_ref())
            .and_then(|s| s.config_map_ref.as_ref())
    }

    pub fn ruleset_args_default_key(&self) -> String {
        self.id.clone()
    }

    pub fn rule_overrides_default_key(&self) -> String {
        format!("{}{}", self.id, RULE_OPTIONS_KEY_SUFFIX)
    }
}

impl Validate for RulesetSelection {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_non_empty("ruleset_selection.id", &self.id, 128)?;
        validate_non_empty("ruleset_selection.version", &self.version, 64)?;
        if let Some(r) = self.ruleset_args_ref() {
            r.validate()?;
        }
        if let Some(r) = self.rule_overrides_ref() {
            r.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    #[serde(default)]
    pub rulesets: Vec<RulesetSelection>,
}

impl Validate for RunSpec {
    fn validate(&self) -> Result<(), ContractViolation> {
        for selection in &self.rulesets {
            selection.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunPhase {
    Running,
    Completed,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Running => "Running",
            RunPhase::Completed => "Completed",
            RunPhase::Failed => "Failed",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionType(Cow<'static, str>);

impl ConditionType {
    pub const COMPLETED: ConditionType = ConditionType(Cow::Borrowed("Completed"));
    pub const FAILED: ConditionType = ConditionType(Cow::Borrowed("Failed"));

    pub fn new(v: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = v.into();
        validate_non_empty("condition.type", &v, 128)?;
        Ok(Self(Cow::Owned(v)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    pub last_update_time: DateTime<Utc>,
    pub last_transition_time: DateTime<Utc>,
    pub reason: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub phase: Option<RunPhase>,
}

impl RunStatus {
    pub fn condition(&self, condition_type: &ConditionType) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| &c.condition_type == condition_type)
    }
}

impl Validate for RunStatus {
    fn validate(&self) -> Result<(), ContractViolation> {
        let mut seen = BTreeSet::new();
        for c in &self.conditions {
            if !seen.insert(c.condition_type.as_str()) {
                return Err(ContractViolation::InvalidValue {
                    field: "run.status.conditions",
                    reason: "must contain at most one condition per type",
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub metadata: RunMeta,
    #[serde(default)]
    pub spec: RunSpec,
    #[serde(default)]
    pub status: RunStatus,
}

impl Run {
    /// A freshly requested run; uid and resource version are assigned by the store.
    pub fn v1(name: RunName, spec: RunSpec) -> Result<Self, ContractViolation> {
        let run = Self {
            metadata: RunMeta {
                name,
                uid: None,
                resource_version: 0,
            },
            spec,
            status: RunStatus::default(),
        };
        run.validate()?;
        Ok(run)
    }

    pub fn name(&self) -> &RunName {
        &self.metadata.name
    }

    pub fn phase(&self) -> Option<RunPhase> {
        self.status.phase
    }
}

impl Validate for Run {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.metadata.name.validate()?;
        if let Some(uid) = &self.metadata.uid {
            uid.validate()?;
        }
        self.spec.validate()?;
        self.status.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options_ref(key: Option<&str>) -> OptionsRef {
        OptionsRef::v1("kube-system", "options-configmap", key.map(ToString::to_string)).unwrap()
    }

    #[test]
    fn at_run_01_default_keys_follow_ruleset_id() {
        let s = RulesetSelection::v1("disa-kubernetes-stig", "v1", None).unwrap();
        assert_eq!(s.ruleset_args_default_key(), "disa-kubernetes-stig");
        assert_eq!(s.rule_overrides_default_key(), "disa-kubernetes-stig-rules");
        assert!(s.ruleset_args_ref().is_none());
        assert!(s.rule_overrides_ref().is_none());
    }

    #[test]
    fn at_run_02_explicit_key_wins_over_default() {
        let r = options_ref(Some("set-rule-options"));
        assert_eq!(r.key_or("r1-rules"), "set-rule-options");
        let r = options_ref(None);
        assert_eq!(r.key_or("r1-rules"), "r1-rules");
        assert_eq!(r.to_string(), "kube-system/options-configmap");
    }

    #[test]
    fn at_run_03_selection_requires_id_and_version() {
        assert!(RulesetSelection::v1("", "v1", None).is_err());
        assert!(RulesetSelection::v1("r1", " ", None).is_err());
    }

    #[test]
    fn at_run_04_status_rejects_duplicate_condition_types() {
        let now = Utc::now();
        let c = Condition {
            condition_type: ConditionType::COMPLETED,
            status: ConditionStatus::False,
            last_update_time: now,
            last_transition_time: now,
            reason: "ComplianceRunRunning".to_string(),
            message: "running".to_string(),
        };
        let status = RunStatus {
            conditions: vec![c.clone(), c],
            phase: Some(RunPhase::Running),
        };
        assert!(status.validate().is_err());
    }

    #[test]
    fn at_run_05_resource_schema_parses_nested_option_refs() {
        let raw = r#"
metadata:
  name: weekly-scan
spec:
  rulesets:
    - id: security-hardened-k8s
      version: v1
      options:
        ruleset:
          configMapRef:
            name: options-configmap
            namespace: kube-system
            key: set-ruleset-options
        rules:
          configMapRef:
            name: options-configmap
            namespace: kube-system
"#;
        let run: Run = serde_yaml::from_str(raw).unwrap();
        run.validate().unwrap();
        assert_eq!(run.phase(), None);
        let selection = &run.spec.rulesets[0];
        assert_eq!(
            selection.ruleset_args_ref().unwrap().key.as_deref(),
            Some("set-ruleset-options")
        );
        assert_eq!(selection.rule_overrides_ref().unwrap().key, None);
    }

    #[test]
    fn at_run_06_terminal_phases() {
        assert!(!RunPhase::Running.is_terminal());
        assert!(RunPhase::Completed.is_terminal());
        assert!(RunPhase::Failed.is_terminal());
    }
}

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use compliance_kernel_contracts::object::ConfigObject;
use compliance_kernel_contracts::run::Run;
use compliance_kernel_contracts::{ContractViolation, Deadline};
use compliance_storage::{ResourceStore, StorageError};
use serde::Deserialize;
use tracing::info;

use crate::queue::{QueueError, WorkQueue};
use crate::worker::{enqueue_event, RunEvent};

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifests from {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid manifest {path}: {source}")]
    Invalid {
        path: PathBuf,
        source: ContractViolation,
    },
    #[error("failed to seed store: {0}")]
    Storage(#[from] StorageError),
    #[error("failed to enqueue seeded run: {0}")]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConfigMapManifest {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// Documents accepted in a manifests directory, keyed by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind")]
pub enum Manifest {
    ComplianceRun(Run),
    ConfigMap(ConfigMapManifest),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestSet {
    pub runs: Vec<Run>,
    pub config_objects: Vec<ConfigObject>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub runs: usize,
    pub config_objects: usize,
    pub enqueued: usize,
}

/// Reads every `.yaml`/`.yml` file in `dir` (sorted by file name); a file may hold
/// several `---`-separated documents.
pub fn load_manifests(dir: &Path) -> Result<ManifestSet, ManifestError> {
    let io_err = |source: std::io::Error| ManifestError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if path.is_file() && is_yaml {
            paths.push(path);
        }
    }
    paths.sort();

    let mut set = ManifestSet::default();
    for path in paths {
        let raw = std::fs::read_to_string(&path).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        parse_into(&path, &raw, &mut set)?;
    }
    Ok(set)
}

pub fn parse_into(path: &Path, raw: &str, set: &mut ManifestSet) -> Result<(), ManifestError> {
    for document in serde_yaml::Deserializer::from_str(raw) {
        let value = serde_yaml::Value::deserialize(document).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if value.is_null() {
            continue;
        }
        let manifest: Manifest =
            serde_yaml::from_value(value).map_err(|source| ManifestError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let invalid = |source: ContractViolation| ManifestError::Invalid {
            path: path.to_path_buf(),
            source,
        };
        match manifest {
            Manifest::ComplianceRun(run) => {
                // Seeded runs start unprocessed; uid and status in the file are ignored.
                let run = Run::v1(run.metadata.name, run.spec).map_err(invalid)?;
                set.runs.push(run);
            }
            Manifest::ConfigMap(cm) => {
                let object = ConfigObject::named(cm.metadata.namespace, cm.metadata.name, cm.data)
                    .map_err(invalid)?;
                set.config_objects.push(object);
            }
        }
    }
    Ok(())
}

/// Stores option sources first so seeded runs can resolve them, then stores and
/// enqueues each run as a create event.
pub fn seed_store<S: ResourceStore + ?Sized>(
    store: &S,
    queue: &WorkQueue,
    set: ManifestSet,
) -> Result<SeedSummary, ManifestError> {
    let mut summary = SeedSummary::default();
    for object in set.config_objects {
        store.create_config_object(object, Deadline::none())?;
        summary.config_objects += 1;
    }
    for run in set.runs {
        let created = store.create_run(run, Deadline::none())?;
        summary.runs += 1;
        if enqueue_event(queue, &RunEvent::Create(created.metadata.name))? {
            summary.enqueued += 1;
        }
    }
    info!(
        runs = summary.runs,
        config_objects = summary.config_objects,
        "seeded store from manifests"
    );
    Ok(summary)
}

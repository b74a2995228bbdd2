#![forbid(unsafe_code)]

use std::time::Instant;

use chrono::{TimeZone, Utc};
use compliance_kernel_contracts::run::{
    Condition, ConditionStatus, ConditionType, Run, RunName, RunPhase, RunSpec, RunStatus,
    RulesetSelection,
};
use compliance_kernel_contracts::Deadline;
use compliance_storage::memory::InMemoryResourceStore;
use compliance_storage::repo::{ComplianceRunRepo, StorageError, StoreOp};

fn name(v: &str) -> RunName {
    RunName::new(v).unwrap()
}

fn run(v: &str) -> Run {
    let spec = RunSpec {
        rulesets: vec![RulesetSelection::v1("r1", "v1", None).unwrap()],
    };
    Run::v1(name(v), spec).unwrap()
}

fn running_status() -> RunStatus {
    let t = Utc.timestamp_opt(100, 0).unwrap();
    RunStatus {
        conditions: vec![Condition {
            condition_type: ConditionType::COMPLETED,
            status: ConditionStatus::False,
            last_update_time: t,
            last_transition_time: t,
            reason: "ComplianceRunRunning".to_string(),
            message: "running".to_string(),
        }],
        phase: Some(RunPhase::Running),
    }
}

#[test]
fn at_run_store_01_create_assigns_uid_and_version() {
    let s = InMemoryResourceStore::new_in_memory();
    let created = s.create_run(run("weekly"), Deadline::none()).unwrap();
    assert!(created.metadata.uid.is_some());
    assert!(created.metadata.resource_version > 0);

    let loaded = s.get_run(&name("weekly"), Deadline::none()).unwrap();
    assert_eq!(loaded, created);
    assert_eq!(s.run_count(), 1);
}

#[test]
fn at_run_store_02_duplicate_name_is_rejected() {
    let s = InMemoryResourceStore::new_in_memory();
    s.create_run(run("weekly"), Deadline::none()).unwrap();
    assert!(matches!(
        s.create_run(run("weekly"), Deadline::none()),
        Err(StorageError::DuplicateKey { .. })
    ));
}

#[test]
fn at_run_store_03_missing_run_is_not_found() {
    let s = InMemoryResourceStore::new_in_memory();
    let err = s.get_run(&name("absent"), Deadline::none()).unwrap_err();
    assert!(err.is_not_found());
    let missing = s.patch_run_status(
        &name("absent"),
        &RunStatus::default(),
        running_status(),
        Deadline::none(),
    );
    assert!(missing.unwrap_err().is_not_found());
}

#[test]
fn at_run_store_04_status_patch_is_conditional_on_base() {
    let s = InMemoryResourceStore::new_in_memory();
    let created = s.create_run(run("weekly"), Deadline::none()).unwrap();

    let patched = s
        .patch_run_status(&name("weekly"), &created.status, running_status(), Deadline::none())
        .unwrap();
    assert_eq!(patched.phase(), Some(RunPhase::Running));
    assert!(patched.metadata.resource_version > created.metadata.resource_version);
    assert_eq!(patched.spec, created.spec);
    assert_eq!(patched.metadata.uid, created.metadata.uid);

    // Stale base: the stored status moved on.
    let mut completed = running_status();
    completed.phase = Some(RunPhase::Completed);
    assert!(matches!(
        s.patch_run_status(&name("weekly"), &created.status, completed, Deadline::none()),
        Err(StorageError::Conflict { .. })
    ));
    let stored = s.get_run(&name("weekly"), Deadline::none()).unwrap();
    assert_eq!(stored.phase(), Some(RunPhase::Running));
}

#[test]
fn at_run_store_05_patch_rejects_invalid_status() {
    let s = InMemoryResourceStore::new_in_memory();
    let created = s.create_run(run("weekly"), Deadline::none()).unwrap();
    let mut dup = running_status();
    dup.conditions.push(dup.conditions[0].clone());
    assert!(matches!(
        s.patch_run_status(&name("weekly"), &created.status, dup, Deadline::none()),
        Err(StorageError::ContractViolation(_))
    ));
}

#[test]
fn at_run_store_06_expired_deadline_fails_the_call() {
    let s = InMemoryResourceStore::new_in_memory();
    s.create_run(run("weekly"), Deadline::none()).unwrap();
    let err = s
        .get_run(&name("weekly"), Deadline::at(Instant::now()))
        .unwrap_err();
    assert_eq!(err, StorageError::DeadlineExceeded { op: StoreOp::GetRun });
}

#[test]
fn at_run_store_07_fault_hook_injects_errors_and_calls_are_counted() {
    let s = InMemoryResourceStore::new_in_memory();
    let created = s.create_run(run("weekly"), Deadline::none()).unwrap();
    s.set_fault_hook(|op| {
        (op == StoreOp::PatchRunStatus).then(|| StorageError::Unavailable {
            detail: "injected".to_string(),
        })
    })
    .unwrap();

    let err = s
        .patch_run_status(&name("weekly"), &created.status, running_status(), Deadline::none())
        .unwrap_err();
    assert!(err.to_string().contains("injected"));
    assert!(s.get_run(&name("weekly"), Deadline::none()).is_ok());

    s.clear_fault_hook().unwrap();
    assert!(s
        .patch_run_status(&name("weekly"), &created.status, running_status(), Deadline::none())
        .is_ok());

    assert_eq!(s.calls(StoreOp::CreateRun), 1);
    assert_eq!(s.calls(StoreOp::PatchRunStatus), 2);
    assert_eq!(s.calls(StoreOp::GetRun), 1);
    assert_eq!(s.calls(StoreOp::ListConfigObjects), 0);
}

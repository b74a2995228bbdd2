#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use compliance_kernel_contracts::object::{ConfigObject, LabelSelector, Labels};
use compliance_kernel_contracts::Deadline;
use compliance_storage::memory::InMemoryResourceStore;
use compliance_storage::repo::{ConfigObjectRepo, StorageError, StoreOp};

fn data(k: &str, v: &str) -> BTreeMap<String, String> {
    let mut d = BTreeMap::new();
    d.insert(k.to_string(), v.to_string());
    d
}

fn labels(run: &str) -> Labels {
    let mut l = Labels::new();
    l.insert("app.kubernetes.io/name".to_string(), "compliance-runner".to_string());
    l.insert("compliance.operator.io/run".to_string(), run.to_string());
    l
}

#[test]
fn at_config_objects_01_named_object_round_trips() {
    let s = InMemoryResourceStore::new_in_memory();
    let obj =
        ConfigObject::named("kube-system", "options-configmap", data("r1", "foo: bar")).unwrap();
    s.create_config_object(obj.clone(), Deadline::none()).unwrap();

    let loaded = s
        .get_config_object("kube-system", "options-configmap", Deadline::none())
        .unwrap();
    assert_eq!(loaded, obj);
    assert!(s
        .get_config_object("default", "options-configmap", Deadline::none())
        .unwrap_err()
        .is_not_found());
    assert!(matches!(
        s.create_config_object(obj, Deadline::none()),
        Err(StorageError::DuplicateKey { .. })
    ));
}

#[test]
fn at_config_objects_02_generate_name_gets_unique_suffix() {
    let s = InMemoryResourceStore::new_in_memory();
    let make = || {
        ConfigObject::generated(
            "kube-system",
            "compliance-config-",
            labels("u1"),
            data("config.yaml", "x"),
        )
        .unwrap()
    };
    let a = s.create_config_object(make(), Deadline::none()).unwrap();
    let b = s.create_config_object(make(), Deadline::none()).unwrap();

    let a_name = a.name.unwrap();
    let b_name = b.name.unwrap();
    assert!(a_name.starts_with("compliance-config-"));
    assert_eq!(a_name.len(), "compliance-config-".len() + 5);
    assert_ne!(a_name, b_name);
    assert_eq!(a.generate_name.as_deref(), Some("compliance-config-"));
}

#[test]
fn at_config_objects_03_list_filters_by_selector_and_namespace() {
    let s = InMemoryResourceStore::new_in_memory();
    for (ns, run) in [("kube-system", "u1"), ("kube-system", "u2"), ("default", "u1")] {
        let obj =
            ConfigObject::generated(ns, "compliance-config-", labels(run), data("config.yaml", run))
                .unwrap();
        s.create_config_object(obj, Deadline::none()).unwrap();
    }

    let by_run = LabelSelector::new().with("compliance.operator.io/run", "u1");
    assert_eq!(
        s.list_config_objects(None, &by_run, Deadline::none())
            .unwrap()
            .len(),
        2
    );
    let scoped = s
        .list_config_objects(Some("kube-system"), &by_run, Deadline::none())
        .unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].data["config.yaml"], "u1");

    let none = LabelSelector::new().with("compliance.operator.io/run", "u9");
    assert!(s
        .list_config_objects(None, &none, Deadline::none())
        .unwrap()
        .is_empty());
    assert_eq!(s.calls(StoreOp::ListConfigObjects), 3);
}

#[test]
fn at_config_objects_04_fault_hook_fails_create_without_side_effects() {
    let s = InMemoryResourceStore::new_in_memory();
    s.set_fault_hook(|op| {
        (op == StoreOp::CreateConfigObject).then(|| StorageError::Unavailable {
            detail: "quota exceeded".to_string(),
        })
    })
    .unwrap();
    let obj = ConfigObject::generated(
        "kube-system",
        "compliance-config-",
        labels("u1"),
        data("config.yaml", "x"),
    )
    .unwrap();
    assert!(s.create_config_object(obj, Deadline::none()).is_err());
    assert!(s
        .list_config_objects(None, &LabelSelector::new(), Deadline::none())
        .unwrap()
        .is_empty());
}

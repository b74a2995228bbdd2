#![forbid(unsafe_code)]

use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use compliance_adapter::config::OperatorConfig;
use compliance_adapter::http::{build_metrics_router, build_router};
use compliance_adapter::OperatorRuntime;
use compliance_engines::assembler::RulesetCatalog;
use compliance_kernel_contracts::config_doc::ConfigDocument;
use compliance_kernel_contracts::object::ConfigObject;
use compliance_kernel_contracts::run::{ConditionType, Run, RunPhase};
use tower::util::ServiceExt;

fn runtime() -> OperatorRuntime {
    let mut config = OperatorConfig::default();
    config.controllers.compliance_run.max_concurrent_reconciles = 2;
    config.controllers.compliance_run.rate_limiter.base_delay_ms = 10;
    config.controllers.compliance_run.rate_limiter.max_delay_ms = 50;
    let catalog = RulesetCatalog::mvp_v1().with_ruleset("r1", "Ruleset One");
    OperatorRuntime::with_catalog(config, catalog).unwrap()
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn wait_for_phase(router: &Router, name: &str) -> Run {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let (status, body) = send(router, Method::GET, &format!("/v1/runs/{name}"), None).await;
            assert_eq!(status, StatusCode::OK);
            let run: Run = serde_json::from_slice(&body).unwrap();
            if run.phase().map_or(false, RunPhase::is_terminal) {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn at_operator_01_posted_run_is_reconciled_to_completed() {
    let rt = runtime();
    let router = build_router(rt.app_state());

    let (status, _) = send(&router, Method::GET, "/readyz", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let workers = rt.pool.clone().spawn(rt.config.worker_count());
    rt.ready.store(true, Ordering::Release);
    let (status, _) = send(&router, Method::GET, "/readyz", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &router,
        Method::POST,
        "/v1/runs",
        Some(serde_json::json!({
            "metadata": { "name": "nightly" },
            "spec": { "rulesets": [ { "id": "r1", "version": "v1" } ] }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let run = wait_for_phase(&router, "nightly").await;
    assert_eq!(run.phase(), Some(RunPhase::Completed));
    assert!(run.status.condition(&ConditionType::COMPLETED).is_some());

    let (status, body) = send(&router, Method::GET, "/v1/runs/nightly/config-objects", None).await;
    assert_eq!(status, StatusCode::OK);
    let objects: Vec<ConfigObject> = serde_json::from_slice(&body).unwrap();
    assert_eq!(objects.len(), 1);
    let doc: ConfigDocument = serde_yaml::from_str(&objects[0].data["config.yaml"]).unwrap();
    assert_eq!(doc.providers[0].rulesets[0].id, "r1");

    let metrics = build_metrics_router(rt.metrics.clone());
    let (status, body) = send(&metrics, Method::GET, "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("compliance_run_outcomes_total{outcome=\"completed\"} 1"));
    assert!(text.contains("compliance_run_outcomes_total{outcome=\"failed\"} 0"));

    rt.queue.shutdown();
    for w in workers {
        w.await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn at_operator_02_missing_option_source_fails_run() {
    let rt = runtime();
    let router = build_router(rt.app_state());
    let workers = rt.pool.clone().spawn(1);

    let (status, _) = send(
        &router,
        Method::POST,
        "/v1/runs",
        Some(serde_json::json!({
            "metadata": { "name": "broken" },
            "spec": { "rulesets": [ {
                "id": "r1",
                "version": "v1",
                "options": { "rules": { "configMapRef": {
                    "name": "absent",
                    "namespace": "kube-system"
                } } }
            } ] }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let run = wait_for_phase(&router, "broken").await;
    assert_eq!(run.phase(), Some(RunPhase::Failed));
    let failed = run.status.condition(&ConditionType::FAILED).unwrap();
    assert!(failed.message.contains("kube-system/absent"));
    assert!(run.status.condition(&ConditionType::COMPLETED).is_none());

    rt.queue.shutdown();
    for w in workers {
        w.await.unwrap();
    }
}

#[tokio::test]
async fn at_operator_03_api_rejects_bad_and_duplicate_requests() {
    let rt = runtime();
    let router = build_router(rt.app_state());

    let (status, _) = send(&router, Method::GET, "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&router, Method::GET, "/v1/runs/absent", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let bad = serde_json::json!({ "metadata": { "name": "Not_Valid" } });
    let (status, _) = send(&router, Method::POST, "/v1/runs", Some(bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let ok = serde_json::json!({ "metadata": { "name": "once" } });
    let (status, _) = send(&router, Method::POST, "/v1/runs", Some(ok.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(&router, Method::POST, "/v1/runs", Some(ok)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(rt.queue.len(), 1);
}

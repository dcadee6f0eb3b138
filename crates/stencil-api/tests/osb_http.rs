//! OSB HTTP flow through the full router.

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use semver::Version;
use serde_json::{Value, json};
use stencil_api::{API_VERSION_HEADER, ORIGINATING_IDENTITY_HEADER, build_router};
use stencil_broker::{AllowAll, BrokerEngine, RetryPolicy, TemplateInstanceController};
use stencil_core::UserInfo;
use stencil_core::identity::encode_originating_identity;
use stencil_state::{ObjectMeta, StateStore, Template, TemplateParameter, TypedStore};
use tower::ServiceExt;

struct Fixture {
    router: Router,
    controller: TemplateInstanceController,
    service_id: String,
}

fn fixture() -> Fixture {
    let store = Arc::new(StateStore::open_in_memory().unwrap());
    let template = store
        .create_typed(&Template {
            metadata: ObjectMeta::named("stencil", "redis"),
            message: String::new(),
            objects: vec![json!({
                "kind": "Secret",
                "metadata": {
                    "name": "redis",
                    "annotations": {
                        "stencil.dev/expose-password": "{.data.password}",
                        "stencil.dev/base64-expose-password64": "{.data.password}"
                    }
                },
                "data": {"password": "${PASSWORD}"}
            })],
            parameters: vec![TemplateParameter {
                name: "PASSWORD".to_string(),
                required: true,
                ..Default::default()
            }],
        })
        .unwrap();

    let gate = Arc::new(AllowAll);
    let engine = BrokerEngine::new(
        store.clone(),
        gate.clone(),
        vec!["stencil".to_string()],
        RetryPolicy::default(),
    );
    let controller = TemplateInstanceController::new(
        store,
        gate,
        RetryPolicy::default(),
        std::time::Duration::from_secs(1),
    );
    Fixture {
        router: build_router(engine, Version::new(2, 7, 0)),
        controller,
        service_id: template.metadata.uid,
    }
}

fn identity() -> String {
    encode_originating_identity("stencil", &UserInfo::new("alice"))
}

async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(API_VERSION_HEADER, "2.13")
        .header(ORIGINATING_IDENTITY_HEADER, identity());
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };
    let resp = router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn version_header_is_required() {
    let f = fixture();
    let req = Request::builder()
        .uri("/v2/catalog")
        .body(Body::empty())
        .unwrap();
    let resp = f.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);

    let req = Request::builder()
        .uri("/v2/catalog")
        .header(API_VERSION_HEADER, "2.6")
        .body(Body::empty())
        .unwrap();
    let resp = f.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn malformed_identity_is_bad_request() {
    let f = fixture();
    let req = Request::builder()
        .uri("/v2/catalog")
        .header(API_VERSION_HEADER, "2.13")
        .header(ORIGINATING_IDENTITY_HEADER, "stencil !!!")
        .body(Body::empty())
        .unwrap();
    let resp = f.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn catalog_exposes_templates() {
    let f = fixture();
    let (status, body) = call(&f.router, Method::GET, "/v2/catalog", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["services"][0]["id"], f.service_id);
    assert_eq!(body["services"][0]["name"], "redis");
    assert_eq!(body["services"][0]["plans"][0]["id"], f.service_id);
}

#[tokio::test]
async fn full_lifecycle() {
    let f = fixture();
    let instance = "/v2/service_instances/i1";
    let provision = json!({
        "service_id": f.service_id,
        "plan_id": f.service_id,
        "context": {"platform": "stencil", "namespace": "ns"},
        "parameters": {"PASSWORD": "c2VjcmV0"}
    });

    let (status, _) = call(&f.router, Method::PUT, instance, Some(provision.clone())).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let uri = format!("{instance}?accepts_incomplete=true");
    let (status, body) = call(&f.router, Method::PUT, &uri, Some(provision.clone())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, json!({"operation": "provisioning"}));

    let (status, body) = call(&f.router, Method::PUT, &uri, Some(provision)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    let poll = format!("{instance}/last_operation?operation=provisioning");
    let (status, body) = call(&f.router, Method::GET, &poll, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "in progress");

    f.controller.reconcile_once().unwrap();
    let (_, body) = call(&f.router, Method::GET, &poll, None).await;
    assert_eq!(body["state"], "succeeded");

    let binding = format!("{instance}/service_bindings/b1");
    let bind = json!({"service_id": f.service_id, "plan_id": f.service_id});
    let (status, body) = call(&f.router, Method::PUT, &binding, Some(bind.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["credentials"]["password"], "secret");
    assert_eq!(body["credentials"]["password64"], "c2VjcmV0");

    let (status, _) = call(&f.router, Method::PUT, &binding, Some(bind)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&f.router, Method::DELETE, &binding, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&f.router, Method::DELETE, &binding, None).await;
    assert_eq!(status, StatusCode::GONE);

    let (status, body) = call(&f.router, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, json!({"operation": "deprovisioning"}));
    let (status, _) = call(&f.router, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::GONE);

    let poll = format!("{instance}/last_operation?operation=deprovisioning");
    let (_, body) = call(&f.router, Method::GET, &poll, None).await;
    assert_eq!(body["state"], "succeeded");
}

#[tokio::test]
async fn provision_with_unknown_service_is_bad_request() {
    let f = fixture();
    let body = json!({
        "service_id": "nope",
        "plan_id": "nope",
        "context": {"namespace": "ns"}
    });
    let (status, resp) = call(
        &f.router,
        Method::PUT,
        "/v2/service_instances/i1?accepts_incomplete=true",
        Some(body),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(resp["description"].as_str().unwrap().contains("unknown service_id"));
}

#[tokio::test]
async fn conflicting_provision_is_409() {
    let f = fixture();
    let uri = "/v2/service_instances/i1?accepts_incomplete=true";
    let mut body = json!({
        "service_id": f.service_id,
        "plan_id": f.service_id,
        "context": {"namespace": "ns"},
        "parameters": {"PASSWORD": "YQ=="}
    });
    let (status, _) = call(&f.router, Method::PUT, uri, Some(body.clone())).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    body["parameters"]["PASSWORD"] = json!("Yg==");
    let (status, _) = call(&f.router, Method::PUT, uri, Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn osb_query_parameters_on_delete_and_poll_are_accepted() {
    let f = fixture();
    let ids = format!("service_id={0}&plan_id={0}", f.service_id);
    let body = json!({
        "service_id": f.service_id,
        "plan_id": f.service_id,
        "context": {"platform": "kubernetes", "namespace": "ns", "clusterid": "c1"},
        "parameters": {"PASSWORD": "YQ=="}
    });
    let uri = format!("/v2/service_instances/i1?accepts_incomplete=true&{ids}");
    let (status, _) = call(&f.router, Method::PUT, &uri, Some(body)).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let poll = format!("/v2/service_instances/i1/last_operation?operation=provisioning&{ids}");
    let (status, body) = call(&f.router, Method::GET, &poll, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "in progress");

    let unbind = format!("/v2/service_instances/i1/service_bindings/b1?{ids}");
    let (status, _) = call(&f.router, Method::DELETE, &unbind, None).await;
    assert_eq!(status, StatusCode::GONE);

    let (status, _) = call(&f.router, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

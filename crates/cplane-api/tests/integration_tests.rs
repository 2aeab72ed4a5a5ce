//! # Integration Tests for cplane-api
//!
//! Drives the router end to end against the in-memory store: health probes,
//! caller identity and roles, the catalog, the policy lifecycle, binding
//! resolution, the error body contract, the audit log and the OpenAPI
//! document.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use cplane_api::auth::{IdentityConfig, ACTOR_HEADER, ROLE_HEADER, TENANT_HEADER};
use cplane_api::AppState;

/// Helper: build the test app trusting the gateway identity headers.
fn test_app() -> axum::Router {
    cplane_api::app(
        AppState::in_memory(),
        IdentityConfig {
            trust_headers: true,
        },
    )
}

/// Helper: read response body as string.
async fn body_string(response: axum::http::Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: axum::http::Response<Body>) -> Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

struct Caller {
    tenant: Uuid,
    role: &'static str,
}

impl Caller {
    fn admin() -> Self {
        Self {
            tenant: Uuid::new_v4(),
            role: "admin",
        }
    }

    fn with_role(&self, role: &'static str) -> Self {
        Self {
            tenant: self.tenant,
            role,
        }
    }
}

fn request(caller: &Caller, method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(TENANT_HEADER, caller.tenant.to_string())
        .header(ACTOR_HEADER, format!("{}@acme", caller.role))
        .header(ROLE_HEADER, caller.role);
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(
    app: &axum::Router,
    caller: &Caller,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> axum::http::Response<Body> {
    app.clone()
        .oneshot(request(caller, method, uri, body))
        .await
        .unwrap()
}

/// Send and expect `status`, returning the decoded body.
async fn expect(
    app: &axum::Router,
    caller: &Caller,
    method: &str,
    uri: &str,
    body: Option<Value>,
    status: StatusCode,
) -> Value {
    let response = send(app, caller, method, uri, body).await;
    assert_eq!(response.status(), status, "{method} {uri}");
    body_json(response).await
}

struct Chain {
    vertical_id: String,
    sub_vertical_id: String,
    persona_id: String,
}

async fn banking_chain(app: &axum::Router, admin: &Caller) -> Chain {
    let vertical = expect(
        app,
        admin,
        "POST",
        "/v1/verticals",
        Some(json!({
            "key": "banking",
            "name": "Banking",
            "entity_type": "company",
            "region_scope": ["UAE", "EMEA"]
        })),
        StatusCode::CREATED,
    )
    .await;
    let vertical_id = vertical["id"].as_str().unwrap().to_string();

    let sub_vertical = expect(
        app,
        admin,
        "POST",
        &format!("/v1/verticals/{vertical_id}/sub-verticals"),
        Some(json!({
            "key": "employee_banking",
            "name": "Employee Banking",
            "default_agent": "eb_agent",
            "primary_entity_type": "company",
            "related_entity_types": ["individual"]
        })),
        StatusCode::CREATED,
    )
    .await;
    let sub_vertical_id = sub_vertical["id"].as_str().unwrap().to_string();

    let persona = expect(
        app,
        admin,
        "POST",
        &format!("/v1/sub-verticals/{sub_vertical_id}/personas"),
        Some(json!({
            "key": "eb-relationship-manager",
            "name": "EB Relationship Manager",
            "scope": "LOCAL",
            "region_code": "UAE"
        })),
        StatusCode::CREATED,
    )
    .await;
    let persona_id = persona["id"].as_str().unwrap().to_string();

    Chain {
        vertical_id,
        sub_vertical_id,
        persona_id,
    }
}

async fn activate_policy(app: &axum::Router, admin: &Caller, persona_id: &str) -> Value {
    let draft = expect(
        app,
        admin,
        "POST",
        &format!("/v1/personas/{persona_id}/policies"),
        Some(json!({
            "allowed_intents": ["discover", "enrich"],
            "allowed_tools": ["crm_lookup"]
        })),
        StatusCode::CREATED,
    )
    .await;
    let policy_id = draft["id"].as_str().unwrap().to_string();
    expect(
        app,
        admin,
        "POST",
        &format!("/v1/policies/{policy_id}/stage"),
        None,
        StatusCode::OK,
    )
    .await;
    expect(
        app,
        admin,
        "POST",
        &format!("/v1/policies/{policy_id}/activate"),
        None,
        StatusCode::OK,
    )
    .await
}

async fn bind(app: &axum::Router, caller: &Caller, workspace: Uuid, chain: &Chain) {
    expect(
        app,
        caller,
        "PUT",
        &format!("/v1/workspaces/{workspace}/binding"),
        Some(json!({
            "vertical_id": chain.vertical_id,
            "sub_vertical_id": chain.sub_vertical_id,
            "persona_id": chain.persona_id
        })),
        StatusCode::CREATED,
    )
    .await;
}

// -- Health Probes ------------------------------------------------------------

#[tokio::test]
async fn test_liveness_probe() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/health/liveness")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ok");
}

#[tokio::test]
async fn test_readiness_probe() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/health/readiness")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ready");
}

#[tokio::test]
async fn test_metrics_unavailable_when_disabled() {
    let response = test_app()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "UNAVAILABLE");
}

// -- Caller Identity ----------------------------------------------------------

#[tokio::test]
async fn test_missing_identity_is_401() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri(format!("/v1/verticals/{}", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_untrusted_headers_are_401() {
    let app = cplane_api::app(AppState::in_memory(), IdentityConfig::default());
    let response = send(
        &app,
        &Caller::admin(),
        "GET",
        &format!("/v1/verticals/{}", Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_viewer_cannot_create_vertical() {
    let app = test_app();
    let viewer = Caller::admin().with_role("viewer");
    let body = expect(
        &app,
        &viewer,
        "POST",
        "/v1/verticals",
        Some(json!({"key": "banking", "name": "Banking", "entity_type": "company"})),
        StatusCode::FORBIDDEN,
    )
    .await;
    assert_eq!(body["error"]["code"], "FORBIDDEN");
    assert_eq!(
        body["error"]["message"],
        "forbidden: role 'admin' required, caller has 'viewer'"
    );
}

#[tokio::test]
async fn test_editor_manages_bindings_but_not_policies() {
    let app = test_app();
    let admin = Caller::admin();
    let editor = admin.with_role("editor");
    let chain = banking_chain(&app, &admin).await;

    bind(&app, &editor, Uuid::new_v4(), &chain).await;
    expect(
        &app,
        &editor,
        "POST",
        &format!("/v1/personas/{}/policies", chain.persona_id),
        None,
        StatusCode::FORBIDDEN,
    )
    .await;
}

// -- Resolution ---------------------------------------------------------------

#[tokio::test]
async fn test_bound_workspace_resolves_active_policy() {
    let app = test_app();
    let admin = Caller::admin();
    let chain = banking_chain(&app, &admin).await;
    activate_policy(&app, &admin, &chain.persona_id).await;
    let workspace = Uuid::new_v4();
    bind(&app, &admin, workspace, &chain).await;

    let viewer = admin.with_role("viewer");
    let config = expect(
        &app,
        &viewer,
        "GET",
        &format!("/v1/workspaces/{workspace}/resolve"),
        None,
        StatusCode::OK,
    )
    .await;
    assert_eq!(config["vertical"]["key"], "banking");
    assert_eq!(config["sub_vertical"]["default_agent"], "eb_agent");
    assert_eq!(config["persona"]["region_code"], "UAE");
    assert_eq!(config["policy"]["policy_version"], 1);
    assert_eq!(config["policy"]["status"], "ACTIVE");
    assert_eq!(config["policy"]["allowed_tools"], json!(["crm_lookup"]));
    assert_eq!(config["resolution_method"], "workspace_binding");
    assert_eq!(config["tenant_id"], admin.tenant.to_string());
}

#[tokio::test]
async fn test_unbound_workspace_is_binding_not_found() {
    let app = test_app();
    let body = expect(
        &app,
        &Caller::admin(),
        "GET",
        &format!("/v1/workspaces/{}/resolve", Uuid::new_v4()),
        None,
        StatusCode::NOT_FOUND,
    )
    .await;
    assert_eq!(body["error"]["code"], "BINDING_NOT_FOUND");
    assert!(body["error"]["hint"].is_string());
}

#[tokio::test]
async fn test_other_tenant_cannot_resolve_workspace() {
    let app = test_app();
    let admin = Caller::admin();
    let chain = banking_chain(&app, &admin).await;
    activate_policy(&app, &admin, &chain.persona_id).await;
    let workspace = Uuid::new_v4();
    bind(&app, &admin, workspace, &chain).await;

    let outsider = Caller::admin();
    let body = expect(
        &app,
        &outsider,
        "GET",
        &format!("/v1/workspaces/{workspace}/resolve"),
        None,
        StatusCode::NOT_FOUND,
    )
    .await;
    assert_eq!(body["error"]["code"], "BINDING_NOT_FOUND");
    expect(
        &app,
        &outsider,
        "GET",
        &format!("/v1/workspaces/{workspace}/binding"),
        None,
        StatusCode::NOT_FOUND,
    )
    .await;
}

#[tokio::test]
async fn test_persona_without_active_policy_is_409() {
    let app = test_app();
    let admin = Caller::admin();
    let chain = banking_chain(&app, &admin).await;
    let workspace = Uuid::new_v4();
    bind(&app, &admin, workspace, &chain).await;

    let body = expect(
        &app,
        &admin,
        "GET",
        &format!("/v1/workspaces/{workspace}/resolve"),
        None,
        StatusCode::CONFLICT,
    )
    .await;
    assert_eq!(body["error"]["code"], "POLICY_NOT_ACTIVE");
}

#[tokio::test]
async fn test_deactivating_vertical_reports_blast_radius() {
    let app = test_app();
    let admin = Caller::admin();
    let chain = banking_chain(&app, &admin).await;
    activate_policy(&app, &admin, &chain.persona_id).await;
    let workspace = Uuid::new_v4();
    bind(&app, &admin, workspace, &chain).await;

    let response = send(
        &app,
        &admin,
        "PATCH",
        &format!("/v1/verticals/{}", chain.vertical_id),
        Some(json!({"is_active": false})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-cplane-blast-radius"], "1");
    let vertical = body_json(response).await;
    assert_eq!(vertical["is_active"], false);

    let body = expect(
        &app,
        &admin,
        "GET",
        &format!("/v1/workspaces/{workspace}/resolve"),
        None,
        StatusCode::CONFLICT,
    )
    .await;
    assert_eq!(body["error"]["code"], "VERTICAL_INACTIVE");
}

// -- Catalog Validation -------------------------------------------------------

#[tokio::test]
async fn test_malformed_json_is_422_bad_request() {
    let app = test_app();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/verticals")
                .header(TENANT_HEADER, Uuid::new_v4().to_string())
                .header(ACTOR_HEADER, "admin@acme")
                .header(ROLE_HEADER, "admin")
                .header("content-type", "application/json")
                .body(Body::from("{\"key\": "))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_malformed_path_id_is_bad_request() {
    let body = expect(
        &test_app(),
        &Caller::admin(),
        "GET",
        "/v1/verticals/not-a-uuid",
        None,
        StatusCode::UNPROCESSABLE_ENTITY,
    )
    .await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_duplicate_vertical_key_is_409() {
    let app = test_app();
    let admin = Caller::admin();
    banking_chain(&app, &admin).await;
    let body = expect(
        &app,
        &admin,
        "POST",
        "/v1/verticals",
        Some(json!({"key": "banking", "name": "Banking again", "entity_type": "deal"})),
        StatusCode::CONFLICT,
    )
    .await;
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_changing_vertical_key_is_immutable_field() {
    let app = test_app();
    let admin = Caller::admin();
    let chain = banking_chain(&app, &admin).await;
    let body = expect(
        &app,
        &admin,
        "PATCH",
        &format!("/v1/verticals/{}", chain.vertical_id),
        Some(json!({"key": "retail_banking"})),
        StatusCode::UNPROCESSABLE_ENTITY,
    )
    .await;
    assert_eq!(body["error"]["code"], "IMMUTABLE_FIELD");
}

#[tokio::test]
async fn test_local_persona_with_regional_code_is_scope_mismatch() {
    let app = test_app();
    let admin = Caller::admin();
    let chain = banking_chain(&app, &admin).await;
    let body = expect(
        &app,
        &admin,
        "POST",
        &format!("/v1/sub-verticals/{}/personas", chain.sub_vertical_id),
        Some(json!({
            "key": "emea-coverage",
            "name": "EMEA Coverage",
            "scope": "LOCAL",
            "region_code": "EMEA"
        })),
        StatusCode::UNPROCESSABLE_ENTITY,
    )
    .await;
    assert_eq!(body["error"]["code"], "REGION_SCOPE_MISMATCH");
}

#[tokio::test]
async fn test_unknown_parent_vertical_is_404() {
    let body = expect(
        &test_app(),
        &Caller::admin(),
        "POST",
        &format!("/v1/verticals/{}/sub-verticals", Uuid::new_v4()),
        Some(json!({
            "key": "employee_banking",
            "name": "Employee Banking",
            "default_agent": "eb_agent",
            "primary_entity_type": "company"
        })),
        StatusCode::NOT_FOUND,
    )
    .await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

// -- Policy Lifecycle ---------------------------------------------------------

#[tokio::test]
async fn test_staging_empty_policy_is_emp_001() {
    let app = test_app();
    let admin = Caller::admin();
    let chain = banking_chain(&app, &admin).await;
    let draft = expect(
        &app,
        &admin,
        "POST",
        &format!("/v1/personas/{}/policies", chain.persona_id),
        None,
        StatusCode::CREATED,
    )
    .await;
    assert_eq!(draft["status"], "DRAFT");
    assert_eq!(draft["policy_version"], 1);

    let body = expect(
        &app,
        &admin,
        "POST",
        &format!("/v1/policies/{}/stage", draft["id"].as_str().unwrap()),
        None,
        StatusCode::UNPROCESSABLE_ENTITY,
    )
    .await;
    assert_eq!(body["error"]["code"], "EMP-001");
}

#[tokio::test]
async fn test_activating_a_draft_is_invalid_transition() {
    let app = test_app();
    let admin = Caller::admin();
    let chain = banking_chain(&app, &admin).await;
    let draft = expect(
        &app,
        &admin,
        "POST",
        &format!("/v1/personas/{}/policies", chain.persona_id),
        None,
        StatusCode::CREATED,
    )
    .await;
    let body = expect(
        &app,
        &admin,
        "POST",
        &format!("/v1/policies/{}/activate", draft["id"].as_str().unwrap()),
        None,
        StatusCode::CONFLICT,
    )
    .await;
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");
}

#[tokio::test]
async fn test_edit_then_activate_then_rollback() {
    let app = test_app();
    let admin = Caller::admin();
    let chain = banking_chain(&app, &admin).await;
    let v1 = activate_policy(&app, &admin, &chain.persona_id).await;

    let v2 = expect(
        &app,
        &admin,
        "PATCH",
        &format!("/v1/policies/{}", v1["id"].as_str().unwrap()),
        Some(json!({"allowed_tools": ["crm_lookup", "web_search"]})),
        StatusCode::OK,
    )
    .await;
    assert_eq!(v2["policy_version"], 2);
    assert_eq!(v2["status"], "DRAFT");
    assert_eq!(v2["allowed_intents"], json!(["discover", "enrich"]));

    let v2_id = v2["id"].as_str().unwrap().to_string();
    expect(&app, &admin, "POST", &format!("/v1/policies/{v2_id}/stage"), None, StatusCode::OK).await;
    let active = expect(
        &app,
        &admin,
        "POST",
        &format!("/v1/policies/{v2_id}/activate"),
        None,
        StatusCode::OK,
    )
    .await;
    assert_eq!(active["status"], "ACTIVE");

    let restored = expect(
        &app,
        &admin,
        "POST",
        &format!("/v1/personas/{}/policies/rollback", chain.persona_id),
        Some(json!({"target_version": 1})),
        StatusCode::OK,
    )
    .await;
    assert_eq!(restored["policy_version"], 1);
    assert_eq!(restored["status"], "ACTIVE");

    let versions = expect(
        &app,
        &admin,
        "GET",
        &format!("/v1/personas/{}/policies", chain.persona_id),
        None,
        StatusCode::OK,
    )
    .await;
    let statuses: Vec<&str> = versions
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, vec!["ACTIVE", "DEPRECATED"]);
}

// -- Audit --------------------------------------------------------------------

#[tokio::test]
async fn test_audit_records_mutations_and_chain_verifies() {
    let app = test_app();
    let admin = Caller::admin();
    banking_chain(&app, &admin).await;

    let page = expect(&app, &admin, "GET", "/v1/audit?limit=10", None, StatusCode::OK).await;
    assert_eq!(page["total"], 3);
    assert_eq!(page["entries"][0]["action"], "persona.create");
    assert_eq!(page["entries"][2]["action"], "vertical.create");

    let filtered = expect(
        &app,
        &admin,
        "GET",
        "/v1/audit?action=sub_vertical.create",
        None,
        StatusCode::OK,
    )
    .await;
    assert_eq!(filtered["total"], 1);
    assert_eq!(filtered["entries"][0]["target_type"], "sub_vertical");

    let report = expect(&app, &admin, "GET", "/v1/audit/verify", None, StatusCode::OK).await;
    assert_eq!(report["total"], 3);
    assert_eq!(report["broken_links"], 0);
    assert_eq!(report["chain_valid"], true);
}

#[tokio::test]
async fn test_rejected_mutations_are_audited() {
    let app = test_app();
    let admin = Caller::admin();
    let viewer = admin.with_role("viewer");
    banking_chain(&app, &admin).await;

    expect(
        &app,
        &viewer,
        "POST",
        "/v1/verticals",
        Some(json!({"key": "retail", "name": "Retail", "entity_type": "company"})),
        StatusCode::FORBIDDEN,
    )
    .await;
    expect(
        &app,
        &admin,
        "POST",
        "/v1/verticals",
        Some(json!({"key": 5})),
        StatusCode::UNPROCESSABLE_ENTITY,
    )
    .await;
    expect(
        &app,
        &admin,
        "POST",
        "/v1/verticals",
        Some(json!({
            "key": "retail",
            "name": "Retail",
            "entity_type": "company",
            "region_scope": ["MARS"]
        })),
        StatusCode::UNPROCESSABLE_ENTITY,
    )
    .await;

    let page = expect(&app, &admin, "GET", "/v1/audit?action=vertical.create", None, StatusCode::OK).await;
    assert_eq!(page["total"], 4);
    let entries = page["entries"].as_array().unwrap();
    assert_eq!(entries[0]["error_code"], "INVALID_REGION_CODE");
    assert_eq!(entries[1]["error_code"], "BAD_REQUEST");
    assert_eq!(entries[1]["actor"], "admin@acme");
    assert!(entries[1]["request"].is_null());
    assert_eq!(entries[2]["error_code"], "FORBIDDEN");
    assert_eq!(entries[2]["actor"], "viewer@acme");
    assert_eq!(entries[2]["request"]["key"], "retail");
    for entry in &entries[..3] {
        assert_eq!(entry["success"], false);
    }

    let report = expect(&app, &admin, "GET", "/v1/audit/verify", None, StatusCode::OK).await;
    assert_eq!(report["total"], 6);
    assert_eq!(report["chain_valid"], true);
}

#[tokio::test]
async fn test_rejected_policy_transition_is_audited_with_target() {
    let app = test_app();
    let admin = Caller::admin();
    let editor = admin.with_role("editor");
    let chain = banking_chain(&app, &admin).await;
    let draft = expect(
        &app,
        &admin,
        "POST",
        &format!("/v1/personas/{}/policies", chain.persona_id),
        None,
        StatusCode::CREATED,
    )
    .await;
    let policy_id = draft["id"].as_str().unwrap();

    expect(
        &app,
        &editor,
        "POST",
        &format!("/v1/policies/{policy_id}/stage"),
        None,
        StatusCode::FORBIDDEN,
    )
    .await;
    expect(
        &app,
        &admin,
        "POST",
        "/v1/policies/not-a-uuid/activate",
        None,
        StatusCode::UNPROCESSABLE_ENTITY,
    )
    .await;

    let staged = expect(&app, &admin, "GET", "/v1/audit?action=policy.stage", None, StatusCode::OK).await;
    assert_eq!(staged["total"], 1);
    assert_eq!(staged["entries"][0]["target_id"], policy_id);
    assert_eq!(staged["entries"][0]["target_type"], "policy");
    assert_eq!(staged["entries"][0]["error_code"], "FORBIDDEN");

    let activated =
        expect(&app, &admin, "GET", "/v1/audit?action=policy.activate", None, StatusCode::OK).await;
    assert_eq!(activated["total"], 1);
    assert_eq!(activated["entries"][0]["error_code"], "BAD_REQUEST");
    assert!(activated["entries"][0]["target_id"].is_null());
}

#[tokio::test]
async fn test_audit_is_scoped_to_caller_tenant() {
    let app = test_app();
    let owner = Caller::admin();
    let chain = banking_chain(&app, &owner).await;
    let workspace = Uuid::new_v4();
    bind(&app, &owner.with_role("editor"), workspace, &chain).await;

    let outsider = Caller::admin();
    let page = expect(
        &app,
        &outsider,
        "GET",
        "/v1/audit?target_type=workspace_binding",
        None,
        StatusCode::OK,
    )
    .await;
    assert_eq!(page["total"], 0);
    assert!(page["entries"].as_array().unwrap().is_empty());
    assert!(page["distinct_actions"].as_array().unwrap().is_empty());

    // Naming the other tenant explicitly does not widen the scope.
    let page = expect(
        &app,
        &outsider,
        "GET",
        &format!("/v1/audit?tenant_id={}", owner.tenant),
        None,
        StatusCode::OK,
    )
    .await;
    assert_eq!(page["total"], 0);

    let page = expect(
        &app,
        &owner,
        "GET",
        "/v1/audit?target_type=workspace_binding",
        None,
        StatusCode::OK,
    )
    .await;
    assert_eq!(page["total"], 1);
    assert_eq!(page["entries"][0]["action"], "binding.create");
    assert_eq!(page["entries"][0]["tenant_id"], owner.tenant.to_string());
    assert_eq!(page["entries"][0]["request"]["workspace_id"], workspace.to_string());
}

#[tokio::test]
async fn test_audit_requires_admin() {
    let app = test_app();
    let editor = Caller::admin().with_role("editor");
    expect(&app, &editor, "GET", "/v1/audit", None, StatusCode::FORBIDDEN).await;
}

#[tokio::test]
async fn test_bad_audit_filter_is_bad_request() {
    let body = expect(
        &test_app(),
        &Caller::admin(),
        "GET",
        "/v1/audit?action=vertical.explode",
        None,
        StatusCode::UNPROCESSABLE_ENTITY,
    )
    .await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

// -- OpenAPI ------------------------------------------------------------------

#[tokio::test]
async fn test_openapi_spec_lists_routes() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let spec = body_json(response).await;
    let paths = spec["paths"].as_object().unwrap();
    for path in [
        "/v1/verticals",
        "/v1/policies/{id}/stage",
        "/v1/workspaces/{workspace_id}/resolve",
        "/v1/audit/verify",
    ] {
        assert!(paths.contains_key(path), "missing {path}");
    }
}

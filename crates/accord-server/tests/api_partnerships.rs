use accord_db::{create_pool, DbPool, DbRuntimeSettings};
use accord_federation::gate::admin;
use accord_server::{app, config::Config, AppState};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tower::ServiceExt;

fn setup() -> (NamedTempFile, DbPool, Router) {
    let temp_file = NamedTempFile::new().expect("temp db file");
    let db_path = temp_file.path().to_str().expect("utf8 path").to_string();
    let pool = create_pool(&db_path, DbRuntimeSettings::default()).expect("pool");
    let conn = pool.get().expect("connection");
    accord_db::run_migrations(&conn).expect("migrations");
    conn.execute_batch(
        "INSERT INTO tenants (id, name, slug) VALUES
             (5, 'Riverside Timebank', 'riverside'),
             (9, 'Hilltop Exchange', 'hilltop');
         INSERT INTO users (id, tenant_id, first_name, last_name, email, role) VALUES
             (42, 5, 'Dana', 'Reyes', 'dana@riverside.test', 'admin'),
             (77, 9, 'Sam', 'Okafor', 'sam@hilltop.test', 'coordinator');",
    )
    .expect("seed");
    admin::set_global(&conn, true, true).expect("enable federation");
    admin::opt_in(&conn, 5).expect("opt in 5");
    admin::opt_in(&conn, 9).expect("opt in 9");
    drop(conn);

    let state = AppState::new(pool.clone(), &Config::default()).expect("state");
    (temp_file, pool, app(state))
}

fn admin_request(method: &str, uri: &str, actor: (i64, i64, &str), body: Option<Value>) -> Request<Body> {
    let (tenant, user, roles) = actor;
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("X-Accord-Tenant", tenant.to_string())
        .header("X-Accord-User", user.to_string())
        .header("X-Accord-Roles", roles)
        .header("User-Agent", "accord-tests");
    match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

const RIVERSIDE: (i64, i64, &str) = (5, 42, "admin");
const HILLTOP: (i64, i64, &str) = (9, 77, "coordinator");

#[tokio::test]
async fn health_reports_status_and_incidents() {
    let (_db, _pool, app) = setup();
    let (status, json) = send(
        &app,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["audit_incidents"].is_u64());
}

#[tokio::test]
async fn admin_api_requires_actor_headers() {
    let (_db, _pool, app) = setup();
    let (status, json) = send(
        &app,
        Request::builder()
            .uri("/api/admin/federation/partnerships")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn counter_proposal_flow_over_http() {
    let (_db, pool, app) = setup();

    // 1. Riverside requests a Social partnership.
    let (status, json) = send(
        &app,
        admin_request(
            "POST",
            "/api/admin/federation/partnerships",
            RIVERSIDE,
            Some(json!({ "target_tenant_id": 9, "federation_level": 2, "message": "hello" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["status"], "pending");
    let id = json["data"]["id"].as_i64().unwrap();

    // 2. Hilltop sees it as incoming and counters with Discovery.
    let (_, incoming) = send(
        &app,
        admin_request("GET", "/api/admin/federation/partnerships/incoming", HILLTOP, None),
    )
    .await;
    assert_eq!(incoming["data"].as_array().map(Vec::len), Some(1));

    let (status, json) = send(
        &app,
        admin_request(
            "POST",
            &format!("/api/admin/federation/partnerships/{id}/counter-propose"),
            HILLTOP,
            Some(json!({ "federation_level": 1, "permissions": { "messaging": true } })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["data"]["counter_proposal"]["level"], 1);

    // 3. Riverside accepts.
    let (status, json) = send(
        &app,
        admin_request(
            "POST",
            &format!("/api/admin/federation/partnerships/{id}/accept-counter"),
            RIVERSIDE,
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["data"]["status"], "active");
    assert_eq!(json["data"]["federation_level"], 1);
    assert_eq!(json["data"]["permissions"]["messaging"], true);
    assert!(json["data"]["counter_proposal"].is_null());

    // 4. Both sides count one active partnership.
    let (_, stats) = send(
        &app,
        admin_request("GET", "/api/admin/federation/partnerships/stats", HILLTOP, None),
    )
    .await;
    assert_eq!(stats["data"]["active"], 1);

    // 5. The audit rows carry the request metadata.
    let conn = pool.get().unwrap();
    let user_agents: Vec<Option<String>> = conn
        .prepare("SELECT user_agent FROM federation_audit_log WHERE category = 'partnership'")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(user_agents.len(), 3);
    assert!(user_agents.iter().all(|ua| ua.as_deref() == Some("accord-tests")));
}

#[tokio::test]
async fn errors_map_to_http_statuses() {
    let (_db, _pool, app) = setup();

    // Self-request is a validation error.
    let (status, json) = send(
        &app,
        admin_request(
            "POST",
            "/api/admin/federation/partnerships",
            RIVERSIDE,
            Some(json!({ "target_tenant_id": 5, "federation_level": 1 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);

    let (_, json) = send(
        &app,
        admin_request(
            "POST",
            "/api/admin/federation/partnerships",
            RIVERSIDE,
            Some(json!({ "target_tenant_id": 9, "federation_level": 3 })),
        ),
    )
    .await;
    let id = json["data"]["id"].as_i64().unwrap();

    // A member of the receiving tenant cannot approve.
    let (status, _) = send(
        &app,
        admin_request(
            "POST",
            &format!("/api/admin/federation/partnerships/{id}/approve"),
            (9, 78, "member"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // A third tenant sees nothing.
    let (status, json) = send(
        &app,
        admin_request(
            "GET",
            &format!("/api/admin/federation/partnerships/{id}"),
            (3, 11, "admin"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "partnership not found");

    // Approve once, then again.
    let approve = || {
        admin_request(
            "POST",
            &format!("/api/admin/federation/partnerships/{id}/approve"),
            HILLTOP,
            Some(json!({ "permissions": { "groups": true } })),
        )
    };
    let (status, json) = send(&app, approve()).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["data"]["permissions"]["groups"], true);
    let (status, _) = send(&app, approve()).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Terminate with a reason.
    let (status, json) = send(
        &app,
        admin_request(
            "POST",
            &format!("/api/admin/federation/partnerships/{id}/terminate"),
            RIVERSIDE,
            Some(json!({ "reason": "restructuring" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["termination_reason"], "restructuring");
}

#[tokio::test]
async fn lockdown_forbids_mutations() {
    let (_db, pool, app) = setup();
    admin::set_lockdown(&pool.get().unwrap(), true, Some("incident review")).unwrap();

    let (status, _) = send(
        &app,
        admin_request(
            "POST",
            "/api/admin/federation/partnerships",
            RIVERSIDE,
            Some(json!({ "target_tenant_id": 9, "federation_level": 1 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn malformed_bodies_get_the_error_envelope() {
    let (_db, _pool, app) = setup();

    // 1. Broken JSON.
    let req = Request::builder()
        .method("POST")
        .uri("/api/admin/federation/partnerships")
        .header("X-Accord-Tenant", "5")
        .header("X-Accord-User", "42")
        .header("X-Accord-Roles", "admin")
        .header("Content-Type", "application/json")
        .body(Body::from("{\"target_tenant_id\": 9,"))
        .unwrap();
    let (status, json) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert!(!json["error"].as_str().unwrap().is_empty());

    // 2. Well-formed JSON of the wrong shape.
    let (status, json) = send(
        &app,
        admin_request(
            "POST",
            "/api/admin/federation/partnerships",
            RIVERSIDE,
            Some(json!({ "target_tenant_id": "nine" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);

    // 3. No content type at all.
    let req = Request::builder()
        .method("POST")
        .uri("/api/admin/federation/api-keys")
        .header("X-Accord-Tenant", "5")
        .header("X-Accord-User", "42")
        .header("X-Accord-Roles", "admin")
        .body(Body::from("{}"))
        .unwrap();
    let (status, json) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
}

use accord_db::{create_pool, DbPool, DbRuntimeSettings};
use accord_federation::gate::admin;
use accord_server::{app, config::Config, AppState};
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
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
             (9, 'Hilltop Exchange', 'hilltop'),
             (12, 'Lakeside Circle', 'lakeside');",
    )
    .expect("seed");
    admin::set_global(&conn, true, false).expect("enable federation");
    for tenant in [5, 9, 12] {
        admin::opt_in(&conn, tenant).expect("opt in");
    }
    drop(conn);

    let state = AppState::new(pool.clone(), &Config::default()).expect("state");
    (temp_file, pool, app(state))
}

fn request(method: &str, uri: &str, tenant: i64, roles: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("X-Accord-Tenant", tenant.to_string())
        .header("X-Accord-User", "42")
        .header("X-Accord-Roles", roles);
    match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send_raw(app: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body.to_vec())
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let (status, _, body) = send_raw(app, req).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn seed_partnerships(app: &Router) {
    for (target, level) in [(9, 2), (12, 1)] {
        let (status, json) = send(
            app,
            request(
                "POST",
                "/api/admin/federation/partnerships",
                5,
                "admin",
                Some(json!({ "target_tenant_id": target, "federation_level": level })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{json}");
    }
}

#[tokio::test]
async fn audit_reads_are_scoped_and_admin_only() {
    let (_db, _pool, app) = setup();
    seed_partnerships(&app).await;

    // 1. Tenant 9 only sees the entry it is party to, whatever it asks for.
    let (status, json) = send(
        &app,
        request("GET", "/api/admin/federation/audit?tenant_id=5", 9, "coordinator", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["total"], 1);
    assert_eq!(json["data"]["entries"][0]["action_type"], "partnership_requested");

    // 2. Category filter and paging on the requesting side.
    let (_, json) = send(
        &app,
        request(
            "GET",
            "/api/admin/federation/audit?category=partnership&limit=1",
            5,
            "admin",
            None,
        ),
    )
    .await;
    assert_eq!(json["data"]["total"], 2);
    assert_eq!(json["data"]["entries"].as_array().map(Vec::len), Some(1));
    assert_eq!(json["data"]["limit"], 1);

    // 3. Members cannot read the trail.
    let (status, _) = send(
        &app,
        request("GET", "/api/admin/federation/audit", 5, "member", None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // 4. Partner breakdown names both counterparts.
    let (status, json) = send(
        &app,
        request("GET", "/api/admin/federation/audit/partners", 5, "admin", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let partners = json["data"].as_array().unwrap();
    assert_eq!(partners.len(), 2);
}

#[tokio::test]
async fn partnership_export_downloads_csv_and_is_audited() {
    let (_db, pool, app) = setup();
    seed_partnerships(&app).await;

    let (status, headers, body) = send_raw(
        &app,
        request("GET", "/api/admin/federation/export/partnerships", 5, "admin", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/csv; charset=utf-8");
    let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.contains("federation_partnerships_"));

    let text = String::from_utf8(body).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("Partnership ID,Initiator Tenant,Partner Tenant"));
    assert!(lines
        .iter()
        .skip(1)
        .any(|l| l.contains("Riverside Timebank,Hilltop Exchange,pending,2 (Social)")));

    let (kind, count): (String, i64) = pool
        .get()
        .unwrap()
        .query_row(
            "SELECT json_extract(data, '$.type'), json_extract(data, '$.count')
             FROM federation_audit_log WHERE action_type = 'data_exported'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!((kind.as_str(), count), ("partnerships", 2));

    let (status, _) = send(
        &app,
        request("GET", "/api/admin/federation/export/members", 5, "admin", None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn purge_requires_super_admin() {
    let (_db, _pool, app) = setup();
    seed_partnerships(&app).await;

    let (status, _) = send(
        &app,
        request("POST", "/api/admin/federation/audit/purge", 5, "admin", None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = send(
        &app,
        request("POST", "/api/admin/federation/audit/purge", 5, "super_admin", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["data"]["deleted"], 0);
    assert_eq!(json["data"]["retention_days"], 365);
}

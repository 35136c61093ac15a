//! Unit tests for the federation audit trail.

use accord_types::ActorContext;
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde_json::json;

use crate::action::{action_label, category_for_action, AuditAction, AuditCategory, AuditLevel};
use crate::aggregate::{feature_usage, partner_activity, stats, timeline};
use crate::entry::{AuditFilter, NewAuditEntry, MAX_USER_AGENT_LEN};
use crate::export::{write_audit_csv, yes_no, CsvExport, AUDIT_EXPORT_HEADERS};
use crate::incident::{audit_incident_count, record_or_report};
use crate::store::{count, purge, query, record};

/// Creates an in-memory SQLite database with migrations applied.
fn test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("should open in-memory db");
    accord_db::run_migrations(&conn).expect("migrations should succeed");
    conn
}

fn seed_tenant(conn: &Connection, id: i64, name: &str) {
    conn.execute(
        "INSERT INTO tenants (id, name, slug) VALUES (?1, ?2, ?3)",
        params![id, name, format!("t{id}")],
    )
    .expect("should insert tenant");
}

fn seed_user(conn: &Connection, id: i64, tenant_id: i64, first: &str, last: &str, email: &str) {
    conn.execute(
        "INSERT INTO users (id, tenant_id, first_name, last_name, email, role)
         VALUES (?1, ?2, ?3, ?4, ?5, 'admin')",
        params![id, tenant_id, first, last, email],
    )
    .expect("should insert user");
}

/// Inserts a row with an explicit timestamp, bypassing `record`.
fn insert_at(
    conn: &Connection,
    action: &str,
    level: &str,
    source: i64,
    target: Option<i64>,
    created_at: &str,
) {
    conn.execute(
        "INSERT INTO federation_audit_log
            (action_type, category, level, source_tenant_id, target_tenant_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            action,
            category_for_action(action).as_str(),
            level,
            source,
            target,
            created_at
        ],
    )
    .expect("should insert raw audit row");
}

fn connection_test(partner_id: i64, success: bool) -> NewAuditEntry {
    NewAuditEntry::new(AuditAction::ExternalPartnerConnectionTested, 1)
        .metadata(json!({ "external_partner_id": partner_id, "success": success }))
}

// ── action table ─────────────────────────────────────────────────────

#[test]
fn every_action_maps_to_the_category_its_prefix_names() {
    for action in AuditAction::ALL {
        let name = action.as_str();
        let expected = if name.starts_with("partnership_") {
            AuditCategory::Partnership
        } else if name.starts_with("api_key_") {
            AuditCategory::Credential
        } else if name.starts_with("external_partner_") {
            AuditCategory::ExternalPartner
        } else if name.starts_with("cross_tenant_message") {
            AuditCategory::Messaging
        } else if name.starts_with("cross_tenant_transaction") {
            AuditCategory::Transaction
        } else if name.contains("profile") {
            AuditCategory::Profile
        } else if name.starts_with("listing_") {
            AuditCategory::Listing
        } else {
            AuditCategory::Other
        };
        assert_eq!(action.category(), expected, "{name}");
        assert_eq!(AuditAction::parse(name), Some(action));
    }
}

#[test]
fn unknown_actions_fall_back_to_other() {
    assert_eq!(category_for_action("tenant_renamed"), AuditCategory::Other);
    assert_eq!(action_label("tenant_renamed"), "Tenant Renamed");
    assert_eq!(action_label("api_key_revoked"), "API Key Revoked");
}

#[test]
fn category_and_level_parse_round_trip() {
    for c in AuditCategory::ALL {
        assert_eq!(c.as_str().parse::<AuditCategory>(), Ok(c));
    }
    for l in AuditLevel::ALL {
        assert_eq!(l.as_str().parse::<AuditLevel>(), Ok(l));
    }
    assert!("verbose".parse::<AuditLevel>().is_err());
}

// ── record ───────────────────────────────────────────────────────────

#[test]
fn record_snapshots_actor_and_request_context() {
    let conn = test_db();
    seed_tenant(&conn, 5, "Riverside");
    seed_user(&conn, 42, 5, "Ada", "Moss", "ada@example.org");

    let long_agent = "x".repeat(MAX_USER_AGENT_LEN + 50);
    let actor = ActorContext::admin(5, 42).with_request(Some("10.1.2.3".into()), Some(long_agent));
    let entry = record(
        &conn,
        &NewAuditEntry::new(AuditAction::PartnershipRequested, 5)
            .target(9)
            .actor(&actor)
            .metadata(json!({ "partnership_id": 1 })),
    )
    .expect("record should succeed");

    assert!(entry.id > 0);
    assert_eq!(entry.category, AuditCategory::Partnership);
    assert_eq!(entry.level, AuditLevel::Info);
    assert_eq!(entry.actor_name.as_deref(), Some("Ada Moss"));
    assert_eq!(entry.actor_email.as_deref(), Some("ada@example.org"));
    assert_eq!(entry.ip_address.as_deref(), Some("10.1.2.3"));
    assert_eq!(entry.user_agent.as_ref().map(|ua| ua.len()), Some(MAX_USER_AGENT_LEN));

    // Later account edits do not rewrite history.
    conn.execute("UPDATE users SET first_name = 'Renamed' WHERE id = 42", [])
        .expect("rename user");
    let stored = crate::store::get(&conn, entry.id)
        .expect("get should succeed")
        .expect("entry should exist");
    assert_eq!(stored.actor_name.as_deref(), Some("Ada Moss"));
    assert_eq!(stored.metadata, json!({ "partnership_id": 1 }));
}

#[test]
fn record_without_known_user_leaves_snapshot_empty() {
    let conn = test_db();
    let actor = ActorContext::admin(5, 999);
    let entry = record(
        &conn,
        &NewAuditEntry::new(AuditAction::ApiKeyCreated, 5).actor(&actor),
    )
    .expect("record should succeed");
    assert_eq!(entry.actor_user_id, Some(999));
    assert_eq!(entry.actor_name, None);
    assert_eq!(entry.actor_email, None);
}

#[test]
fn security_sensitive_actions_escalate() {
    let conn = test_db();
    let revoked = record(&conn, &NewAuditEntry::new(AuditAction::ApiKeyRevoked, 1))
        .expect("record should succeed");
    assert_eq!(revoked.level, AuditLevel::Warning);

    let explicit = record(
        &conn,
        &NewAuditEntry::new(AuditAction::ApiKeyCreated, 1).level(AuditLevel::Critical),
    )
    .expect("record should succeed");
    assert_eq!(explicit.level, AuditLevel::Critical);
}

#[test]
fn repeated_failed_connection_tests_escalate_to_error() {
    let conn = test_db();

    let first = record(&conn, &connection_test(7, false)).expect("record");
    let second = record(&conn, &connection_test(7, false)).expect("record");
    let third = record(&conn, &connection_test(7, false)).expect("record");
    assert_eq!(first.level, AuditLevel::Warning);
    assert_eq!(second.level, AuditLevel::Warning);
    assert_eq!(third.level, AuditLevel::Error);

    // Another partner's history does not count.
    let other = record(&conn, &connection_test(8, false)).expect("record");
    assert_eq!(other.level, AuditLevel::Warning);

    // A success resets the streak.
    let ok = record(&conn, &connection_test(7, true)).expect("record");
    assert_eq!(ok.level, AuditLevel::Info);
    let after = record(&conn, &connection_test(7, false)).expect("record");
    assert_eq!(after.level, AuditLevel::Warning);
}

#[test]
fn record_or_report_counts_incidents_instead_of_failing() {
    // No migrations: the audit table does not exist.
    let conn = Connection::open_in_memory().expect("should open in-memory db");
    let before = audit_incident_count();
    let stored = record_or_report(&conn, &NewAuditEntry::new(AuditAction::ApiKeyCreated, 1));
    assert!(stored.is_none());
    assert!(audit_incident_count() > before);
}

// ── query ────────────────────────────────────────────────────────────

#[test]
fn query_orders_newest_first_with_id_tiebreak() {
    let conn = test_db();
    insert_at(&conn, "partnership_requested", "info", 1, Some(2), "2026-01-01 10:00:00");
    insert_at(&conn, "partnership_approved", "info", 2, Some(1), "2026-01-02 10:00:00");
    insert_at(&conn, "partnership_suspended", "warning", 1, Some(2), "2026-01-02 10:00:00");

    let entries = query(&conn, &AuditFilter::default()).expect("query should succeed");
    let actions: Vec<&str> = entries.iter().map(|e| e.action_type.as_str()).collect();
    assert_eq!(
        actions,
        vec!["partnership_suspended", "partnership_approved", "partnership_requested"]
    );
}

#[test]
fn tenant_filter_matches_either_side() {
    let conn = test_db();
    insert_at(&conn, "partnership_requested", "info", 1, Some(2), "2026-01-01 10:00:00");
    insert_at(&conn, "partnership_approved", "info", 2, Some(1), "2026-01-01 11:00:00");
    insert_at(&conn, "partnership_requested", "info", 3, Some(4), "2026-01-01 12:00:00");

    let for_one = query(&conn, &AuditFilter::for_tenant(1)).expect("query should succeed");
    assert_eq!(for_one.len(), 2);
    assert_eq!(count(&conn, &AuditFilter::for_tenant(4)).expect("count"), 1);
}

#[test]
fn filters_combine() {
    let conn = test_db();
    insert_at(&conn, "api_key_created", "info", 1, None, "2026-03-01 09:00:00");
    insert_at(&conn, "api_key_revoked", "warning", 1, None, "2026-03-02 09:00:00");
    insert_at(&conn, "partnership_requested", "info", 1, Some(2), "2026-03-03 09:00:00");
    insert_at(&conn, "api_key_created", "info", 1, None, "2026-03-05 09:00:00");

    let credential = AuditFilter {
        category: Some(AuditCategory::Credential),
        ..AuditFilter::for_tenant(1)
    };
    assert_eq!(count(&conn, &credential).expect("count"), 3);

    let ranged = AuditFilter {
        date_from: NaiveDate::from_ymd_opt(2026, 3, 2),
        date_to: NaiveDate::from_ymd_opt(2026, 3, 3),
        ..Default::default()
    };
    assert_eq!(count(&conn, &ranged).expect("count"), 2);

    let warnings = AuditFilter {
        level: Some(AuditLevel::Warning),
        ..Default::default()
    };
    let found = query(&conn, &warnings).expect("query");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].action_type, "api_key_revoked");

    let searched = AuditFilter {
        search: Some("revoked".into()),
        ..Default::default()
    };
    assert_eq!(count(&conn, &searched).expect("count"), 1);

    // LIKE wildcards in the search term are literal.
    let wildcard = AuditFilter {
        search: Some("%".into()),
        ..Default::default()
    };
    assert_eq!(count(&conn, &wildcard).expect("count"), 0);
}

#[test]
fn query_limit_is_clamped() {
    let filter = AuditFilter {
        limit: Some(50_000),
        ..Default::default()
    };
    assert_eq!(filter.effective_limit(), 1000);
    assert_eq!(AuditFilter::default().effective_limit(), 100);
    let zero = AuditFilter {
        limit: Some(0),
        ..Default::default()
    };
    assert_eq!(zero.effective_limit(), 1);
}

#[test]
fn query_pages_with_offset() {
    let conn = test_db();
    for day in 1..=5 {
        insert_at(
            &conn,
            "cross_tenant_message",
            "info",
            1,
            Some(2),
            &format!("2026-02-0{day} 08:00:00"),
        );
    }
    let page = query(
        &conn,
        &AuditFilter {
            limit: Some(2),
            offset: Some(2),
            ..Default::default()
        },
    )
    .expect("query");
    let days: Vec<&str> = page.iter().map(|e| &e.created_at[..10]).collect();
    assert_eq!(days, vec!["2026-02-03", "2026-02-02"]);
}

// ── aggregates ───────────────────────────────────────────────────────

#[test]
fn timeline_groups_by_day_and_category() {
    let conn = test_db();
    insert_at(&conn, "partnership_requested", "info", 1, Some(2), "2026-04-01 08:00:00");
    insert_at(&conn, "partnership_approved", "info", 2, Some(1), "2026-04-01 09:00:00");
    insert_at(&conn, "cross_tenant_message", "info", 1, Some(2), "2026-04-01 10:00:00");
    insert_at(&conn, "cross_tenant_message", "info", 1, Some(2), "2026-04-02 10:00:00");

    let points = timeline(&conn, &AuditFilter::for_tenant(1)).expect("timeline");
    let flat: Vec<(&str, AuditCategory, i64)> = points
        .iter()
        .map(|p| (p.day.as_str(), p.category, p.count))
        .collect();
    assert_eq!(
        flat,
        vec![
            ("2026-04-01", AuditCategory::Messaging, 1),
            ("2026-04-01", AuditCategory::Partnership, 2),
            ("2026-04-02", AuditCategory::Messaging, 1),
        ]
    );
}

#[test]
fn partner_activity_breaks_down_by_partner() {
    let conn = test_db();
    seed_tenant(&conn, 1, "Home");
    seed_tenant(&conn, 2, "Harbour");
    seed_tenant(&conn, 3, "Hill");
    insert_at(&conn, "partnership_requested", "info", 1, Some(2), "2026-05-01 08:00:00");
    insert_at(&conn, "cross_tenant_message", "info", 2, Some(1), "2026-05-03 08:00:00");
    insert_at(&conn, "cross_tenant_message", "info", 1, Some(2), "2026-05-02 08:00:00");
    insert_at(&conn, "partnership_requested", "info", 3, Some(1), "2026-05-04 08:00:00");
    insert_at(&conn, "api_key_created", "info", 1, None, "2026-05-05 08:00:00");

    let activity = partner_activity(&conn, &AuditFilter::for_tenant(1)).expect("activity");
    assert_eq!(activity.len(), 2);

    let harbour = &activity[0];
    assert_eq!(harbour.partner_tenant_id, 2);
    assert_eq!(harbour.partner_name.as_deref(), Some("Harbour"));
    assert_eq!(harbour.total, 3);
    assert_eq!(harbour.by_category.get(&AuditCategory::Messaging), Some(&2));
    assert_eq!(harbour.by_category.get(&AuditCategory::Partnership), Some(&1));
    assert_eq!(harbour.last_activity, "2026-05-03 08:00:00");

    assert_eq!(activity[1].partner_tenant_id, 3);
    assert!(partner_activity(&conn, &AuditFilter::default()).is_err());
}

#[test]
fn feature_usage_counts_member_facing_actions_only() {
    let conn = test_db();
    insert_at(&conn, "cross_tenant_message", "info", 1, Some(2), "2026-06-01 08:00:00");
    insert_at(&conn, "cross_tenant_message", "info", 1, Some(2), "2026-06-01 09:00:00");
    insert_at(&conn, "cross_tenant_transaction", "info", 1, Some(2), "2026-06-01 10:00:00");
    insert_at(&conn, "partnership_approved", "info", 1, Some(2), "2026-06-01 11:00:00");

    let usage = feature_usage(&conn, &AuditFilter::default()).expect("usage");
    assert_eq!(usage.len(), 2);
    assert_eq!(usage[0].action_type, "cross_tenant_message");
    assert_eq!(usage[0].count, 2);
    assert_eq!(usage[1].category, AuditCategory::Transaction);
}

#[test]
fn stats_summarise_levels_and_pairs() {
    let conn = test_db();
    insert_at(&conn, "partnership_requested", "info", 1, Some(2), "2026-06-01 08:00:00");
    insert_at(&conn, "partnership_requested", "info", 1, Some(2), "2026-06-02 08:00:00");
    insert_at(&conn, "api_key_revoked", "warning", 1, None, "2026-06-03 08:00:00");
    insert_at(&conn, "external_partner_connection_tested", "error", 1, None, "2026-06-04 08:00:00");

    let s = stats(&conn, &AuditFilter::default()).expect("stats");
    assert_eq!(s.total, 4);
    assert_eq!(s.by_category.get("partnership"), Some(&2));
    assert_eq!(s.by_level.get("warning"), Some(&1));
    assert_eq!(s.alerts, 1);
    assert_eq!(s.top_actions[0].action_type, "partnership_requested");
    assert_eq!(s.active_pairs.len(), 1);
    assert_eq!(s.active_pairs[0].count, 2);
}

// ── purge ────────────────────────────────────────────────────────────

#[test]
fn purge_keeps_critical_entries_twice_as_long() {
    let conn = test_db();
    let ts = |days_ago: i64| -> String {
        conn.query_row(
            "SELECT datetime('now', ?1)",
            [format!("-{days_ago} days")],
            |row| row.get(0),
        )
        .expect("timestamp")
    };
    let recent = ts(5);
    let old = ts(40);
    let ancient = ts(70);
    insert_at(&conn, "partnership_requested", "info", 1, Some(2), &recent);
    insert_at(&conn, "partnership_requested", "info", 1, Some(2), &old);
    insert_at(&conn, "api_key_revoked", "critical", 1, None, &old);
    insert_at(&conn, "api_key_revoked", "critical", 1, None, &ancient);

    let report = purge(&conn, 30, &ActorContext::admin(1, 1)).expect("purge");
    assert_eq!(report.deleted, 1);
    assert_eq!(report.deleted_critical, 1);

    let remaining = query(&conn, &AuditFilter::default()).expect("query");
    let actions: Vec<&str> = remaining.iter().map(|e| e.action_type.as_str()).collect();
    assert!(actions.contains(&"audit_log_purged"));
    assert_eq!(remaining.len(), 3, "recent, critical within 2x, purge record");

    // The window is closed again.
    assert!(conn.execute("DELETE FROM federation_audit_log", []).is_err());
    assert!(purge(&conn, 0, &ActorContext::admin(1, 1)).is_err());
}

// ── export ───────────────────────────────────────────────────────────

#[test]
fn csv_export_has_labelled_header_and_stable_columns() {
    let conn = test_db();
    seed_tenant(&conn, 1, "Home");
    seed_user(&conn, 3, 1, "Bo", "Lund", "bo@example.org");
    record(
        &conn,
        &NewAuditEntry::new(AuditAction::ApiKeyRevoked, 1)
            .actor(&ActorContext::admin(1, 3))
            .metadata(json!({ "api_key_id": 4 })),
    )
    .expect("record");

    let mut out = Vec::new();
    let rows = write_audit_csv(&conn, &AuditFilter::default(), &mut out).expect("export");
    assert_eq!(rows, 1);

    let text = String::from_utf8(out).expect("utf-8");
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some(AUDIT_EXPORT_HEADERS.join(",").as_str()));
    let row = lines.next().expect("data row");
    assert!(row.starts_with("1,API Key Revoked,credential,warning,1,,Bo Lund,bo@example.org"));
    assert!(row.contains(r#""{""api_key_id"":4}""#), "metadata is quoted: {row}");
}

#[test]
fn csv_export_renders_booleans_and_rejects_ragged_rows() {
    assert_eq!(yes_no(true), "Yes");
    assert_eq!(yes_no(false), "No");

    let mut out = Vec::new();
    let mut export = CsvExport::new(&mut out, &["Name", "Enabled"]).expect("header");
    export.write_row(["Alpha", yes_no(true)]).expect("row");
    assert!(export.write_row(["only one"]).is_err());
    assert_eq!(export.finish().expect("finish"), 1);
    assert_eq!(String::from_utf8(out).expect("utf-8"), "Name,Enabled\nAlpha,Yes\n");
}

/// Output that appends one audit entry through a second connection the
/// first time the CSV writer flushes to it.
struct AppendOnFirstFlush {
    bytes: Vec<u8>,
    writer: Option<Connection>,
}

impl std::io::Write for AppendOnFirstFlush {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(conn) = self.writer.take() {
            record(&conn, &NewAuditEntry::new(AuditAction::ApiKeyCreated, 1))
                .expect("concurrent append");
        }
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn csv_export_is_stable_while_entries_are_appended() {
    let file = tempfile::NamedTempFile::new().expect("temp db file");
    let conn = Connection::open(file.path()).expect("open db");
    accord_db::run_migrations(&conn).expect("migrations");
    seed_tenant(&conn, 1, "Home");
    // Same timestamp everywhere, so paging also leans on the id tiebreak.
    conn.execute_batch(
        "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 1500)
         INSERT INTO federation_audit_log
             (action_type, category, level, source_tenant_id, created_at)
         SELECT 'api_key_created', 'credential', 'info', 1, '2026-03-01 09:00:00' FROM n;",
    )
    .expect("seed entries");

    let mut out = AppendOnFirstFlush {
        bytes: Vec::new(),
        writer: Some(Connection::open(file.path()).expect("second connection")),
    };
    let rows = write_audit_csv(&conn, &AuditFilter::default(), &mut out).expect("export");
    assert!(out.writer.is_none(), "the append ran during the export");
    assert_eq!(rows, 1500);

    let text = String::from_utf8(out.bytes).expect("utf-8");
    let ids: Vec<i64> = text
        .lines()
        .skip(1)
        .map(|line| line.split(',').next().expect("id").parse().expect("numeric id"))
        .collect();
    assert_eq!(ids.len(), 1500);
    let distinct: std::collections::HashSet<i64> = ids.iter().copied().collect();
    assert_eq!(distinct.len(), 1500);
    assert_eq!(ids.first(), Some(&1500));
    assert_eq!(ids.last(), Some(&1));

    // The appended entry is there for the next export.
    assert_eq!(count(&conn, &AuditFilter::default()).expect("count"), 1501);
}

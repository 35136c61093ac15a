//! Dashboard views computed over the same filters as [`crate::query`].

use std::collections::BTreeMap;

use accord_types::TenantId;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::action::AuditCategory;
use crate::entry::AuditFilter;
use crate::error::AuditError;
use crate::store::build_where;

/// Entries for one category on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelinePoint {
    /// `YYYY-MM-DD`.
    pub day: String,
    pub category: AuditCategory,
    pub count: i64,
}

/// Activity between the filtered tenant and one partner tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerActivity {
    pub partner_tenant_id: TenantId,
    pub partner_name: Option<String>,
    pub total: i64,
    pub by_category: BTreeMap<AuditCategory, i64>,
    pub last_activity: String,
}

/// How often a member-facing federation feature was used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureUsage {
    pub category: AuditCategory,
    pub action_type: String,
    pub count: i64,
}

/// Entry count for an action type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCount {
    pub action_type: String,
    pub count: i64,
}

/// Entry count for a source/target tenant pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairCount {
    pub source_tenant_id: TenantId,
    pub target_tenant_id: TenantId,
    pub count: i64,
}

/// Summary counters for the audit dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStats {
    pub total: i64,
    pub by_category: BTreeMap<String, i64>,
    pub by_level: BTreeMap<String, i64>,
    /// Entries at error level or above.
    pub alerts: i64,
    pub top_actions: Vec<ActionCount>,
    pub active_pairs: Vec<PairCount>,
}

const TOP_N: i64 = 10;

/// Per-day entry counts split by category, oldest day first.
pub fn timeline(conn: &Connection, filter: &AuditFilter) -> Result<Vec<TimelinePoint>, AuditError> {
    let clause = build_where(filter);
    let sql = format!(
        "SELECT date(created_at) AS day, category, COUNT(*)
         FROM federation_audit_log
         WHERE {}
         GROUP BY day, category
         ORDER BY day ASC, category ASC",
        clause.sql
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(clause.param_refs().as_slice(), |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;

    let mut points = Vec::new();
    for row in rows {
        let (day, category, count) = row?;
        points.push(TimelinePoint {
            day,
            category: category.parse().unwrap_or(AuditCategory::Other),
            count,
        });
    }
    Ok(points)
}

/// Activity per partner tenant, busiest partner first.
///
/// Requires `filter.tenant_id`; the partner of each entry is whichever side
/// is not that tenant.
///
/// # Errors
///
/// Returns `AuditError::InvalidFilter` when no tenant is given.
pub fn partner_activity(
    conn: &Connection,
    filter: &AuditFilter,
) -> Result<Vec<PartnerActivity>, AuditError> {
    let Some(tenant_id) = filter.tenant_id else {
        return Err(AuditError::InvalidFilter(
            "partner activity needs a tenant".to_string(),
        ));
    };

    let mut clause = build_where(filter);
    let tenant_idx = clause.push(Box::new(tenant_id));
    let sql = format!(
        "SELECT partner, category, COUNT(*), MAX(created_at),
                (SELECT name FROM tenants WHERE id = partner)
         FROM (
            SELECT CASE WHEN source_tenant_id = ?{tenant_idx}
                        THEN target_tenant_id ELSE source_tenant_id END AS partner,
                   category, created_at
            FROM federation_audit_log
            WHERE {}
         )
         WHERE partner IS NOT NULL AND partner != ?{tenant_idx}
         GROUP BY partner, category",
        clause.sql
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(clause.param_refs().as_slice(), |row| {
        Ok((
            row.get::<_, TenantId>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Option<String>>(4)?,
        ))
    })?;

    let mut partners: BTreeMap<TenantId, PartnerActivity> = BTreeMap::new();
    for row in rows {
        let (partner_tenant_id, category, count, last, name) = row?;
        let activity = partners
            .entry(partner_tenant_id)
            .or_insert_with(|| PartnerActivity {
                partner_tenant_id,
                partner_name: name,
                total: 0,
                by_category: BTreeMap::new(),
                last_activity: last.clone(),
            });
        activity.total += count;
        *activity
            .by_category
            .entry(category.parse().unwrap_or(AuditCategory::Other))
            .or_insert(0) += count;
        if last > activity.last_activity {
            activity.last_activity = last;
        }
    }

    let mut out: Vec<PartnerActivity> = partners.into_values().collect();
    out.sort_by(|a, b| {
        b.total
            .cmp(&a.total)
            .then_with(|| a.partner_tenant_id.cmp(&b.partner_tenant_id))
    });
    Ok(out)
}

/// Usage counts of member-facing federation features, most used first.
pub fn feature_usage(conn: &Connection, filter: &AuditFilter) -> Result<Vec<FeatureUsage>, AuditError> {
    let mut clause = build_where(filter);
    let placeholders: Vec<String> = AuditCategory::FEATURES
        .iter()
        .map(|c| format!("?{}", clause.push(Box::new(c.as_str()))))
        .collect();
    let sql = format!(
        "SELECT category, action_type, COUNT(*) AS n
         FROM federation_audit_log
         WHERE {} AND category IN ({})
         GROUP BY category, action_type
         ORDER BY n DESC, action_type ASC",
        clause.sql,
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(clause.param_refs().as_slice(), |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;

    let mut usage = Vec::new();
    for row in rows {
        let (category, action_type, count) = row?;
        usage.push(FeatureUsage {
            category: category.parse().unwrap_or(AuditCategory::Other),
            action_type,
            count,
        });
    }
    Ok(usage)
}

/// Totals, per-category and per-level counts, top actions and busiest pairs.
pub fn stats(conn: &Connection, filter: &AuditFilter) -> Result<AuditStats, AuditError> {
    let clause = build_where(filter);
    let params = clause.param_refs();
    let mut stats = AuditStats::default();

    stats.total = conn.query_row(
        &format!("SELECT COUNT(*) FROM federation_audit_log WHERE {}", clause.sql),
        params.as_slice(),
        |row| row.get(0),
    )?;

    stats.by_category = grouped_counts(conn, "category", &clause.sql, &params)?;
    stats.by_level = grouped_counts(conn, "level", &clause.sql, &params)?;
    stats.alerts = stats.by_level.get("error").copied().unwrap_or(0)
        + stats.by_level.get("critical").copied().unwrap_or(0);

    let mut stmt = conn.prepare(&format!(
        "SELECT action_type, COUNT(*) AS n FROM federation_audit_log
         WHERE {} GROUP BY action_type ORDER BY n DESC, action_type ASC LIMIT {TOP_N}",
        clause.sql
    ))?;
    stats.top_actions = stmt
        .query_map(params.as_slice(), |row| {
            Ok(ActionCount {
                action_type: row.get(0)?,
                count: row.get(1)?,
            })
        })?
        .collect::<Result<_, _>>()?;

    let mut stmt = conn.prepare(&format!(
        "SELECT source_tenant_id, target_tenant_id, COUNT(*) AS n FROM federation_audit_log
         WHERE {} AND source_tenant_id IS NOT NULL AND target_tenant_id IS NOT NULL
         GROUP BY source_tenant_id, target_tenant_id
         ORDER BY n DESC LIMIT {TOP_N}",
        clause.sql
    ))?;
    stats.active_pairs = stmt
        .query_map(params.as_slice(), |row| {
            Ok(PairCount {
                source_tenant_id: row.get(0)?,
                target_tenant_id: row.get(1)?,
                count: row.get(2)?,
            })
        })?
        .collect::<Result<_, _>>()?;

    Ok(stats)
}

fn grouped_counts(
    conn: &Connection,
    column: &'static str,
    where_sql: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<BTreeMap<String, i64>, AuditError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {column}, COUNT(*) FROM federation_audit_log WHERE {where_sql} GROUP BY {column}"
    ))?;
    let rows = stmt.query_map(params, |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    let mut counts = BTreeMap::new();
    for row in rows {
        let (key, n) = row?;
        counts.insert(key, n);
    }
    Ok(counts)
}

use super::Storage;
use crate::error::{PortalError, Result};
use crate::ga::rows::{ChannelDaily, DateRange, GaRowCounts, KpiDaily, KpiMonthly, MetricValues, SourceDaily};
use crate::recipients::{address_key, email_key};
use crate::types::{Campaign, CampaignRecipient};
use crate::webhook::{LlmQuery, QueryKind, QueryStatus};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

const SCHEMA: &str = r#"
PRAGMA journal_mode=WAL;
CREATE TABLE IF NOT EXISTS campaigns (
    id    INTEGER PRIMARY KEY AUTOINCREMENT,
    name  TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS campaign_recipients (
    id                     INTEGER PRIMARY KEY AUTOINCREMENT,
    campaign_id            INTEGER NOT NULL REFERENCES campaigns(id),
    address_id             TEXT,
    address_line1          TEXT NOT NULL,
    city                   TEXT NOT NULL,
    state_province_region  TEXT NOT NULL,
    postal_code            TEXT NOT NULL,
    market                 TEXT NOT NULL,
    sector                 TEXT NOT NULL,
    email                  TEXT NOT NULL,
    core_segment           TEXT NOT NULL,
    sub_segment            TEXT NOT NULL,
    email_key              TEXT,
    address_key            TEXT,
    created_at             TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (campaign_id, email_key),
    UNIQUE (campaign_id, address_key)
);
CREATE TABLE IF NOT EXISTS ga_kpi_daily (
    ga_property_id                 TEXT NOT NULL,
    date                           TEXT NOT NULL,
    sessions                       REAL NOT NULL,
    engagement_rate                REAL NOT NULL,
    avg_session_duration           REAL NOT NULL,
    goal_completions               REAL NOT NULL,
    goal_conversion_rate           REAL NOT NULL,
    screen_page_views_per_session  REAL NOT NULL,
    updated_at                     TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (ga_property_id, date)
);
CREATE TABLE IF NOT EXISTS ga_kpi_monthly (
    ga_property_id                 TEXT NOT NULL,
    month                          TEXT NOT NULL,
    sessions                       REAL NOT NULL,
    engagement_rate                REAL NOT NULL,
    avg_session_duration           REAL NOT NULL,
    goal_completions               REAL NOT NULL,
    goal_conversion_rate           REAL NOT NULL,
    screen_page_views_per_session  REAL NOT NULL,
    updated_at                     TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (ga_property_id, month)
);
CREATE TABLE IF NOT EXISTS ga_channel_daily (
    ga_property_id                 TEXT NOT NULL,
    date                           TEXT NOT NULL,
    channel                        TEXT NOT NULL,
    sessions                       REAL NOT NULL,
    engagement_rate                REAL NOT NULL,
    avg_session_duration           REAL NOT NULL,
    goal_completions               REAL NOT NULL,
    goal_conversion_rate           REAL NOT NULL,
    screen_page_views_per_session  REAL NOT NULL,
    updated_at                     TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (ga_property_id, date, channel)
);
CREATE TABLE IF NOT EXISTS ga_source_daily (
    ga_property_id                 TEXT NOT NULL,
    date                           TEXT NOT NULL,
    source                         TEXT NOT NULL,
    sessions                       REAL NOT NULL,
    engagement_rate                REAL NOT NULL,
    avg_session_duration           REAL NOT NULL,
    goal_completions               REAL NOT NULL,
    goal_conversion_rate           REAL NOT NULL,
    screen_page_views_per_session  REAL NOT NULL,
    updated_at                     TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (ga_property_id, date, source)
);
CREATE TABLE IF NOT EXISTS llm_queries (
    id               TEXT PRIMARY KEY,
    kind             TEXT NOT NULL,
    ga_property_id   TEXT,
    prompt           TEXT NOT NULL,
    status           TEXT NOT NULL,
    response         TEXT,
    error            TEXT,
    line_graph_data  TEXT,
    pie_graph_data   TEXT,
    metric_headers   TEXT,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);
"#;

/// Layout of one GA metric table: the period column and optional dimension.
struct MetricTable {
    name: &'static str,
    period: &'static str,
    dimension: Option<&'static str>,
}

const KPI_DAILY: MetricTable = MetricTable { name: "ga_kpi_daily", period: "date", dimension: None };
const KPI_MONTHLY: MetricTable = MetricTable { name: "ga_kpi_monthly", period: "month", dimension: None };
const CHANNEL_DAILY: MetricTable = MetricTable { name: "ga_channel_daily", period: "date", dimension: Some("channel") };
const SOURCE_DAILY: MetricTable = MetricTable { name: "ga_source_daily", period: "date", dimension: Some("source") };

const MEASURE_COLUMNS: [&str; 6] = [
    "sessions",
    "engagement_rate",
    "avg_session_duration",
    "goal_completions",
    "goal_conversion_rate",
    "screen_page_views_per_session",
];

/// A metric row before the period is parsed back into its typed form
struct RawMetricRow {
    period: String,
    dimension: Option<String>,
    metrics: MetricValues,
}

impl MetricTable {
    fn key_columns(&self) -> Vec<&'static str> {
        let mut cols = vec!["ga_property_id", self.period];
        cols.extend(self.dimension);
        cols
    }

    fn upsert_sql(&self) -> String {
        let mut cols = self.key_columns();
        cols.extend(MEASURE_COLUMNS);
        let placeholders: Vec<String> = (1..=cols.len()).map(|i| format!("?{}", i)).collect();
        let updates: Vec<String> = MEASURE_COLUMNS
            .iter()
            .map(|c| format!("{c}=excluded.{c}"))
            .chain(std::iter::once("updated_at=datetime('now')".to_string()))
            .collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) DO UPDATE SET {}",
            self.name,
            cols.join(", "),
            placeholders.join(", "),
            self.key_columns().join(", "),
            updates.join(", ")
        )
    }

    fn select_sql(&self) -> String {
        let dimension = self.dimension.unwrap_or("NULL");
        let order = match self.dimension {
            Some(d) => format!("{} ASC, {} ASC", self.period, d),
            None => format!("{} ASC", self.period),
        };
        format!(
            "SELECT {}, {}, {} FROM {} WHERE ga_property_id = ?1 AND {} >= ?2 AND {} <= ?3 ORDER BY {}",
            self.period,
            dimension,
            MEASURE_COLUMNS.join(", "),
            self.name,
            self.period,
            self.period,
            order
        )
    }
}

fn metric_params(property: &str, period: String, dimension: Option<&str>, m: &MetricValues) -> Vec<SqlValue> {
    let mut values = vec![SqlValue::Text(property.to_string()), SqlValue::Text(period)];
    if let Some(d) = dimension {
        values.push(SqlValue::Text(d.to_string()));
    }
    values.extend(
        [
            m.sessions,
            m.engagement_rate,
            m.avg_session_duration,
            m.goal_completions,
            m.goal_conversion_rate,
            m.screen_page_views_per_session,
        ]
        .into_iter()
        .map(SqlValue::Real),
    );
    values
}

fn read_raw_metric(row: &Row<'_>) -> rusqlite::Result<RawMetricRow> {
    Ok(RawMetricRow {
        period: row.get(0)?,
        dimension: row.get(1)?,
        metrics: MetricValues {
            sessions: row.get(2)?,
            engagement_rate: row.get(3)?,
            avg_session_duration: row.get(4)?,
            goal_completions: row.get(5)?,
            goal_conversion_rate: row.get(6)?,
            screen_page_views_per_session: row.get(7)?,
        },
    })
}

fn parse_stored_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| PortalError::Storage(format!("invalid stored date '{}': {}", s, e)))
}

fn parse_stored_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PortalError::Storage(format!("invalid stored timestamp '{}': {}", s, e)))
}

fn json_text(value: &Option<serde_json::Value>) -> Result<Option<String>> {
    value.as_ref().map(serde_json::to_string).transpose().map_err(Into::into)
}

fn json_value(text: Option<String>) -> Result<Option<serde_json::Value>> {
    text.map(|t| serde_json::from_str(&t)).transpose().map_err(Into::into)
}

/// SQLite-backed storage
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!("Opened SQLite storage at {}", path.display());
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PortalError::Storage("sqlite connection lock poisoned".to_string()))
    }

    fn upsert_metric_rows<I>(&self, table: &MetricTable, rows: I) -> Result<usize>
    where
        I: IntoIterator<Item = Vec<SqlValue>>,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(&table.upsert_sql())?;
            for values in rows {
                written += stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;
        debug!("Upserted {} rows into {}", written, table.name);
        Ok(written)
    }

    fn select_metric_rows(&self, table: &MetricTable, property: &str, from: &str, to: &str) -> Result<Vec<RawMetricRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&table.select_sql())?;
        let rows = stmt
            .query_map(params![property, from, to], read_raw_metric)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn count_rows(conn: &Connection, table: &MetricTable, property: &str) -> Result<usize> {
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE ga_property_id = ?1", table.name),
            params![property],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn daily_bounds(range: &DateRange) -> (String, String) {
        (range.from.format("%Y-%m-%d").to_string(), range.to.format("%Y-%m-%d").to_string())
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name FROM campaigns ORDER BY id")?;
        let campaigns = stmt
            .query_map([], |row| Ok(Campaign { id: row.get(0)?, name: row.get(1)? }))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(campaigns)
    }

    async fn create_campaign(&self, name: &str) -> Result<Campaign> {
        let conn = self.conn()?;
        conn.execute("INSERT INTO campaigns (name) VALUES (?1)", params![name])?;
        Ok(Campaign { id: conn.last_insert_rowid(), name: name.to_string() })
    }

    async fn insert_recipients_skip_duplicates(
        &self,
        campaign_id: i64,
        recipients: &[CampaignRecipient],
    ) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut created = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO campaign_recipients (
                    campaign_id, address_id, address_line1, city, state_province_region, postal_code,
                    market, sector, email, core_segment, sub_segment, email_key, address_key
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )?;
            for r in recipients {
                created += stmt.execute(params![
                    campaign_id,
                    r.address_id,
                    r.address_line1,
                    r.city,
                    r.state_province_region,
                    r.postal_code,
                    r.market,
                    r.sector,
                    r.email,
                    r.core_segment,
                    r.sub_segment,
                    email_key(r),
                    address_key(r),
                ])?;
            }
        }
        tx.commit()?;
        Ok(created)
    }

    async fn list_recipients(&self, campaign_id: i64) -> Result<Vec<CampaignRecipient>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT address_id, address_line1, city, state_province_region, postal_code,
                    market, sector, email, core_segment, sub_segment
             FROM campaign_recipients WHERE campaign_id = ?1 ORDER BY id",
        )?;
        let recipients = stmt
            .query_map(params![campaign_id], |row| {
                Ok(CampaignRecipient {
                    address_id: row.get(0)?,
                    address_line1: row.get(1)?,
                    city: row.get(2)?,
                    state_province_region: row.get(3)?,
                    postal_code: row.get(4)?,
                    market: row.get(5)?,
                    sector: row.get(6)?,
                    email: row.get(7)?,
                    core_segment: row.get(8)?,
                    sub_segment: row.get(9)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(recipients)
    }

    async fn upsert_kpi_daily(&self, rows: &[KpiDaily]) -> Result<usize> {
        self.upsert_metric_rows(
            &KPI_DAILY,
            rows.iter()
                .map(|r| metric_params(&r.ga_property_id, r.date.format("%Y-%m-%d").to_string(), None, &r.metrics)),
        )
    }

    async fn upsert_kpi_monthly(&self, rows: &[KpiMonthly]) -> Result<usize> {
        self.upsert_metric_rows(
            &KPI_MONTHLY,
            rows.iter()
                .map(|r| metric_params(&r.ga_property_id, r.month.clone(), None, &r.metrics)),
        )
    }

    async fn upsert_channel_daily(&self, rows: &[ChannelDaily]) -> Result<usize> {
        self.upsert_metric_rows(
            &CHANNEL_DAILY,
            rows.iter().map(|r| {
                metric_params(
                    &r.ga_property_id,
                    r.date.format("%Y-%m-%d").to_string(),
                    Some(&r.channel),
                    &r.metrics,
                )
            }),
        )
    }

    async fn upsert_source_daily(&self, rows: &[SourceDaily]) -> Result<usize> {
        self.upsert_metric_rows(
            &SOURCE_DAILY,
            rows.iter().map(|r| {
                metric_params(
                    &r.ga_property_id,
                    r.date.format("%Y-%m-%d").to_string(),
                    Some(&r.source),
                    &r.metrics,
                )
            }),
        )
    }

    async fn kpi_daily_between(&self, ga_property_id: &str, range: &DateRange) -> Result<Vec<KpiDaily>> {
        let (from, to) = Self::daily_bounds(range);
        self.select_metric_rows(&KPI_DAILY, ga_property_id, &from, &to)?
            .into_iter()
            .map(|raw| {
                Ok(KpiDaily {
                    ga_property_id: ga_property_id.to_string(),
                    date: parse_stored_date(&raw.period)?,
                    metrics: raw.metrics,
                })
            })
            .collect()
    }

    async fn kpi_monthly_between(&self, ga_property_id: &str, range: &DateRange) -> Result<Vec<KpiMonthly>> {
        let (from, to) = range.month_bounds();
        Ok(self
            .select_metric_rows(&KPI_MONTHLY, ga_property_id, &from, &to)?
            .into_iter()
            .map(|raw| KpiMonthly {
                ga_property_id: ga_property_id.to_string(),
                month: raw.period,
                metrics: raw.metrics,
            })
            .collect())
    }

    async fn channel_daily_between(&self, ga_property_id: &str, range: &DateRange) -> Result<Vec<ChannelDaily>> {
        let (from, to) = Self::daily_bounds(range);
        self.select_metric_rows(&CHANNEL_DAILY, ga_property_id, &from, &to)?
            .into_iter()
            .map(|raw| {
                Ok(ChannelDaily {
                    ga_property_id: ga_property_id.to_string(),
                    date: parse_stored_date(&raw.period)?,
                    channel: raw.dimension.unwrap_or_default(),
                    metrics: raw.metrics,
                })
            })
            .collect()
    }

    async fn source_daily_between(&self, ga_property_id: &str, range: &DateRange) -> Result<Vec<SourceDaily>> {
        let (from, to) = Self::daily_bounds(range);
        self.select_metric_rows(&SOURCE_DAILY, ga_property_id, &from, &to)?
            .into_iter()
            .map(|raw| {
                Ok(SourceDaily {
                    ga_property_id: ga_property_id.to_string(),
                    date: parse_stored_date(&raw.period)?,
                    source: raw.dimension.unwrap_or_default(),
                    metrics: raw.metrics,
                })
            })
            .collect()
    }

    async fn ga_row_counts(&self, ga_property_id: &str) -> Result<GaRowCounts> {
        let conn = self.conn()?;
        Ok(GaRowCounts {
            kpi_daily: Self::count_rows(&conn, &KPI_DAILY, ga_property_id)?,
            kpi_monthly: Self::count_rows(&conn, &KPI_MONTHLY, ga_property_id)?,
            channel_daily: Self::count_rows(&conn, &CHANNEL_DAILY, ga_property_id)?,
            source_daily: Self::count_rows(&conn, &SOURCE_DAILY, ga_property_id)?,
        })
    }

    async fn delete_ga_rows(&self, ga_property_id: &str) -> Result<GaRowCounts> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let delete = |table: &MetricTable| -> Result<usize> {
            Ok(tx.execute(
                &format!("DELETE FROM {} WHERE ga_property_id = ?1", table.name),
                params![ga_property_id],
            )?)
        };
        let removed = GaRowCounts {
            kpi_daily: delete(&KPI_DAILY)?,
            kpi_monthly: delete(&KPI_MONTHLY)?,
            channel_daily: delete(&CHANNEL_DAILY)?,
            source_daily: delete(&SOURCE_DAILY)?,
        };
        tx.commit()?;
        Ok(removed)
    }

    async fn save_llm_query(&self, query: &LlmQuery) -> Result<()> {
        let response = json_text(&query.response)?;
        let line_graph = json_text(&query.line_graph_data)?;
        let pie_graph = json_text(&query.pie_graph_data)?;
        let headers = json_text(&query.metric_headers)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO llm_queries (
                id, kind, ga_property_id, prompt, status, response, error,
                line_graph_data, pie_graph_data, metric_headers, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
                status=excluded.status, response=excluded.response, error=excluded.error,
                line_graph_data=excluded.line_graph_data, pie_graph_data=excluded.pie_graph_data,
                metric_headers=excluded.metric_headers, updated_at=excluded.updated_at",
            params![
                query.id,
                query.kind.as_str(),
                query.ga_property_id,
                query.prompt,
                query.status.as_str(),
                response,
                query.error,
                line_graph,
                pie_graph,
                headers,
                query.created_at.to_rfc3339(),
                query.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn finalize_llm_query(&self, query: &LlmQuery) -> Result<bool> {
        let response = json_text(&query.response)?;
        let line_graph = json_text(&query.line_graph_data)?;
        let pie_graph = json_text(&query.pie_graph_data)?;
        let headers = json_text(&query.metric_headers)?;
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE llm_queries SET
                status = ?2, response = ?3, error = ?4, line_graph_data = ?5,
                pie_graph_data = ?6, metric_headers = ?7, updated_at = ?8
             WHERE id = ?1 AND status NOT IN ('COMPLETED', 'FAILED')",
            params![
                query.id,
                query.status.as_str(),
                response,
                query.error,
                line_graph,
                pie_graph,
                headers,
                query.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(changed == 1)
    }

    async fn get_llm_query(&self, query_id: &str) -> Result<Option<LlmQuery>> {
        type StoredQuery = (
            String,
            String,
            Option<String>,
            String,
            String,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            String,
            String,
        );

        let stored: Option<StoredQuery> = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT id, kind, ga_property_id, prompt, status, response, error,
                        line_graph_data, pie_graph_data, metric_headers, created_at, updated_at
                 FROM llm_queries WHERE id = ?1",
                params![query_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                        row.get(9)?,
                        row.get(10)?,
                        row.get(11)?,
                    ))
                },
            )
            .optional()?
        };

        let Some((id, kind, property, prompt, status, response, error, line, pie, headers, created, updated)) = stored
        else {
            return Ok(None);
        };

        Ok(Some(LlmQuery {
            id,
            kind: QueryKind::parse(&kind)
                .ok_or_else(|| PortalError::Storage(format!("unknown query kind '{}'", kind)))?,
            ga_property_id: property,
            prompt,
            status: QueryStatus::parse(&status)
                .ok_or_else(|| PortalError::Storage(format!("unknown query status '{}'", status)))?,
            response: json_value(response)?,
            error,
            line_graph_data: json_value(line)?,
            pie_graph_data: json_value(pie)?,
            metric_headers: json_value(headers)?,
            created_at: parse_stored_timestamp(&created)?,
            updated_at: parse_stored_timestamp(&updated)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_sql_keys_on_dimension() {
        let sql = CHANNEL_DAILY.upsert_sql();
        assert!(sql.contains("ON CONFLICT(ga_property_id, date, channel)"));
        assert!(sql.contains("?9"));
        assert!(!sql.contains("?10"));
        let sql = KPI_MONTHLY.upsert_sql();
        assert!(sql.contains("ON CONFLICT(ga_property_id, month)"));
    }

    #[test]
    fn test_select_sql_orders_ascending() {
        assert!(SOURCE_DAILY.select_sql().ends_with("ORDER BY date ASC, source ASC"));
        assert!(KPI_DAILY.select_sql().contains("NULL,"));
    }
}

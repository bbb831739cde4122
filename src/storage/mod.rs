//! SQLite time-series DB -- filtered event timestamps, filter decisions, areas.

pub mod schema;

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, Connection};
use tracing::{debug, info};

use crate::event::area::{GroupDef, HOST_PREFIX};
use crate::event::{EventDefinition, EventSource};
use crate::filter::{FilterOutcome, FilterRecord};
use crate::series::TimeWindow;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

fn format_dt(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_dt(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("invalid timestamp in database: {}", s))?
        .with_timezone(&Utc))
}

/// Insert one filtered occurrence of `event`.
pub fn append_line(conn: &Connection, t: &DateTime<Utc>, event: &EventDefinition) -> Result<()> {
    conn.execute(
        "INSERT INTO ts (dt, source, grp, host) VALUES (?1, ?2, ?3, ?4)",
        params![format_dt(t), event.source.to_string(), event.group, event.host],
    )?;
    Ok(())
}

/// Insert or overwrite the filter decision of one (event, window).
pub fn append_filter_record(conn: &Connection, record: &FilterRecord) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO filter (dts, dte, source, grp, host, stat, val)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            format_dt(&record.window.start),
            format_dt(&record.window.end),
            record.event.source.to_string(),
            record.event.group,
            record.event.host,
            record.status.to_string(),
            record.value,
        ],
    )?;
    Ok(())
}

/// Selection of rows by window, event attributes and area.
///
/// Area `all` selects every host, `host_<name>` a single host, anything else the
/// hosts mapped to that area in the `area` table.
#[derive(Debug, Clone, Default)]
pub struct TsQuery {
    pub window: Option<TimeWindow>,
    pub source: Option<EventSource>,
    pub group: Option<String>,
    pub host: Option<String>,
    pub area: Option<String>,
}

impl TsQuery {
    pub fn for_event(event: &EventDefinition, window: &TimeWindow) -> Self {
        Self {
            window: Some(*window),
            source: Some(event.source),
            group: Some(event.group.clone()),
            host: Some(event.host.clone()),
            area: None,
        }
    }

    /// WHERE clause and parameters. `window_cond` are the lower and upper bound
    /// conditions for the table's time columns.
    fn where_clause(&self, window_cond: [&str; 2]) -> (String, Vec<String>) {
        let mut conds: Vec<String> = Vec::new();
        let mut args: Vec<String> = Vec::new();
        let mut push = |cond: &str, arg: String| {
            args.push(arg);
            conds.push(cond.replace('?', &format!("?{}", args.len())));
        };
        if let Some(w) = &self.window {
            push(window_cond[0], format_dt(&w.start));
            push(window_cond[1], format_dt(&w.end));
        }
        if let Some(source) = self.source {
            push("source = ?", source.to_string());
        }
        if let Some(group) = &self.group {
            push("grp = ?", group.clone());
        }
        if let Some(host) = &self.host {
            push("host = ?", host.clone());
        }
        match self.area.as_deref() {
            None | Some("all") => {}
            Some(area) => match area.strip_prefix(HOST_PREFIX) {
                Some(host) => push("host = ?", host.to_string()),
                None => push(
                    "host IN (SELECT host FROM area WHERE area = ?)",
                    area.to_string(),
                ),
            },
        }
        if conds.is_empty() {
            (String::new(), args)
        } else {
            (format!(" WHERE {}", conds.join(" AND ")), args)
        }
    }
}

/// Handle to the time-series DB. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct TimeSeriesDb {
    pool: Pool,
}

impl TimeSeriesDb {
    pub fn open(path: &Path) -> Result<Self> {
        let pool = open_pool(path)
            .with_context(|| format!("failed to open database: {}", path.display()))?;
        debug!(path = %path.display(), "opened time-series db");
        Ok(Self { pool })
    }

    /// Persist the outcome for one (event, window) in a single transaction.
    ///
    /// Lines stored earlier for the same key are replaced. Returns the number of
    /// lines written.
    pub fn store_outcome(
        &self,
        window: &TimeWindow,
        event: &EventDefinition,
        outcome: &FilterOutcome,
    ) -> Result<usize> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM ts WHERE source = ?1 AND grp = ?2 AND host = ?3
             AND dt >= ?4 AND dt < ?5",
            params![
                event.source.to_string(),
                event.group,
                event.host,
                format_dt(&window.start),
                format_dt(&window.end),
            ],
        )?;
        let lines = outcome.timestamps();
        for t in lines {
            append_line(&tx, t, event)?;
        }
        append_filter_record(&tx, &FilterRecord::new(*window, event.clone(), outcome))?;
        tx.commit()?;
        Ok(lines.len())
    }

    pub fn timestamps(&self, query: &TsQuery) -> Result<Vec<DateTime<Utc>>> {
        let conn = self.pool.get()?;
        let (clause, args) = query.where_clause(["dt >= ?", "dt < ?"]);
        let sql = format!("SELECT dt FROM ts{} ORDER BY dt", clause);
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<String> = stmt
            .query_map(params_from_iter(args.iter()), |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        rows.iter().map(|s| parse_dt(s)).collect()
    }

    pub fn filter_records(&self, query: &TsQuery) -> Result<Vec<FilterRecord>> {
        let conn = self.pool.get()?;
        let (clause, args) = query.where_clause(["dts >= ?", "dte <= ?"]);
        let sql = format!(
            "SELECT dts, dte, source, grp, host, stat, val FROM filter{}
             ORDER BY dts, source, host, grp",
            clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<(String, String, String, String, String, String, Option<f64>)> = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .collect::<Result<_, _>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for (dts, dte, source, grp, host, stat, val) in rows {
            records.push(FilterRecord {
                window: TimeWindow::new(parse_dt(&dts)?, parse_dt(&dte)?)?,
                event: EventDefinition::new(source.parse()?, host, grp),
                status: stat.parse()?,
                value: val,
            });
        }
        Ok(records)
    }

    /// Distinct events with stored lines in `window`, sorted by host then group.
    pub fn events(&self, window: &TimeWindow, source: EventSource) -> Result<Vec<EventDefinition>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT host, grp FROM ts
             WHERE source = ?1 AND dt >= ?2 AND dt < ?3
             ORDER BY host, grp",
        )?;
        let rows: Vec<(String, String)> = stmt
            .query_map(
                params![
                    source.to_string(),
                    format_dt(&window.start),
                    format_dt(&window.end)
                ],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
            .collect::<Result<_, _>>()?;
        Ok(rows
            .into_iter()
            .map(|(host, grp)| EventDefinition::new(source, host, grp))
            .collect())
    }

    pub fn count_lines(&self) -> Result<i64> {
        let conn = self.pool.get()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM ts", [], |row| row.get(0))?)
    }

    /// Earliest and latest stored timestamp.
    pub fn dt_term(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let conn = self.pool.get()?;
        let (first, last): (Option<String>, Option<String>) =
            conn.query_row("SELECT MIN(dt), MAX(dt) FROM ts", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
        match (first, last) {
            (Some(first), Some(last)) => Ok(Some((parse_dt(&first)?, parse_dt(&last)?))),
            _ => Ok(None),
        }
    }

    /// Replace the host to area mapping with the given group definition.
    pub fn init_area(&self, def: &GroupDef) -> Result<usize> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM area", [])?;
        let mut n = 0;
        for (host, area) in def.iter_def() {
            n += tx.execute(
                "INSERT OR IGNORE INTO area (host, area) VALUES (?1, ?2)",
                params![host, area],
            )?;
        }
        tx.commit()?;
        info!(rows = n, "area table initialized");
        Ok(n)
    }

    pub fn areas(&self) -> Result<Vec<String>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT DISTINCT area FROM area ORDER BY area")?;
        let rows: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }
}

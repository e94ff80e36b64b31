use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use cloakgate_core::campaign::{BlacklistEntry, DetectionKind};
use cloakgate_core::store::BlacklistStore;

use crate::backend::DuckDbBackend;

type BlacklistRow = (
    String,
    String,
    String,
    String,
    f64,
    i64,
    i64,
    Option<i64>,
);

fn entry_from_row(row: BlacklistRow) -> Result<BlacklistEntry> {
    let (id, ip, reason, detection_kind, confidence, first, last, expires) = row;
    let to_ts = |micros: i64| -> Result<DateTime<Utc>> {
        DateTime::from_timestamp_micros(micros).ok_or_else(|| anyhow!("timestamp out of range"))
    };
    Ok(BlacklistEntry {
        id,
        ip,
        reason,
        detection_kind: DetectionKind::parse(&detection_kind)
            .ok_or_else(|| anyhow!("unknown detection kind {detection_kind:?}"))?,
        confidence,
        first_detected_at: to_ts(first)?,
        last_detected_at: to_ts(last)?,
        expires_at: expires.map(to_ts).transpose()?,
    })
}

const SELECT_COLUMNS: &str = "id, ip, reason, detection_kind, confidence, \
                              epoch_us(first_detected_at), epoch_us(last_detected_at), \
                              epoch_us(expires_at)";

#[async_trait::async_trait]
impl BlacklistStore for DuckDbBackend {
    async fn effective_entries(&self) -> Result<Vec<BlacklistEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM blacklist \
             WHERE expires_at IS NULL OR expires_at > ?1"
        ))?;
        let rows = stmt.query_map(duckdb::params![Utc::now().to_rfc3339()], |row| {
            Ok::<BlacklistRow, duckdb::Error>((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
            ))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(entry_from_row(row?)?);
        }
        Ok(entries)
    }

    async fn entry_for_ip(&self, ip: &str) -> Result<Option<BlacklistEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM blacklist WHERE ip = ?1"
        ))?;
        let row: Option<BlacklistRow> = stmt
            .query_row(duckdb::params![ip], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            })
            .map(Some)
            .or_else(|e| match e {
                duckdb::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        row.map(entry_from_row).transpose()
    }
}

/// Provisioning writes for bootstrap tooling and tests; runtime blacklist
/// maintenance belongs to the admin surface.
impl DuckDbBackend {
    pub async fn upsert_blacklist_entry(&self, entry: &BlacklistEntry) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM blacklist WHERE ip = ?1", duckdb::params![entry.ip])?;
        conn.execute(
            r#"INSERT INTO blacklist
               (id, ip, reason, detection_kind, confidence,
                first_detected_at, last_detected_at, expires_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            duckdb::params![
                entry.id,
                entry.ip,
                entry.reason,
                entry.detection_kind.as_str(),
                entry.confidence,
                entry.first_detected_at.to_rfc3339(),
                entry.last_detected_at.to_rfc3339(),
                entry.expires_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub async fn remove_blacklist_entry(&self, ip: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM blacklist WHERE ip = ?1", duckdb::params![ip])?;
        Ok(())
    }
}

use anyhow::Result;

use cloakgate_core::store::TrafficStore;
use cloakgate_core::traffic::{MetricPoint, TrafficRecord};

use crate::backend::DuckDbBackend;

#[async_trait::async_trait]
impl TrafficStore for DuckDbBackend {
    /// Insert a batch of traffic records in a single transaction — one fsync
    /// per drained batch instead of one per request.
    async fn append_traffic(&self, records: &[TrafficRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for record in records {
            tx.execute(
                r#"INSERT INTO traffic_records (
                    id, campaign_id, stream_id, visitor_id, ip, user_agent, referer,
                    country, city, device_type, browser, os,
                    is_bot, bot_score, decision, page_shown, response_time_ms, created_at
                ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                    ?8, ?9, ?10, ?11, ?12,
                    ?13, ?14, ?15, ?16, ?17, ?18
                )"#,
                duckdb::params![
                    record.id,
                    record.campaign_id,
                    record.stream_id,
                    record.visitor_id,
                    record.ip,
                    record.user_agent,
                    record.referer,
                    record.country,
                    record.city,
                    record.device_type,
                    record.browser,
                    record.os,
                    record.is_bot,
                    record.bot_score,
                    record.decision,
                    record.page_shown,
                    record.response_time_ms,
                    record.created_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn append_metrics(&self, points: &[MetricPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for point in points {
            tx.execute(
                r#"INSERT INTO metric_points (
                    time, campaign_id, stream_id, metric_type, value,
                    is_bot, page_shown, country, device, browser, response_time_ms
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
                duckdb::params![
                    point.time.to_rfc3339(),
                    point.campaign_id,
                    point.stream_id,
                    point.metric_type,
                    point.value,
                    point.tags.is_bot,
                    point.tags.page_shown,
                    point.tags.country,
                    point.tags.device,
                    point.tags.browser,
                    point.tags.response_time_ms,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use cloakgate_core::campaign::{
    Campaign, CampaignStatus, RedirectKind, RuleOperator, RuleType, RuleValue, Stream,
    TargetingRule,
};
use cloakgate_core::store::CampaignStore;

use crate::backend::DuckDbBackend;

fn timestamp_from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| anyhow!("timestamp out of range"))
}

fn rule_value_to_column(value: &RuleValue) -> Result<String> {
    Ok(match value {
        RuleValue::One(s) => s.clone(),
        RuleValue::Many(values) => serde_json::to_string(values)?,
    })
}

fn rule_value_from_column(operator: RuleOperator, raw: String) -> RuleValue {
    match operator {
        RuleOperator::In | RuleOperator::NotIn => serde_json::from_str::<Vec<String>>(&raw)
            .map(RuleValue::Many)
            .unwrap_or(RuleValue::Many(vec![raw])),
        _ => RuleValue::One(raw),
    }
}

fn fetch_campaign(
    conn: &duckdb::Connection,
    where_clause: &str,
    value: &str,
) -> Result<Option<Campaign>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, slug, status, money_url, safe_url, redirect_kind, \
                epoch_us(created_at), epoch_us(updated_at) \
         FROM campaigns WHERE {where_clause}"
    ))?;
    let row: Option<(String, String, String, String, String, String, i64, i64)> = stmt
        .query_row(duckdb::params![value], |row| {
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

    let Some((id, slug, status, money_url, safe_url, redirect_kind, created, updated)) = row
    else {
        return Ok(None);
    };
    Ok(Some(Campaign {
        id,
        slug,
        status: CampaignStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown campaign status {status:?}"))?,
        money_url,
        safe_url,
        redirect_kind: RedirectKind::parse(&redirect_kind)
            .ok_or_else(|| anyhow!("unknown redirect kind {redirect_kind:?}"))?,
        created_at: timestamp_from_micros(created)?,
        updated_at: timestamp_from_micros(updated)?,
    }))
}

#[async_trait::async_trait]
impl CampaignStore for DuckDbBackend {
    async fn campaign_by_slug(&self, slug: &str) -> Result<Option<Campaign>> {
        let conn = self.conn.lock().await;
        fetch_campaign(&conn, "slug = ?1", slug)
    }

    async fn campaign_by_id(&self, campaign_id: &str) -> Result<Option<Campaign>> {
        let conn = self.conn.lock().await;
        fetch_campaign(&conn, "id = ?1", campaign_id)
    }

    async fn streams_for_campaign(&self, campaign_id: &str) -> Result<Vec<Stream>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT s.id, s.campaign_id, s.name, s.weight, s.active, s.money_url, s.safe_url,
                      r.id, r.rule_type, r.operator, r.value, r.include_rule
               FROM streams s
               LEFT JOIN targeting_rules r ON r.stream_id = s.id
               WHERE s.campaign_id = ?1 AND s.active
               ORDER BY s.id, r.id"#,
        )?;

        type Row = (
            String,
            String,
            String,
            i64,
            bool,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<bool>,
        );
        let rows = stmt.query_map(duckdb::params![campaign_id], |row| {
            Ok::<Row, duckdb::Error>((
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
        })?;

        let mut streams: Vec<Stream> = Vec::new();
        for row in rows {
            let (
                stream_id,
                campaign_id,
                name,
                weight,
                active,
                money_url,
                safe_url,
                rule_id,
                rule_type,
                operator,
                value,
                include_rule,
            ) = row?;

            if streams.last().map(|s| s.id != stream_id).unwrap_or(true) {
                streams.push(Stream {
                    id: stream_id.clone(),
                    campaign_id,
                    name,
                    weight: u32::try_from(weight.max(0)).unwrap_or(0),
                    active,
                    money_url,
                    safe_url,
                    rules: Vec::new(),
                });
            }

            if let (Some(rule_id), Some(rule_type), Some(operator), Some(value)) =
                (rule_id, rule_type, operator, value)
            {
                let operator = RuleOperator::parse(&operator)
                    .ok_or_else(|| anyhow!("unknown rule operator {operator:?}"))?;
                let rule = TargetingRule {
                    id: rule_id,
                    stream_id: stream_id.clone(),
                    rule_type: RuleType::parse(&rule_type)
                        .ok_or_else(|| anyhow!("unknown rule type {rule_type:?}"))?,
                    operator,
                    value: rule_value_from_column(operator, value),
                    include: include_rule.unwrap_or(true),
                };
                if let Some(stream) = streams.last_mut() {
                    stream.rules.push(rule);
                }
            }
        }
        Ok(streams)
    }

    async fn ping(&self) -> Result<()> {
        DuckDbBackend::ping(self).await
    }
}

/// Provisioning writes. Campaign CRUD belongs to the admin surface; these
/// exist for bootstrap tooling and the test suites.
impl DuckDbBackend {
    pub async fn create_campaign(&self, campaign: &Campaign) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO campaigns
               (id, slug, status, money_url, safe_url, redirect_kind, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            duckdb::params![
                campaign.id,
                campaign.slug,
                campaign.status.as_str(),
                campaign.money_url,
                campaign.safe_url,
                campaign.redirect_kind.as_str(),
                campaign.created_at.to_rfc3339(),
                campaign.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Status change bumps `updated_at`, which retires every cached decision
    /// keyed on the previous version.
    pub async fn set_campaign_status(&self, campaign_id: &str, status: CampaignStatus) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE campaigns SET status = ?1, updated_at = ?2 WHERE id = ?3",
            duckdb::params![status.as_str(), Utc::now().to_rfc3339(), campaign_id],
        )?;
        Ok(())
    }

    pub async fn create_stream(&self, stream: &Stream) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO streams (id, campaign_id, name, weight, active, money_url, safe_url)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            duckdb::params![
                stream.id,
                stream.campaign_id,
                stream.name,
                i64::from(stream.weight),
                stream.active,
                stream.money_url,
                stream.safe_url,
            ],
        )?;
        for rule in &stream.rules {
            conn.execute(
                r#"INSERT INTO targeting_rules (id, stream_id, rule_type, operator, value, include_rule)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
                duckdb::params![
                    rule.id,
                    rule.stream_id,
                    rule.rule_type.as_str(),
                    rule.operator.as_str(),
                    rule_value_to_column(&rule.value)?,
                    rule.include,
                ],
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn campaign(slug: &str) -> Campaign {
        Campaign {
            id: format!("camp-{slug}"),
            slug: slug.to_string(),
            status: CampaignStatus::Active,
            money_url: "https://m.example/a".to_string(),
            safe_url: "https://s.example/a".to_string(),
            redirect_kind: RedirectKind::Http302,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn campaign_round_trips_by_slug() {
        let db = DuckDbBackend::open_in_memory().expect("db");
        db.create_campaign(&campaign("promo-1")).await.expect("create");
        let loaded = db
            .campaign_by_slug("promo-1")
            .await
            .expect("query")
            .expect("present");
        assert_eq!(loaded.id, "camp-promo-1");
        assert_eq!(loaded.status, CampaignStatus::Active);
        assert_eq!(loaded.redirect_kind, RedirectKind::Http302);
    }

    #[tokio::test]
    async fn unknown_slug_is_none() {
        let db = DuckDbBackend::open_in_memory().expect("db");
        assert!(db.campaign_by_slug("nope").await.expect("query").is_none());
    }

    #[tokio::test]
    async fn status_change_bumps_updated_at() {
        let db = DuckDbBackend::open_in_memory().expect("db");
        db.create_campaign(&campaign("promo-2")).await.expect("create");
        let before = db
            .campaign_by_slug("promo-2")
            .await
            .expect("query")
            .expect("present");
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        db.set_campaign_status("camp-promo-2", CampaignStatus::Paused)
            .await
            .expect("pause");
        let after = db
            .campaign_by_slug("promo-2")
            .await
            .expect("query")
            .expect("present");
        assert_eq!(after.status, CampaignStatus::Paused);
        assert!(after.updated_at > before.updated_at);
    }

    #[tokio::test]
    async fn streams_load_with_rules_in_stable_order() {
        let db = DuckDbBackend::open_in_memory().expect("db");
        db.create_campaign(&campaign("promo-3")).await.expect("create");
        let stream = Stream {
            id: "st-b".to_string(),
            campaign_id: "camp-promo-3".to_string(),
            name: "b".to_string(),
            weight: 5,
            active: true,
            money_url: None,
            safe_url: None,
            rules: vec![TargetingRule {
                id: "r1".to_string(),
                stream_id: "st-b".to_string(),
                rule_type: RuleType::Country,
                operator: RuleOperator::In,
                value: RuleValue::Many(vec!["US".to_string(), "CA".to_string()]),
                include: true,
            }],
        };
        db.create_stream(&stream).await.expect("stream");
        let other = Stream {
            id: "st-a".to_string(),
            campaign_id: "camp-promo-3".to_string(),
            name: "a".to_string(),
            weight: 2,
            active: true,
            money_url: Some("https://m.example/override".to_string()),
            safe_url: None,
            rules: Vec::new(),
        };
        db.create_stream(&other).await.expect("stream");

        let streams = db
            .streams_for_campaign("camp-promo-3")
            .await
            .expect("streams");
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].id, "st-a");
        assert_eq!(streams[1].id, "st-b");
        assert_eq!(streams[1].rules.len(), 1);
        match &streams[1].rules[0].value {
            RuleValue::Many(values) => assert_eq!(values.len(), 2),
            RuleValue::One(_) => panic!("expected array value"),
        }
    }

    #[tokio::test]
    async fn inactive_streams_are_not_loaded() {
        let db = DuckDbBackend::open_in_memory().expect("db");
        db.create_campaign(&campaign("promo-4")).await.expect("create");
        let stream = Stream {
            id: "st-off".to_string(),
            campaign_id: "camp-promo-4".to_string(),
            name: "off".to_string(),
            weight: 5,
            active: false,
            money_url: None,
            safe_url: None,
            rules: Vec::new(),
        };
        db.create_stream(&stream).await.expect("stream");
        let streams = db
            .streams_for_campaign("camp-promo-4")
            .await
            .expect("streams");
        assert!(streams.is_empty());
    }
}

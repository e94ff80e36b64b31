use serde::{Deserialize, Serialize};

use crate::campaign::{Campaign, RedirectKind, Stream};
use crate::detection::DetectionOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Page {
    Money,
    Safe,
}

impl Page {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Money => "money",
            Self::Safe => "safe",
        }
    }
}

/// The cloaking decision: where this visitor goes and how.
///
/// Emitted once per request, possibly cached, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub page: Page,
    pub campaign_id: String,
    pub stream_id: Option<String>,
    pub redirect_url: String,
    pub redirect_kind: RedirectKind,
    pub reason: String,
    pub bot_score: f64,
    pub elapsed_micros: u64,
}

impl Decision {
    /// Fallback for unknown slugs: safe page at the configured not-found URL.
    pub fn campaign_not_found(fallback_url: &str) -> Self {
        Self {
            page: Page::Safe,
            campaign_id: String::new(),
            stream_id: None,
            redirect_url: fallback_url.to_string(),
            redirect_kind: RedirectKind::Http302,
            reason: "Campaign not found".to_string(),
            bot_score: 0.0,
            elapsed_micros: 0,
        }
    }
}

/// Compose the decision for a blacklisted or threat-flagged visitor.
///
/// Always the safe side, always a plain 302 to the configured block URL —
/// the campaign's redirect kind is deliberately not used so blocked traffic
/// cannot learn it.
pub fn compose_blocked(campaign: &Campaign, block_url: &str, reason: &str) -> Decision {
    Decision {
        page: Page::Safe,
        campaign_id: campaign.id.clone(),
        stream_id: None,
        redirect_url: block_url.to_string(),
        redirect_kind: RedirectKind::Http302,
        reason: reason.to_string(),
        bot_score: 1.0,
        elapsed_micros: 0,
    }
}

/// Compose the regular decision from the bot classification and the selected
/// stream.
///
/// A campaign that is not active never produces a money decision, whatever
/// the detection said. Stream URL overrides apply when set; the redirect
/// kind is always the campaign's.
pub fn compose(
    campaign: &Campaign,
    stream: Option<&Stream>,
    outcome: &DetectionOutcome,
) -> Decision {
    let treat_as_bot = outcome.is_bot || !campaign.is_active();
    let (page, redirect_url, reason) = if treat_as_bot {
        let url = stream
            .and_then(|s| s.safe_url.clone())
            .unwrap_or_else(|| campaign.safe_url.clone());
        let reason = if !campaign.is_active() {
            format!("campaign_{}", campaign.status.as_str())
        } else {
            outcome.primary_reason.clone()
        };
        (Page::Safe, url, reason)
    } else {
        let url = stream
            .and_then(|s| s.money_url.clone())
            .unwrap_or_else(|| campaign.money_url.clone());
        (Page::Money, url, outcome.primary_reason.clone())
    };

    Decision {
        page,
        campaign_id: campaign.id.clone(),
        stream_id: stream.map(|s| s.id.clone()),
        redirect_url,
        redirect_kind: campaign.redirect_kind,
        reason,
        bot_score: outcome.score,
        elapsed_micros: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::CampaignStatus;
    use chrono::Utc;

    fn campaign(status: CampaignStatus) -> Campaign {
        Campaign {
            id: "c1".to_string(),
            slug: "promo-1".to_string(),
            status,
            money_url: "https://m.example/a".to_string(),
            safe_url: "https://s.example/a".to_string(),
            redirect_kind: RedirectKind::Http302,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn stream_with_overrides() -> Stream {
        Stream {
            id: "s1".to_string(),
            campaign_id: "c1".to_string(),
            name: "us desktop".to_string(),
            weight: 10,
            active: true,
            money_url: Some("https://m.example/stream".to_string()),
            safe_url: Some("https://s.example/stream".to_string()),
            rules: Vec::new(),
        }
    }

    fn human() -> DetectionOutcome {
        DetectionOutcome::human()
    }

    fn bot() -> DetectionOutcome {
        DetectionOutcome {
            is_bot: true,
            is_suspicious: false,
            score: 0.9,
            confidence: 0.9,
            kind: Some("unknown_bot".to_string()),
            primary_reason: "user_agent".to_string(),
            analyzer_scores: Default::default(),
            flags: Vec::new(),
        }
    }

    #[test]
    fn human_on_active_campaign_gets_money() {
        let d = compose(&campaign(CampaignStatus::Active), None, &human());
        assert_eq!(d.page, Page::Money);
        assert_eq!(d.redirect_url, "https://m.example/a");
    }

    #[test]
    fn bot_gets_safe_url() {
        let d = compose(&campaign(CampaignStatus::Active), None, &bot());
        assert_eq!(d.page, Page::Safe);
        assert_eq!(d.redirect_url, "https://s.example/a");
        assert_eq!(d.reason, "user_agent");
    }

    #[test]
    fn paused_campaign_never_emits_money() {
        let d = compose(&campaign(CampaignStatus::Paused), None, &human());
        assert_eq!(d.page, Page::Safe);
        assert_eq!(d.reason, "campaign_paused");
    }

    #[test]
    fn stream_overrides_apply() {
        let s = stream_with_overrides();
        let d = compose(&campaign(CampaignStatus::Active), Some(&s), &human());
        assert_eq!(d.redirect_url, "https://m.example/stream");
        assert_eq!(d.stream_id.as_deref(), Some("s1"));

        let d = compose(&campaign(CampaignStatus::Active), Some(&s), &bot());
        assert_eq!(d.redirect_url, "https://s.example/stream");
    }

    #[test]
    fn blocked_uses_block_url_and_302() {
        let d = compose_blocked(&campaign(CampaignStatus::Active), "/404", "blacklist");
        assert_eq!(d.page, Page::Safe);
        assert_eq!(d.redirect_url, "/404");
        assert_eq!(d.redirect_kind, RedirectKind::Http302);
    }

    #[test]
    fn not_found_fallback_is_safe_302() {
        let d = Decision::campaign_not_found("/404");
        assert_eq!(d.page, Page::Safe);
        assert_eq!(d.redirect_kind, RedirectKind::Http302);
        assert_eq!(d.reason, "Campaign not found");
    }
}

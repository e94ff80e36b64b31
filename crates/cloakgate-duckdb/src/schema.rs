/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup.
///
/// An explicit memory limit is always set — the DuckDB default (80% of
/// system RAM) is not acceptable for a co-resident edge process.
/// `SET threads = 2` bounds the background pool for single-writer embedded
/// use.
pub const INIT_SQL: &str = r#"SET memory_limit = '512MB';
SET threads = 2;

-- ===========================================
-- CAMPAIGNS
-- ===========================================
CREATE TABLE IF NOT EXISTS campaigns (
    id              VARCHAR PRIMARY KEY,
    slug            VARCHAR NOT NULL UNIQUE,
    status          VARCHAR NOT NULL DEFAULT 'active',   -- active | paused | completed
    money_url       VARCHAR NOT NULL,
    safe_url        VARCHAR NOT NULL,
    redirect_kind   VARCHAR NOT NULL DEFAULT '302',      -- 301 | 302 | js | meta | direct
    created_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_campaigns_slug ON campaigns(slug);

-- ===========================================
-- STREAMS (weighted sub-routing per campaign)
-- ===========================================
CREATE TABLE IF NOT EXISTS streams (
    id              VARCHAR PRIMARY KEY,
    campaign_id     VARCHAR NOT NULL,
    name            VARCHAR NOT NULL,
    weight          INTEGER NOT NULL DEFAULT 1,          -- 0 disables the stream
    active          BOOLEAN NOT NULL DEFAULT true,
    money_url       VARCHAR,                             -- overrides campaign money_url
    safe_url        VARCHAR                              -- overrides campaign safe_url
);
CREATE INDEX IF NOT EXISTS idx_streams_campaign ON streams(campaign_id, id);

-- ===========================================
-- TARGETING RULES
-- ===========================================
-- value holds a plain string, or a JSON array for in / not_in operators.
CREATE TABLE IF NOT EXISTS targeting_rules (
    id              VARCHAR PRIMARY KEY,
    stream_id       VARCHAR NOT NULL,
    rule_type       VARCHAR NOT NULL,                    -- country | device | browser | os | referer
    operator        VARCHAR NOT NULL,                    -- equals | not_equals | contains | not_contains | in | not_in | regex
    value           VARCHAR NOT NULL,
    include_rule    BOOLEAN NOT NULL DEFAULT true
);
CREATE INDEX IF NOT EXISTS idx_rules_stream ON targeting_rules(stream_id);

-- ===========================================
-- BLACKLIST
-- ===========================================
CREATE TABLE IF NOT EXISTS blacklist (
    id                VARCHAR PRIMARY KEY,
    ip                VARCHAR NOT NULL UNIQUE,
    reason            VARCHAR NOT NULL,
    detection_kind    VARCHAR NOT NULL DEFAULT 'manual', -- bot | suspicious | manual
    confidence        DOUBLE NOT NULL DEFAULT 1.0,
    first_detected_at TIMESTAMP NOT NULL,
    last_detected_at  TIMESTAMP NOT NULL,
    expires_at        TIMESTAMP                          -- NULL = permanent
);
CREATE INDEX IF NOT EXISTS idx_blacklist_ip ON blacklist(ip);

-- ===========================================
-- TRAFFIC RECORDS (append-only)
-- ===========================================
CREATE TABLE IF NOT EXISTS traffic_records (
    id               VARCHAR NOT NULL,
    campaign_id      VARCHAR NOT NULL,
    stream_id        VARCHAR,
    visitor_id       VARCHAR NOT NULL,                   -- fingerprint hash
    ip               VARCHAR NOT NULL,
    user_agent       VARCHAR NOT NULL,
    referer          VARCHAR,
    country          VARCHAR(2),
    city             VARCHAR,
    device_type      VARCHAR,
    browser          VARCHAR,
    os               VARCHAR,
    is_bot           BOOLEAN NOT NULL,
    bot_score        DOUBLE NOT NULL,
    decision         VARCHAR NOT NULL,                   -- money | safe
    page_shown       VARCHAR NOT NULL,
    response_time_ms DOUBLE NOT NULL,
    created_at       TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_traffic_campaign_time
    ON traffic_records(campaign_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_traffic_visitor
    ON traffic_records(campaign_id, visitor_id);

-- ===========================================
-- METRIC POINTS (time-series, tags flattened)
-- ===========================================
CREATE TABLE IF NOT EXISTS metric_points (
    time             TIMESTAMP NOT NULL,
    campaign_id      VARCHAR NOT NULL,
    stream_id        VARCHAR,
    metric_type      VARCHAR NOT NULL,
    value            DOUBLE NOT NULL,
    is_bot           BOOLEAN NOT NULL,
    page_shown       VARCHAR NOT NULL,
    country          VARCHAR(2),
    device           VARCHAR,
    browser          VARCHAR,
    response_time_ms DOUBLE NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_metrics_campaign_time
    ON metric_points(campaign_id, time DESC);
"#;

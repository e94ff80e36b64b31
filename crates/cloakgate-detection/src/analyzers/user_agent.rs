use cloakgate_core::config::OutdatedBrowserThresholds;
use cloakgate_core::detection::AnalyzerResult;
use cloakgate_core::visitor::VisitorDescriptor;

/// Substring tokens that identify non-browser clients outright: crawlers,
/// HTTP libraries, automation frameworks, search-engine bots, messenger
/// preview fetchers, and uptime monitors.
const BOT_LEXICON: &[&str] = &[
    // generic crawler markers
    "bot",
    "spider",
    "crawler",
    "scraper",
    // search engines
    "googlebot",
    "bingbot",
    "duckduckbot",
    "yandexbot",
    "baiduspider",
    "slurp",
    // SEO crawlers
    "ahrefsbot",
    "semrushbot",
    "mj12bot",
    "dotbot",
    "screaming frog",
    // HTTP libraries
    "curl/",
    "wget/",
    "python-requests",
    "python-urllib",
    "go-http-client",
    "okhttp",
    "libwww-perl",
    "httpclient",
    "axios/",
    "node-fetch",
    "java/",
    "ruby",
    "aiohttp",
    // automation frameworks
    "headlesschrome",
    "phantomjs",
    "slimerjs",
    "htmlunit",
    "selenium",
    "puppeteer",
    "playwright",
    "electron",
    // messengers and preview fetchers
    "facebookexternalhit",
    "whatsapp",
    "telegrambot",
    "slackbot",
    "discordbot",
    "twitterbot",
    "linkedinbot",
    "skypeuripreview",
    // monitoring
    "pingdom",
    "uptimerobot",
    "statuscake",
    "site24x7",
    "newrelicpinger",
];

const MIN_UA_LENGTH: usize = 10;

fn major_version(version: &str) -> Option<u32> {
    version.split('.').next()?.parse().ok()
}

/// Spoofing heuristics over the raw UA string: token combinations no real
/// browser emits.
fn spoofing_flags(ua_lower: &str, major: Option<u32>) -> Vec<String> {
    let mut flags = Vec::new();
    if ua_lower.contains("mozilla")
        && !ua_lower.contains("gecko")
        && !ua_lower.contains("applewebkit")
    {
        flags.push("ua_mozilla_without_engine".to_string());
    }
    if ua_lower.contains("chrome/") && ua_lower.contains("firefox/") {
        flags.push("ua_conflicting_browsers".to_string());
    }
    if let Some(major) = major {
        if major == 0 || major > 300 {
            flags.push("ua_impossible_version".to_string());
        }
    }
    flags
}

pub fn analyze(
    descriptor: &VisitorDescriptor,
    outdated: &OutdatedBrowserThresholds,
) -> AnalyzerResult {
    let ua = descriptor.user_agent.trim();
    if ua.is_empty() {
        return AnalyzerResult::scored(1.0, 0.95).with_flag("ua_missing");
    }
    if ua.len() < MIN_UA_LENGTH {
        return AnalyzerResult::scored(1.0, 0.95).with_flag("ua_too_short");
    }

    let ua_lower = ua.to_lowercase();
    if let Some(token) = BOT_LEXICON.iter().find(|t| ua_lower.contains(*t)) {
        return AnalyzerResult::scored(1.0, 0.95)
            .with_flag(format!("ua_bot_signature:{token}"))
            .with_detail("matched_token", token.to_string());
    }

    let major = descriptor
        .ua
        .as_ref()
        .and_then(|u| u.browser_version.as_deref())
        .and_then(major_version);

    let spoofing = spoofing_flags(&ua_lower, major);
    if !spoofing.is_empty() {
        let mut result = AnalyzerResult::scored(0.9, 0.85);
        result.flags = spoofing;
        return result;
    }

    let Some(ua_info) = descriptor.ua.as_ref() else {
        return AnalyzerResult::scored(0.7, 0.6).with_flag("ua_unrecognized");
    };

    let threshold = match ua_info.browser.as_str() {
        "Chrome" => Some(outdated.chrome),
        "Firefox" => Some(outdated.firefox),
        "Safari" => Some(outdated.safari),
        "Edge" => Some(outdated.edge),
        _ => None,
    };
    if let (Some(threshold), Some(major)) = (threshold, major) {
        if major < threshold {
            return AnalyzerResult::scored(0.6, 0.7)
                .with_flag("ua_outdated_browser")
                .with_detail("browser", ua_info.browser.clone())
                .with_detail("major_version", major);
        }
    }

    AnalyzerResult::clean()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::testutil::clean_descriptor;

    fn defaults() -> OutdatedBrowserThresholds {
        OutdatedBrowserThresholds::default()
    }

    #[test]
    fn clean_chrome_scores_zero() {
        let result = analyze(&clean_descriptor(), &defaults());
        assert_eq!(result.score, 0.0);
        assert!(result.flags.is_empty());
    }

    #[test]
    fn empty_ua_is_a_bot() {
        let mut d = clean_descriptor();
        d.user_agent = String::new();
        d.ua = None;
        let result = analyze(&d, &defaults());
        assert_eq!(result.score, 1.0);
        assert_eq!(result.confidence, 0.95);
    }

    #[test]
    fn ua_of_exactly_ten_chars_is_not_too_short() {
        let mut d = clean_descriptor();
        d.user_agent = "abcdefghij".to_string(); // exactly 10
        d.ua = None;
        let result = analyze(&d, &defaults());
        assert!(!result.flags.iter().any(|f| f == "ua_too_short"));
        // Still unrecognizable as a browser, which carries its own score.
        assert_eq!(result.score, 0.7);
    }

    #[test]
    fn nine_char_ua_is_too_short() {
        let mut d = clean_descriptor();
        d.user_agent = "abcdefghi".to_string();
        d.ua = None;
        let result = analyze(&d, &defaults());
        assert_eq!(result.score, 1.0);
        assert!(result.flags.iter().any(|f| f == "ua_too_short"));
    }

    #[test]
    fn headless_chrome_hits_lexicon() {
        let mut d = clean_descriptor();
        d.user_agent = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                        (KHTML, like Gecko) HeadlessChrome/115.0 Safari/537.36"
            .to_string();
        let result = analyze(&d, &defaults());
        assert_eq!(result.score, 1.0);
        assert!(result
            .flags
            .iter()
            .any(|f| f.starts_with("ua_bot_signature:")));
    }

    #[test]
    fn curl_hits_lexicon() {
        let mut d = clean_descriptor();
        d.user_agent = "curl/8.4.0".to_string();
        d.ua = None;
        let result = analyze(&d, &defaults());
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn mozilla_without_engine_is_spoofing() {
        let mut d = clean_descriptor();
        d.user_agent = "Mozilla/5.0 (Windows NT 10.0) TotallyRealBrowser/1.0".to_string();
        d.ua = None;
        let result = analyze(&d, &defaults());
        assert_eq!(result.score, 0.9);
        assert!(result
            .flags
            .iter()
            .any(|f| f == "ua_mozilla_without_engine"));
    }

    #[test]
    fn conflicting_browser_tokens_are_spoofing() {
        let mut d = clean_descriptor();
        d.user_agent =
            "Mozilla/5.0 AppleWebKit/537.36 Chrome/120.0.0.0 Firefox/121.0".to_string();
        let result = analyze(&d, &defaults());
        assert_eq!(result.score, 0.9);
        assert!(result.flags.iter().any(|f| f == "ua_conflicting_browsers"));
    }

    #[test]
    fn outdated_chrome_is_flagged() {
        let mut d = clean_descriptor();
        if let Some(ua) = d.ua.as_mut() {
            ua.browser_version = Some("74.0.3729.169".to_string());
        }
        let result = analyze(&d, &defaults());
        assert_eq!(result.score, 0.6);
        assert_eq!(result.confidence, 0.7);
        assert!(result.flags.iter().any(|f| f == "ua_outdated_browser"));
    }
}

use cloakgate_core::detection::AnalyzerResult;
use cloakgate_core::visitor::VisitorDescriptor;

/// UA substrings that name an automation framework outright.
const UA_TOKENS: &[(&str, &str)] = &[
    ("headlesschrome", "generic_headless"),
    ("headless", "generic_headless"),
    ("phantomjs", "phantomjs"),
    ("slimerjs", "generic_headless"),
    ("htmlunit", "generic_headless"),
    ("puppeteer", "puppeteer"),
    ("playwright", "playwright"),
    ("selenium", "selenium"),
];

/// Headers only automation tooling injects.
const AUTOMATION_HEADERS: &[(&str, &str)] = &[
    ("x-automation", "generic_headless"),
    ("x-webdriver", "selenium"),
    ("x-selenium", "selenium"),
    ("x-puppeteer", "puppeteer"),
    ("x-playwright", "playwright"),
    ("webdriver-active", "selenium"),
    ("x-chrome-connected", "generic_headless"),
    ("x-devtools-emulate-network-conditions-client-id", "puppeteer"),
];

const VIRTUAL_GPU_TOKENS: &[&str] = &["swiftshader", "llvmpipe", "mesa offscreen"];

/// Indicators split by specificity: a single strong indicator is close to
/// proof; weak indicators only matter in numbers.
struct Indicators {
    strong: Vec<String>,
    weak: Vec<String>,
    framework: Option<&'static str>,
}

impl Indicators {
    fn strong(&mut self, flag: String, framework: &'static str) {
        self.strong.push(flag);
        if self.framework.is_none() || self.framework == Some("generic_headless") {
            self.framework = Some(framework);
        }
    }
}

fn collect(descriptor: &VisitorDescriptor) -> Indicators {
    let mut ind = Indicators {
        strong: Vec::new(),
        weak: Vec::new(),
        framework: None,
    };

    let ua_lower = descriptor.user_agent.to_lowercase();
    for (token, framework) in UA_TOKENS {
        if ua_lower.contains(token) {
            ind.strong(format!("ua_token:{token}"), framework);
            break;
        }
    }

    for (header, framework) in AUTOMATION_HEADERS {
        if descriptor.has_header(header) {
            ind.strong(format!("automation_header:{header}"), framework);
        }
    }

    if let Some(fp) = descriptor.fingerprint.as_ref() {
        if let Some(env) = fp.environment.as_ref() {
            if env.webdriver == Some(true) {
                ind.strong("webdriver_property".to_string(), "selenium");
            }
            if env.cdp_active == Some(true) {
                ind.strong("cdp_active".to_string(), "puppeteer");
            }
            if env.plugins.is_empty() && env.platform.is_some() {
                ind.weak.push("no_plugins".to_string());
            }
            if env.timezone.as_deref() == Some("UTC") {
                ind.weak.push("utc_timezone".to_string());
            }
            if env.languages.len() == 1 && env.languages[0] == "en-US" {
                ind.weak.push("single_default_language".to_string());
            }
        }
        if let Some(webgl) = fp.webgl.as_ref() {
            let renderer = webgl
                .renderer
                .as_deref()
                .unwrap_or_default()
                .to_lowercase();
            if VIRTUAL_GPU_TOKENS.iter().any(|t| renderer.contains(t)) {
                ind.strong("virtual_gpu_renderer".to_string(), "generic_headless");
            }
        }
        if let Some(screen) = fp.screen.as_ref() {
            let width_full = matches!((screen.width, screen.avail_width), (Some(w), Some(aw)) if w == aw);
            let height_full =
                matches!((screen.height, screen.avail_height), (Some(h), Some(ah)) if h == ah);
            if width_full && height_full {
                ind.weak.push("screen_equals_avail".to_string());
            }
        }
        if let Some(verdict) = fp.headless_detection.as_ref() {
            if verdict.is_headless == Some(true) {
                ind.strong("collector_verdict".to_string(), "generic_headless");
            }
        }
    }

    ind
}

pub fn analyze(descriptor: &VisitorDescriptor) -> AnalyzerResult {
    let ind = collect(descriptor);
    let strong = ind.strong.len();
    let weak = ind.weak.len();

    let (score, confidence) = if strong > 0 {
        (
            (0.85 + 0.05 * strong as f64).min(1.0),
            (0.8 + 0.05 * strong as f64 + 0.02 * weak as f64).min(0.98),
        )
    } else {
        match weak {
            0 => (0.0, 0.9),
            1 => (0.3, 0.5),
            2 => (0.5, 0.6),
            _ => (0.7, 0.7),
        }
    };

    let mut result = AnalyzerResult::scored(score, confidence);
    result.flags = ind.strong.into_iter().chain(ind.weak).collect();
    if score > 0.0 {
        let framework = ind.framework.unwrap_or("generic_headless");
        result = result.with_detail("framework", framework);
    }
    result
}

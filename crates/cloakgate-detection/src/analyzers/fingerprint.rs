use cloakgate_core::detection::AnalyzerResult;
use cloakgate_core::fingerprint::Fingerprint;
use cloakgate_core::visitor::VisitorDescriptor;

/// Canvas hashes produced by blocked or stubbed canvas APIs.
const TRIVIAL_CANVAS_HASHES: &[&str] = &[
    "0000000000000000",
    "ffffffffffffffff",
    "e3b0c44298fc1c14", // sha256 of empty input, truncated
    "d41d8cd98f00b204", // md5 of empty input, truncated
];

/// Renderer strings of software / virtualized GPUs.
const VIRTUAL_RENDERERS: &[(&str, &str)] = &[
    ("swiftshader", "webgl_swiftshader"),
    ("llvmpipe", "webgl_llvmpipe"),
    ("mesa offscreen", "webgl_mesa_offscreen"),
    ("vmware", "webgl_vmware"),
    ("virtualbox", "webgl_virtualbox"),
    ("brian paul", "webgl_software_renderer"),
];

const HEADLESS_RESOLUTIONS: &[(u32, u32)] = &[
    (800, 600),
    (1024, 768),
    (1280, 720),
    (1280, 800),
    (1920, 1080),
];

struct Findings {
    flags: Vec<String>,
    max_severity: f64,
}

impl Findings {
    fn new() -> Self {
        Self {
            flags: Vec::new(),
            max_severity: 0.0,
        }
    }

    fn hit(&mut self, flag: &str, severity: f64) {
        self.flags.push(flag.to_string());
        if severity > self.max_severity {
            self.max_severity = severity;
        }
    }
}

fn check_canvas(fp: &Fingerprint, findings: &mut Findings) {
    let Some(canvas) = fp.canvas.as_ref() else {
        findings.hit("canvas_missing", 0.5);
        return;
    };
    if canvas.is_blocked == Some(true) {
        findings.hit("canvas_blocked", 0.6);
    }
    if canvas.is_empty == Some(true) {
        findings.hit("canvas_empty", 0.6);
    }
    match canvas.hash.as_deref() {
        None | Some("") => findings.hit("canvas_no_hash", 0.5),
        Some(hash) => {
            let lower = hash.to_lowercase();
            let uniform = lower.chars().all(|c| c == '0') || lower.chars().all(|c| c == 'f');
            if uniform || TRIVIAL_CANVAS_HASHES.contains(&lower.as_str()) {
                findings.hit("canvas_trivial_hash", 0.75);
            }
        }
    }
}

fn check_webgl(fp: &Fingerprint, findings: &mut Findings) {
    let Some(webgl) = fp.webgl.as_ref() else {
        return;
    };
    let renderer = webgl
        .renderer
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();
    for (needle, flag) in VIRTUAL_RENDERERS {
        if renderer.contains(needle) {
            findings.hit(flag, 0.8);
            return;
        }
    }
}

fn check_audio(fp: &Fingerprint, findings: &mut Findings) {
    let Some(audio) = fp.audio.as_ref() else {
        return;
    };
    if audio.state.as_deref() == Some("suspended") {
        findings.hit("audio_context_suspended", 0.55);
    }
    let default_profile = audio.sample_rate.map_or(true, |r| r == 44_100)
        && audio.channel_count.map_or(true, |c| c == 2);
    let identical_hashes = match (&audio.oscillator_hash, &audio.dynamics_hash) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    };
    if default_profile && identical_hashes {
        findings.hit("audio_default_profile", 0.65);
    }
}

fn check_screen(fp: &Fingerprint, findings: &mut Findings) {
    let Some(screen) = fp.screen.as_ref() else {
        return;
    };
    if let (Some(w), Some(h), Some(aw)) = (screen.width, screen.height, screen.avail_width) {
        if HEADLESS_RESOLUTIONS.contains(&(w, h)) && w == aw {
            findings.hit("screen_headless_resolution", 0.7);
        }
    }
    if screen.color_depth.is_some_and(|d| d < 24) {
        findings.hit("screen_low_color_depth", 0.55);
    }
    if screen.orientation.is_none() {
        findings.hit("screen_no_orientation", 0.5);
    }
}

fn check_device(fp: &Fingerprint, findings: &mut Findings) {
    let Some(device) = fp.device.as_ref() else {
        return;
    };
    if device
        .hardware_concurrency
        .is_some_and(|c| c == 0 || c > 64)
    {
        findings.hit("device_concurrency_anomaly", 0.65);
    }
    if device.device_memory.is_some_and(|m| m == 0.0 || m > 64.0) {
        findings.hit("device_memory_anomaly", 0.65);
    }
}

fn check_environment(fp: &Fingerprint, findings: &mut Findings) {
    let Some(env) = fp.environment.as_ref() else {
        return;
    };
    if env.timezone.as_deref() == Some("UTC") {
        findings.hit("env_utc_timezone", 0.55);
    }
    if env.languages.len() == 1 && env.languages[0] == "en-US" {
        findings.hit("env_single_default_language", 0.55);
    }
    if env.plugins.is_empty() && env.platform.is_some() {
        findings.hit("env_no_plugins", 0.6);
    }
    if let Some(platform) = env.platform.as_deref() {
        let known = ["win", "mac", "linux", "iphone", "ipad", "android", "x11"];
        if !known.iter().any(|k| platform.to_lowercase().contains(k)) {
            findings.hit("env_unknown_platform", 0.6);
        }
    }
}

fn check_consistency(fp: &Fingerprint, findings: &mut Findings) {
    if let Some(screen) = fp.screen.as_ref() {
        if let (Some(vw), Some(w)) = (screen.viewport_width, screen.width) {
            if vw > w {
                findings.hit("viewport_larger_than_screen", 0.75);
            }
        }
        if let (Some(vh), Some(h)) = (screen.viewport_height, screen.height) {
            if vh > h {
                findings.hit("viewport_larger_than_screen", 0.75);
            }
        }
    }
    let touch = fp
        .device
        .as_ref()
        .and_then(|d| d.max_touch_points)
        .is_some_and(|t| t > 0);
    let desktop_platform = fp
        .environment
        .as_ref()
        .and_then(|e| e.platform.as_deref())
        .is_some_and(|p| {
            let lower = p.to_lowercase();
            lower.contains("win") && !lower.contains("phone") || lower.contains("mac os")
        });
    if touch && desktop_platform {
        findings.hit("touch_on_desktop_platform", 0.7);
    }
}

pub fn analyze(descriptor: &VisitorDescriptor) -> AnalyzerResult {
    let Some(fp) = descriptor.fingerprint.as_ref() else {
        return AnalyzerResult::scored(0.7, 0.8).with_flag("no_fingerprint_data");
    };

    let mut findings = Findings::new();
    check_canvas(fp, &mut findings);
    check_webgl(fp, &mut findings);
    check_audio(fp, &mut findings);
    check_screen(fp, &mut findings);
    check_device(fp, &mut findings);
    check_environment(fp, &mut findings);
    check_consistency(fp, &mut findings);

    let missing_subs = [
        fp.canvas.is_none(),
        fp.webgl.is_none(),
        fp.audio.is_none(),
        fp.screen.is_none(),
        fp.device.is_none(),
        fp.environment.is_none(),
    ]
    .iter()
    .filter(|missing| **missing)
    .count();

    // Missing sub-objects lift confidence: a collector that could not probe
    // half the APIs is itself telling.
    let confidence = (0.6 + 0.05 * missing_subs as f64 + 0.03 * findings.flags.len() as f64)
        .min(0.95);

    let mut result = AnalyzerResult::scored(findings.max_severity, confidence);
    result.flags = findings.flags;
    result.with_detail("missing_subcomponents", missing_subs as u64)
}

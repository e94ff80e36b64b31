use cloakgate_core::detection::AnalyzerResult;
use cloakgate_core::visitor::VisitorDescriptor;

/// Mouse paths within 2% of a straight line are machine-generated.
const LINEARITY_CEILING: f64 = 1.02;
/// Characters per minute beyond sustained human typing.
const SUPERHUMAN_CPM: f64 = 700.0;
const INSTANT_INTERACTION_MS: f64 = 100.0;
/// Milliseconds per form field under which filling counts as scripted.
const FORM_FILL_FLOOR_MS: f64 = 150.0;

pub fn analyze(descriptor: &VisitorDescriptor) -> AnalyzerResult {
    let behavior = descriptor
        .fingerprint
        .as_ref()
        .and_then(|fp| fp.behavior.as_ref());
    let Some(b) = behavior else {
        // No behavior telemetry is normal for first requests; stay neutral.
        return AnalyzerResult::scored(0.0, 0.5);
    };

    let mut flags = Vec::new();

    if b.mouse_linearity.is_some_and(|l| l <= LINEARITY_CEILING && l > 0.0) {
        flags.push("linear_mouse_movement".to_string());
    }
    if b.typing_variance_ms.is_some_and(|v| v == 0.0) {
        flags.push("zero_variance_typing".to_string());
    }
    if b.typing_rate_cpm.is_some_and(|r| r > SUPERHUMAN_CPM) {
        flags.push("superhuman_typing_rate".to_string());
    }
    if b
        .first_interaction_ms
        .is_some_and(|ms| ms < INSTANT_INTERACTION_MS)
    {
        flags.push("instant_interaction".to_string());
    }
    if let (Some(depth), Some(page), Some(viewport)) =
        (b.scroll_depth, b.page_height, b.viewport_height)
    {
        if depth == 0.0 && viewport > 0 && page > viewport.saturating_mul(2) {
            flags.push("no_scroll_on_long_page".to_string());
        }
    }
    if let (Some(fill_ms), Some(fields)) = (b.form_fill_ms, b.form_field_count) {
        if fields > 0 && fill_ms < FORM_FILL_FLOOR_MS * f64::from(fields) {
            flags.push("perfect_form_completion".to_string());
        }
    }

    let score = (0.25 * flags.len() as f64).min(1.0);
    let confidence = (0.5 + 0.1 * flags.len() as f64).min(0.9);
    let mut result = AnalyzerResult::scored(score, confidence);
    result.flags = flags;
    result
}

use dashmap::DashMap;
use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

use crate::campaign::{RuleOperator, RuleType, RuleValue, TargetingRule};
use crate::visitor::VisitorDescriptor;

/// Process-wide cache of compiled targeting-rule patterns, keyed by the
/// pattern text. A malformed pattern is cached as `None` so it is compiled
/// (and logged) once, and evaluates to false forever after.
fn pattern_cache() -> &'static DashMap<String, Option<Regex>> {
    static CACHE: OnceLock<DashMap<String, Option<Regex>>> = OnceLock::new();
    CACHE.get_or_init(DashMap::new)
}

fn compiled(pattern: &str) -> Option<Regex> {
    if let Some(entry) = pattern_cache().get(pattern) {
        return entry.value().clone();
    }
    let compiled = match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(pattern, error = %e, "targeting rule pattern failed to compile");
            None
        }
    };
    pattern_cache().insert(pattern.to_string(), compiled.clone());
    compiled
}

/// The descriptor field a rule of the given type compares against.
///
/// Referer rules match the full referrer URL; everything else matches the
/// UA-parsed field or the geo country code. An absent field is the empty
/// string, so `not_equals` / `not_contains` rules still behave sensibly for
/// visitors missing the attribute.
pub fn descriptor_field(rule_type: RuleType, descriptor: &VisitorDescriptor) -> String {
    match rule_type {
        RuleType::Country => descriptor
            .geo
            .as_ref()
            .and_then(|g| g.country.clone())
            .unwrap_or_default(),
        RuleType::Device => descriptor
            .ua
            .as_ref()
            .map(|u| u.device_type.clone())
            .unwrap_or_default(),
        RuleType::Browser => descriptor
            .ua
            .as_ref()
            .map(|u| u.browser.clone())
            .unwrap_or_default(),
        RuleType::Os => descriptor
            .ua
            .as_ref()
            .map(|u| u.os.clone())
            .unwrap_or_default(),
        RuleType::Referer => descriptor.referrer.clone().unwrap_or_default(),
    }
}

/// Evaluate one operator against a field value.
///
/// equals/not_equals are strict (case-sensitive); contains/not_contains are
/// case-insensitive substring checks; in/not_in require the array value form;
/// regex uses the compiled-pattern cache.
pub fn operator_matches(operator: RuleOperator, field: &str, value: &RuleValue) -> bool {
    match operator {
        RuleOperator::Equals => matches!(value, RuleValue::One(v) if field == v),
        RuleOperator::NotEquals => matches!(value, RuleValue::One(v) if field != v),
        RuleOperator::Contains => match value {
            RuleValue::One(v) => field.to_lowercase().contains(&v.to_lowercase()),
            RuleValue::Many(_) => false,
        },
        RuleOperator::NotContains => match value {
            RuleValue::One(v) => !field.to_lowercase().contains(&v.to_lowercase()),
            RuleValue::Many(_) => false,
        },
        RuleOperator::In => match value {
            RuleValue::Many(values) => values.iter().any(|v| v == field),
            RuleValue::One(_) => false,
        },
        RuleOperator::NotIn => match value {
            RuleValue::Many(values) => !values.iter().any(|v| v == field),
            RuleValue::One(_) => false,
        },
        RuleOperator::Regex => match value {
            RuleValue::One(pattern) => compiled(pattern).is_some_and(|re| re.is_match(field)),
            RuleValue::Many(_) => false,
        },
    }
}

/// A stream passes its rule set iff every include-rule matches and no
/// exclude-rule matches. An empty rule set always passes.
pub fn stream_passes(rules: &[TargetingRule], descriptor: &VisitorDescriptor) -> bool {
    for rule in rules {
        let field = descriptor_field(rule.rule_type, descriptor);
        let matched = operator_matches(rule.operator, &field, &rule.value);
        if rule.include && !matched {
            return false;
        }
        if !rule.include && matched {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visitor::{GeoInfo, UaInfo};
    use std::collections::HashMap;

    fn descriptor(country: Option<&str>, browser: Option<&str>) -> VisitorDescriptor {
        VisitorDescriptor {
            ip: "198.51.100.7".to_string(),
            ip_addr: "198.51.100.7".parse().ok(),
            user_agent: "Mozilla/5.0".to_string(),
            ua: browser.map(|b| UaInfo {
                browser: b.to_string(),
                browser_version: None,
                os: "Windows 10".to_string(),
                os_version: None,
                device_type: "desktop".to_string(),
            }),
            referrer: Some("https://news.example/article".to_string()),
            headers: HashMap::new(),
            fingerprint: None,
            geo: country.map(|c| GeoInfo {
                country: Some(c.to_string()),
                region: None,
                city: None,
                latitude: None,
                longitude: None,
            }),
            fingerprint_hash: "00".repeat(16),
        }
    }

    fn rule(
        rule_type: RuleType,
        operator: RuleOperator,
        value: RuleValue,
        include: bool,
    ) -> TargetingRule {
        TargetingRule {
            id: "r1".to_string(),
            stream_id: "s1".to_string(),
            rule_type,
            operator,
            value,
            include,
        }
    }

    #[test]
    fn empty_rule_set_passes() {
        assert!(stream_passes(&[], &descriptor(Some("US"), Some("Chrome"))));
    }

    #[test]
    fn failing_include_rule_disqualifies() {
        let rules = vec![rule(
            RuleType::Country,
            RuleOperator::Equals,
            RuleValue::One("DE".to_string()),
            true,
        )];
        assert!(!stream_passes(&rules, &descriptor(Some("US"), None)));
    }

    #[test]
    fn matching_exclude_rule_disqualifies() {
        let rules = vec![rule(
            RuleType::Country,
            RuleOperator::In,
            RuleValue::Many(vec!["US".to_string(), "CA".to_string()]),
            false,
        )];
        assert!(!stream_passes(&rules, &descriptor(Some("US"), None)));
    }

    #[test]
    fn include_and_exclude_combine() {
        let rules = vec![
            rule(
                RuleType::Country,
                RuleOperator::Equals,
                RuleValue::One("US".to_string()),
                true,
            ),
            rule(
                RuleType::Browser,
                RuleOperator::Equals,
                RuleValue::One("Firefox".to_string()),
                false,
            ),
        ];
        assert!(stream_passes(&rules, &descriptor(Some("US"), Some("Chrome"))));
        assert!(!stream_passes(&rules, &descriptor(Some("US"), Some("Firefox"))));
    }

    #[test]
    fn contains_is_case_insensitive() {
        assert!(operator_matches(
            RuleOperator::Contains,
            "https://News.Example/page",
            &RuleValue::One("news.example".to_string()),
        ));
    }

    #[test]
    fn in_requires_array_value() {
        assert!(!operator_matches(
            RuleOperator::In,
            "US",
            &RuleValue::One("US".to_string()),
        ));
    }

    #[test]
    fn malformed_regex_evaluates_false() {
        assert!(!operator_matches(
            RuleOperator::Regex,
            "anything",
            &RuleValue::One("([unclosed".to_string()),
        ));
        // Second evaluation hits the cached None.
        assert!(!operator_matches(
            RuleOperator::Regex,
            "anything",
            &RuleValue::One("([unclosed".to_string()),
        ));
    }

    #[test]
    fn regex_matches_referrer() {
        let rules = vec![rule(
            RuleType::Referer,
            RuleOperator::Regex,
            RuleValue::One(r"^https://news\.".to_string()),
            true,
        )];
        assert!(stream_passes(&rules, &descriptor(None, None)));
    }

    #[test]
    fn missing_field_is_empty_string() {
        let d = descriptor(None, None);
        assert_eq!(descriptor_field(RuleType::Country, &d), "");
        let rules = vec![rule(
            RuleType::Country,
            RuleOperator::NotEquals,
            RuleValue::One("US".to_string()),
            true,
        )];
        assert!(stream_passes(&rules, &d));
    }
}

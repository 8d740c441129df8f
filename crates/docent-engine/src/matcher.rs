//! First-match-wins rule selection over an ordered rule list.

use docent_store::Rule;
use regex::RegexBuilder;

/// Selects the first rule whose pattern matches `text`, falling back to the
/// channel default when none does. Patterns are compiled case-insensitive
/// and unanchored (substring semantics). A rule whose pattern fails to
/// compile is skipped with a diagnostic and evaluation continues.
pub fn select_rule<'a>(
    rules: &'a [Rule],
    default_rule: Option<&'a Rule>,
    text: &str,
) -> Option<&'a Rule> {
    for rule in rules {
        let Some(pattern) = rule.pattern.as_deref() else {
            continue;
        };
        let regex = match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(regex) => regex,
            Err(error) => {
                tracing::warn!(
                    rule_id = rule.id,
                    channel = %rule.channel,
                    %error,
                    "skipping rule with invalid pattern"
                );
                continue;
            }
        };
        if regex.is_match(text) {
            return Some(rule);
        }
    }
    default_rule
}

use super::delta::SlotDelta;
use super::schema::{SlotItem, SlotName};
use once_cell::sync::Lazy;
use regex::Regex;

/// Turns one free-text user message into a best-effort slot delta.
///
/// Implementations must be deterministic and must not fail; "nothing found"
/// is an empty delta.
pub trait SlotExtractor: Send + Sync {
    fn extract(&self, message: &str) -> SlotDelta;
}

static SEGMENT_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[;\n\r]+|[.!?]+(?:\s+|$)").expect("valid segment regex"));

/// A label is at most this many characters before the colon.
const MAX_LABEL_CHARS: usize = 40;

pub struct KeywordRule {
    pub slot: SlotName,
    pub keywords: &'static [&'static str],
    pub negatives: &'static [&'static str],
}

/// Keywords are matched as lowercase substrings. A negative hit vetoes the rule.
pub const DEFAULT_RULES: &[KeywordRule] = &[
    KeywordRule {
        slot: SlotName::Title,
        keywords: &["название", "заголов", "title"],
        negatives: &[],
    },
    KeywordRule {
        slot: SlotName::Goal,
        keywords: &["цель", "цели", "goal", "objective"],
        negatives: &[],
    },
    KeywordRule {
        slot: SlotName::Description,
        keywords: &["описание", "проблем", "возможност", "description", "problem"],
        negatives: &[],
    },
    KeywordRule {
        slot: SlotName::ScopeIn,
        keywords: &["входит", "в scope", "in scope"],
        negatives: &["не входит", "out of scope", "вне scope"],
    },
    KeywordRule {
        slot: SlotName::ScopeOut,
        keywords: &["не входит", "out of scope", "вне scope"],
        negatives: &[],
    },
    KeywordRule {
        slot: SlotName::Rules,
        keywords: &["правил", "регламент", "rule"],
        negatives: &[],
    },
    KeywordRule {
        slot: SlotName::Kpi,
        keywords: &["kpi", "показател", "метрик", "metric"],
        negatives: &["leading indicator", "опережающ"],
    },
    KeywordRule {
        slot: SlotName::Constraints,
        keywords: &["огранич", "зависимост", "constraint"],
        negatives: &[],
    },
    KeywordRule {
        slot: SlotName::Priorities,
        keywords: &["приоритет", "priorit"],
        negatives: &[],
    },
    KeywordRule {
        slot: SlotName::UseCases,
        keywords: &["use case", "сценари"],
        negatives: &[],
    },
    KeywordRule {
        slot: SlotName::UserStories,
        keywords: &["user stor", "как пользовател", "я хочу"],
        negatives: &[],
    },
    KeywordRule {
        slot: SlotName::LeadingIndicators,
        keywords: &["leading indicator", "опережающ", "ранние признак"],
        negatives: &[],
    },
    KeywordRule {
        slot: SlotName::BusinessRequirements,
        keywords: &["бизнес-требован", "business requirement"],
        negatives: &[],
    },
    KeywordRule {
        slot: SlotName::FunctionalRequirements,
        keywords: &["функциональн", "functional requirement"],
        negatives: &[],
    },
];

impl KeywordRule {
    fn matches(&self, lowered: &str) -> bool {
        self.keywords.iter().any(|k| lowered.contains(k)) && !self.negatives.iter().any(|n| lowered.contains(n))
    }
}

pub struct KeywordExtractor {
    rules: &'static [KeywordRule],
}

impl Default for KeywordExtractor {
    fn default() -> Self {
        Self { rules: DEFAULT_RULES }
    }
}

impl KeywordExtractor {
    pub fn with_rules(rules: &'static [KeywordRule]) -> Self {
        Self { rules }
    }
}

impl SlotExtractor for KeywordExtractor {
    fn extract(&self, message: &str) -> SlotDelta {
        let mut delta = SlotDelta::new();
        for segment in SEGMENT_SPLIT.split(message).map(str::trim).filter(|s| !s.is_empty()) {
            let lowered = segment.to_lowercase();
            let value = strip_label(segment);
            for rule in self.rules.iter().filter(|rule| rule.matches(&lowered)) {
                if rule.slot.is_list() {
                    delta.push(rule.slot, SlotItem::text(value));
                } else {
                    delta.set(rule.slot, value);
                }
            }
        }
        delta
    }
}

/// `"Основное правило: возврат за 24ч"` becomes `"возврат за 24ч"`. Long
/// prefixes are content, not labels, and are kept.
pub fn strip_label(segment: &str) -> &str {
    let segment = segment.trim();
    match segment.split_once(':') {
        Some((label, rest)) if label.chars().count() <= MAX_LABEL_CHARS && !rest.trim().is_empty() => rest.trim(),
        _ => segment,
    }
}

const DESCRIPTION_LABELS: &[&str] = &["описание", "проблема", "возможность"];

/// Re-scans every user turn of a conversation for labelled lines, scope lines
/// and bullet lists. Later labelled lines override earlier ones.
pub fn extract_from_history<'a>(user_turns: impl IntoIterator<Item = &'a str>) -> SlotDelta {
    let mut delta = SlotDelta::new();
    let mut goal = None;
    let mut description = None;
    let mut scope_in: Vec<&str> = Vec::new();
    let mut scope_out: Vec<&str> = Vec::new();

    for line in user_turns.into_iter().flat_map(str::lines) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let lowered = line.to_lowercase();

        if let Some(value) = labelled_value(line, &lowered, &["цель"]) {
            goal = Some(value);
        }
        if let Some(value) = labelled_value(line, &lowered, DESCRIPTION_LABELS) {
            description = Some(value);
        }

        if lowered.contains("не входит") {
            if !scope_out.contains(&line) {
                scope_out.push(line);
            }
        } else if lowered.contains("входит") && !scope_in.contains(&line) {
            scope_in.push(line);
        }

        if line.starts_with('-') || line.starts_with('•') {
            let item = line.trim_matches(|c: char| c == '-' || c == '•' || c.is_whitespace());
            if item.is_empty() {
                continue;
            }
            let slot = if lowered.contains("kpi") || lowered.contains("показател") {
                SlotName::Kpi
            } else {
                SlotName::Rules
            };
            delta.push(slot, SlotItem::text(item));
        }
    }

    if let Some(goal) = goal {
        delta.set(SlotName::Goal, goal);
    }
    if let Some(description) = description {
        delta.set(SlotName::Description, description);
    }
    if !scope_in.is_empty() {
        delta.set(SlotName::ScopeIn, scope_in.join("; "));
    }
    if !scope_out.is_empty() {
        delta.set(SlotName::ScopeOut, scope_out.join("; "));
    }
    delta
}

fn labelled_value<'l>(line: &'l str, lowered: &str, labels: &[&str]) -> Option<&'l str> {
    let head = lowered.trim_start_matches(|c: char| c == '-' || c == '•' || c.is_whitespace());
    if !labels.iter().any(|label| head.starts_with(label)) {
        return None;
    }
    let (_, value) = line.split_once(':')?;
    let value = value.trim();
    if value.is_empty() { None } else { Some(value) }
}

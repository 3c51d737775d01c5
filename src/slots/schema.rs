use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Whether a slot keeps one value or accumulates a set-like list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Scalar,
    List,
}

/// The fixed set of requirement fields collected during an interview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotName {
    Title,
    Goal,
    Description,
    ScopeIn,
    ScopeOut,
    Rules,
    Kpi,
    Constraints,
    Priorities,
    UseCases,
    UserStories,
    LeadingIndicators,
    BusinessRequirements,
    FunctionalRequirements,
}

impl SlotName {
    pub const ALL: [SlotName; 14] = [
        SlotName::Title,
        SlotName::Goal,
        SlotName::Description,
        SlotName::ScopeIn,
        SlotName::ScopeOut,
        SlotName::Rules,
        SlotName::Kpi,
        SlotName::Constraints,
        SlotName::Priorities,
        SlotName::UseCases,
        SlotName::UserStories,
        SlotName::LeadingIndicators,
        SlotName::BusinessRequirements,
        SlotName::FunctionalRequirements,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotName::Title => "title",
            SlotName::Goal => "goal",
            SlotName::Description => "description",
            SlotName::ScopeIn => "scope_in",
            SlotName::ScopeOut => "scope_out",
            SlotName::Rules => "rules",
            SlotName::Kpi => "kpi",
            SlotName::Constraints => "constraints",
            SlotName::Priorities => "priorities",
            SlotName::UseCases => "use_cases",
            SlotName::UserStories => "user_stories",
            SlotName::LeadingIndicators => "leading_indicators",
            SlotName::BusinessRequirements => "business_requirements",
            SlotName::FunctionalRequirements => "functional_requirements",
        }
    }

    /// Unknown names yield `None`; callers drop them.
    pub fn parse(name: &str) -> Option<SlotName> {
        let name = name.trim();
        SlotName::ALL.iter().copied().find(|slot| slot.as_str() == name)
    }

    pub fn kind(&self) -> SlotKind {
        match self {
            SlotName::Title
            | SlotName::Goal
            | SlotName::Description
            | SlotName::ScopeIn
            | SlotName::ScopeOut => SlotKind::Scalar,
            _ => SlotKind::List,
        }
    }

    pub fn is_list(&self) -> bool {
        self.kind() == SlotKind::List
    }

    /// Only use cases may carry structured records.
    pub fn accepts_records(&self) -> bool {
        matches!(self, SlotName::UseCases)
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured use case as described by the user or the text service.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UseCase {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub actors: Vec<String>,
    #[serde(default)]
    pub preconditions: Vec<String>,
    #[serde(default)]
    pub postconditions: Vec<String>,
    #[serde(default)]
    pub main_flow: Vec<String>,
    #[serde(default)]
    pub alternative_flow: Vec<String>,
}

impl UseCase {
    /// Lenient conversion from loosely shaped JSON. List fields accept a
    /// single string as well as an array of strings.
    pub fn from_value(value: &Value) -> Option<UseCase> {
        let object = value.as_object()?;
        let text = |key: &str| -> String {
            object
                .get(key)
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };
        let list = |key: &str| -> Vec<String> {
            match object.get(key) {
                Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                _ => Vec::new(),
            }
        };

        let use_case = UseCase {
            name: text("name"),
            actors: list("actors"),
            preconditions: list("preconditions"),
            postconditions: list("postconditions"),
            main_flow: list("main_flow"),
            alternative_flow: list("alternative_flow"),
        };

        if use_case.name.is_empty() && use_case.main_flow.is_empty() {
            return None;
        }
        Some(use_case)
    }
}

/// One entry of a list slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlotItem {
    Text(String),
    UseCase(UseCase),
}

impl SlotItem {
    pub fn text(value: impl Into<String>) -> SlotItem {
        SlotItem::Text(value.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SlotItem::Text(text) => Some(text),
            SlotItem::UseCase(_) => None,
        }
    }

    /// Short human label, used for prompts and diagram descriptions.
    pub fn label(&self) -> &str {
        match self {
            SlotItem::Text(text) => text,
            SlotItem::UseCase(use_case) => &use_case.name,
        }
    }
}

/// Current value of a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlotValue {
    Scalar(String),
    List(Vec<SlotItem>),
}

impl SlotValue {
    /// A value counts as filled when a scalar is non-blank or a list has items.
    pub fn is_filled(&self) -> bool {
        match self {
            SlotValue::Scalar(text) => !text.trim().is_empty(),
            SlotValue::List(items) => !items.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SlotValue::Scalar(text) if text.trim().is_empty() => 0,
            SlotValue::Scalar(_) => 1,
            SlotValue::List(items) => items.len(),
        }
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            SlotValue::Scalar(text) => Some(text),
            SlotValue::List(_) => None,
        }
    }

    pub fn items(&self) -> &[SlotItem] {
        match self {
            SlotValue::List(items) => items,
            SlotValue::Scalar(_) => &[],
        }
    }

    /// Text entries only, in order. A scalar reads as a one-item list.
    pub fn texts(&self) -> Vec<String> {
        match self {
            SlotValue::Scalar(text) if text.trim().is_empty() => Vec::new(),
            SlotValue::Scalar(text) => vec![text.clone()],
            SlotValue::List(items) => items
                .iter()
                .filter_map(SlotItem::as_text)
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn use_cases(&self) -> Vec<&UseCase> {
        self.items()
            .iter()
            .filter_map(|item| match item {
                SlotItem::UseCase(use_case) => Some(use_case),
                SlotItem::Text(_) => None,
            })
            .collect()
    }
}

/// Slot values keyed by name. Absent until first write.
pub type SlotMap = BTreeMap<SlotName, SlotValue>;

pub fn is_filled(slots: &SlotMap, slot: SlotName) -> bool {
    slots.get(&slot).is_some_and(SlotValue::is_filled)
}

pub fn filled_count(slots: &SlotMap, slot: SlotName) -> usize {
    slots.get(&slot).map_or(0, SlotValue::len)
}

pub fn scalar<'a>(slots: &'a SlotMap, slot: SlotName) -> Option<&'a str> {
    slots
        .get(&slot)
        .and_then(SlotValue::as_scalar)
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

pub fn texts(slots: &SlotMap, slot: SlotName) -> Vec<String> {
    slots.get(&slot).map(SlotValue::texts).unwrap_or_default()
}

use super::schema::{SlotItem, SlotName, UseCase};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Current version of the structured record the text service is asked to emit.
pub const ENVELOPE_VERSION: u32 = 1;

/// A proposed value for one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaValue {
    One(SlotItem),
    Many(Vec<SlotItem>),
}

impl DeltaValue {
    pub fn items(&self) -> Vec<SlotItem> {
        match self {
            DeltaValue::One(item) => vec![item.clone()],
            DeltaValue::Many(items) => items.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            DeltaValue::One(item) => item_is_empty(item),
            DeltaValue::Many(items) => items.iter().all(item_is_empty),
        }
    }
}

fn item_is_empty(item: &SlotItem) -> bool {
    match item {
        SlotItem::Text(text) => text.trim().is_empty(),
        SlotItem::UseCase(use_case) => use_case.name.is_empty() && use_case.main_flow.is_empty(),
    }
}

/// A partial slot update, either from the text service or the local extractor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotDelta {
    values: BTreeMap<SlotName, DeltaValue>,
}

impl SlotDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.values.values().all(DeltaValue::is_empty)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, slot: SlotName) -> Option<&DeltaValue> {
        self.values.get(&slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SlotName, &DeltaValue)> {
        self.values.iter()
    }

    /// Overwrites whatever was proposed for the slot.
    pub fn set(&mut self, slot: SlotName, text: impl Into<String>) {
        self.values.insert(slot, DeltaValue::One(SlotItem::Text(text.into())));
    }

    /// Appends to the slot's bucket, skipping items already proposed.
    pub fn push(&mut self, slot: SlotName, item: SlotItem) {
        let entry = self
            .values
            .entry(slot)
            .or_insert_with(|| DeltaValue::Many(Vec::new()));
        let promoted = match &mut *entry {
            DeltaValue::Many(items) => {
                if !items.contains(&item) {
                    items.push(item);
                }
                None
            }
            DeltaValue::One(existing) if *existing != item => {
                Some(DeltaValue::Many(vec![existing.clone(), item]))
            }
            DeltaValue::One(_) => None,
        };
        if let Some(promoted) = promoted {
            *entry = promoted;
        }
    }

    pub fn insert(&mut self, slot: SlotName, value: DeltaValue) {
        self.values.insert(slot, value);
    }

    /// Validates a loosely typed JSON object field by field. Unknown keys,
    /// nulls and values of the wrong shape are dropped.
    pub fn from_json_map(map: &Map<String, Value>) -> SlotDelta {
        let mut delta = SlotDelta::new();
        for (key, value) in map {
            let Some(slot) = SlotName::parse(key) else {
                log::debug!("Ignoring unknown slot '{}' in delta", key);
                continue;
            };
            if let Some(parsed) = parse_value(slot, value) {
                delta.insert(slot, parsed);
            }
        }
        delta
    }

    pub fn from_json_value(value: &Value) -> SlotDelta {
        value
            .as_object()
            .map(SlotDelta::from_json_map)
            .unwrap_or_default()
    }
}

fn parse_item(slot: SlotName, value: &Value) -> Option<SlotItem> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(SlotItem::Text(text.trim().to_string())),
        Value::Number(number) => Some(SlotItem::Text(number.to_string())),
        Value::Object(_) if slot.accepts_records() => UseCase::from_value(value).map(SlotItem::UseCase),
        _ => None,
    }
}

fn parse_value(slot: SlotName, value: &Value) -> Option<DeltaValue> {
    match value {
        Value::Array(items) => {
            let mut parsed: Vec<SlotItem> = Vec::new();
            for item in items.iter().filter_map(|item| parse_item(slot, item)) {
                if !parsed.contains(&item) {
                    parsed.push(item);
                }
            }
            if parsed.is_empty() {
                None
            } else {
                Some(DeltaValue::Many(parsed))
            }
        }
        other => parse_item(slot, other).map(DeltaValue::One),
    }
}

/// The versioned record requested from the text service:
/// `{"version": 1, "reply": "...", "slots": {...}}`.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    version: u32,
    #[serde(default)]
    reply: Option<String>,
    #[serde(default)]
    slots: Option<Map<String, Value>>,
}

/// Validated output of one reply-and-slots call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderEnvelope {
    pub reply: Option<String>,
    pub delta: SlotDelta,
}

impl ProviderEnvelope {
    /// Never fails: unusable output becomes a plain reply with an empty delta.
    pub fn parse(raw: &str) -> ProviderEnvelope {
        let trimmed = raw.trim();
        let fallback = || ProviderEnvelope {
            reply: non_blank(trimmed),
            delta: SlotDelta::new(),
        };

        let Some(json) = outermost_object(trimmed) else {
            return fallback();
        };
        let envelope: RawEnvelope = match serde_json::from_str(json) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::debug!("Provider output is not a valid envelope: {}", e);
                return fallback();
            }
        };
        if envelope.version != ENVELOPE_VERSION {
            log::warn!(
                "Provider answered with envelope version {}, expected {}. Ignoring its slots.",
                envelope.version,
                ENVELOPE_VERSION
            );
            return ProviderEnvelope {
                reply: envelope.reply.as_deref().and_then(non_blank),
                delta: SlotDelta::new(),
            };
        }

        ProviderEnvelope {
            reply: envelope.reply.as_deref().and_then(non_blank),
            delta: envelope
                .slots
                .as_ref()
                .map(SlotDelta::from_json_map)
                .unwrap_or_default(),
        }
    }
}

fn non_blank(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() { None } else { Some(text.to_string()) }
}

fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_keys_and_bad_shapes_are_ignored() {
        let delta = SlotDelta::from_json_value(&json!({
            "goal": "Reduce churn",
            "budget": "1M",
            "rules": [null, "", "Refund within 24h", {"name": "not a rule"}],
            "kpi": null,
            "description": {"nested": true},
        }));
        assert_eq!(delta.len(), 2);
        assert_eq!(
            delta.get(SlotName::Goal),
            Some(&DeltaValue::One(SlotItem::text("Reduce churn")))
        );
        assert_eq!(
            delta.get(SlotName::Rules),
            Some(&DeltaValue::Many(vec![SlotItem::text("Refund within 24h")]))
        );
    }

    #[test]
    fn test_use_case_records_accepted_only_for_use_cases() {
        let delta = SlotDelta::from_json_value(&json!({
            "use_cases": [{"name": "Refund", "main_flow": ["Open", "Approve"]}, "Support chat"],
        }));
        let items = delta.get(SlotName::UseCases).unwrap().items();
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], SlotItem::UseCase(_)));
    }

    #[test]
    fn test_push_deduplicates_within_bucket() {
        let mut delta = SlotDelta::new();
        delta.push(SlotName::Rules, SlotItem::text("a"));
        delta.push(SlotName::Rules, SlotItem::text("a"));
        delta.push(SlotName::Rules, SlotItem::text("b"));
        assert_eq!(delta.get(SlotName::Rules).unwrap().items().len(), 2);
    }

    #[test]
    fn test_envelope_parses_fenced_json() {
        let raw = "```json\n{\"version\": 1, \"reply\": \"Какие KPI?\", \"slots\": {\"goal\": \"Снизить отток\"}}\n```";
        let envelope = ProviderEnvelope::parse(raw);
        assert_eq!(envelope.reply.as_deref(), Some("Какие KPI?"));
        assert_eq!(envelope.delta.len(), 1);
    }

    #[test]
    fn test_envelope_falls_back_to_plain_reply() {
        let envelope = ProviderEnvelope::parse("Расскажите о целях проекта.");
        assert_eq!(envelope.reply.as_deref(), Some("Расскажите о целях проекта."));
        assert!(envelope.delta.is_empty());

        let envelope = ProviderEnvelope::parse("{not json}");
        assert!(envelope.delta.is_empty());
        assert_eq!(envelope.reply.as_deref(), Some("{not json}"));
    }

    #[test]
    fn test_envelope_with_unknown_version_drops_slots() {
        let envelope = ProviderEnvelope::parse(r#"{"version": 7, "reply": "ok", "slots": {"goal": "x"}}"#);
        assert_eq!(envelope.reply.as_deref(), Some("ok"));
        assert!(envelope.delta.is_empty());
    }

    #[test]
    fn test_empty_delta_detection() {
        let mut delta = SlotDelta::new();
        assert!(delta.is_empty());
        delta.insert(SlotName::Goal, DeltaValue::One(SlotItem::text("  ")));
        assert!(delta.is_empty());
        delta.set(SlotName::Goal, "x");
        assert!(!delta.is_empty());
    }
}

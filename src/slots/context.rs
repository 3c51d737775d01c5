use super::delta::{DeltaValue, SlotDelta};
use super::policy::CompletenessPolicy;
use super::schema::{SlotItem, SlotMap, SlotName, SlotValue, UseCase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Confidence assigned to a slot once any evidence for it has been seen.
pub const EVIDENCE_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SlotMeta {
    pub confidence: f64,
    pub updated: Option<DateTime<Utc>>,
}

/// Accumulated slot state of one conversation.
///
/// Every key of `slots` has an entry in `meta`. Confidence never decreases.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionContext {
    slots: SlotMap,
    meta: BTreeMap<SlotName, SlotMeta>,
}

#[derive(Serialize)]
struct PersistedContext<'a> {
    slots: &'a SlotMap,
    meta: &'a BTreeMap<SlotName, SlotMeta>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slots(&self) -> &SlotMap {
        &self.slots
    }

    pub fn meta(&self) -> &BTreeMap<SlotName, SlotMeta> {
        &self.meta
    }

    pub fn get(&self, slot: SlotName) -> Option<&SlotValue> {
        self.slots.get(&slot)
    }

    /// Stores a value as-is, bypassing merge rules. Used when restoring state.
    pub fn insert_raw(&mut self, slot: SlotName, value: SlotValue) {
        self.slots.insert(slot, value);
        self.meta.entry(slot).or_default();
    }

    pub fn update(&mut self, delta: &SlotDelta) -> Vec<SlotName> {
        self.update_at(delta, Utc::now())
    }

    /// Merges a delta. List slots take the union in first-seen order, scalar
    /// slots take the latest non-empty value. Empty values never erase data.
    /// Returns the slots whose value actually changed.
    pub fn update_at(&mut self, delta: &SlotDelta, now: DateTime<Utc>) -> Vec<SlotName> {
        let mut changed = Vec::new();
        for (slot, value) in delta.iter() {
            if value.is_empty() {
                continue;
            }
            let modified = if slot.is_list() {
                self.merge_list(*slot, value)
            } else {
                self.set_scalar(*slot, value)
            };

            let meta = self.meta.entry(*slot).or_default();
            meta.confidence = meta.confidence.max(EVIDENCE_CONFIDENCE);
            if modified {
                meta.updated = Some(now);
                changed.push(*slot);
            }
        }
        changed
    }

    fn merge_list(&mut self, slot: SlotName, value: &DeltaValue) -> bool {
        let (mut items, mut modified) = match self.slots.remove(&slot) {
            Some(SlotValue::List(items)) => (items, false),
            Some(SlotValue::Scalar(text)) if !text.trim().is_empty() => {
                (vec![SlotItem::Text(text.trim().to_string())], true)
            }
            Some(SlotValue::Scalar(_)) | None => (Vec::new(), false),
        };

        for item in value.items() {
            let Some(item) = normalize_item(item) else {
                continue;
            };
            if !items.contains(&item) {
                items.push(item);
                modified = true;
            }
        }

        self.slots.insert(slot, SlotValue::List(items));
        modified
    }

    fn set_scalar(&mut self, slot: SlotName, value: &DeltaValue) -> bool {
        let text = match value {
            DeltaValue::One(item) => item.label().trim().to_string(),
            DeltaValue::Many(items) => items
                .iter()
                .map(|item| item.label().trim())
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join("; "),
        };
        if text.is_empty() {
            return false;
        }
        if self.slots.get(&slot).and_then(SlotValue::as_scalar) == Some(text.as_str()) {
            return false;
        }
        self.slots.insert(slot, SlotValue::Scalar(text));
        true
    }

    /// Applies a delta to a copy, leaving this context untouched.
    pub fn merged_with(&self, delta: &SlotDelta) -> SessionContext {
        let mut merged = self.clone();
        merged.update(delta);
        merged
    }

    pub fn is_complete(&self) -> bool {
        CompletenessPolicy::standard().is_satisfied(&self.slots)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&PersistedContext {
            slots: &self.slots,
            meta: &self.meta,
        })
        .unwrap_or_default()
    }

    /// Malformed or absent input decodes to a fresh context.
    pub fn from_json(encoded: Option<&str>) -> SessionContext {
        let Some(encoded) = encoded.map(str::trim).filter(|s| !s.is_empty()) else {
            return SessionContext::new();
        };
        let value: Value = match serde_json::from_str(encoded) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Stored session context is not valid JSON ({}). Starting fresh.", e);
                return SessionContext::new();
            }
        };
        let Some(object) = value.as_object() else {
            return SessionContext::new();
        };

        match object.get("slots") {
            Some(Value::Object(slots)) => {
                let meta = object.get("meta").and_then(Value::as_object);
                Self::decode(slots, meta)
            }
            Some(_) => SessionContext::new(),
            // Older records stored the bare slot map.
            None => Self::decode(object, None),
        }
    }

    fn decode(slots: &Map<String, Value>, meta: Option<&Map<String, Value>>) -> SessionContext {
        let mut context = SessionContext::new();

        for (key, value) in slots {
            let Some(slot) = SlotName::parse(key) else {
                continue;
            };
            if let Some(value) = decode_value(slot, value) {
                context.slots.insert(slot, value);
            }
        }

        for (key, value) in meta.into_iter().flatten() {
            let Some(slot) = SlotName::parse(key) else {
                continue;
            };
            if let Ok(mut decoded) = serde_json::from_value::<SlotMeta>(value.clone()) {
                decoded.confidence = decoded.confidence.clamp(0.0, 1.0);
                context.meta.insert(slot, decoded);
            }
        }

        let keys: Vec<SlotName> = context.slots.keys().copied().collect();
        for slot in keys {
            context.meta.entry(slot).or_default();
        }
        context
    }
}

fn normalize_item(item: SlotItem) -> Option<SlotItem> {
    match item {
        SlotItem::Text(text) => {
            let text = text.trim();
            if text.is_empty() {
                None
            } else {
                Some(SlotItem::Text(text.to_string()))
            }
        }
        SlotItem::UseCase(use_case) if use_case.name.is_empty() && use_case.main_flow.is_empty() => None,
        other => Some(other),
    }
}

fn decode_value(slot: SlotName, value: &Value) -> Option<SlotValue> {
    match (slot.is_list(), value) {
        (_, Value::Null) => None,
        (false, Value::String(text)) if text.trim().is_empty() => None,
        (false, Value::String(text)) => Some(SlotValue::Scalar(text.clone())),
        (false, Value::Array(items)) => {
            let joined = items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("; ");
            if joined.is_empty() { None } else { Some(SlotValue::Scalar(joined)) }
        }
        (true, Value::Array(items)) => Some(SlotValue::List(
            items
                .iter()
                .filter_map(|item| decode_item(slot, item))
                .collect(),
        )),
        (true, Value::String(text)) if !text.trim().is_empty() => {
            Some(SlotValue::List(vec![SlotItem::Text(text.clone())]))
        }
        _ => None,
    }
}

fn decode_item(slot: SlotName, value: &Value) -> Option<SlotItem> {
    match value {
        Value::String(text) => Some(SlotItem::Text(text.clone())),
        Value::Object(_) if slot.accepts_records() => serde_json::from_value::<UseCase>(value.clone())
            .ok()
            .map(SlotItem::UseCase),
        _ => None,
    }
}

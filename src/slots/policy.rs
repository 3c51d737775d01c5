use super::schema::{SlotMap, SlotName, is_filled};

/// Decides whether a slot snapshot carries enough to generate a document.
///
/// Every slot in `required` must be filled. When `any_of` is non-empty, at
/// least one of its slots must be filled as well.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletenessPolicy {
    pub required: Vec<SlotName>,
    pub any_of: Vec<SlotName>,
}

impl Default for CompletenessPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl CompletenessPolicy {
    /// The policy used by the service: goal, description, scope, rules and KPI.
    pub fn standard() -> Self {
        Self {
            required: vec![
                SlotName::Goal,
                SlotName::Description,
                SlotName::ScopeIn,
                SlotName::Rules,
                SlotName::Kpi,
            ],
            any_of: Vec::new(),
        }
    }

    pub fn with_any_of(mut self, group: Vec<SlotName>) -> Self {
        self.any_of = group;
        self
    }

    pub fn is_satisfied(&self, slots: &SlotMap) -> bool {
        let required_ok = self.required.iter().all(|slot| is_filled(slots, *slot));
        let group_ok = self.any_of.is_empty() || self.any_of.iter().any(|slot| is_filled(slots, *slot));
        required_ok && group_ok
    }

    /// Required slots still empty, in policy order. An unmet `any_of` group
    /// is reported by its first member.
    pub fn missing(&self, slots: &SlotMap) -> Vec<SlotName> {
        let mut missing: Vec<SlotName> = self
            .required
            .iter()
            .copied()
            .filter(|slot| !is_filled(slots, *slot))
            .collect();
        if !self.any_of.is_empty() && !self.any_of.iter().any(|slot| is_filled(slots, *slot)) {
            missing.push(self.any_of[0]);
        }
        missing
    }
}

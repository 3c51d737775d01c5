use super::schema::{SlotMap, SlotName, filled_count};

pub const GOAL_QUESTION: &str = "Какова главная бизнес-цель проекта? Опишите её измеримо.";
pub const DESCRIPTION_QUESTION: &str =
    "Опишите проблему/возможность: почему инициирован проект и какие боли решаем?";
pub const SCOPE_QUESTION: &str = "Что входит в scope? Перечислите функциональные области и процессы.";
pub const RULES_QUESTION: &str = "Перечислите ключевые бизнес-правила, ограничения и зависимости.";
pub const KPI_QUESTION: &str = "Назовите KPI с целевыми значениями и периодичностью измерения.";
pub const USE_CASE_QUESTION: &str =
    "Опишите основной Use Case: актор, предусловия, шаги основного сценария, альтернативы.";
pub const USER_STORIES_QUESTION: &str =
    "Сформулируйте не менее 3 User Stories в формате: Как [роль] я хочу [действие], чтобы [ценность].";
pub const LEADING_INDICATORS_QUESTION: &str =
    "Назовите leading indicators: ранние признаки, что движение к цели успешно.";
pub const REFINE_QUESTION: &str = "Уточните детали, которые считаете важными для полноты документа.";

/// Minimum number of user stories before the planner moves on.
pub const MIN_USER_STORIES: usize = 3;

/// (slot, minimum count, question), in the order slots are asked for.
const PLAN: [(SlotName, usize, &str); 8] = [
    (SlotName::Goal, 1, GOAL_QUESTION),
    (SlotName::Description, 1, DESCRIPTION_QUESTION),
    (SlotName::ScopeIn, 1, SCOPE_QUESTION),
    (SlotName::Rules, 1, RULES_QUESTION),
    (SlotName::Kpi, 1, KPI_QUESTION),
    (SlotName::UseCases, 1, USE_CASE_QUESTION),
    (SlotName::UserStories, MIN_USER_STORIES, USER_STORIES_QUESTION),
    (SlotName::LeadingIndicators, 1, LEADING_INDICATORS_QUESTION),
];

/// First slot in plan order that is missing or below its threshold.
pub fn next_target(slots: &SlotMap) -> Option<SlotName> {
    PLAN.iter()
        .find(|(slot, minimum, _)| filled_count(slots, *slot) < *minimum)
        .map(|(slot, _, _)| *slot)
}

/// Always answers; a fully populated snapshot gets the generic refinement prompt.
pub fn next_question(slots: &SlotMap) -> &'static str {
    PLAN.iter()
        .find(|(slot, minimum, _)| filled_count(slots, *slot) < *minimum)
        .map_or(REFINE_QUESTION, |(_, _, question)| *question)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::schema::{SlotItem, SlotValue};

    fn list(items: &[&str]) -> SlotValue {
        SlotValue::List(items.iter().map(|s| SlotItem::text(*s)).collect())
    }

    #[test]
    fn test_empty_snapshot_asks_for_goal() {
        assert_eq!(next_question(&SlotMap::new()), GOAL_QUESTION);
        assert_eq!(next_target(&SlotMap::new()), Some(SlotName::Goal));
    }

    #[test]
    fn test_goal_only_asks_for_description() {
        let mut slots = SlotMap::new();
        slots.insert(SlotName::Goal, SlotValue::Scalar("Reduce churn".into()));
        assert_eq!(next_question(&slots), DESCRIPTION_QUESTION);
    }

    #[test]
    fn test_empty_rules_list_asks_for_rules() {
        let mut slots = SlotMap::new();
        slots.insert(SlotName::Goal, SlotValue::Scalar("g".into()));
        slots.insert(SlotName::Description, SlotValue::Scalar("d".into()));
        slots.insert(SlotName::ScopeIn, SlotValue::Scalar("s".into()));
        slots.insert(SlotName::Rules, list(&[]));
        slots.insert(SlotName::Kpi, list(&[]));
        assert_eq!(next_question(&slots), RULES_QUESTION);
    }

    #[test]
    fn test_user_stories_need_three() {
        let mut slots = SlotMap::new();
        slots.insert(SlotName::Goal, SlotValue::Scalar("g".into()));
        slots.insert(SlotName::Description, SlotValue::Scalar("d".into()));
        slots.insert(SlotName::ScopeIn, SlotValue::Scalar("s".into()));
        slots.insert(SlotName::Rules, list(&["r"]));
        slots.insert(SlotName::Kpi, list(&["k"]));
        slots.insert(SlotName::UseCases, list(&["u"]));
        slots.insert(SlotName::UserStories, list(&["a", "b"]));
        assert_eq!(next_question(&slots), USER_STORIES_QUESTION);

        slots.insert(SlotName::UserStories, list(&["a", "b", "c"]));
        assert_eq!(next_question(&slots), LEADING_INDICATORS_QUESTION);

        slots.insert(SlotName::LeadingIndicators, list(&["early signups"]));
        assert_eq!(next_question(&slots), REFINE_QUESTION);
        assert_eq!(next_target(&slots), None);
    }

    #[test]
    fn test_blank_scalar_counts_as_missing() {
        let mut slots = SlotMap::new();
        slots.insert(SlotName::Goal, SlotValue::Scalar("   ".into()));
        assert_eq!(next_question(&slots), GOAL_QUESTION);
    }
}

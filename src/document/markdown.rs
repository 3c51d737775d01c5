use crate::slots::schema::{SlotItem, SlotMap, SlotName, UseCase, scalar, texts};
use crate::templates::{self, BRD_TEMPLATE};
use minijinja::Value;
use pulldown_cmark::{Options, Parser, html};
use serde::Serialize;

#[derive(Serialize)]
#[serde(untagged)]
enum UseCaseView<'a> {
    Text { text: &'a str },
    Record(&'a UseCase),
}

#[derive(Serialize)]
struct BrdView<'a> {
    title: &'a str,
    goal: Option<&'a str>,
    description: Option<&'a str>,
    scope_in: Option<&'a str>,
    scope_out: Option<&'a str>,
    rules: Vec<String>,
    constraints: Vec<String>,
    priorities: Vec<String>,
    kpi: Vec<String>,
    business_requirements: Vec<String>,
    functional_requirements: Vec<String>,
    use_cases: Vec<UseCaseView<'a>>,
    user_stories: Vec<String>,
    leading_indicators: Vec<String>,
}

impl<'a> BrdView<'a> {
    fn new(slots: &'a SlotMap, title: &'a str) -> Self {
        let use_cases = slots
            .get(&SlotName::UseCases)
            .map(|value| {
                value
                    .items()
                    .iter()
                    .map(|item| match item {
                        SlotItem::Text(text) => UseCaseView::Text { text },
                        SlotItem::UseCase(use_case) => UseCaseView::Record(use_case),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            title,
            goal: scalar(slots, SlotName::Goal),
            description: scalar(slots, SlotName::Description),
            scope_in: scalar(slots, SlotName::ScopeIn),
            scope_out: scalar(slots, SlotName::ScopeOut),
            rules: texts(slots, SlotName::Rules),
            constraints: texts(slots, SlotName::Constraints),
            priorities: texts(slots, SlotName::Priorities),
            kpi: texts(slots, SlotName::Kpi),
            business_requirements: texts(slots, SlotName::BusinessRequirements),
            functional_requirements: texts(slots, SlotName::FunctionalRequirements),
            use_cases,
            user_stories: texts(slots, SlotName::UserStories),
            leading_indicators: texts(slots, SlotName::LeadingIndicators),
        }
    }
}

/// Renders the built-in requirements template. Missing sections read `TBD`.
pub fn render_markdown(slots: &SlotMap, title: &str) -> String {
    let view = BrdView::new(slots, title);
    match templates::render(BRD_TEMPLATE, Value::from_serialize(&view)) {
        Ok(markdown) => markdown.trim_end().to_string() + "\n",
        Err(e) => {
            log::error!("Failed to render requirements template: {}", e);
            format!("# {}\n\nTBD\n", title)
        }
    }
}

pub fn markdown_to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(markdown, options);
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::schema::SlotValue;

    #[test]
    fn test_empty_slots_render_tbd_everywhere() {
        let markdown = render_markdown(&SlotMap::new(), "Бизнес-требования");
        assert!(markdown.starts_with("# Бизнес-требования\n"));
        assert!(markdown.contains("## Цель\nTBD"));
        assert!(markdown.contains("## KPI\n- TBD"));
        assert!(markdown.contains("## Use Cases\n- TBD"));
    }

    #[test]
    fn test_filled_slots_render_lists_and_use_cases() {
        let mut slots = SlotMap::new();
        slots.insert(SlotName::Goal, SlotValue::Scalar("Снизить отток".into()));
        slots.insert(
            SlotName::Kpi,
            SlotValue::List(vec![SlotItem::text("NPS > 50"), SlotItem::text("Отток < 3%")]),
        );
        slots.insert(
            SlotName::UseCases,
            SlotValue::List(vec![
                SlotItem::UseCase(UseCase {
                    name: "Возврат".into(),
                    actors: vec!["Клиент".into(), "Оператор".into()],
                    main_flow: vec!["Открыть заявку".into(), "Подтвердить".into()],
                    ..Default::default()
                }),
                SlotItem::text("Чат поддержки"),
            ]),
        );

        let markdown = render_markdown(&slots, "BRD");
        assert!(markdown.contains("## Цель\nСнизить отток"));
        assert!(markdown.contains("- NPS > 50\n- Отток < 3%"));
        assert!(markdown.contains("### UC-1. Возврат"));
        assert!(markdown.contains("**Акторы:** Клиент, Оператор"));
        assert!(markdown.contains("1. Открыть заявку\n2. Подтвердить"));
        assert!(markdown.contains("- Чат поддержки"));
        assert!(markdown.contains("**Предусловия:** TBD"));
    }

    #[test]
    fn test_markdown_to_html_supports_tables() {
        let html = markdown_to_html("# T\n\n| KPI | Цель |\n|-----|------|\n| NPS | 50 |\n");
        assert!(html.contains("<h1>T</h1>"));
        assert!(html.contains("<table>"));
        assert!(html.contains("<td>NPS</td>"));
    }
}

use crate::provider::Assistant;
use crate::slots::schema::{SlotMap, SlotName, scalar, texts};
use crate::templates::{self, DIAGRAM_TEMPLATE};
use minijinja::Value;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

pub const DIAGRAM_TITLE: &str = "Диаграмма бизнес-процесса";
pub const DIAGRAM_FILENAME: &str = "process_diagram.svg";
pub const DIAGRAM_MIME: &str = "image/svg+xml";

const MAX_STEPS: usize = 8;
const MIN_ASSISTANT_STEPS: usize = 4;
const MAX_STEP_CHARS: usize = 60;
const MAX_BOX_CHARS: usize = 55;

const WIDTH: i32 = 850;
const CENTER: i32 = WIDTH / 2;
const ROW_HEIGHT: i32 = 85;
const FIRST_ROW: i32 = 85;
const BOX_FILLS: [&str; 4] = ["#dbeafe", "#e0e7ff", "#e0f2fe", "#ddd6fe"];

pub const DEFAULT_STEPS: [&str; 8] = [
    "Инициация проекта",
    "Сбор и анализ требований",
    "Проектирование решения",
    "Разработка и тестирование",
    "Внедрение системы",
    "Обучение пользователей",
    "Мониторинг и оптимизация",
    "Завершение проекта",
];

const DECISION_MARKERS: [&str; 4] = ["?", "решение", "выбор", "проверка"];

static NUMBERING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+[.)]\s*").expect("valid numbering regex"));
static BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-*•]\s*").expect("valid bullet regex"));
static BOLD_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\*\*.*?\*\*:?\s*").expect("valid bold regex"));

/// A rendered process flowchart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessDiagram {
    pub steps: Vec<String>,
    pub svg: String,
}

impl ProcessDiagram {
    pub fn bytes(&self) -> &[u8] {
        self.svg.as_bytes()
    }
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Short project summary used to derive process steps. Empty when the slots
/// carry nothing useful.
pub fn build_description(slots: &SlotMap) -> String {
    let mut parts = Vec::new();

    if let Some(title) = scalar(slots, SlotName::Title) {
        parts.push(format!("Проект: {}", title));
    }
    if let Some(goal) = scalar(slots, SlotName::Goal) {
        parts.push(format!("Цель: {}", goal));
    }
    if let Some(description) = scalar(slots, SlotName::Description) {
        parts.push(format!("Описание: {}", description));
    }

    let first_three = |slot| texts(slots, slot).into_iter().take(3).collect::<Vec<_>>().join(", ");
    let business = first_three(SlotName::BusinessRequirements);
    if !business.is_empty() {
        parts.push(format!("Бизнес-требования: {}", business));
    }
    let functional = first_three(SlotName::FunctionalRequirements);
    if !functional.is_empty() {
        parts.push(format!("Функциональные требования: {}", functional));
    }

    if let Some(value) = slots.get(&SlotName::UseCases) {
        for use_case in value.use_cases().into_iter().take(2) {
            if use_case.name.is_empty() || use_case.main_flow.is_empty() {
                continue;
            }
            let flow: Vec<&str> = use_case.main_flow.iter().take(5).map(String::as_str).collect();
            parts.push(format!("Use Case '{}': {}", use_case.name, flow.join(" -> ")));
        }
    }

    let kpi = first_three(SlotName::Kpi);
    if !kpi.is_empty() {
        parts.push(format!("KPI: {}", kpi));
    }

    parts.join("\n")
}

/// Cleans the assistant's step list. Fewer than four usable lines is a miss.
pub fn steps_from_assistant(text: &str) -> Option<Vec<String>> {
    let steps: Vec<String> = text
        .lines()
        .map(|line| {
            let line = line.trim();
            let line = NUMBERING.replace(line, "");
            let line = BOLD_PREFIX.replace(&line, "");
            BULLET.replace(&line, "").trim().to_string()
        })
        .filter(|line| (4..80).contains(&line.chars().count()))
        .map(|line| truncate(&line, MAX_STEP_CHARS))
        .take(MAX_STEPS)
        .collect();

    if steps.len() >= MIN_ASSISTANT_STEPS { Some(steps) } else { None }
}

/// Steps parsed from use-case flows, then from `label: value` lines, then
/// the default process.
pub fn steps_from_description(description: &str) -> Vec<String> {
    let mut steps: Vec<String> = Vec::new();

    for line in description.lines().map(str::trim) {
        if !(line.contains("Use Case") && line.contains("->")) {
            continue;
        }
        for part in line.split("->").take(MAX_STEPS) {
            let clean = part.trim().rsplit(':').next().unwrap_or("").trim();
            let clean = NUMBERING.replace(clean, "");
            if clean.chars().count() > 3 {
                steps.push(truncate(&clean, MAX_STEP_CHARS));
            }
        }
    }

    if steps.is_empty() {
        for line in description.lines().map(str::trim) {
            if line.is_empty() || ["Проект:", "Цель:", "KPI:"].iter().any(|x| line.contains(x)) {
                continue;
            }
            if let Some((_, value)) = line.split_once(':') {
                let value = value.trim();
                if (6..70).contains(&value.chars().count()) {
                    steps.push(value.to_string());
                }
            }
        }
    }

    if steps.is_empty() {
        steps = DEFAULT_STEPS.iter().map(|s| s.to_string()).collect();
    }
    steps.truncate(MAX_STEPS);
    steps
}

pub fn is_decision(step: &str) -> bool {
    let lowered = step.to_lowercase();
    DECISION_MARKERS.iter().any(|marker| lowered.contains(marker))
}

#[derive(Serialize)]
struct StepView {
    number: usize,
    text: String,
    decision: bool,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    bottom: i32,
    fill: &'static str,
    points: String,
}

fn layout(index: usize, text: &str) -> StepView {
    let y = FIRST_ROW + ROW_HEIGHT * index as i32;
    let decision = is_decision(text);
    let (width, height) = if decision { (380, 60) } else { (400, 65) };
    let half = width / 2;
    let points = if decision {
        format!(
            "{},{} {},{} {},{} {},{}",
            CENTER,
            y,
            CENTER + half,
            y + height / 2,
            CENTER,
            y + height,
            CENTER - half,
            y + height / 2
        )
    } else {
        String::new()
    };

    StepView {
        number: index + 1,
        text: truncate(text, MAX_BOX_CHARS),
        decision,
        x: CENTER - half,
        y,
        width,
        height,
        bottom: y + height,
        fill: BOX_FILLS[index % BOX_FILLS.len()],
        points,
    }
}

pub fn render_svg(steps: &[String], title: &str) -> Result<String, minijinja::Error> {
    let views: Vec<StepView> = steps.iter().enumerate().map(|(i, s)| layout(i, s)).collect();
    templates::render(
        DIAGRAM_TEMPLATE,
        minijinja::context! {
            width => WIDTH,
            height => 100 + ROW_HEIGHT * steps.len() as i32,
            center => CENTER,
            title => title,
            steps => Value::from_serialize(&views),
        },
    )
}

/// Builds the process diagram for a slot snapshot. `None` when there is no
/// data to describe or rendering failed.
pub async fn generate(assistant: &Assistant, slots: &SlotMap) -> Option<ProcessDiagram> {
    let description = build_description(slots);
    if description.is_empty() {
        return None;
    }

    let assisted = match assistant.diagram_steps(&description).await {
        Some(text) => steps_from_assistant(&text),
        None => None,
    };
    let steps = assisted.unwrap_or_else(|| {
        log::info!("Deriving diagram steps from the project description");
        steps_from_description(&description)
    });

    match render_svg(&steps, DIAGRAM_TITLE) {
        Ok(svg) => Some(ProcessDiagram { steps, svg }),
        Err(e) => {
            log::error!("Failed to render process diagram: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::schema::{SlotItem, SlotValue, UseCase};

    fn slots_with_use_case() -> SlotMap {
        let mut slots = SlotMap::new();
        slots.insert(SlotName::Goal, SlotValue::Scalar("Снизить отток".into()));
        slots.insert(
            SlotName::UseCases,
            SlotValue::List(vec![SlotItem::UseCase(UseCase {
                name: "Возврат".into(),
                main_flow: vec![
                    "Открыть заявку".into(),
                    "Проверка документов".into(),
                    "Выплата".into(),
                    "Закрыть заявку".into(),
                    "Отправить отчёт".into(),
                    "Архивировать".into(),
                ],
                ..Default::default()
            })]),
        );
        slots.insert(SlotName::Kpi, SlotValue::List(vec![SlotItem::text("NPS"), SlotItem::text("CSAT")]));
        slots
    }

    #[test]
    fn test_description_lists_flow_and_kpi() {
        let description = build_description(&slots_with_use_case());
        assert_eq!(
            description,
            "Цель: Снизить отток\n\
             Use Case 'Возврат': Открыть заявку -> Проверка документов -> Выплата -> Закрыть заявку -> Отправить отчёт\n\
             KPI: NPS, CSAT"
        );
        assert!(build_description(&SlotMap::new()).is_empty());
    }

    #[test]
    fn test_steps_from_use_case_flow() {
        let steps = steps_from_description(&build_description(&slots_with_use_case()));
        assert_eq!(steps.len(), 5);
        assert_eq!(steps[0], "Открыть заявку");
        assert_eq!(steps[4], "Отправить отчёт");
    }

    #[test]
    fn test_steps_from_label_lines_skip_goal_and_kpi() {
        let description = "Цель: Снизить отток\nОписание: Клиенты уходят к конкурентам\nKPI: NPS";
        assert_eq!(steps_from_description(description), vec!["Клиенты уходят к конкурентам".to_string()]);
    }

    #[test]
    fn test_default_steps_when_nothing_usable() {
        let steps = steps_from_description("Цель: x");
        assert_eq!(steps.len(), 8);
        assert_eq!(steps[0], DEFAULT_STEPS[0]);
    }

    #[test]
    fn test_assistant_steps_are_cleaned() {
        let text = "1. Инициация проекта\n2) **Анализ:** текущего состояния\n- Сбор требований\n• Разработка\nок\n";
        let steps = steps_from_assistant(text).unwrap();
        assert_eq!(
            steps,
            vec!["Инициация проекта", "текущего состояния", "Сбор требований", "Разработка"]
        );
        assert!(steps_from_assistant("Один\nДва шага").is_none());
    }

    #[test]
    fn test_decision_detection() {
        assert!(is_decision("Проверка документов"));
        assert!(is_decision("Клиент согласен?"));
        assert!(!is_decision("Выплата"));
    }

    #[test]
    fn test_svg_escapes_text_and_draws_shapes() {
        let steps = vec!["Старт <A&B>".to_string(), "Проверка?".to_string(), "Финиш".to_string()];
        let svg = render_svg(&steps, DIAGRAM_TITLE).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("height=\"355\""));
        assert!(svg.contains("Старт &lt;A&amp;B&gt;"));
        assert!(svg.contains("<polygon points=\"425,170 615,200 425,230 235,200\""));
        assert_eq!(svg.matches("<line ").count(), 2);
    }

    #[actix_rt::test]
    async fn test_generate_without_assistant_uses_description() {
        let diagram = generate(&Assistant::disabled(), &slots_with_use_case()).await.unwrap();
        assert_eq!(diagram.steps.len(), 5);
        assert!(diagram.svg.contains("Открыть заявку"));
        assert!(generate(&Assistant::disabled(), &SlotMap::new()).await.is_none());
    }
}

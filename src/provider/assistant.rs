use super::{PromptTurn, TextRequest, TextService};
use crate::slots::delta::ProviderEnvelope;
use crate::slots::schema::{SlotMap, SlotName};
use crate::store::StoredMessage;
use std::sync::Arc;
use std::time::Duration;

const INITIAL_BACKOFF: Duration = Duration::from_millis(1000);

pub const SYSTEM_PROMPT: &str = "Ты опытный бизнес-аналитик. Собирай цель, проблему/возможность, scope, \
бизнес-правила, KPI. Веди диалог по шагам, уточняй недостающее. Итог: строго структурированный документ.";

/// Wraps the optional text service with prompts, retries and backoff.
///
/// Every operation returns `None` when no service is configured or every
/// attempt failed; callers fall back to local logic.
#[derive(Clone)]
pub struct Assistant {
    service: Option<Arc<dyn TextService>>,
    retries: u32,
    backoff: Duration,
}

impl Assistant {
    pub fn new(service: Option<Arc<dyn TextService>>, retries: u32) -> Self {
        Self {
            service,
            retries,
            backoff: INITIAL_BACKOFF,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, 0)
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.service.is_some()
    }

    async fn complete(&self, request: TextRequest) -> Option<String> {
        let service = self.service.as_ref()?;
        for attempt in 0..=self.retries {
            if attempt > 0 {
                let delay = self.backoff * 2u32.pow(attempt - 1);
                log::debug!("Retrying {} in {:?} (attempt {})", service.name(), delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }
            match service.complete(&request).await {
                Ok(text) => return Some(text),
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    log::warn!("{} call failed, will retry: {}", service.name(), e);
                }
                Err(e) => {
                    log::warn!("{} call failed: {}", service.name(), e);
                    return None;
                }
            }
        }
        None
    }

    /// Reply text plus a structured slot delta for one chat turn.
    pub async fn reply_and_slots(
        &self,
        history: &[StoredMessage],
        user_message: &str,
        slots: &SlotMap,
    ) -> Option<ProviderEnvelope> {
        if !self.is_enabled() {
            return None;
        }
        let request = TextRequest {
            system: format!("{}\n\n{}", SYSTEM_PROMPT, envelope_instructions(slots)),
            turns: history
                .iter()
                .map(|m| PromptTurn {
                    role: m.role,
                    text: m.text.clone(),
                })
                .collect(),
            prompt: user_message.to_string(),
        };
        let raw = self.complete(request).await?;
        Some(ProviderEnvelope::parse(&raw))
    }

    pub async fn generate_document(&self, slots: &SlotMap, title: &str) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }
        let prompt = format!(
            "Собранные данные (JSON):\n{}\n\nСформируй документ требований в Markdown с разделами: Цель, \
             Описание проблемы/возможности, Scope, Бизнес-правила, KPI, Use Case, User Stories, \
             Leading Indicators. Заголовок: {}",
            slots_json(slots),
            title
        );
        let request = TextRequest {
            system: SYSTEM_PROMPT.to_string(),
            turns: Vec::new(),
            prompt,
        };
        let markdown = strip_fence(&self.complete(request).await?);
        if markdown.is_empty() { None } else { Some(markdown) }
    }

    /// Raw step list for the process diagram, one step per line.
    pub async fn diagram_steps(&self, description: &str) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }
        let prompt = format!(
            "На основе описания проекта создай список ключевых шагов бизнес-процесса.\n\n\
             Описание проекта:\n{}\n\n\
             Требования:\n\
             - Верни 6-8 ключевых шагов процесса\n\
             - Каждый шаг на новой строке\n\
             - Формат: просто текст шага (без номеров, без символов)\n\
             - Логическая последовательность: от начала до конца\n\
             - На русском языке",
            description
        );
        self.complete(TextRequest {
            system: String::new(),
            turns: Vec::new(),
            prompt,
        })
        .await
    }
}

fn slots_json(slots: &SlotMap) -> String {
    serde_json::to_string_pretty(slots).unwrap_or_else(|_| "{}".to_string())
}

fn envelope_instructions(slots: &SlotMap) -> String {
    let names: Vec<&str> = SlotName::ALL.iter().map(SlotName::as_str).collect();
    format!(
        "Отвечай строго одним JSON-объектом без пояснений:\n\
         {{\"version\": 1, \"reply\": \"<ответ пользователю>\", \"slots\": {{<слот>: <значение>}}}}\n\
         Допустимые слоты: {}.\n\
         В slots укажи только новые или уточнённые значения из последнего сообщения. \
         use_cases может содержать объекты с полями name, actors, preconditions, postconditions, \
         main_flow, alternative_flow.\n\
         Уже собрано:\n{}",
        names.join(", "),
        slots_json(slots)
    )
}

fn strip_fence(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop the info string (e.g. "markdown") on the opening line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().trim_end_matches("```").trim().to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::provider::ProviderError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays canned outcomes in order, then keeps failing.
    pub struct ScriptedService {
        script: Mutex<VecDeque<Result<String, ProviderError>>>,
        pub calls: AtomicUsize,
        pub last_request: Mutex<Option<TextRequest>>,
    }

    impl ScriptedService {
        pub fn new(script: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            })
        }

        pub fn replying(texts: &[&str]) -> Arc<Self> {
            Self::new(texts.iter().map(|t| Ok(t.to_string())).collect())
        }
    }

    #[async_trait]
    impl TextService for ScriptedService {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &TextRequest) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::InvalidResponse("script exhausted".into())))
        }
    }

    fn unavailable() -> ProviderError {
        ProviderError::Api {
            status: 503,
            message: "unavailable".into(),
        }
    }

    fn assistant(service: Arc<ScriptedService>, retries: u32) -> Assistant {
        Assistant::new(Some(service as Arc<dyn TextService>), retries).with_backoff(Duration::ZERO)
    }

    #[actix_rt::test]
    async fn test_disabled_assistant_returns_none() {
        let assistant = Assistant::disabled();
        assert!(assistant.reply_and_slots(&[], "hi", &SlotMap::new()).await.is_none());
        assert!(assistant.generate_document(&SlotMap::new(), "t").await.is_none());
        assert!(assistant.diagram_steps("d").await.is_none());
    }

    #[actix_rt::test]
    async fn test_retries_transient_failures() {
        let service = ScriptedService::new(vec![
            Err(unavailable()),
            Ok(r#"{"version": 1, "reply": "Какие KPI?", "slots": {"goal": "Снизить отток"}}"#.into()),
        ]);
        let envelope = assistant(service.clone(), 2)
            .reply_and_slots(&[], "Цель: снизить отток", &SlotMap::new())
            .await
            .unwrap();
        assert_eq!(envelope.reply.as_deref(), Some("Какие KPI?"));
        assert!(envelope.delta.get(SlotName::Goal).is_some());
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[actix_rt::test]
    async fn test_gives_up_after_retry_budget() {
        let service = ScriptedService::new(vec![Err(unavailable()), Err(unavailable()), Err(unavailable())]);
        let result = assistant(service.clone(), 1).diagram_steps("d").await;
        assert!(result.is_none());
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[actix_rt::test]
    async fn test_permanent_failure_is_not_retried() {
        let service = ScriptedService::new(vec![Err(ProviderError::Api {
            status: 401,
            message: "bad key".into(),
        })]);
        assert!(assistant(service.clone(), 3).diagram_steps("d").await.is_none());
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[actix_rt::test]
    async fn test_history_is_forwarded() {
        let service = ScriptedService::replying(&["plain text reply"]);
        let history = vec![
            StoredMessage::user("Привет", chrono::Utc::now()),
            StoredMessage::assistant("Какова цель?", chrono::Utc::now()),
        ];
        let envelope = assistant(service.clone(), 0)
            .reply_and_slots(&history, "Рост", &SlotMap::new())
            .await
            .unwrap();
        assert_eq!(envelope.reply.as_deref(), Some("plain text reply"));
        assert!(envelope.delta.is_empty());

        let request = service.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.turns.len(), 2);
        assert_eq!(request.prompt, "Рост");
        assert!(request.system.contains("\"version\": 1"));
    }

    #[actix_rt::test]
    async fn test_document_fence_is_stripped() {
        let service = ScriptedService::replying(&["```markdown\n# Бизнес-требования\n\nТекст\n```"]);
        let markdown = assistant(service, 0)
            .generate_document(&SlotMap::new(), "Бизнес-требования")
            .await
            .unwrap();
        assert_eq!(markdown, "# Бизнес-требования\n\nТекст");
    }
}

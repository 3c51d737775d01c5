use crate::actors::health::{GetSystemHealth, HealthActor};
use crate::actors::orchestrator::{ChatTurn, DeleteConversation, DiagramPreview, Finish, OrchestratorActor};
use crate::actors::store::{GetDocument, GetHistory, ListConversations, LoadContext, StoreActor};
use crate::config::DocumentConfig;
use crate::dto::api::{
    ChatReply, ChatRequest, ContextResponse, DeleteResponse, DiagramRequest, DiagramResponse, DocumentResponse,
    FinishRequest, HealthResponse, HistoryResponse, SessionsResponse,
};
use crate::errors::ApiError;
use crate::slots::context::SessionContext;
use crate::slots::next_question;
use crate::slots::policy::CompletenessPolicy;
use actix::Addr;
use actix_web::{HttpResponse, web};

pub const NO_DIAGRAM_DATA: &str = "No data to generate diagram";

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/chat/message", web::post().to(chat_message))
        .route("/chat/history/{session_id}", web::get().to(chat_history))
        .route("/chat/finish", web::post().to(chat_finish))
        .route("/context/{session_id}", web::get().to(session_context))
        .route("/sessions", web::get().to(list_sessions))
        .route("/sessions/{session_id}", web::delete().to(delete_session))
        .route("/document/{session_id}", web::get().to(get_document))
        .route("/diagram/generate", web::post().to(generate_diagram));
}

pub async fn health_check(health_actor: web::Data<Addr<HealthActor>>) -> Result<HttpResponse, ApiError> {
    let metrics = health_actor.send(GetSystemHealth).await?;
    Ok(HttpResponse::Ok().json(HealthResponse { status: "ok", metrics }))
}

pub async fn chat_message(
    orchestrator: web::Data<Addr<OrchestratorActor>>,
    body: web::Json<ChatRequest>,
) -> Result<HttpResponse, ApiError> {
    let ChatRequest { session_id, message } = body.into_inner();
    if message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }
    let outcome = orchestrator.send(ChatTurn { session_id, message }).await??;
    Ok(HttpResponse::Ok().json(ChatReply::from(outcome)))
}

pub async fn chat_history(
    store: web::Data<Addr<StoreActor>>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let session_id = path.into_inner();
    let messages = store.send(GetHistory(session_id.clone())).await??;
    Ok(HttpResponse::Ok().json(HistoryResponse::new(session_id, messages)))
}

pub async fn chat_finish(
    orchestrator: web::Data<Addr<OrchestratorActor>>,
    body: Option<web::Json<FinishRequest>>,
) -> Result<HttpResponse, ApiError> {
    let FinishRequest { session_id, title } = body.map(web::Json::into_inner).unwrap_or_default();
    let outcome = orchestrator.send(Finish { session_id, title }).await??;
    Ok(HttpResponse::Ok().json(DocumentResponse::from(outcome)))
}

pub async fn session_context(
    store: web::Data<Addr<StoreActor>>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let session_id = path.into_inner();
    let encoded = store.send(LoadContext(session_id.clone())).await??;
    let context = SessionContext::from_json(encoded.as_deref());
    let policy = CompletenessPolicy::standard();

    Ok(HttpResponse::Ok().json(ContextResponse {
        session_id,
        ready: policy.is_satisfied(context.slots()),
        missing: policy.missing(context.slots()),
        next_question: next_question(context.slots()).to_string(),
        slots: context.slots().clone(),
        meta: context.meta().clone(),
    }))
}

pub async fn list_sessions(store: web::Data<Addr<StoreActor>>) -> Result<HttpResponse, ApiError> {
    let records = store.send(ListConversations).await??;
    Ok(HttpResponse::Ok().json(SessionsResponse::from(records)))
}

pub async fn delete_session(
    orchestrator: web::Data<Addr<OrchestratorActor>>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let session_id = path.into_inner();
    if !orchestrator.send(DeleteConversation(session_id.clone())).await?? {
        return Err(ApiError::NotFound(format!("session {} not found", session_id)));
    }
    Ok(HttpResponse::Ok().json(DeleteResponse { deleted: true }))
}

pub async fn get_document(
    store: web::Data<Addr<StoreActor>>,
    documents: web::Data<DocumentConfig>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let session_id = path.into_inner();
    let response = match store.send(GetDocument(session_id.clone())).await?? {
        Some(document) => DocumentResponse::from_record(session_id, document),
        None => DocumentResponse::placeholder(session_id, &documents.default_title),
    };
    Ok(HttpResponse::Ok().json(response))
}

pub async fn generate_diagram(
    orchestrator: web::Data<Addr<OrchestratorActor>>,
    body: web::Json<DiagramRequest>,
) -> Result<HttpResponse, ApiError> {
    let session_id = body.into_inner().session_id;
    let response = match orchestrator.send(DiagramPreview { session_id }).await? {
        Ok(Some(image)) => DiagramResponse {
            image_base64: Some(image),
            error: None,
        },
        Ok(None) => DiagramResponse {
            image_base64: None,
            error: Some(NO_DIAGRAM_DATA.to_string()),
        },
        Err(e) => {
            log::warn!("Diagram generation failed: {:#}", e);
            DiagramResponse {
                image_base64: None,
                error: Some(e.to_string()),
            }
        }
    };
    Ok(HttpResponse::Ok().json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::health::HealthActor;
    use crate::confluence::ConfluencePublisher;
    use crate::provider::Assistant;
    use crate::slots::planner::DESCRIPTION_QUESTION;
    use crate::store::RuntimeStore;
    use actix::{Actor, SyncArbiter};
    use actix_web::{App, test};
    use serde_json::{Value, json};

    macro_rules! app {
        () => {{
            let runtime = RuntimeStore::new_inmemory();
            let store = SyncArbiter::start(1, move || StoreActor::new(runtime.clone()));
            let health = HealthActor::new().start();
            let orchestrator = OrchestratorActor::new(
                store.clone(),
                health.clone(),
                Assistant::disabled(),
                ConfluencePublisher::disabled(),
                "Бизнес-требования",
            )
            .start();
            test::init_service(
                App::new()
                    .app_data(web::Data::new(store))
                    .app_data(web::Data::new(health))
                    .app_data(web::Data::new(orchestrator))
                    .app_data(web::Data::new(DocumentConfig::default()))
                    .configure(configure),
            )
            .await
        }};
    }

    #[actix_web::test]
    async fn test_health_endpoint() {
        let app = app!();
        let req = test::TestRequest::get().uri("/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "ok");
        assert!(body["metrics"]["thirty_seconds"]["turn"].is_object());
    }

    #[actix_web::test]
    async fn test_chat_then_history_and_context() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/chat/message")
            .set_json(json!({"message": "Цель: снизить отток"}))
            .to_request();
        let reply: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(reply["reply"], DESCRIPTION_QUESTION);
        assert_eq!(reply["state"], "collecting");
        assert_eq!(reply["ready"], false);
        assert!(reply["missing"].as_array().unwrap().contains(&json!("description")));
        let session_id = reply["session_id"].as_str().unwrap().to_string();

        let req = test::TestRequest::get()
            .uri(&format!("/chat/history/{}", session_id))
            .to_request();
        let history: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(history["items"][0]["sender"], "user");
        assert_eq!(history["items"][1]["sender"], "assistant");

        let req = test::TestRequest::get().uri(&format!("/context/{}", session_id)).to_request();
        let context: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(context["slots"]["goal"], "снизить отток");
        assert_eq!(context["meta"]["goal"]["confidence"], 0.7);
        assert_eq!(context["next_question"], DESCRIPTION_QUESTION);
    }

    #[actix_web::test]
    async fn test_empty_message_is_rejected() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/chat/message")
            .set_json(json!({"message": "   "}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_finish_document_and_sessions() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/chat/message")
            .set_json(json!({"session_id": "abc", "message": "Цель: снизить отток"}))
            .to_request();
        let _: Value = test::call_and_read_body_json(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/chat/finish")
            .set_json(json!({"session_id": "abc", "title": "Возвраты"}))
            .to_request();
        let document: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(document["title"], "Возвраты");
        assert!(document["content_markdown"].as_str().unwrap().starts_with("# Возвраты"));
        assert!(document["confluence_url"].is_null());

        let req = test::TestRequest::get().uri("/document/abc").to_request();
        let stored: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(stored["title"], "Возвраты");

        let req = test::TestRequest::get().uri("/sessions").to_request();
        let sessions: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(sessions["items"][0]["id"], "abc");
        assert_eq!(sessions["items"][0]["finished"], true);
    }

    #[actix_web::test]
    async fn test_unknown_document_is_placeholder() {
        let app = app!();
        let req = test::TestRequest::get().uri("/document/nope").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["title"], "Бизнес-требования");
        assert_eq!(body["content_markdown"], "");
    }

    #[actix_web::test]
    async fn test_diagram_without_data() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/diagram/generate")
            .set_json(json!({"session_id": "nope"}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert!(body["image_base64"].is_null());
        assert_eq!(body["error"], NO_DIAGRAM_DATA);
    }

    #[actix_web::test]
    async fn test_delete_session() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/chat/message")
            .set_json(json!({"session_id": "gone", "message": "привет"}))
            .to_request();
        let _: Value = test::call_and_read_body_json(&app, req).await;

        let req = test::TestRequest::delete().uri("/sessions/gone").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["deleted"], true);

        let req = test::TestRequest::delete().uri("/sessions/gone").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);
    }
}

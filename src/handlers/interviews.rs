//! Interview record endpoints.
//!
//! - `POST /api/v1/interviews/{session_id}/start`: the candidate uploads
//!   their resume text and gets a fresh interview attempt
//! - `PUT /api/v1/interviews/{session_id}`: operator upsert of an interview
//!   configuration
//! - `PUT /api/v1/candidates/{candidate_id}`: operator upsert of a candidate
//! - `GET /api/v1/results/{result_id}`: the caller's own interview result

use crate::error::{AppError, GatewayError};
use crate::rooms::RoomEvent;
use crate::state::AppState;
use crate::store::{Candidate, InterviewDetails};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(default, alias = "resume")]
    pub resume_text: String,
}

#[derive(Debug, Deserialize)]
pub struct CandidateRequest {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

fn gateway_to_http(err: GatewayError) -> AppError {
    match err {
        GatewayError::ResumeNotFound => AppError::BadRequest(err.client_message().to_string()),
        GatewayError::InterviewDetailsNotFound => AppError::NotFound(err.client_message().to_string()),
        GatewayError::NotAuthenticated => AppError::Unauthorized(err.client_message().to_string()),
        other => AppError::Internal(other.to_string()),
    }
}

pub async fn start_interview(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<StartRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let candidate = state.auth.authenticate(&req).await.map_err(|err| {
        warn!(error = %err, "Rejected interview start");
        gateway_to_http(GatewayError::NotAuthenticated)
    })?;

    let result = state
        .service
        .start_interview(&candidate, &session_id, &body.resume_text)
        .await
        .map_err(gateway_to_http)?;

    // Open tabs learn about the new attempt without polling
    state.rooms.deliver(
        &candidate.id,
        RoomEvent::new(
            "interview-started",
            json!({ "sessionId": session_id, "interviewId": result.id }),
        ),
    );

    Ok(HttpResponse::Created().json(json!({
        "interviewId": result.id,
        "sessionId": session_id,
        "candidateId": candidate.id
    })))
}

pub async fn upsert_interview(
    path: web::Path<String>,
    body: web::Json<InterviewDetails>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let mut details = body.into_inner();
    details.id = path.into_inner();
    info!(session_id = %details.id, questions = details.questions.len(), "Interview configuration stored");

    state.service.records().upsert_interview(details.clone()).await?;
    Ok(HttpResponse::Ok().json(details))
}

pub async fn upsert_candidate(
    path: web::Path<String>,
    body: web::Json<CandidateRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let candidate_id = path.into_inner();
    let records = state.service.records();
    let attempts = records
        .find_candidate(&candidate_id)
        .await?
        .map_or(0, |existing| existing.number_of_attempts);

    let body = body.into_inner();
    let candidate = Candidate {
        id: candidate_id,
        email: body.email,
        name: body.name,
        number_of_attempts: attempts,
    };
    records.upsert_candidate(candidate.clone()).await?;
    Ok(HttpResponse::Ok().json(candidate))
}

/// Results are visible only to the candidate they belong to; anyone else
/// gets the same 404 as for an unknown id.
pub async fn get_result(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let result_id = path.into_inner();
    let candidate = state.auth.authenticate(&req).await.map_err(|err| {
        debug!(error = %err, "Rejected result lookup");
        gateway_to_http(GatewayError::NotAuthenticated)
    })?;

    match state.service.records().find_result(&result_id).await? {
        Some(result) if result.candidate_id == candidate.id => Ok(HttpResponse::Ok().json(result)),
        _ => Err(AppError::NotFound(format!("Interview result {} not found", result_id))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Claims;
    use crate::config::AppConfig;
    use crate::state::test_support::state_with;
    use crate::store::MemoryRecordStore;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::sync::Arc;

    fn token(config: &AppConfig, id: &str) -> String {
        let claims = Claims {
            id: id.to_string(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.auth.jwt_secret.as_bytes()),
        )
        .unwrap()
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state.clone()))
                    .route("/interviews/{session_id}", web::put().to(upsert_interview))
                    .route("/interviews/{session_id}/start", web::post().to(start_interview))
                    .route("/candidates/{candidate_id}", web::put().to(upsert_candidate))
                    .route("/results/{result_id}", web::get().to(get_result)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_start_interview_flow() {
        let mut config = AppConfig::default();
        config.auth.jwt_secret = "handler-secret".into();
        let state = state_with(config.clone(), Arc::new(MemoryRecordStore::new()));
        let app = app!(state);

        let req = test::TestRequest::put()
            .uri("/candidates/c1")
            .set_json(json!({"email": "cand@example.com"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::put()
            .uri("/interviews/S1")
            .set_json(json!({"duration": "10", "jobPosition": "Backend Engineer"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::post()
            .uri("/interviews/S1/start")
            .insert_header(("Authorization", format!("Bearer {}", token(&config, "c1"))))
            .set_json(json!({"resumeText": "Experienced backend engineer"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        let interview_id = body["interviewId"].as_str().unwrap().to_string();

        let req = test::TestRequest::get()
            .uri(&format!("/results/{interview_id}"))
            .insert_header(("Authorization", format!("Bearer {}", token(&config, "c1"))))
            .to_request();
        let result: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(result["candidateId"], "c1");
        assert_eq!(result["isCompleted"], false);
    }

    #[actix_web::test]
    async fn test_results_are_private_to_their_candidate() {
        let mut config = AppConfig::default();
        config.auth.jwt_secret = "handler-secret".into();
        let state = state_with(config.clone(), Arc::new(MemoryRecordStore::new()));
        let app = app!(state);

        for id in ["c1", "c2"] {
            let req = test::TestRequest::put()
                .uri(&format!("/candidates/{id}"))
                .set_json(json!({"email": format!("{id}@example.com")}))
                .to_request();
            test::call_service(&app, req).await;
        }
        let req = test::TestRequest::put()
            .uri("/interviews/S1")
            .set_json(json!({"duration": "10"}))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/interviews/S1/start")
            .insert_header(("Authorization", format!("Bearer {}", token(&config, "c1"))))
            .set_json(json!({"resumeText": "cv"}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let uri = format!("/results/{}", body["interviewId"].as_str().unwrap());

        let req = test::TestRequest::get().uri(&uri).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri(&uri)
            .insert_header(("Authorization", format!("Bearer {}", token(&config, "c2"))))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_start_interview_rejections() {
        let mut config = AppConfig::default();
        config.auth.jwt_secret = "handler-secret".into();
        let state = state_with(config.clone(), Arc::new(MemoryRecordStore::new()));
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/interviews/S1/start")
            .set_json(json!({"resumeText": "cv"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::put()
            .uri("/candidates/c1")
            .set_json(json!({"email": "cand@example.com"}))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/interviews/missing/start")
            .insert_header(("Authorization", format!("Bearer {}", token(&config, "c1"))))
            .set_json(json!({"resumeText": "cv"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get()
            .uri("/results/nope")
            .insert_header(("Authorization", format!("Bearer {}", token(&config, "c1"))))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }
}

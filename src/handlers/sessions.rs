use crate::{
    error::{AppError, AppResult},
    state::AppState,
};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /api/v1/sessions`: recordings currently being buffered.
pub async fn list_sessions(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let summary = state.pipeline.buffers().summary();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "active_connections": state.active_connections(),
        "summary": summary
    })))
}

/// `GET /api/v1/sessions/{session_id}`
pub async fn get_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let session_id = path.into_inner();
    let info = state
        .pipeline
        .buffers()
        .session_info(&session_id)
        .ok_or_else(|| AppError::NotFound(format!("No active recording for session {}", session_id)))?;

    Ok(HttpResponse::Ok().json(info))
}

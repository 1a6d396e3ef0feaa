use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /api/v1/config`. The API key is masked.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config().redacted();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config
    })))
}

/// `PUT /api/v1/config`: partial update, e.g.
/// `{"performance": {"session_idle_timeout_secs": 120}}`.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    tracing::info!("Configuration updated via API");

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "note": "server, hume and audio settings take effect after a restart",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": current_config.redacted()
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{test, App};

    fn app_state() -> AppState {
        let mut config = AppConfig::default();
        config.hume.api_key = "secret-key".to_string();
        AppState::new(config)
    }

    #[actix_web::test]
    async fn test_get_config_redacts_key() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(app_state()))
                .route("/config", web::get().to(get_config)),
        )
        .await;

        let req = test::TestRequest::get().uri("/config").to_request();
        let value: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(value["config"]["hume"]["api_key"], "********");
        assert_eq!(value["config"]["hume"]["model"], "prosody");
    }

    #[actix_web::test]
    async fn test_update_config_partial_and_invalid() {
        let state = app_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/config", web::put().to(update_config)),
        )
        .await;

        let req = test::TestRequest::put()
            .uri("/config")
            .set_json(serde_json::json!({"performance": {"session_idle_timeout_secs": 120}}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        assert_eq!(state.get_config().performance.session_idle_timeout_secs, 120);
        assert_eq!(state.get_config().hume.api_key, "secret-key");

        let req = test::TestRequest::put()
            .uri("/config")
            .set_json(serde_json::json!({"hume": {"request_timeout_secs": 0}}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
        assert_eq!(state.get_config().hume.request_timeout_secs, 15);
    }
}

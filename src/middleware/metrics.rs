//! Per-endpoint request metrics.
//!
//! Endpoints are keyed by route pattern (`GET /api/v1/sessions/{session_id}`)
//! so ids in the path don't create one entry per session. A WebSocket upgrade
//! is recorded under `WS /ws/prosody` with the handshake time only; the
//! connection itself is tracked by the socket actor.

use crate::state::AppState;
use actix_web::{
    body::MessageBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::StatusCode,
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::rc::Rc;
use std::time::Instant;

/// Wrap an `App` to feed [`AppState::record_request`].
pub struct RequestMetrics;

impl<S, B> Transform<S, ServiceRequest> for RequestMetrics
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestMetricsService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestMetricsService {
            inner: Rc::new(service),
        }))
    }
}

pub struct RequestMetricsService<S> {
    inner: Rc<S>,
}

/// Route pattern of the request, or its raw path when nothing matched.
fn route_of(req: &ServiceRequest) -> String {
    req.match_pattern().unwrap_or_else(|| req.path().to_string())
}

/// Metrics key for a finished exchange.
fn endpoint_key(method: &str, route: &str, status: Option<StatusCode>) -> String {
    match status {
        Some(StatusCode::SWITCHING_PROTOCOLS) => format!("WS {}", route),
        _ => format!("{} {}", method, route),
    }
}

impl<S, B> Service<ServiceRequest> for RequestMetricsService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(inner);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let inner = Rc::clone(&self.inner);

        Box::pin(async move {
            let started = Instant::now();
            let state = req.app_data::<web::Data<AppState>>().cloned();
            let method = req.method().to_string();
            let route = route_of(&req);

            let result = inner.call(req).await;

            if let Some(state) = state {
                let status = result.as_ref().ok().map(|res| res.status());
                let failed = status.map_or(true, |s| s.is_client_error() || s.is_server_error());
                state.record_request(&endpoint_key(&method, &route, status), started.elapsed(), failed);
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{test, App, HttpResponse};

    #[actix_web::test]
    async fn test_records_by_route_pattern() {
        let state = AppState::new(AppConfig::default());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .wrap(RequestMetrics)
                .route("/items/{id}", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        for uri in ["/items/1", "/items/2", "/missing"] {
            test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
        }

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.request_count, 3);
        assert_eq!(metrics.error_count, 1);
        assert_eq!(metrics.endpoint_metrics["GET /items/{id}"].request_count, 2);
        assert_eq!(metrics.endpoint_metrics["GET /missing"].error_count, 1);
    }

    #[actix_web::test]
    async fn test_upgrades_are_keyed_separately() {
        let state = AppState::new(AppConfig::default());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .wrap(RequestMetrics)
                .route(
                    "/ws/prosody",
                    web::get().to(|| async { HttpResponse::SwitchingProtocols().finish() }),
                ),
        )
        .await;

        test::call_service(&app, test::TestRequest::get().uri("/ws/prosody").to_request()).await;

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.endpoint_metrics["WS /ws/prosody"].request_count, 1);
        assert!(!metrics.endpoint_metrics.contains_key("GET /ws/prosody"));
        assert_eq!(metrics.error_count, 0);
    }

    #[::core::prelude::v1::test]
    fn test_endpoint_key() {
        assert_eq!(endpoint_key("GET", "/health", Some(StatusCode::OK)), "GET /health");
        assert_eq!(endpoint_key("PUT", "/api/v1/config", None), "PUT /api/v1/config");
    }
}

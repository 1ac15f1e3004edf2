// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! Operator entrypoint

use actix_web::{
    App, HttpRequest, HttpResponse, HttpServer, Responder, get, middleware, web::Data,
};
use compliance_operator::config::RunConfig;
use compliance_operator::{State, run, telemetry};
use tracing::instrument;

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<State>, _: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[get("/metrics")]
async fn metrics(c: Data<State>, _: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json(c.metrics())
}

#[tokio::main]
#[instrument(level = "info", target = "operator::main", name = "main")]
async fn main() -> anyhow::Result<()> {
    telemetry::init()?;

    let config = RunConfig::from_env();
    let state = State::default();
    let controllers = run(state.clone(), config);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(health)
            .service(index)
            .service(metrics)
    })
    .bind("0.0.0.0:8080")?
    .shutdown_timeout(5);

    tokio::join!(controllers, server.run()).1?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, test};

    #[actix_web::test]
    async fn test_health_endpoint() {
        let app = test::init_service(App::new().service(health)).await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;

        assert!(resp.status().is_success());
        assert_eq!(resp.status(), actix_web::http::StatusCode::OK);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body, "healthy");
    }

    #[actix_web::test]
    async fn test_index_endpoint() {
        let state = State::default();
        let app =
            test::init_service(App::new().app_data(Data::new(state.clone())).service(index)).await;

        let req = test::TestRequest::get().uri("/").to_request();
        let resp = test::call_service(&app, req).await;

        assert!(resp.status().is_success());

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body.is_object(), "Response should be a JSON object");
    }

    #[actix_web::test]
    async fn test_metrics_endpoint() {
        let state = State::default();
        state.metrics.scan_started();
        let app = test::init_service(
            App::new()
                .app_data(Data::new(state.clone()))
                .service(metrics),
        )
        .await;

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["scans_started"], 1);
    }
}

//! HTTP front end (§4.H): a single-socket actix-web server exposing the
//! dispatcher over `POST /mcp`, plus `/status` and `/health` for operators.
//! Every `/mcp` request funnels through the one [`Dispatcher`], which in
//! turn funnels through the single-slot serial transactor — concurrency at
//! the socket never implies concurrency at the device.

use std::sync::Arc;

use actix_web::http::header;
use actix_web::middleware::{Compress, DefaultHeaders, Logger};
use actix_web::{web, App, HttpResponse, HttpServer};

use crate::config::AppConfig;
use crate::dispatcher::Dispatcher;
use crate::error::StartupError;
use crate::supervisor::ConnectionHandle;

async fn mcp(dispatcher: web::Data<Dispatcher>, body: bytes::Bytes) -> HttpResponse {
    let response = dispatcher.handle_body(&body).await;
    HttpResponse::Ok().json(response)
}

async fn status(conn: web::Data<ConnectionHandle>) -> HttpResponse {
    let state = conn.snapshot();
    HttpResponse::Ok().json(serde_json::json!({
        "state": state.name(),
        "message": state.message(),
        "device_id": state.device_id(),
        "ready": state.is_ready(),
    }))
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

async fn cors_preflight() -> HttpResponse {
    HttpResponse::NoContent()
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "POST, GET, OPTIONS"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"))
        .finish()
}

/// Binds and runs the HTTP server until `shutdown` resolves, serving
/// graceful shutdown to actix-web's own drain logic (§4.I).
pub async fn serve(
    config: Arc<AppConfig>,
    conn: ConnectionHandle,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<(), StartupError> {
    let bind_addr = format!("127.0.0.1:{}", config.port);
    let dispatcher = web::Data::new(Dispatcher::new(conn.clone(), config.clone()));
    let conn_data = web::Data::new(conn);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(dispatcher.clone())
            .app_data(conn_data.clone())
            .wrap(Compress::default())
            .wrap(DefaultHeaders::new().add((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")))
            .wrap(Logger::new("%r %s %Dms"))
            .route("/mcp", web::post().to(mcp))
            .route("/status", web::get().to(status))
            .route("/health", web::get().to(health))
            .default_service(web::route().method(actix_web::http::Method::OPTIONS).to(cors_preflight))
    })
    .workers(num_cpus::get().clamp(1, 8))
    .shutdown_timeout(10)
    .bind(&bind_addr)
    .map_err(|source| StartupError::Bind { addr: bind_addr.clone(), source })?
    .run();

    let handle = server.handle();
    let server_task = tokio::spawn(server);

    let _ = shutdown.changed().await;
    handle.stop(true).await;
    let _ = server_task.await;
    Ok(())
}

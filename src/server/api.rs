use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use axum::{ routing::get, Router, extract::State, response::{ Html, IntoResponse }, Json };
use serde::Serialize;
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, error };

use crate::config::settings::TlsPaths;

const PAGE_TEMPLATE: &str = include_str!("../../static/index.html");
const WS_URL_PLACEHOLDER: &str = "{{WS_URL}}";

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Clone)]
struct AppState {
    page: Arc<String>,
}

/// The chat page, wired to the WebSocket endpoint browsers should dial.
pub fn render_page(public_ws_url: &str) -> String {
    PAGE_TEMPLATE.replace(WS_URL_PLACEHOLDER, public_ws_url)
}

pub fn router(public_ws_url: &str) -> Router {
    let app_state = AppState {
        page: Arc::new(render_page(public_ws_url)),
    };

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/", get(page_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(app_state)
}

pub async fn start_http_server(
    addr: &str,
    public_ws_url: &str,
    tls: Option<&TlsPaths>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = addr.parse::<SocketAddr>()?;
    let app = router(public_ws_url);

    if let Some(tls) = tls {
        super::install_crypto_provider();
        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
            &tls.cert_path,
            &tls.key_path
        ).await?;
        info!("Serving chat page on: https://{}", addr);

        tokio::spawn(async move {
            let result = axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await;
            if let Err(e) = result {
                error!("HTTPS server error: {}", e);
            }
        });
    } else {
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e|
            format!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e)
        )?;
        info!("Serving chat page on: http://{}", addr);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                error!("HTTP server error: {}", e);
            }
        });
    }

    Ok(())
}

async fn page_handler(State(state): State<AppState>) -> impl IntoResponse {
    Html(state.page.as_str().to_owned())
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

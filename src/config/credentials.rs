use async_trait::async_trait;
use yup_oauth2::authenticator::DefaultAuthenticator;
use yup_oauth2::{ ServiceAccountAuthenticator, read_service_account_key };
use std::error::Error;
use std::path::Path;
use log::{ debug, info };

pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

/// Supplies bearer tokens for the warehouse REST API.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// Built once per process; the authenticator keeps issued tokens in memory
/// and only goes back to the token endpoint when they near expiry.
pub struct ServiceAccountTokenSource {
    auth: DefaultAuthenticator,
    scopes: Vec<String>,
}

impl ServiceAccountTokenSource {
    pub async fn from_key_file(
        sa_key_path: &str,
        scope: &str
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let key = read_service_account_key(Path::new(sa_key_path))
            .await
            .map_err(|e| format!("Failed to load SA key from {}: {}", sa_key_path, e))?;
        info!("Loaded service account {} for warehouse access", key.client_email);

        crate::server::install_crypto_provider();
        let auth = ServiceAccountAuthenticator::builder(key)
            .build()
            .await
            .map_err(|e| format!("Failed to build service account authenticator: {}", e))?;
        Ok(Self {
            auth,
            scopes: vec![scope.to_string()],
        })
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokenSource {
    async fn access_token(&self) -> Result<String, Box<dyn Error + Send + Sync>> {
        let token = self.auth
            .token(&self.scopes)
            .await
            .map_err(|e| format!("Failed to obtain access token: {}", e))?;
        debug!("Obtained warehouse access token");

        token.token()
            .map(|t| t.to_string())
            .ok_or_else(|| "OAuth token was None".into())
    }
}

/// A pre-issued token, used against local emulators.
pub struct StaticTokenSource(pub String);

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{ routing::post, Json, Router };
    use serde_json::{ json, Value };
    use std::sync::atomic::{ AtomicUsize, Ordering };
    use std::sync::Arc;

    async fn serve_token_endpoint(hits: Arc<AtomicUsize>) -> String {
        let app = Router::new().route(
            "/token",
            post(move || {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json::<Value>(
                        json!({
                        "access_token": "issued-token",
                        "expires_in": 3600,
                        "token_type": "Bearer"
                    })
                    )
                }
            })
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/token", addr)
    }

    fn write_key_file(token_uri: &str) -> std::path::PathBuf {
        let key = json!({
            "type": "service_account",
            "project_id": "demo-project",
            "private_key_id": "test-key",
            "private_key": include_str!("../../testdata/tls/key.pem"),
            "client_email": "assistant@demo-project.iam.gserviceaccount.com",
            "client_id": "1234567890",
            "token_uri": token_uri
        });
        let path = std::env::temp_dir().join(format!("sa-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, key.to_string()).unwrap();
        path
    }

    #[tokio::test]
    async fn service_account_token_is_fetched_once_and_reused() {
        let hits = Arc::new(AtomicUsize::new(0));
        let token_uri = serve_token_endpoint(hits.clone()).await;
        let key_path = write_key_file(&token_uri);

        let source = ServiceAccountTokenSource::from_key_file(
            key_path.to_str().unwrap(),
            BIGQUERY_SCOPE
        ).await.unwrap();
        let first = source.access_token().await.unwrap();
        let second = source.access_token().await.unwrap();
        let _ = std::fs::remove_file(&key_path);

        assert_eq!(first, "issued-token");
        assert_eq!(second, "issued-token");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_key_file_is_reported() {
        let err = ServiceAccountTokenSource::from_key_file("/nonexistent/sa.json", BIGQUERY_SCOPE)
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("/nonexistent/sa.json"));
    }

    #[tokio::test]
    async fn static_token_is_returned_verbatim() {
        let source = StaticTokenSource("emulator".to_string());
        assert_eq!(source.access_token().await.unwrap(), "emulator");
    }
}

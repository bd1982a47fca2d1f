pub mod agent;
pub mod cli;
pub mod config;
pub mod history;
pub mod llm;
pub mod models;
pub mod rag;
pub mod server;
pub mod session;

use agent::AIAgent;
use cli::Args;
use config::settings::{ AppConfig, CredentialSource, TableBackend };
use log::info;
use server::Server;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = AppConfig::from_args(&args)?;

    info!("--- Core Configuration ---");
    info!("WebSocket Address: {}", config.server.ws_addr);
    info!("Page Address: {}", config.server.http_addr);
    info!("Public WebSocket URL: {}", config.server.public_ws_url);
    info!("TLS Enabled: {}", config.server.tls.is_some());
    info!("Chat LLM Type: {}", config.chat.llm_type);
    info!("Chat Model: {}", config.chat.completion_model.as_deref().unwrap_or("provider default"));
    info!("Embedding LLM Type: {}", config.embedding.llm_type);
    match &config.table {
        TableBackend::Memory => info!("Conversation Table: in-memory"),
        TableBackend::BigQuery { table, billing_project, credentials, .. } => {
            info!("Conversation Table: {}", table);
            info!("Billing Project: {}", billing_project);
            let auth = match credentials {
                CredentialSource::ServiceAccount(path) => format!("service account ({})", path),
                CredentialSource::StaticToken(_) => "static access token".to_string(),
            };
            info!("BigQuery Auth: {}", auth);
        }
    }
    info!("Prompts Path: {}", config.prompts_path);
    info!("Summary Chunk Size: {}", config.summary.chunk_size);
    info!("Summary Top K: {}", config.summary.top_k);
    info!("-------------------------");

    let agent = Arc::new(AIAgent::new(&config).await?);
    let server = Server::new(config.server.clone(), agent);
    server.run().await?;

    Ok(())
}

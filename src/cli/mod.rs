use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Chat LLM Provider Args ---
    /// Type of LLM provider for chat completion (openai, ollama)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "openai")]
    pub chat_llm_type: String,

    /// Base URL for the Chat LLM provider API (e.g., https://api.openai.com/v1)
    #[arg(long, env = "CHAT_BASE_URL")] // No default, let adapters handle defaults if None
    pub chat_base_url: Option<String>,

    /// API Key for the Chat LLM provider
    #[arg(long, env = "OPENAI_API_KEY", default_value = "", hide_env_values = true)]
    pub chat_api_key: String,

    /// Model name for chat completion (provider default: gpt-3.5-turbo for openai, llama3 for ollama)
    #[arg(long, env = "CHAT_MODEL")]
    pub chat_model: Option<String>,

    // --- Embedding LLM Provider Args ---
    /// Type of LLM provider for text embedding. Defaults to CHAT_LLM_TYPE if not set.
    #[arg(long, env = "EMBEDDING_LLM_TYPE")]
    pub embedding_llm_type: Option<String>,

    /// Base URL for the Embedding LLM provider API. Defaults to CHAT_BASE_URL if not set.
    #[arg(long, env = "EMBEDDING_BASE_URL")]
    pub embedding_base_url: Option<String>,

    /// API Key for the Embedding LLM provider. Defaults to OPENAI_API_KEY if not set.
    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true)]
    pub embedding_api_key: Option<String>,

    /// Model name for text embedding (e.g., text-embedding-ada-002, nomic-embed-text)
    #[arg(long, env = "EMBEDDING_MODEL")] // No default, rely on adapter defaults if None
    pub embedding_model: Option<String>,

    // --- Conversation Table Args ---
    /// Conversation table backend (bigquery, memory)
    #[arg(long, env = "HISTORY_TYPE", default_value = "bigquery")]
    pub history_type: String,

    /// Fully qualified conversation table, `project.dataset.table`
    #[arg(long, env = "TABLE_ID")]
    pub table_id: Option<String>,

    /// Project billed for queries. Defaults to the project in TABLE_ID.
    #[arg(long, env = "BIGQUERY_PROJECT_ID")]
    pub bigquery_project_id: Option<String>,

    /// Base URL of the BigQuery REST API.
    #[arg(long, env = "BIGQUERY_BASE_URL", default_value = "https://bigquery.googleapis.com/bigquery/v2")]
    pub bigquery_base_url: String,

    /// Path to the Google service account key file (JSON).
    #[arg(long, env = "GCP_SERVICE_ACCOUNT_KEY")]
    pub gcp_sa_key_path: Option<String>,

    /// Pre-issued access token, used instead of the service account (e.g. against an emulator).
    #[arg(long, env = "BIGQUERY_ACCESS_TOKEN", hide_env_values = true)]
    pub bigquery_access_token: Option<String>,

    // --- Summary Args ---
    /// Path to the prompt configuration file. The built-in persona is used when absent.
    #[arg(long, env = "PROMPTS_PATH", default_value = "json/prompts.json")]
    pub prompts_path: String,

    /// Maximum characters per chunk of the historical document.
    #[arg(long, env = "SUMMARY_CHUNK_SIZE", default_value = "1024")]
    pub summary_chunk_size: usize,

    /// Number of chunks retrieved to answer the summary query.
    #[arg(long, env = "SUMMARY_TOP_K", default_value = "2")]
    pub summary_top_k: usize,

    // --- General App Args ---
    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,

    /// Host address and port for the WebSocket chat server.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Host address and port serving the chat page.
    #[arg(long, env = "HTTP_ADDR", default_value = "127.0.0.1:8501")]
    pub http_addr: String,

    /// WebSocket URL the page connects to. Defaults to ws(s)://SERVER_ADDR.
    #[arg(long, env = "PUBLIC_WS_URL")]
    pub public_ws_url: Option<String>,

    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

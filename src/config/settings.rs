//! Startup configuration, validated once from the parsed command line.

use thiserror::Error;
use url::Url;

use crate::cli::Args;
use crate::history::TableRef;
use crate::llm::{ LlmConfig, LlmType };

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
    #[error("{0} is required")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Path to a service account key file.
    ServiceAccount(String),
    StaticToken(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableBackend {
    Memory,
    BigQuery {
        table: TableRef,
        billing_project: String,
        base_url: String,
        credentials: CredentialSource,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryConfig {
    pub chunk_size: usize,
    pub top_k: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub ws_addr: String,
    pub http_addr: String,
    pub public_ws_url: String,
    pub tls: Option<TlsPaths>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub chat: LlmConfig,
    pub embedding: LlmConfig,
    pub table: TableBackend,
    pub prompts_path: String,
    pub summary: SummaryConfig,
    pub server: ServerConfig,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_llm_type(field: &'static str, value: &str) -> Result<LlmType, ConfigError> {
    value.parse().map_err(|e: crate::llm::ParseLlmTypeError| ConfigError::Invalid {
        field,
        reason: e.to_string(),
    })
}

fn check_url(field: &'static str, value: &Option<String>) -> Result<(), ConfigError> {
    if let Some(raw) = value {
        Url::parse(raw).map_err(|e| ConfigError::Invalid {
            field,
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

impl AppConfig {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let chat_type = parse_llm_type("CHAT_LLM_TYPE", &args.chat_llm_type)?;
        let chat_api_key = non_empty(&Some(args.chat_api_key.clone()));
        if chat_type == LlmType::OpenAI && chat_api_key.is_none() {
            return Err(ConfigError::Missing("OPENAI_API_KEY"));
        }
        let chat_base_url = non_empty(&args.chat_base_url);
        check_url("CHAT_BASE_URL", &chat_base_url)?;
        let chat = LlmConfig {
            llm_type: chat_type.clone(),
            api_key: chat_api_key.clone(),
            completion_model: non_empty(&args.chat_model),
            embedding_model: None,
            base_url: chat_base_url.clone(),
        };

        let embedding_type = match non_empty(&args.embedding_llm_type) {
            Some(t) => parse_llm_type("EMBEDDING_LLM_TYPE", &t)?,
            None => chat_type,
        };
        let embedding_api_key = non_empty(&args.embedding_api_key).or(chat_api_key);
        if embedding_type == LlmType::OpenAI && embedding_api_key.is_none() {
            return Err(ConfigError::Missing("EMBEDDING_API_KEY"));
        }
        let embedding_base_url = non_empty(&args.embedding_base_url).or(chat_base_url);
        check_url("EMBEDDING_BASE_URL", &embedding_base_url)?;
        let embedding = LlmConfig {
            llm_type: embedding_type,
            api_key: embedding_api_key,
            completion_model: None,
            embedding_model: non_empty(&args.embedding_model),
            base_url: embedding_base_url,
        };

        let table = Self::table_backend(args)?;

        if args.summary_chunk_size == 0 {
            return Err(ConfigError::Invalid {
                field: "SUMMARY_CHUNK_SIZE",
                reason: "must be greater than zero".into(),
            });
        }
        if args.summary_top_k == 0 {
            return Err(ConfigError::Invalid {
                field: "SUMMARY_TOP_K",
                reason: "must be greater than zero".into(),
            });
        }

        Ok(Self {
            chat,
            embedding,
            table,
            prompts_path: args.prompts_path.clone(),
            summary: SummaryConfig {
                chunk_size: args.summary_chunk_size,
                top_k: args.summary_top_k,
            },
            server: Self::server_config(args)?,
        })
    }

    fn table_backend(args: &Args) -> Result<TableBackend, ConfigError> {
        match args.history_type.to_lowercase().as_str() {
            "memory" => Ok(TableBackend::Memory),
            "bigquery" => {
                let raw = non_empty(&args.table_id).ok_or(ConfigError::Missing("TABLE_ID"))?;
                let table: TableRef = raw.parse().map_err(|reason| ConfigError::Invalid {
                    field: "TABLE_ID",
                    reason,
                })?;
                let credentials = match
                    (non_empty(&args.bigquery_access_token), non_empty(&args.gcp_sa_key_path))
                {
                    (Some(token), _) => CredentialSource::StaticToken(token),
                    (None, Some(path)) => CredentialSource::ServiceAccount(path),
                    (None, None) => {
                        return Err(ConfigError::Missing("GCP_SERVICE_ACCOUNT_KEY"));
                    }
                };
                check_url("BIGQUERY_BASE_URL", &Some(args.bigquery_base_url.clone()))?;
                let billing_project = non_empty(&args.bigquery_project_id).unwrap_or_else(||
                    table.project.clone()
                );
                Ok(TableBackend::BigQuery {
                    table,
                    billing_project,
                    base_url: args.bigquery_base_url.clone(),
                    credentials,
                })
            }
            other =>
                Err(ConfigError::Invalid {
                    field: "HISTORY_TYPE",
                    reason: format!("unsupported table backend '{}'", other),
                }),
        }
    }

    fn server_config(args: &Args) -> Result<ServerConfig, ConfigError> {
        let tls = if args.enable_tls {
            match (non_empty(&args.tls_cert_path), non_empty(&args.tls_key_path)) {
                (Some(cert_path), Some(key_path)) => Some(TlsPaths { cert_path, key_path }),
                (None, _) => {
                    return Err(ConfigError::Missing("TLS_CERT_PATH"));
                }
                (_, None) => {
                    return Err(ConfigError::Missing("TLS_KEY_PATH"));
                }
            }
        } else {
            None
        };

        let scheme = if tls.is_some() { "wss" } else { "ws" };
        let public_ws_url = non_empty(&args.public_ws_url).unwrap_or_else(||
            format!("{}://{}", scheme, args.server_addr)
        );
        check_url("PUBLIC_WS_URL", &Some(public_ws_url.clone()))?;

        Ok(ServerConfig {
            ws_addr: args.server_addr.clone(),
            http_addr: args.http_addr.clone(),
            public_ws_url,
            tls,
        })
    }
}

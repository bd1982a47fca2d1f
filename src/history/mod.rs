pub mod bigquery;
pub mod memory;

use async_trait::async_trait;
use log::info;
use serde::{ Deserialize, Serialize };
use std::error::Error;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::credentials::{ ServiceAccountTokenSource, StaticTokenSource, TokenSource, BIGQUERY_SCOPE };
use crate::config::settings::{ CredentialSource, TableBackend };
use crate::session::SessionStore;

/// One transcript message flattened for the conversation table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRow {
    pub role: String,
    pub content: String,
    pub session_id: String,
}

/// `project.dataset.table`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

impl FromStr for TableRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        match parts.as_slice() {
            [project, dataset, table] if
                parts.iter().all(|p| !p.is_empty() && !p.contains('`'))
            => {
                Ok(TableRef {
                    project: project.to_string(),
                    dataset: dataset.to_string(),
                    table: table.to_string(),
                })
            }
            _ => Err(format!("Invalid table id '{}', expected project.dataset.table", s)),
        }
    }
}

/// The shared, append-only table every session exports into.
#[async_trait]
pub trait ConversationTable: Send + Sync {
    /// Appends all rows as a single batch; either every row lands or the call fails.
    async fn append_rows(&self, rows: &[ExportRow]) -> Result<usize, Box<dyn Error + Send + Sync>>;

    /// Content of every user message ever exported, across all sessions.
    async fn user_contents(&self) -> Result<Vec<String>, Box<dyn Error + Send + Sync>>;

    fn describe(&self) -> String;
}

pub async fn create_conversation_table(
    backend: &TableBackend
) -> Result<Arc<dyn ConversationTable>, Box<dyn Error + Send + Sync>> {
    match backend {
        TableBackend::Memory => {
            info!("Conversation rows will be kept in memory");
            Ok(Arc::new(memory::MemoryTable::default()))
        }
        TableBackend::BigQuery { table, billing_project, base_url, credentials } => {
            let token_source: Arc<dyn TokenSource> = match credentials {
                CredentialSource::ServiceAccount(path) => {
                    Arc::new(ServiceAccountTokenSource::from_key_file(path, BIGQUERY_SCOPE).await?)
                }
                CredentialSource::StaticToken(token) => Arc::new(StaticTokenSource(token.clone())),
            };
            info!("Conversation rows will be appended to BigQuery table {}", table);
            Ok(
                Arc::new(
                    bigquery::BigQueryTable::new(
                        table.clone(),
                        billing_project.clone(),
                        base_url.clone(),
                        token_source
                    )
                )
            )
        }
    }
}

pub fn transcript_rows(session: &mut SessionStore) -> Vec<ExportRow> {
    let session_id = session.session_id().to_string();
    session
        .transcript()
        .messages()
        .iter()
        .map(|m| ExportRow {
            role: m.role.as_str().to_string(),
            content: m.content.clone(),
            session_id: session_id.clone(),
        })
        .collect()
}

/// Writes a session's transcript to the conversation table.
#[derive(Clone)]
pub struct PersistenceExporter {
    table: Arc<dyn ConversationTable>,
}

impl PersistenceExporter {
    pub fn new(table: Arc<dyn ConversationTable>) -> Self {
        Self { table }
    }

    pub async fn save(
        &self,
        session: &mut SessionStore
    ) -> Result<usize, Box<dyn Error + Send + Sync>> {
        let rows = transcript_rows(session);
        let written = self.table.append_rows(&rows).await?;
        info!(
            "Saved {} rows for session {} to {}",
            written,
            session.session_id(),
            self.table.describe()
        );
        Ok(written)
    }
}

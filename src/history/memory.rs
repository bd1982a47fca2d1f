use async_trait::async_trait;
use std::error::Error;
use tokio::sync::RwLock;

use super::{ ConversationTable, ExportRow };

/// Process-local conversation table, for development without a warehouse.
#[derive(Default)]
pub struct MemoryTable {
    rows: RwLock<Vec<ExportRow>>,
    fail_with: Option<String>,
}

impl MemoryTable {
    pub fn with_rows(rows: Vec<ExportRow>) -> Self {
        Self {
            rows: RwLock::new(rows),
            fail_with: None,
        }
    }

    /// A table whose every operation fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            fail_with: Some(message.to_string()),
        }
    }

    pub async fn rows(&self) -> Vec<ExportRow> {
        self.rows.read().await.clone()
    }

    fn check(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        match &self.fail_with {
            Some(msg) => Err(msg.clone().into()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ConversationTable for MemoryTable {
    async fn append_rows(&self, rows: &[ExportRow]) -> Result<usize, Box<dyn Error + Send + Sync>> {
        self.check()?;
        self.rows.write().await.extend_from_slice(rows);
        Ok(rows.len())
    }

    async fn user_contents(&self) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        self.check()?;
        Ok(
            self.rows
                .read().await
                .iter()
                .filter(|r| r.role == "user")
                .map(|r| r.content.clone())
                .collect()
        )
    }

    fn describe(&self) -> String {
        "in-memory table".to_string()
    }
}

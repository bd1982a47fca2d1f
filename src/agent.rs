use crate::config::prompt::{ self, PromptConfig };
use crate::config::settings::{ AppConfig, SummaryConfig };
use crate::history::{ create_conversation_table, ConversationTable, PersistenceExporter };
use crate::llm::chat::{ ChatClient, new_client as new_chat_client };
use crate::llm::embedding::{ EmbeddingClient, new_client as new_embedding_client };
use crate::models::chat::ChatMessage;
use crate::rag::rag::RagEngine;
use crate::rag::summary::{ Summary, SummaryAnalyzer };
use crate::session::{ self, SessionStore };

use async_trait::async_trait;
use futures::StreamExt;
use log::{ debug, error, info, warn };
use std::error::Error;
use std::sync::Arc;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum AgentError {
    #[error("Completion failed: {0}")] Completion(String),
    #[error("Saving the conversation failed: {0}")] Export(String),
    #[error("Historical summary failed: {0}")] Analysis(String),
    #[error("Rendering the reply failed: {0}")] Render(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    AwaitingInput,
    Submitting,
    Streaming,
}

/// Where a turn's reply is drawn while it streams in.
#[async_trait]
pub trait ReplySink: Send {
    /// Called after every fragment with the accumulated text plus the cursor.
    async fn render_partial(&mut self, text: &str) -> Result<(), Box<dyn Error + Send + Sync>>;

    async fn render_final(&mut self, text: &str) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Drives one conversation turn at a time against the completion backend.
pub struct ChatDriver {
    client: Arc<dyn ChatClient>,
    state: DriverState,
}

impl ChatDriver {
    pub fn new(client: Arc<dyn ChatClient>) -> Self {
        Self {
            client,
            state: DriverState::Idle,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    fn transition(&mut self, next: DriverState) {
        debug!("Chat driver {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Runs one turn. Blank input is ignored and yields `Ok(None)`. On
    /// success the assistant reply has been appended to the transcript and is
    /// returned. On failure only the user message remains appended, and the
    /// driver is back in `Idle` either way.
    pub async fn run_turn(
        &mut self,
        session: &mut SessionStore,
        input: &str,
        sink: &mut dyn ReplySink
    ) -> Result<Option<String>, AgentError> {
        self.transition(DriverState::AwaitingInput);
        if input.trim().is_empty() {
            self.transition(DriverState::Idle);
            return Ok(None);
        }

        let result = self.submit_and_stream(session, input, sink).await;
        self.transition(DriverState::Idle);
        result.map(Some)
    }

    async fn submit_and_stream(
        &mut self,
        session: &mut SessionStore,
        input: &str,
        sink: &mut dyn ReplySink
    ) -> Result<String, AgentError> {
        session.append_message(ChatMessage::user(input));
        self.transition(DriverState::Submitting);

        let messages = session.transcript().messages().to_vec();
        let mut stream = self.client
            .stream_completion(&messages).await
            .map_err(|e| AgentError::Completion(e.to_string()))?;
        self.transition(DriverState::Streaming);

        let mut accumulated = String::new();
        while let Some(fragment) = stream.next().await {
            let fragment = fragment.map_err(|e| {
                warn!("Reply stream failed after {} chars: {}", accumulated.len(), e);
                AgentError::Completion(e.to_string())
            })?;
            accumulated.push_str(&fragment);
            sink
                .render_partial(&session::render_partial(&accumulated)).await
                .map_err(|e| AgentError::Render(e.to_string()))?;
        }

        session.append_message(ChatMessage::assistant(accumulated.clone()));
        sink.render_final(&accumulated).await.map_err(|e| AgentError::Render(e.to_string()))?;
        Ok(accumulated)
    }
}

#[derive(Clone)]
pub struct AIAgent {
    chat_client: Arc<dyn ChatClient>,
    exporter: PersistenceExporter,
    analyzer: SummaryAnalyzer,
    prompt_config: Arc<PromptConfig>,
}

impl AIAgent {
    pub async fn new(config: &AppConfig) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let chat_client = new_chat_client(&config.chat)?;
        info!(
            "Chat LLM client initialized: {} at {} (native streaming: {})",
            chat_client.get_model(),
            chat_client.get_base_url().unwrap_or_default(),
            chat_client.supports_native_streaming()
        );
        let embedding_client = new_embedding_client(&config.embedding)?;
        info!("Embedding client initialized: {}", config.embedding.llm_type);

        let prompt_config = prompt::load_prompts_or_default(&config.prompts_path)?;
        let table = create_conversation_table(&config.table).await?;

        Ok(Self::from_parts(chat_client, embedding_client, table, prompt_config, &config.summary))
    }

    pub fn from_parts(
        chat_client: Arc<dyn ChatClient>,
        embedding_client: Arc<dyn EmbeddingClient>,
        table: Arc<dyn ConversationTable>,
        prompt_config: Arc<PromptConfig>,
        summary: &SummaryConfig
    ) -> Self {
        let rag = RagEngine::new(
            chat_client.clone(),
            embedding_client,
            prompt_config.clone(),
            summary.chunk_size,
            summary.top_k
        );
        Self {
            chat_client,
            exporter: PersistenceExporter::new(table.clone()),
            analyzer: SummaryAnalyzer::new(table, rag, prompt_config.clone()),
            prompt_config,
        }
    }

    pub fn persona(&self) -> &str {
        &self.prompt_config.persona
    }

    pub fn new_session(&self) -> SessionStore {
        SessionStore::new(self.persona())
    }

    pub fn driver(&self) -> ChatDriver {
        ChatDriver::new(self.chat_client.clone())
    }

    pub async fn save(&self, session: &mut SessionStore) -> Result<usize, AgentError> {
        self.exporter.save(session).await.map_err(|e| {
            error!("Export failed: {}", e);
            AgentError::Export(e.to_string())
        })
    }

    /// Recomputes the cross-session summary. The stored summary is cleared
    /// first so a failed run leaves nothing stale behind.
    pub async fn analyze(&self, session: &mut SessionStore) -> Result<Summary, AgentError> {
        session.clear_summary();
        let summary = self.analyzer.analyze().await.map_err(|e| {
            error!("Summary analysis failed: {}", e);
            AgentError::Analysis(e.to_string())
        })?;
        session.set_summary(summary.clone());
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::memory::MemoryTable;
    use crate::history::ExportRow;
    use crate::llm::chat::testing::{ ScriptedChatClient, ScriptedReply };
    use crate::llm::embedding::testing::KeywordEmbedder;
    use crate::models::chat::Role;

    #[derive(Default)]
    struct RecordingSink {
        partials: Vec<String>,
        finals: Vec<String>,
    }

    #[async_trait]
    impl ReplySink for RecordingSink {
        async fn render_partial(&mut self, text: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
            self.partials.push(text.to_string());
            Ok(())
        }

        async fn render_final(&mut self, text: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
            self.finals.push(text.to_string());
            Ok(())
        }
    }

    fn agent(chat: Arc<ScriptedChatClient>, table: Arc<MemoryTable>) -> AIAgent {
        AIAgent::from_parts(
            chat,
            Arc::new(KeywordEmbedder { vocabulary: vec!["regression", "mars"] }),
            table,
            Arc::new(PromptConfig::default()),
            &(SummaryConfig { chunk_size: 1024, top_k: 2 })
        )
    }

    #[tokio::test]
    async fn each_turn_adds_user_and_assistant() {
        let chat = Arc::new(
            ScriptedChatClient::new(
                vec![
                    ScriptedReply::ok(&["one"]),
                    ScriptedReply::ok(&["two"]),
                    ScriptedReply::ok(&["three"])
                ]
            )
        );
        let agent = agent(chat, Arc::new(MemoryTable::default()));
        let mut session = agent.new_session();
        let mut driver = agent.driver();
        let mut sink = RecordingSink::default();

        for input in ["a", "b", "c"] {
            driver.run_turn(&mut session, input, &mut sink).await.unwrap();
        }

        let messages = session.transcript().messages();
        assert_eq!(messages.len(), 1 + 2 * 3);
        assert_eq!(messages[0].role, Role::System);
        for (i, m) in messages[1..].iter().enumerate() {
            let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
            assert_eq!(m.role, expected);
        }
        assert_eq!(driver.state(), DriverState::Idle);
    }

    #[tokio::test]
    async fn first_question_then_save() {
        let chat = Arc::new(
            ScriptedChatClient::new(vec![ScriptedReply::ok(&["A straight ", "line ", "fit."])])
        );
        let table = Arc::new(MemoryTable::default());
        let agent = agent(chat.clone(), table.clone());
        let mut session = agent.new_session();
        let mut driver = agent.driver();
        let mut sink = RecordingSink::default();

        assert_eq!(session.transcript().len(), 1);
        let reply = driver
            .run_turn(&mut session, "What is linear regression?", &mut sink).await
            .unwrap();

        assert_eq!(reply.as_deref(), Some("A straight line fit."));
        assert_eq!(
            sink.partials,
            vec!["A straight ▌", "A straight line ▌", "A straight line fit.▌"]
        );
        assert_eq!(sink.finals, vec!["A straight line fit."]);
        let roles: Vec<Role> = session
            .transcript()
            .messages()
            .iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);

        {
            let requests = chat.requests.lock().unwrap();
            assert_eq!(requests[0].len(), 2);
            assert_eq!(requests[0][0].role, Role::System);
            assert_eq!(requests[0][0].content, agent.persona());
        }

        assert_eq!(agent.save(&mut session).await.unwrap(), 3);
        assert_eq!(table.rows().await.len(), 3);
    }

    #[tokio::test]
    async fn failure_mid_stream_keeps_only_user_message() {
        let chat = Arc::new(
            ScriptedChatClient::new(
                vec![ScriptedReply::failing(&["Well,"], "connection reset"), ScriptedReply::ok(&["ok"])]
            )
        );
        let agent = agent(chat, Arc::new(MemoryTable::default()));
        let mut session = agent.new_session();
        let mut driver = agent.driver();
        let mut sink = RecordingSink::default();
        let before = session.transcript().len();

        let err = driver.run_turn(&mut session, "hello?", &mut sink).await.unwrap_err();

        assert!(matches!(err, AgentError::Completion(ref m) if m.contains("connection reset")));
        assert_eq!(session.transcript().len(), before + 1);
        assert_eq!(session.transcript().last().unwrap().role, Role::User);
        assert_eq!(sink.partials, vec!["Well,▌"]);
        assert!(sink.finals.is_empty());
        assert_eq!(driver.state(), DriverState::Idle);

        driver.run_turn(&mut session, "again", &mut sink).await.unwrap();
        assert_eq!(session.transcript().last().unwrap().content, "ok");
    }

    #[tokio::test]
    async fn refused_stream_is_a_completion_error() {
        let chat = Arc::new(ScriptedChatClient::refusing());
        let agent = agent(chat, Arc::new(MemoryTable::default()));
        let mut session = agent.new_session();
        let mut driver = agent.driver();
        let mut sink = RecordingSink::default();

        let err = driver.run_turn(&mut session, "hi", &mut sink).await.unwrap_err();

        assert!(matches!(err, AgentError::Completion(_)));
        assert_eq!(session.transcript().len(), 2);
        assert!(sink.partials.is_empty());
        assert_eq!(driver.state(), DriverState::Idle);
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let chat = Arc::new(ScriptedChatClient::new(vec![]));
        let agent = agent(chat.clone(), Arc::new(MemoryTable::default()));
        let mut session = agent.new_session();
        let mut driver = agent.driver();
        let mut sink = RecordingSink::default();

        let reply = driver.run_turn(&mut session, "   ", &mut sink).await.unwrap();

        assert!(reply.is_none());
        assert_eq!(session.transcript().len(), 1);
        assert!(chat.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_save_maps_to_export_error() {
        let chat = Arc::new(ScriptedChatClient::new(vec![]));
        let agent = agent(chat, Arc::new(MemoryTable::failing("quota exceeded")));
        let mut session = agent.new_session();

        let err = agent.save(&mut session).await.unwrap_err();
        assert!(matches!(err, AgentError::Export(ref m) if m.contains("quota exceeded")));
        assert_eq!(session.transcript().len(), 1);
    }

    #[tokio::test]
    async fn analyze_stores_summary_and_clears_on_failure() {
        let table = Arc::new(
            MemoryTable::with_rows(
                vec![ExportRow {
                    role: "user".into(),
                    content: "regression on Mars".into(),
                    session_id: "old".into(),
                }]
            )
        );
        let chat = Arc::new(
            ScriptedChatClient::new(
                vec![ScriptedReply::ok(&["Regression (1)"]), ScriptedReply::failing(&[], "timeout")]
            )
        );
        let agent = agent(chat, table);
        let mut session = agent.new_session();

        let summary = agent.analyze(&mut session).await.unwrap();
        assert_eq!(summary.text, "Regression (1)");
        assert_eq!(session.last_summary(), Some(&summary));

        let err = agent.analyze(&mut session).await.unwrap_err();
        assert!(matches!(err, AgentError::Analysis(_)));
        assert!(session.last_summary().is_none());
    }

    #[tokio::test]
    async fn analyze_with_no_history_is_empty() {
        let chat = Arc::new(ScriptedChatClient::new(vec![]));
        let agent = agent(chat, Arc::new(MemoryTable::default()));
        let mut session = agent.new_session();

        let summary = agent.analyze(&mut session).await.unwrap();
        assert!(summary.text.is_empty());
        assert_eq!(summary.source_rows, 0);
    }
}

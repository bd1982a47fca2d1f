use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };
use async_trait::async_trait;
use std::error::Error as StdError;
use super::{ http_stream_generate, ChatClient, ChatStream, CompletionResponse, StreamLine };
use crate::llm::LlmConfig;
use crate::models::chat::ChatMessage;
use log::warn;

#[derive(Debug)]
pub struct OllamaClient {
    http: HttpClient,
    base_url: String,
    completion_model: String,
}

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaReplyMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaReplyMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

fn parse_ndjson_line(line: &str) -> Result<StreamLine, Box<dyn StdError + Send + Sync>> {
    let resp: OllamaChatResponse = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            warn!("JSON parse error: {} for line: {}", e, line);
            return Ok(StreamLine::Skip);
        }
    };
    if let Some(err) = resp.error {
        return Err(format!("Ollama stream error: {}", err).into());
    }
    let content = resp.message.map(|m| m.content).unwrap_or_default();
    match (content.is_empty(), resp.done) {
        (false, true) => Ok(StreamLine::Last(content)),
        (false, false) => Ok(StreamLine::Fragment(content)),
        (true, true) => Ok(StreamLine::Done),
        (true, false) => Ok(StreamLine::Skip),
    }
}

impl OllamaClient {
    pub fn new(base_url: Option<String>, completion_model: Option<String>) -> Self {
        let model = completion_model.unwrap_or_else(|| "llama3".to_string());
        let url = base_url.unwrap_or_else(|| "http://localhost:11434".into());

        Self {
            http: HttpClient::new(),
            base_url: url,
            completion_model: model,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        if config.llm_type != crate::llm::LlmType::Ollama {
            return Err("Invalid config type for OllamaClient".into());
        }

        Ok(Self::new(config.base_url.clone(), config.completion_model.clone()))
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ChatClient for OllamaClient {
    async fn complete(
        &self,
        messages: &[ChatMessage]
    ) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>> {
        let req = OllamaChatRequest {
            model: self.completion_model.clone(),
            messages: messages.to_vec(),
            stream: false,
        };
        let resp = self.http.post(self.endpoint()).json(&req).send().await?.error_for_status()?;
        let data = resp.json::<OllamaChatResponse>().await?;
        if let Some(err) = data.error {
            return Err(format!("Ollama error: {}", err).into());
        }
        Ok(CompletionResponse {
            response: data.message.map(|m| m.content).unwrap_or_default(),
        })
    }

    async fn stream_completion(
        &self,
        messages: &[ChatMessage]
    ) -> Result<ChatStream, Box<dyn StdError + Send + Sync>> {
        let req = OllamaChatRequest {
            model: self.completion_model.clone(),
            messages: messages.to_vec(),
            stream: true,
        };
        http_stream_generate(self.http.clone(), self.endpoint(), req, parse_ndjson_line).await
    }

    fn get_model(&self) -> String {
        self.completion_model.clone()
    }

    fn get_base_url(&self) -> Option<String> {
        Some(self.base_url.clone())
    }

    fn supports_native_streaming(&self) -> bool {
        true
    }
}

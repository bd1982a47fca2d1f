pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use futures::{ Stream, StreamExt };
use serde::Deserialize;
use std::error::Error as StdError;
use std::pin::Pin;
use std::sync::Arc;
use super::{ LlmConfig, LlmType };
use self::ollama::OllamaClient;
use self::openai::OpenAIChatClient;
use crate::models::chat::ChatMessage;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use log::debug;
use reqwest;

/// Lazily produced reply fragments, terminated by the end of the stream.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, Box<dyn StdError + Send + Sync>>> + Send>>;

#[derive(Deserialize, Debug, Clone)]
pub struct CompletionResponse {
    pub response: String,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage]
    ) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>>;

    /// Providers without a native streaming endpoint deliver the whole reply
    /// as a single fragment.
    async fn stream_completion(
        &self,
        messages: &[ChatMessage]
    ) -> Result<ChatStream, Box<dyn StdError + Send + Sync>> {
        let resp = self.complete(messages).await?;
        Ok(full_response_as_stream(resp.response))
    }

    fn get_model(&self) -> String;
    fn get_base_url(&self) -> Option<String>;
    fn supports_native_streaming(&self) -> bool {
        false
    }
}

pub fn full_response_as_stream(response: String) -> ChatStream {
    Box::pin(futures::stream::once(async move { Ok(response) }))
}

/// What a provider-specific parser made of one line of a streamed body.
#[derive(Debug, PartialEq, Eq)]
pub enum StreamLine {
    Fragment(String),
    /// A fragment that also ends the stream.
    Last(String),
    Done,
    Skip,
}

pub fn new_client(
    config: &LlmConfig
) -> Result<Arc<dyn ChatClient>, Box<dyn StdError + Send + Sync>> {
    let client: Arc<dyn ChatClient> = match config.llm_type {
        LlmType::Ollama => {
            let specific_client = OllamaClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::OpenAI => {
            let specific_client = OpenAIChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
    };
    Ok(client)
}

/// POSTs `payload` and turns the line-oriented response body into a stream of
/// fragments. Lines may straddle network chunks, so only complete lines are
/// handed to `line_parser`. A body that ends before the parser reports
/// [`StreamLine::Done`] is surfaced as an error.
pub async fn http_stream_generate(
    client: reqwest::Client,
    url: String,
    payload: impl serde::Serialize + Send + 'static,
    line_parser: fn(&str) -> Result<StreamLine, Box<dyn StdError + Send + Sync>>,
) -> Result<ChatStream, Box<dyn StdError + Send + Sync>> {
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        let resp = match client.post(&url).json(&payload).send().await {
            Ok(r) => r,
            Err(e) => {
                let _ = tx.send(Err(Box::new(e) as _)).await;
                return;
            }
        };
        if let Err(e) = resp.error_for_status_ref() {
            let _ = tx.send(Err(Box::new(e) as _)).await;
            return;
        }

        let mut bytes = resp.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();
        while let Some(chunk) = bytes.next().await {
            let buf = match chunk {
                Ok(buf) => buf,
                Err(e) => {
                    let _ = tx.send(Err(Box::new(e) as _)).await;
                    return;
                }
            };
            pending.extend_from_slice(&buf);

            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line_bytes: Vec<u8> = pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line_bytes);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match line_parser(line) {
                    Ok(StreamLine::Fragment(tok)) => {
                        if tx.send(Ok(tok)).await.is_err() {
                            return;
                        }
                    }
                    Ok(StreamLine::Last(tok)) => {
                        let _ = tx.send(Ok(tok)).await;
                        debug!("Stream from {} completed", url);
                        return;
                    }
                    Ok(StreamLine::Done) => {
                        debug!("Stream from {} completed", url);
                        return;
                    }
                    Ok(StreamLine::Skip) => {}
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
        }

        let tail = String::from_utf8_lossy(&pending).trim().to_string();
        if !tail.is_empty() {
            match line_parser(&tail) {
                Ok(StreamLine::Fragment(tok)) => {
                    let _ = tx.send(Ok(tok)).await;
                }
                Ok(StreamLine::Last(tok)) => {
                    let _ = tx.send(Ok(tok)).await;
                    return;
                }
                Ok(StreamLine::Done) => {
                    return;
                }
                Ok(StreamLine::Skip) => {}
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        }
        let _ = tx.send(Err("Stream ended before the completion signal".into())).await;
    });

    Ok(Box::pin(ReceiverStream::new(rx)))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// One scripted reply: fragments followed by an optional mid-stream error.
    #[derive(Clone, Default)]
    pub struct ScriptedReply {
        pub fragments: Vec<String>,
        pub fail_with: Option<String>,
    }

    impl ScriptedReply {
        pub fn ok(fragments: &[&str]) -> Self {
            Self {
                fragments: fragments.iter().map(|s| s.to_string()).collect(),
                fail_with: None,
            }
        }

        pub fn failing(fragments: &[&str], error: &str) -> Self {
            Self {
                fragments: fragments.iter().map(|s| s.to_string()).collect(),
                fail_with: Some(error.to_string()),
            }
        }
    }

    /// Replays scripted replies in order and records every request.
    #[derive(Default)]
    pub struct ScriptedChatClient {
        replies: Mutex<VecDeque<ScriptedReply>>,
        pub requests: Mutex<Vec<Vec<ChatMessage>>>,
        pub refuse_to_start: bool,
    }

    impl ScriptedChatClient {
        pub fn new(replies: Vec<ScriptedReply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
                refuse_to_start: false,
            }
        }

        /// A client whose streams fail to open.
        pub fn refusing() -> Self {
            Self {
                refuse_to_start: true,
                ..Self::default()
            }
        }

        fn next_reply(&self, messages: &[ChatMessage]) -> ScriptedReply {
            self.requests.lock().unwrap().push(messages.to_vec());
            self.replies.lock().unwrap().pop_front().unwrap_or_default()
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedChatClient {
        async fn complete(
            &self,
            messages: &[ChatMessage]
        ) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>> {
            let reply = self.next_reply(messages);
            if let Some(err) = reply.fail_with {
                return Err(err.into());
            }
            Ok(CompletionResponse { response: reply.fragments.concat() })
        }

        async fn stream_completion(
            &self,
            messages: &[ChatMessage]
        ) -> Result<ChatStream, Box<dyn StdError + Send + Sync>> {
            if self.refuse_to_start {
                self.requests.lock().unwrap().push(messages.to_vec());
                return Err("connection refused".into());
            }
            let reply = self.next_reply(messages);
            let mut items: Vec<Result<String, Box<dyn StdError + Send + Sync>>> = reply.fragments
                .into_iter()
                .map(Ok)
                .collect();
            if let Some(err) = reply.fail_with {
                items.push(Err(err.into()));
            }
            Ok(Box::pin(futures::stream::iter(items)))
        }

        fn get_model(&self) -> String {
            "scripted".to_string()
        }

        fn get_base_url(&self) -> Option<String> {
            None
        }

        fn supports_native_streaming(&self) -> bool {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct WholeReplyClient;

    #[async_trait]
    impl ChatClient for WholeReplyClient {
        async fn complete(
            &self,
            messages: &[ChatMessage]
        ) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>> {
            Ok(CompletionResponse { response: format!("{} messages", messages.len()) })
        }

        fn get_model(&self) -> String {
            "whole".into()
        }

        fn get_base_url(&self) -> Option<String> {
            None
        }
    }

    #[tokio::test]
    async fn default_stream_yields_single_fragment() {
        let client = WholeReplyClient;
        let messages = vec![ChatMessage::system("p"), ChatMessage::user("q")];
        let mut stream = client.stream_completion(&messages).await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), "2 messages");
        assert!(stream.next().await.is_none());
    }
}

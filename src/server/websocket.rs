use crate::agent::{ AIAgent, AgentError, ChatDriver, ReplySink };
use crate::config::settings::TlsPaths;
use crate::models::websocket::{ ClientMessage, ServerMessage };
use crate::session::{ self, SessionStore };

use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::io::{ AsyncRead, AsyncWrite };

use tokio_tungstenite::{ accept_async, WebSocketStream };
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_rustls::TlsAcceptor;

use rustls::ServerConfig;
use rustls::pki_types::CertificateDer;
use rustls_pemfile::{ certs, private_key };

use lazy_static::lazy_static;
use governor::{ RateLimiter, Quota, state::{ InMemoryState, NotKeyed }, clock::DefaultClock };

use async_trait::async_trait;
use chrono::Utc;
use futures::{ Sink, SinkExt, StreamExt };
use log::{ debug, info, warn, error };

const MAX_MESSAGE_SIZE: usize = 64 * 1024;

lazy_static! {
    static ref CONNECTION_LIMITER: RateLimiter<NotKeyed, InMemoryState, DefaultClock> =
        RateLimiter::direct(Quota::per_second(NonZeroU32::new(10).unwrap()));
}

pub fn load_tls_config(tls: &TlsPaths) -> Result<Arc<ServerConfig>, Box<dyn Error + Send + Sync>> {
    super::install_crypto_provider();
    let cert_file = File::open(&tls.cert_path).map_err(|e|
        format!("Failed to open TLS certificate file '{}': {}", tls.cert_path, e)
    )?;
    let key_file = File::open(&tls.key_path).map_err(|e|
        format!("Failed to open TLS key file '{}': {}", tls.key_path, e)
    )?;

    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut BufReader::new(cert_file))
        .collect::<Result<_, _>>()
        .map_err(|e| format!("Failed to read certificate(s): {}", e))?;
    let key = private_key(&mut BufReader::new(key_file))
        .map_err(|e| format!("Error reading private key: {}", e))?
        .ok_or("No private key found in key file")?;

    let config = ServerConfig::builder().with_no_client_auth().with_single_cert(cert_chain, key)?;
    Ok(Arc::new(config))
}

pub async fn start_ws_server(
    addr: &str,
    agent: Arc<AIAgent>,
    tls: Option<&TlsPaths>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let tls_acceptor = match tls {
        Some(paths) => {
            info!(
                "TLS enabled. Loading certificate from '{}' and key from '{}'",
                paths.cert_path,
                paths.key_path
            );
            Some(TlsAcceptor::from(load_tls_config(paths)?))
        }
        None => {
            info!("TLS not enabled. Running plain WebSocket (WS) server.");
            None
        }
    };

    let listener = TcpListener::bind(addr).await?;
    let protocol = if tls_acceptor.is_some() { "WSS" } else { "WS" };
    info!("{} server listening on: {}", protocol, listener.local_addr()?);

    serve(listener, agent, tls_acceptor).await
}

/// Accepts connections forever, one task per browser page.
pub async fn serve(
    listener: TcpListener,
    agent: Arc<AIAgent>,
    tls_acceptor: Option<TlsAcceptor>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    loop {
        let (stream, peer) = listener.accept().await?;

        if CONNECTION_LIMITER.check().is_err() {
            warn!("Global connection rate limit exceeded for {}. Dropping connection.", peer);
            continue;
        }

        info!("Incoming connection from: {}", peer);
        let agent_clone = Arc::clone(&agent);
        let tls_acceptor_clone = tls_acceptor.clone();

        tokio::spawn(async move {
            let process_result = if let Some(acceptor) = tls_acceptor_clone {
                match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        debug!("TLS handshake successful for {}", peer);
                        process_connection(peer, tls_stream, agent_clone).await
                    }
                    Err(e) => {
                        error!("TLS handshake error for {}: {}", peer, e);
                        Err(Box::new(e) as Box<dyn Error + Send + Sync>)
                    }
                }
            } else {
                process_connection(peer, stream, agent_clone).await
            };

            if let Err(e) = process_result {
                error!("Failed to process connection for {}: {}", peer, e);
            }
        });
    }
}

async fn process_connection<S>(
    peer: SocketAddr,
    stream: S,
    agent: Arc<AIAgent>
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    match accept_async(stream).await {
        Ok(ws) => {
            handle_connection(peer, ws, agent).await;
            Ok(())
        }
        Err(e) => {
            error!("Handshake failed for {}: {}", peer, e);
            Err(Box::new(e) as _)
        }
    }
}

async fn send_message<W>(tx: &mut W, message: &ServerMessage) -> Result<(), Box<dyn Error + Send + Sync>>
    where W: Sink<Message, Error = WsError> + Unpin
{
    let json = serde_json::to_string(message)?;
    tx.send(Message::Text(json)).await?;
    Ok(())
}

/// Streams the in-progress reply to the page.
struct SocketSink<'a, W> {
    tx: &'a mut W,
}

#[async_trait]
impl<'a, W> ReplySink for SocketSink<'a, W> where W: Sink<Message, Error = WsError> + Unpin + Send {
    async fn render_partial(&mut self, text: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
        send_message(self.tx, &(ServerMessage::Partial { content: text.to_string() })).await
    }

    async fn render_final(&mut self, text: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
        let done = ServerMessage::Done {
            content: text.to_string(),
            timestamp: Utc::now().timestamp(),
        };
        send_message(self.tx, &done).await
    }
}

/// Handles one client action to completion. Action failures are reported to
/// the page; only a broken socket is returned as an error.
async fn dispatch<W>(
    agent: &AIAgent,
    session: &mut SessionStore,
    driver: &mut ChatDriver,
    tx: &mut W,
    action: ClientMessage
) -> Result<(), Box<dyn Error + Send + Sync>>
    where W: Sink<Message, Error = WsError> + Unpin + Send
{
    let outcome = match action {
        ClientMessage::Chat { content } => {
            if content.trim().is_empty() {
                return Ok(());
            }
            send_message(tx, &ServerMessage::Typing).await?;
            let mut sink = SocketSink { tx: &mut *tx };
            match driver.run_turn(session, &content, &mut sink).await {
                Ok(_) => Ok(None),
                Err(AgentError::Render(e)) => {
                    return Err(e.into());
                }
                Err(e) => Err(e),
            }
        }
        ClientMessage::Save => agent.save(session).await.map(|rows| Some(ServerMessage::Saved { rows })),
        ClientMessage::Summary =>
            agent.analyze(session).await.map(|summary| {
                Some(ServerMessage::Summary {
                    content: summary.text,
                    source_rows: summary.source_rows,
                })
            }),
    };

    match outcome {
        Ok(Some(reply)) => send_message(tx, &reply).await,
        Ok(None) => Ok(()),
        Err(e) => send_message(tx, &(ServerMessage::Error { message: e.to_string() })).await,
    }
}

pub async fn handle_connection<S>(peer: SocketAddr, websocket: WebSocketStream<S>, agent: Arc<AIAgent>)
    where S: AsyncRead + AsyncWrite + Unpin + Send
{
    let (mut tx, mut rx) = websocket.split();
    let mut session = agent.new_session();
    let mut driver = agent.driver();
    info!("New chat session {} for {}", session.session_id(), peer);

    let initial = ServerMessage::Transcript {
        messages: session::render(session.transcript()).collect(),
    };
    if let Err(e) = send_message(&mut tx, &initial).await {
        error!("Error sending transcript to {}: {}", peer, e);
        return;
    }

    while let Some(msg) = rx.next().await {
        let message = match msg {
            Ok(message) => message,
            Err(e) => {
                match e {
                    | WsError::ConnectionClosed
                    | WsError::Protocol(_)
                    | WsError::Utf8 => {
                        info!("WebSocket connection closed or protocol error for {}: {}", peer, e);
                    }
                    WsError::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::ConnectionReset => {
                        info!("WebSocket connection reset by peer {}", peer);
                    }
                    _ => {
                        error!("Error receiving message from {}: {}", peer, e);
                    }
                }
                break;
            }
        };

        if message.len() > MAX_MESSAGE_SIZE {
            warn!("Message from {} exceeds size limit ({} > {})", peer, message.len(), MAX_MESSAGE_SIZE);
            let too_large = ServerMessage::Error {
                message: "Message too large".to_string(),
            };
            if let Err(e) = send_message(&mut tx, &too_large).await {
                error!("Failed to send size limit error to {}: {}", peer, e);
            }
            break;
        }

        match message {
            Message::Text(text) => {
                let action = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(action) => action,
                    Err(e) => {
                        warn!("Failed to parse message from {}: {}", peer, e);
                        let parse_error = ServerMessage::Error {
                            message: format!("Failed to parse message: {}", e),
                        };
                        if send_message(&mut tx, &parse_error).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };
                if let Err(e) = dispatch(&agent, &mut session, &mut driver, &mut tx, action).await {
                    error!("Error replying to {}: {}", peer, e);
                    break;
                }
            }
            Message::Close(_) => {
                info!("Received close frame from {}", peer);
                break;
            }
            Message::Ping(ping_data) => {
                if tx.send(Message::Pong(ping_data)).await.is_err() {
                    error!("Failed to send pong to {}", peer);
                    break;
                }
            }
            Message::Pong(_) | Message::Frame(_) => {}
            Message::Binary(_) => {
                warn!("Ignoring binary message from {}", peer);
            }
        }
    }
    let message_count = session.transcript().len();
    info!(
        "WebSocket connection closed for {} (session {}, {} messages)",
        peer,
        session.session_id(),
        message_count
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::prompt::PromptConfig;
    use crate::config::settings::SummaryConfig;
    use crate::history::memory::MemoryTable;
    use crate::llm::chat::testing::{ ScriptedChatClient, ScriptedReply };
    use crate::llm::embedding::testing::KeywordEmbedder;
    use tokio_tungstenite::connect_async;

    async fn spawn_server(replies: Vec<ScriptedReply>) -> (SocketAddr, Arc<MemoryTable>) {
        let table = Arc::new(MemoryTable::default());
        let agent = AIAgent::from_parts(
            Arc::new(ScriptedChatClient::new(replies)),
            Arc::new(KeywordEmbedder { vocabulary: vec!["regression"] }),
            table.clone(),
            Arc::new(PromptConfig::default()),
            &(SummaryConfig { chunk_size: 1024, top_k: 2 })
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, Arc::new(agent), None));
        (addr, table)
    }

    fn fixture_tls() -> TlsPaths {
        TlsPaths {
            cert_path: concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/tls/cert.pem").to_string(),
            key_path: concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/tls/key.pem").to_string(),
        }
    }

    #[test]
    fn loads_pem_pair_into_server_config() {
        let config = load_tls_config(&fixture_tls()).unwrap();
        assert!(rustls::crypto::CryptoProvider::get_default().is_some());
        assert!(config.alpn_protocols.is_empty());
    }

    #[test]
    fn missing_key_file_is_reported() {
        let tls = TlsPaths {
            key_path: "does/not/exist.pem".into(),
            ..fixture_tls()
        };
        let err = load_tls_config(&tls).unwrap_err();
        assert!(err.to_string().contains("Failed to open TLS key file"));
    }

    async fn next_json<S>(rx: &mut S) -> serde_json::Value
        where S: futures::Stream<Item = Result<Message, WsError>> + Unpin
    {
        loop {
            match rx.next().await.unwrap().unwrap() {
                Message::Text(text) => {
                    return serde_json::from_str(&text).unwrap();
                }
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn chat_save_and_summary_over_one_connection() {
        let (addr, table) = spawn_server(
            vec![ScriptedReply::ok(&["Fit a ", "line."]), ScriptedReply::ok(&["Regression (1)"])]
        ).await;
        let (ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        let (mut tx, mut rx) = ws.split();

        let initial = next_json(&mut rx).await;
        assert_eq!(initial["type"], "transcript");
        assert_eq!(initial["messages"].as_array().unwrap().len(), 0);

        tx.send(
            Message::Text(r#"{"type":"chat","content":"What is linear regression?"}"#.into())
        ).await.unwrap();
        assert_eq!(next_json(&mut rx).await["type"], "typing");
        assert_eq!(next_json(&mut rx).await["content"], "Fit a ▌");
        assert_eq!(next_json(&mut rx).await["content"], "Fit a line.▌");
        let done = next_json(&mut rx).await;
        assert_eq!(done["type"], "done");
        assert_eq!(done["content"], "Fit a line.");

        tx.send(Message::Text(r#"{"type":"save"}"#.into())).await.unwrap();
        let saved = next_json(&mut rx).await;
        assert_eq!(saved["type"], "saved");
        assert_eq!(saved["rows"], 3);
        assert_eq!(table.rows().await.len(), 3);

        tx.send(Message::Text(r#"{"type":"summary"}"#.into())).await.unwrap();
        let summary = next_json(&mut rx).await;
        assert_eq!(summary["type"], "summary");
        assert_eq!(summary["content"], "Regression (1)");
        assert_eq!(summary["source_rows"], 1);
    }

    #[tokio::test]
    async fn bad_payload_reports_error_and_keeps_session() {
        let (addr, _) = spawn_server(vec![ScriptedReply::ok(&["hi"])]).await;
        let (ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        let (mut tx, mut rx) = ws.split();
        next_json(&mut rx).await;

        tx.send(Message::Text(r#"{"type":"dance"}"#.into())).await.unwrap();
        let err = next_json(&mut rx).await;
        assert_eq!(err["type"], "error");

        tx.send(Message::Text(r#"{"type":"chat","content":"hello"}"#.into())).await.unwrap();
        assert_eq!(next_json(&mut rx).await["type"], "typing");
        assert_eq!(next_json(&mut rx).await["content"], "hi▌");
        assert_eq!(next_json(&mut rx).await["type"], "done");
    }
}

use std::collections::VecDeque;
use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use tokio::io::{ AsyncRead, AsyncWrite };
use tokio::net::TcpListener;

use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::handshake::server::{ ErrorResponse, Request, Response };
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::{ Message, WebSocketConfig };
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{ accept_hdr_async_with_config, WebSocketStream };

use rustls::pki_types::{ CertificateDer, PrivateKeyDer };
use rustls::ServerConfig;
use rustls_pemfile::{ certs, pkcs8_private_keys };

use governor::clock::DefaultClock;
use governor::state::{ InMemoryState, NotKeyed };
use governor::{ Quota, RateLimiter };

use futures::{ Sink, SinkExt, StreamExt };
use log::{ debug, error, info, warn };
use uuid::Uuid;

use super::auth::{ verify_signature, Credentials };
use crate::assistant::{ Assistant, AssistantError };
use crate::models::request::ChatRequest;
use crate::models::websocket::{ parse_envelope, ClientMessage, EnvelopeError, ServerMessage };
use crate::router::RouterError;

pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
const MAX_QUEUED_FRAMES: usize = 32;

type ConnectionLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;
type SendResult = Result<(), Box<dyn Error + Send + Sync>>;

pub fn load_tls_config(cert_path: &str, key_path: &str) -> Result<Arc<ServerConfig>, Box<dyn Error + Send + Sync>> {
    let cert_file = File::open(cert_path).map_err(|e|
        format!("Failed to open TLS certificate file '{}': {}", cert_path, e)
    )?;
    let key_file = File::open(key_path).map_err(|e| format!("Failed to open TLS key file '{}': {}", key_path, e))?;

    let mut cert_reader = BufReader::new(cert_file);
    let mut key_reader = BufReader::new(key_file);
    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut cert_reader)
        .collect::<Result<_, _>>()
        .map_err(|e| format!("Failed to read certificate(s): {}", e))?;

    let mut keys = pkcs8_private_keys(&mut key_reader);
    let key = match keys.next() {
        Some(Ok(k)) => PrivateKeyDer::Pkcs8(k),
        Some(Err(e)) => {
            return Err(format!("Error reading private key: {}", e).into());
        }
        None => {
            return Err("No PKCS8 private key found in key file".into());
        }
    };

    let config = ServerConfig::builder().with_no_client_auth().with_single_cert(cert_chain, key)?;
    Ok(Arc::new(config))
}

pub async fn start_ws_server(
    addr: &str,
    assistant: Arc<Assistant>,
    api_key: Option<String>,
    connections_per_second: NonZeroU32,
    tls_acceptor: Option<TlsAcceptor>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    let protocol = if tls_acceptor.is_some() { "wss" } else { "ws" };
    info!("{} server listening on: {}", protocol.to_uppercase(), addr);

    let limiter: Arc<ConnectionLimiter> = Arc::new(RateLimiter::direct(Quota::per_second(connections_per_second)));
    let api_key = api_key.filter(|k| !k.is_empty());

    loop {
        let (stream, peer) = listener.accept().await?;

        if limiter.check().is_err() {
            warn!("Global connection rate limit exceeded for {}. Dropping connection.", peer);
            continue;
        }

        info!("Incoming connection from: {}", peer);
        let assistant = Arc::clone(&assistant);
        let required_api_key = api_key.clone();
        let tls_acceptor = tls_acceptor.clone();

        tokio::spawn(async move {
            let result = match tls_acceptor {
                Some(acceptor) =>
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            debug!("TLS handshake successful for {}", peer);
                            process_connection(peer, tls_stream, assistant, required_api_key).await
                        }
                        Err(e) => Err(Box::new(e) as Box<dyn Error + Send + Sync>),
                    }
                None => process_connection(peer, stream, assistant, required_api_key).await,
            };

            if let Err(e) = result {
                error!("Failed to process connection for {}: {}", peer, e);
            }
        });
    }
}

fn unauthorized(message: String) -> ErrorResponse {
    let mut res = ErrorResponse::new(Some(message));
    *res.status_mut() = StatusCode::UNAUTHORIZED;
    res
}

async fn process_connection<S>(
    peer: SocketAddr,
    stream: S,
    assistant: Arc<Assistant>,
    required_api_key: Option<String>
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    let auth_callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let Some(secret) = &required_api_key else {
            return Ok(response);
        };
        let credentials = Credentials::extract(req.uri().query(), |name| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        });
        match verify_signature(secret, &credentials, chrono::Utc::now().timestamp()) {
            Ok(()) => Ok(response),
            Err(e) => {
                warn!("Rejected handshake from {}: {}", peer, e);
                Err(unauthorized(e.to_string()))
            }
        }
    };

    let config = WebSocketConfig {
        max_message_size: Some(MAX_MESSAGE_SIZE),
        max_frame_size: Some(MAX_MESSAGE_SIZE),
        ..Default::default()
    };
    let ws = accept_hdr_async_with_config(stream, auth_callback, Some(config)).await?;
    handle_connection(peer, ws, assistant).await;
    Ok(())
}

async fn send_message<K>(sink: &mut K, message: &ServerMessage) -> SendResult
    where K: Sink<Message> + Unpin, K::Error: Error + Send + Sync + 'static
{
    let json = serde_json::to_string(message)?;
    sink.send(Message::Text(json)).await?;
    Ok(())
}

/// Reads frames while a request is idle. Returns `None` once the peer is gone.
async fn next_text<S, K>(source: &mut S, sink: &mut K, peer: SocketAddr) -> Option<String>
    where
        S: futures::Stream<Item = Result<Message, WsError>> + Unpin,
        K: Sink<Message> + Unpin,
        K::Error: Error + Send + Sync + 'static
{
    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                return Some(text);
            }
            Ok(Message::Close(_)) => {
                return None;
            }
            Ok(Message::Binary(_)) => {
                let reply = ServerMessage::Error { id: None, message: "Binary messages are not supported".to_string() };
                if send_message(sink, &reply).await.is_err() {
                    return None;
                }
            }
            Ok(_) => {}
            Err(e) => {
                report_read_error(sink, peer, &e).await;
                return None;
            }
        }
    }
    None
}

async fn report_read_error<K>(sink: &mut K, peer: SocketAddr, err: &WsError)
    where K: Sink<Message> + Unpin, K::Error: Error + Send + Sync + 'static
{
    if let WsError::Capacity(_) = err {
        warn!("Message from {} exceeds size limit ({} bytes)", peer, MAX_MESSAGE_SIZE);
        let reply = ServerMessage::Error { id: None, message: "Message too large".to_string() };
        if send_message(sink, &reply).await.is_err() {
            debug!("Could not send size limit error to {}", peer);
        }
    } else {
        warn!("Read error from {}: {}", peer, err);
    }
}

pub async fn handle_connection<S>(peer: SocketAddr, websocket: WebSocketStream<S>, assistant: Arc<Assistant>)
    where S: AsyncRead + AsyncWrite + Unpin
{
    let (mut sink, mut source) = websocket.split();
    let connection_id = Uuid::new_v4().to_string();
    info!("Assigned connection ID {} to {}", connection_id, peer);

    let welcome = ServerMessage::Connection {
        status: "connected".to_string(),
        connection_id: connection_id.clone(),
        message: "Connected to assistant backend".to_string(),
    };
    if let Err(e) = send_message(&mut sink, &welcome).await {
        error!("Error sending welcome to {}: {}", peer, e);
        return;
    }

    let mut queued: VecDeque<String> = VecDeque::new();
    loop {
        let text = match queued.pop_front() {
            Some(text) => text,
            None =>
                match next_text(&mut source, &mut sink, peer).await {
                    Some(text) => text,
                    None => {
                        break;
                    }
                }
        };

        let (id, parsed) = parse_envelope(&text);
        let handler = dispatch(&assistant, &mut sink, id, parsed);
        tokio::pin!(handler);

        // The reader stays live while the handler runs so a close cancels it.
        let outcome = loop {
            tokio::select! {
                result = &mut handler => break Some(result),
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(next))) => {
                        if queued.len() < MAX_QUEUED_FRAMES {
                            queued.push_back(next);
                        } else {
                            warn!("Dropping frame from {}: too many queued requests", peer);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break None,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Read error from {} during request: {}", peer, e);
                        break None;
                    }
                }
            }
        };

        match outcome {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                error!("Error sending to {}: {}", peer, e);
                break;
            }
            None => {
                info!("{} went away; cancelled in-flight request", peer);
                break;
            }
        }
    }

    info!("Connection {} closed for {}", connection_id, peer);
}

async fn dispatch<K>(
    assistant: &Assistant,
    sink: &mut K,
    id: Option<String>,
    parsed: Result<ClientMessage, EnvelopeError>
) -> SendResult
    where K: Sink<Message> + Unpin, K::Error: Error + Send + Sync + 'static
{
    match parsed {
        Ok(ClientMessage::Chat(request)) if request.stream => handle_chat_stream(assistant, sink, id, request).await,
        Ok(ClientMessage::Chat(request)) => handle_chat(assistant, sink, id, request).await,
        Ok(ClientMessage::Analysis(request)) => {
            let status = ServerMessage::AnalysisStatus {
                id: id.clone(),
                status: "processing".to_string(),
                message: "Analyzing code...".to_string(),
            };
            send_message(sink, &status).await?;
            let reply = match assistant.analyze_code(&request).await {
                Ok(analysis) => ServerMessage::AnalysisResponse { id, analysis },
                Err(e) => ServerMessage::AnalysisError { id, message: e.to_string() },
            };
            send_message(sink, &reply).await
        }
        Ok(ClientMessage::Completion(request)) => {
            let reply = match assistant.complete_code(&request).await {
                Ok(response) => ServerMessage::CompletionResponse { id, completions: response.completions },
                Err(e) => ServerMessage::CompletionError { id, message: e.to_string() },
            };
            send_message(sink, &reply).await
        }
        Ok(ClientMessage::Ping { timestamp }) => send_message(sink, &(ServerMessage::Pong { id, timestamp })).await,
        Err(e) => {
            debug!("Rejected frame: {}", e);
            send_message(sink, &(ServerMessage::Error { id, message: e.to_string() })).await
        }
    }
}

fn chat_error(id: Option<String>, err: AssistantError) -> ServerMessage {
    let message = err.to_string();
    let attempts = match err {
        AssistantError::Router(RouterError::AllProvidersExhausted(trail)) => trail,
        _ => Vec::new(),
    };
    ServerMessage::ChatError { id, message, attempts }
}

fn processing(id: Option<String>) -> ServerMessage {
    ServerMessage::ChatStatus {
        id,
        status: "processing".to_string(),
        message: "Generating response...".to_string(),
    }
}

async fn handle_chat<K>(assistant: &Assistant, sink: &mut K, id: Option<String>, request: ChatRequest) -> SendResult
    where K: Sink<Message> + Unpin, K::Error: Error + Send + Sync + 'static
{
    send_message(sink, &processing(id.clone())).await?;
    let reply = match assistant.process_chat(&request).await {
        Ok(response) => ServerMessage::ChatResponse { id, response },
        Err(e) => chat_error(id, e),
    };
    send_message(sink, &reply).await
}

async fn handle_chat_stream<K>(
    assistant: &Assistant,
    sink: &mut K,
    id: Option<String>,
    request: ChatRequest
) -> SendResult
    where K: Sink<Message> + Unpin, K::Error: Error + Send + Sync + 'static
{
    send_message(sink, &processing(id.clone())).await?;
    let mut chat = match assistant.process_chat_stream(&request).await {
        Ok(chat) => chat,
        Err(e) => {
            return send_message(sink, &chat_error(id, e)).await;
        }
    };

    while let Some(item) = chat.tokens.next().await {
        match item {
            Ok(chunk) => {
                let frame = ServerMessage::ChatStream {
                    id: id.clone(),
                    conversation_id: chat.conversation_id.clone(),
                    chunk,
                    is_complete: false,
                };
                send_message(sink, &frame).await?;
            }
            Err(e) => {
                return send_message(sink, &chat_error(id, AssistantError::Router(e))).await;
            }
        }
    }

    let done = ServerMessage::ChatStream {
        id,
        conversation_id: chat.conversation_id,
        chunk: String::new(),
        is_complete: true,
    };
    send_message(sink, &done).await
}

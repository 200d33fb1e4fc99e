//! WebSocket transport for the live speech API
//!
//! Connect performs the WebSocket handshake, sends `setup` and waits for
//! `setupComplete`. Afterwards a writer task drains outbound traffic and a
//! reader task turns server frames into [`TransportEvent`]s.
//!
//! Outbound traffic goes through a bounded queue. When the socket cannot keep
//! up, audio frames are dropped rather than buffered.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::{SessionConfig, TransportConfig};
use crate::constants::OUTBOUND_QUEUE_CAPACITY;
use crate::error::NetworkError;
use crate::network::wire::{
    audio_message, parse_server_message, setup_message, tool_response_message, ServerMessage,
};
use crate::network::{ConnectFuture, Transport, TransportEvents, TransportLink};
use crate::protocol::{EncodedChunk, ToolResponse, TransportEvent};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketWriter = SplitSink<Socket, Message>;
type SocketReader = SplitStream<Socket>;

/// Transport backed by the remote live API
#[derive(Debug, Clone)]
pub struct LiveTransport {
    endpoint: String,
    api_key_env: String,
}

impl LiveTransport {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            api_key_env: config.api_key_env.clone(),
        }
    }
}

impl Transport for LiveTransport {
    fn connect(&self, config: &SessionConfig, events: TransportEvents) -> ConnectFuture {
        let endpoint = self.endpoint.clone();
        let api_key_env = self.api_key_env.clone();
        let setup = setup_message(config).to_json();

        Box::pin(async move {
            let setup = setup?;
            let api_key = std::env::var(&api_key_env)
                .map_err(|_| NetworkError::MissingApiKey(api_key_env.clone()))?;
            let url = format!("{}?key={}", endpoint, api_key);

            tracing::info!("Connecting to {}", endpoint);
            let (socket, _response) = connect_async(url.as_str())
                .await
                .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
            let (mut writer, mut reader) = socket.split();

            writer
                .send(Message::Text(setup))
                .await
                .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
            await_setup_complete(&mut reader).await?;
            tracing::info!("Live session setup complete");

            let closing = Arc::new(AtomicBool::new(false));
            let close = Arc::new(Notify::new());
            let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);

            tokio::spawn(write_loop(
                writer,
                outbound_rx,
                close.clone(),
                events.clone(),
                closing.clone(),
            ));
            let reader_task = tokio::spawn(read_loop(reader, events, closing.clone()));

            let link: Arc<dyn TransportLink> = Arc::new(LiveLink {
                outbound: outbound_tx,
                close,
                closing,
                reader: reader_task.abort_handle(),
                dropped: AtomicU64::new(0),
            });
            Ok(link)
        })
    }
}

async fn await_setup_complete(reader: &mut SocketReader) -> Result<(), NetworkError> {
    while let Some(message) = reader.next().await {
        let message = message.map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
        match message {
            Message::Text(text) => {
                if let Ok(ServerMessage::SetupComplete) = parse_server_message(&text) {
                    return Ok(());
                }
            }
            Message::Binary(data) => {
                let text = String::from_utf8_lossy(&data);
                if let Ok(ServerMessage::SetupComplete) = parse_server_message(&text) {
                    return Ok(());
                }
            }
            Message::Close(frame) => {
                let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                return Err(NetworkError::Closed(reason));
            }
            _ => {}
        }
    }
    Err(NetworkError::Closed("connection closed during setup".into()))
}

enum Outbound {
    Audio(EncodedChunk),
    ToolResponse(ToolResponse),
}

async fn write_loop(
    mut writer: SocketWriter,
    mut outbound: mpsc::Receiver<Outbound>,
    close: Arc<Notify>,
    events: TransportEvents,
    closing: Arc<AtomicBool>,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = close.notified() => {
                let _ = writer.send(Message::Close(None)).await;
                let _ = writer.close().await;
                return;
            }
            item = outbound.recv() => match item {
                Some(item) => item,
                None => return,
            },
        };

        let message = match item {
            Outbound::Audio(chunk) => audio_message(&chunk).to_json(),
            Outbound::ToolResponse(response) => tool_response_message(response).to_json(),
        };

        let result = match message {
            Ok(text) => writer
                .send(Message::Text(text))
                .await
                .map_err(|e| NetworkError::SendFailed(e.to_string())),
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            if !closing.swap(true, Ordering::SeqCst) {
                tracing::error!("Live transport send failed: {}", e);
                events.emit(TransportEvent::Error(e));
            }
            return;
        }
    }
}

async fn read_loop(mut reader: SocketReader, events: TransportEvents, closing: Arc<AtomicBool>) {
    while let Some(message) = reader.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => String::from_utf8_lossy(&data).into_owned(),
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "closed by server".to_string());
                if !closing.swap(true, Ordering::SeqCst) {
                    events.emit(TransportEvent::Closed(reason));
                }
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                if !closing.swap(true, Ordering::SeqCst) {
                    events.emit(TransportEvent::Error(NetworkError::ReceiveFailed(
                        e.to_string(),
                    )));
                }
                return;
            }
        };

        if closing.load(Ordering::SeqCst) {
            return;
        }

        match parse_server_message(&text) {
            Ok(ServerMessage::Events(batch)) => {
                for event in batch {
                    events.emit(event);
                }
            }
            Ok(ServerMessage::GoAway(time_left)) => {
                tracing::warn!("Server is going away (time left: {:?})", time_left);
                if !closing.swap(true, Ordering::SeqCst) {
                    events.emit(TransportEvent::Closed("server going away".into()));
                }
                return;
            }
            Ok(ServerMessage::SetupComplete) => {}
            Err(e) => tracing::warn!("Ignoring unparseable server message: {}", e),
        }
    }

    if !closing.swap(true, Ordering::SeqCst) {
        events.emit(TransportEvent::Closed("connection closed".into()));
    }
}

/// Outbound half of an open live connection
struct LiveLink {
    outbound: mpsc::Sender<Outbound>,
    close: Arc<Notify>,
    closing: Arc<AtomicBool>,
    reader: AbortHandle,
    dropped: AtomicU64,
}

impl TransportLink for LiveLink {
    fn send(&self, chunk: EncodedChunk) {
        if self.closing.load(Ordering::Relaxed) {
            return;
        }
        if let Err(TrySendError::Full(_)) = self.outbound.try_send(Outbound::Audio(chunk)) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped.is_power_of_two() {
                tracing::warn!("Outbound queue full, {} audio frame(s) dropped", dropped);
            }
        }
    }

    fn send_tool_response(&self, response: ToolResponse) {
        if self.closing.load(Ordering::Relaxed) {
            return;
        }
        if let Err(e) = self.outbound.try_send(Outbound::ToolResponse(response)) {
            tracing::error!("Could not queue tool response: {}", e);
        }
    }

    fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        // Writer sends the close frame on its own; nothing waits for the ack.
        self.close.notify_one();
        self.reader.abort();
    }
}

// The writer task ends by itself once the outbound sender is gone.
impl Drop for LiveLink {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        self.reader.abort();
    }
}

//! Realtime change feed over a Phoenix-channel websocket with reconnect backoff.
//!
//! One background task owns the socket. Each subscription is a channel on
//! its own topic; after a reconnect every live channel is joined again.

use crate::auth::SessionStore;
use crate::config::{ClientConfig, ReconnectConfig};
use crate::error::ClientError;
use campus_core::{Filter, RawChange, Record, RemoteError, Table};
use campus_sync::{Subscription, SubscriptionId};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// WIRE PROTOCOL
// ============================================================================

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_CHANGES: &str = "postgres_changes";

/// One frame of the Phoenix channel protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl PhoenixMessage {
    /// Join a topic, asking for every row change on `table`.
    pub fn join(
        topic: &str,
        table: Table,
        filter: Option<&Filter>,
        access_token: &str,
        reference: u64,
    ) -> Self {
        let mut change = json!({
            "event": "*",
            "schema": "public",
            "table": table.as_str(),
        });
        if let Some(filter) = filter {
            change["filter"] = Value::String(filter_expression(filter));
        }
        Self {
            topic: topic.to_string(),
            event: EVENT_JOIN.to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [change],
                },
                "access_token": access_token,
            }),
            reference: Some(reference.to_string()),
        }
    }

    pub fn leave(topic: &str, reference: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: EVENT_LEAVE.to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    pub fn heartbeat(reference: u64) -> Self {
        Self {
            topic: "phoenix".to_string(),
            event: EVENT_HEARTBEAT.to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    /// Row change carried by a `postgres_changes` frame.
    pub fn change(&self) -> Option<Result<RawChange, serde_json::Error>> {
        if self.event != EVENT_CHANGES {
            return None;
        }
        let data = self.payload.get("data")?;
        Some(serde_json::from_value(data.clone()))
    }

    /// Error reported in a reply, if this frame is a failed reply.
    pub fn reply_error(&self) -> Option<String> {
        if self.event != EVENT_REPLY {
            return None;
        }
        if self.payload.get("status").and_then(Value::as_str) != Some("error") {
            return None;
        }
        Some(
            self.payload
                .get("response")
                .map(Value::to_string)
                .unwrap_or_else(|| "unknown error".to_string()),
        )
    }
}

/// Topic of one subscription's channel.
pub fn topic_for(table: Table, id: SubscriptionId) -> String {
    format!("realtime:public:{}:{}", table, id)
}

/// Server-side filter, e.g. `post_id=eq.42`.
pub fn filter_expression(filter: &Filter) -> String {
    format!("{}=eq.{}", filter.column, filter.value_text())
}

/// Socket URL with the api key and protocol version appended.
pub fn socket_url(realtime_url: &str, anon_key: &str) -> String {
    let separator = if realtime_url.contains('?') { '&' } else { '?' };
    format!("{}{}apikey={}&vsn=1.0.0", realtime_url, separator, anon_key)
}

// ============================================================================
// BACKOFF
// ============================================================================

pub fn next_backoff(current_ms: u64, reconnect: &ReconnectConfig) -> u64 {
    let next = (current_ms as f64 * reconnect.multiplier) as u64;
    next.min(reconnect.max_ms)
}

pub fn jittered_backoff(base_ms: u64, jitter_ms: u64) -> u64 {
    if jitter_ms == 0 {
        return base_ms;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_nanos(0))
        .subsec_nanos() as u64;
    let jitter = nanos % jitter_ms;
    base_ms.saturating_add(jitter)
}

// ============================================================================
// HUB
// ============================================================================

type Deliver = Box<dyn Fn(&RawChange) -> bool + Send + Sync>;

struct Channel {
    topic: String,
    table: Table,
    filter: Option<Filter>,
    deliver: Deliver,
}

enum HubCommand {
    Join(SubscriptionId, Channel),
    Leave(SubscriptionId),
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct RealtimeSettings {
    pub url: String,
    pub anon_key: Arc<SecretString>,
    pub heartbeat: Duration,
    pub reconnect: ReconnectConfig,
}

impl RealtimeSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            url: config.realtime_url.clone(),
            anon_key: Arc::new(SecretString::new(config.anon_key.clone().into())),
            heartbeat: Duration::from_millis(config.heartbeat_interval_ms),
            reconnect: config.reconnect.clone(),
        }
    }
}

/// Handle to the background realtime task.
pub struct RealtimeHub {
    commands: mpsc::UnboundedSender<HubCommand>,
    next_id: AtomicU64,
}

impl RealtimeHub {
    /// Start the connection manager. Must be called inside a tokio runtime.
    pub fn spawn(settings: RealtimeSettings, sessions: SessionStore) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let manager = Manager {
            settings,
            sessions,
            commands: receiver,
            channels: HashMap::new(),
            next_ref: 0,
        };
        tokio::spawn(manager.run());
        Self {
            commands,
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a channel for `T::TABLE`. Events are decoded into `T`; frames
    /// that fail to decode are logged and dropped.
    pub fn subscribe<T: Record>(
        &self,
        filter: Option<Filter>,
    ) -> Result<Subscription<T>, RemoteError> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let leave = self.commands.clone();
        let (sender, subscription) = Subscription::channel(id, move || {
            let _ = leave.send(HubCommand::Leave(id));
        });
        let deliver: Deliver = Box::new(move |raw: &RawChange| match raw.decode::<T>() {
            Ok(event) => sender.send(event).is_ok(),
            Err(err) => {
                warn!(table = %raw.table, error = %err, "dropping undecodable change");
                true
            }
        });
        let channel = Channel {
            topic: topic_for(T::TABLE, id),
            table: T::TABLE,
            filter,
            deliver,
        };
        self.commands
            .send(HubCommand::Join(id, channel))
            .map_err(|_| RemoteError::unreachable("realtime task has stopped"))?;
        Ok(subscription)
    }

    /// Leave every channel and close the socket.
    pub fn shutdown(&self) {
        let _ = self.commands.send(HubCommand::Shutdown);
    }
}

impl Drop for RealtimeHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// CONNECTION MANAGER
// ============================================================================

enum Exit {
    Shutdown,
    Disconnected(String),
}

enum Wakeup {
    Command(Option<HubCommand>),
    Heartbeat,
    Frame(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
}

struct Manager {
    settings: RealtimeSettings,
    sessions: SessionStore,
    commands: mpsc::UnboundedReceiver<HubCommand>,
    channels: HashMap<SubscriptionId, Channel>,
    next_ref: u64,
}

impl Manager {
    async fn run(mut self) {
        let mut backoff = self.settings.reconnect.initial_ms;
        loop {
            match self.connect().await {
                Ok(stream) => {
                    info!(channels = self.channels.len(), "realtime connected");
                    backoff = self.settings.reconnect.initial_ms;
                    match self.serve(stream).await {
                        Exit::Shutdown => break,
                        Exit::Disconnected(reason) => warn!(%reason, "realtime disconnected"),
                    }
                }
                Err(err) => warn!(error = %err, "realtime connect failed"),
            }

            let delay = jittered_backoff(backoff, self.settings.reconnect.jitter_ms);
            debug!(delay_ms = delay, "realtime reconnect scheduled");
            if !self.idle(Duration::from_millis(delay)).await {
                break;
            }
            backoff = next_backoff(backoff, &self.settings.reconnect);
        }
        info!("realtime stopped");
    }

    async fn connect(&self) -> Result<WsStream, ClientError> {
        let url = socket_url(&self.settings.url, self.settings.anon_key.expose_secret());
        let (stream, _) = tokio_tungstenite::connect_async(url).await?;
        Ok(stream)
    }

    /// Track joins and leaves while disconnected. False on shutdown.
    async fn idle(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            let command = tokio::select! {
                _ = &mut sleep => return true,
                command = self.commands.recv() => command,
            };
            match command {
                Some(HubCommand::Join(id, channel)) => {
                    self.channels.insert(id, channel);
                }
                Some(HubCommand::Leave(id)) => {
                    self.channels.remove(&id);
                }
                Some(HubCommand::Shutdown) | None => return false,
            }
        }
    }

    async fn serve(&mut self, stream: WsStream) -> Exit {
        let (mut sink, mut source) = stream.split();

        let joins: Vec<PhoenixMessage> = {
            let token = self.access_token();
            let mut joins = Vec::with_capacity(self.channels.len());
            for channel in self.channels.values() {
                self.next_ref += 1;
                joins.push(PhoenixMessage::join(
                    &channel.topic,
                    channel.table,
                    channel.filter.as_ref(),
                    &token,
                    self.next_ref,
                ));
            }
            joins
        };
        for join in &joins {
            if let Err(err) = send(&mut sink, join).await {
                return Exit::Disconnected(err.to_string());
            }
        }

        let period = self.settings.heartbeat;
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            let wakeup = tokio::select! {
                command = self.commands.recv() => Wakeup::Command(command),
                _ = heartbeat.tick() => Wakeup::Heartbeat,
                frame = source.next() => Wakeup::Frame(frame),
            };

            let outgoing = match wakeup {
                Wakeup::Command(Some(HubCommand::Join(id, channel))) => {
                    let join = PhoenixMessage::join(
                        &channel.topic,
                        channel.table,
                        channel.filter.as_ref(),
                        &self.access_token(),
                        self.reference(),
                    );
                    debug!(topic = %channel.topic, "joining channel");
                    self.channels.insert(id, channel);
                    Some(join)
                }
                Wakeup::Command(Some(HubCommand::Leave(id))) => match self.channels.remove(&id) {
                    Some(channel) => {
                        debug!(topic = %channel.topic, "leaving channel");
                        Some(PhoenixMessage::leave(&channel.topic, self.reference()))
                    }
                    None => None,
                },
                Wakeup::Command(Some(HubCommand::Shutdown)) | Wakeup::Command(None) => {
                    let topics: Vec<String> =
                        self.channels.drain().map(|(_, c)| c.topic).collect();
                    for topic in topics {
                        let leave = PhoenixMessage::leave(&topic, self.reference());
                        let _ = send(&mut sink, &leave).await;
                    }
                    let _ = sink.send(Message::Close(None)).await;
                    return Exit::Shutdown;
                }
                Wakeup::Heartbeat => Some(PhoenixMessage::heartbeat(self.reference())),
                Wakeup::Frame(Some(Ok(Message::Text(text)))) => {
                    self.route(&text);
                    None
                }
                Wakeup::Frame(Some(Ok(Message::Close(_)))) | Wakeup::Frame(None) => {
                    return Exit::Disconnected("connection closed".to_string());
                }
                Wakeup::Frame(Some(Ok(_))) => None,
                Wakeup::Frame(Some(Err(err))) => return Exit::Disconnected(err.to_string()),
            };

            if let Some(message) = outgoing {
                if let Err(err) = send(&mut sink, &message).await {
                    return Exit::Disconnected(err.to_string());
                }
            }
        }
    }

    fn route(&self, text: &str) {
        let message: PhoenixMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "undecodable realtime frame");
                return;
            }
        };
        if let Some(reason) = message.reply_error() {
            warn!(topic = %message.topic, %reason, "realtime channel error");
            return;
        }
        let Some(change) = message.change() else {
            return;
        };
        let change = match change {
            Ok(change) => change,
            Err(err) => {
                warn!(topic = %message.topic, error = %err, "undecodable change payload");
                return;
            }
        };
        for channel in self.channels.values().filter(|c| c.topic == message.topic) {
            if !(channel.deliver)(&change) {
                debug!(topic = %channel.topic, "subscriber gone, awaiting leave");
            }
        }
    }

    fn reference(&mut self) -> u64 {
        self.next_ref += 1;
        self.next_ref
    }

    fn access_token(&self) -> String {
        match self.sessions.access_token() {
            Some(token) => token.expose_secret().to_string(),
            None => self.settings.anon_key.expose_secret().to_string(),
        }
    }
}

async fn send(
    sink: &mut SplitSink<WsStream, Message>,
    message: &PhoenixMessage,
) -> Result<(), ClientError> {
    let text = serde_json::to_string(message)?;
    sink.send(Message::Text(text.into())).await?;
    Ok(())
}

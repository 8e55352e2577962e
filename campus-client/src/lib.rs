//! campus Client - hosted backend adapter
//!
//! Connects the sync layer to a hosted Postgres service: a REST client for
//! table reads and writes, an auth client holding the signed-in session,
//! and a realtime hub that turns websocket row changes into typed events.
//! [`BackendPort`] bundles the three behind [`campus_sync::RemoteDataPort`].

pub mod auth;
pub mod bindings;
pub mod config;
pub mod error;
pub mod port;
pub mod realtime;
pub mod rest;
pub mod telemetry;

pub use auth::{AuthClient, Session, SessionStore};
pub use config::{ClientConfig, ConfigError, ReconnectConfig, CONFIG_ENV};
pub use error::{ClientError, ClientResult};
pub use port::BackendPort;
pub use realtime::{PhoenixMessage, RealtimeHub, RealtimeSettings};
pub use rest::RestClient;
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};

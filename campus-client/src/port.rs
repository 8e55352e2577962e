//! [`RemoteDataPort`] backed by the hosted service.

use crate::auth::{AuthClient, SessionStore};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::realtime::{RealtimeHub, RealtimeSettings};
use crate::rest::RestClient;
use async_trait::async_trait;
use campus_core::{AuthUser, EntityId, Filter, PageRequest, Record, RemoteError};
use campus_sync::{RemoteDataPort, Subscription};
use tracing::info;

/// REST tables, auth and realtime behind one port.
pub struct BackendPort {
    rest: RestClient,
    auth: AuthClient,
    realtime: RealtimeHub,
    page_size: u32,
}

impl BackendPort {
    /// Build the clients and start the realtime task. Requires a tokio runtime.
    pub fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let sessions = SessionStore::new();
        let rest = RestClient::new(config, sessions.clone())?;
        let auth = AuthClient::new(config, sessions.clone(), rest.clone())?;
        let realtime = RealtimeHub::spawn(RealtimeSettings::from_config(config), sessions);
        info!(project = %config.project_url, page_size = config.page_size, "backend port ready");
        Ok(Self {
            rest,
            auth,
            realtime,
            page_size: config.page_size,
        })
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub fn auth(&self) -> &AuthClient {
        &self.auth
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Stop the realtime task. Open subscriptions stop receiving events.
    pub fn shutdown(&self) {
        self.realtime.shutdown();
    }
}

#[async_trait]
impl RemoteDataPort for BackendPort {
    async fn fetch_page<T: Record>(&self, request: &PageRequest) -> Result<Vec<T>, RemoteError> {
        self.rest
            .fetch_page::<T>(request)
            .await
            .map_err(ClientError::into_remote)
    }

    async fn fetch_record<T: Record>(&self, id: EntityId) -> Result<Option<T>, RemoteError> {
        self.rest
            .fetch_record::<T>(id)
            .await
            .map_err(ClientError::into_remote)
    }

    async fn insert_record<T: Record>(&self, draft: &T::Draft) -> Result<T, RemoteError> {
        self.rest
            .insert::<T>(draft)
            .await
            .map_err(ClientError::into_remote)
    }

    async fn update_record<T: Record>(
        &self,
        id: EntityId,
        patch: &T::Patch,
    ) -> Result<(), RemoteError> {
        self.rest
            .update::<T>(id, patch)
            .await
            .map_err(ClientError::into_remote)
    }

    async fn delete_record<T: Record>(&self, id: EntityId) -> Result<(), RemoteError> {
        self.rest
            .delete::<T>(id)
            .await
            .map_err(ClientError::into_remote)
    }

    async fn subscribe<T: Record>(
        &self,
        filter: Option<Filter>,
    ) -> Result<Subscription<T>, RemoteError> {
        self.realtime.subscribe::<T>(filter)
    }

    async fn current_user(&self) -> Option<AuthUser> {
        self.auth.current_user()
    }
}

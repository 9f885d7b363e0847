//! `TallyServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tally_store::{ConversationRegistry, CounterStore};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::http;
use crate::ingest::Ingestor;
use crate::receipts::ReadReceiptProcessor;
use crate::rpc::handlers::register_all;
use crate::rpc::registry::MethodRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::hub::SessionHub;
use crate::websocket::session::SessionServices;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Authoritative counters.
    pub store: Arc<dyn CounterStore>,
    /// Fan-out hub.
    pub hub: Arc<SessionHub>,
    /// Mark-as-read entry point.
    pub receipts: Arc<ReadReceiptProcessor>,
    /// Collaborator event intake.
    pub ingestor: Arc<Ingestor>,
    /// Per-session dependencies.
    pub sessions: Arc<SessionServices>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Prometheus render handle.
    pub metrics: PrometheusHandle,
    /// Upgrade limit.
    pub max_connections: usize,
    /// When the server started.
    pub start_time: Instant,
}

/// The unread-counter server.
pub struct TallyServer {
    config: ServerConfig,
    state: AppState,
    conversations: Arc<ConversationRegistry>,
}

impl TallyServer {
    /// Wire the server over a counter store and conversation registry.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn CounterStore>,
        conversations: Arc<ConversationRegistry>,
        metrics: PrometheusHandle,
    ) -> Self {
        let hub = Arc::new(SessionHub::new());
        let receipts = Arc::new(ReadReceiptProcessor::new(
            store.clone(),
            conversations.clone(),
            hub.clone(),
        ));
        let ingestor = Arc::new(Ingestor::new(
            store.clone(),
            conversations.clone(),
            hub.clone(),
        ));

        let mut registry = MethodRegistry::new();
        register_all(&mut registry);

        let sessions = Arc::new(SessionServices {
            registry: Arc::new(registry),
            hub: hub.clone(),
            store: store.clone(),
            receipts: receipts.clone(),
            heartbeat_interval: config.heartbeat_interval,
            heartbeat_max_missed: config.heartbeat_max_missed,
            outbound_buffer: config.outbound_buffer,
        });

        let state = AppState {
            store,
            hub,
            receipts,
            ingestor,
            sessions,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics,
            max_connections: config.max_connections,
            start_time: Instant::now(),
        };

        Self {
            config,
            state,
            conversations,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(http::health))
            .route("/metrics", get(http::metrics))
            .route("/v1/ws", get(http::ws_upgrade))
            .route("/v1/users/{user}/snapshot", get(http::snapshot))
            .route(
                "/v1/users/{user}/conversations/{conversation}/read",
                post(http::mark_read),
            )
            .route("/v1/conversations", post(http::create_conversation))
            .route("/v1/messages", post(http::message_created))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.state.shutdown.token();

        info!(%addr, "tally server listening");
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                tracing::error!(error = %e, "server exited with error");
            }
        });
        Ok((addr, handle))
    }

    /// Close every session and wait for them to finish.
    pub async fn shutdown(&self, timeout: Option<Duration>) -> bool {
        info!(
            sessions = self.state.hub.connection_count().await,
            "shutting down"
        );
        self.state.shutdown.graceful_shutdown(timeout).await
    }

    /// Fan-out hub.
    pub fn hub(&self) -> &Arc<SessionHub> {
        &self.state.hub
    }

    /// Collaborator event intake.
    pub fn ingestor(&self) -> &Arc<Ingestor> {
        &self.state.ingestor
    }

    /// Mark-as-read entry point.
    pub fn receipts(&self) -> &Arc<ReadReceiptProcessor> {
        &self.state.receipts
    }

    /// Conversation registry.
    pub fn conversations(&self) -> &Arc<ConversationRegistry> {
        &self.conversations
    }

    /// Shutdown coordinator.
    pub fn shutdown_coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

//! Request handlers wiring the capture core to HTTP

mod capture;
mod live;
mod manage;
mod replay;

use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use hyper::body::Body;
use hyper::{Request, Response, StatusCode};
use tracing::{debug, error};

pub use manage::{CreateEndpoint, EndpointView, RequestPage, RequestView, BROWSER_ID_COOKIE};

use crate::capture::CaptureNormalizer;
use crate::config::Config;
use crate::live::{Broadcaster, SubscriptionRegistry};
use crate::network::http::{error_response, text};
use crate::network::{route, ResponseBody, Route, Shutdown};
use crate::record::Endpoint;
use crate::replay::ReplayEngine;
use crate::storage::{open_store, Store};
use crate::{HookError, Result};

/// Shared state behind every connection
pub struct App {
    config: Arc<Config>,
    store: Arc<dyn Store>,
    registry: Arc<SubscriptionRegistry>,
    broadcaster: Broadcaster,
    normalizer: CaptureNormalizer,
    replay: ReplayEngine,
    shutdown: Shutdown,
}

impl App {
    /// Assemble the application around an opened store
    ///
    /// # Errors
    ///
    /// Returns error if the replay client cannot be built
    pub fn new(config: Arc<Config>, store: Arc<dyn Store>) -> Result<Self> {
        let registry = Arc::new(SubscriptionRegistry::new(config.live.queue_capacity));
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let normalizer = CaptureNormalizer::new(&config.limits);
        let replay = ReplayEngine::new(config.replay_timeout())?;

        Ok(Self {
            config,
            store,
            registry,
            broadcaster,
            normalizer,
            replay,
            shutdown: Shutdown::new(),
        })
    }

    /// Open the configured store and assemble the application
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be opened
    pub fn from_config(config: Config) -> Result<Self> {
        let store = open_store(&config)?;
        Self::new(Arc::new(config), store)
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Persistence backend
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Live subscriber registry
    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Server-wide shutdown signal
    #[must_use]
    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Endpoint that exists and has not expired
    ///
    /// # Errors
    ///
    /// Returns `EndpointNotFound` for unknown or expired endpoints
    pub fn live_endpoint(&self, endpoint_id: &str) -> Result<Endpoint> {
        let endpoint = self.store.get_endpoint(endpoint_id)?;
        if endpoint.is_expired_at(Utc::now()) {
            return Err(HookError::EndpointNotFound(endpoint_id.to_string()));
        }
        Ok(endpoint)
    }

    /// Route and serve one request; errors become plain-text responses
    pub async fn handle<B>(&self, request: Request<B>, peer: SocketAddr) -> Response<ResponseBody>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        match self.dispatch(request, peer).await {
            Ok(response) => response,
            Err(e) => {
                if e.status().is_server_error() {
                    error!("{} {} failed: {}", method, path, e);
                } else {
                    debug!("{} {} rejected: {}", method, path, e);
                }
                error_response(&e)
            }
        }
    }

    async fn dispatch<B>(&self, request: Request<B>, peer: SocketAddr) -> Result<Response<ResponseBody>>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        match route(request.method(), request.uri().path())? {
            Route::Capture { endpoint_id } => self.capture(&endpoint_id, request, peer).await,
            Route::WebSocket { endpoint_id } => self.websocket(&endpoint_id, request),
            Route::Sse { endpoint_id } => self.sse(&endpoint_id),
            Route::Replay { request_id } => self.replay(request_id, request.headers()).await,
            Route::GetRequest { request_id } => self.request_detail(request_id),
            Route::DeleteRequest { request_id } => self.delete_request(request_id),
            Route::CreateEndpoint => self.create_endpoint(request).await,
            Route::ListEndpoints => self.list_endpoints(&request),
            Route::GetEndpoint { endpoint_id } => self.endpoint_detail(&endpoint_id),
            Route::DeleteEndpoint { endpoint_id } => self.delete_endpoint(&endpoint_id),
            Route::ListRequests { endpoint_id } => self.list_requests(&endpoint_id, request.uri()),
            Route::Health => Ok(text(StatusCode::OK, "ok")),
        }
    }
}

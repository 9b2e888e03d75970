use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::Error;
use crate::method::MockMethod;
use crate::rule::{IncomingRequest, MockResponse, Reply, RuleTable, RuleTableStats, parse_query};

/// Port the mock server listens on unless configured otherwise
pub const DEFAULT_PORT: u16 = 9000;

/// How long `stop` waits for in-flight replies before abandoning them
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// State shared between the owning [`MockServer`] and request handlers
#[derive(Debug, Default)]
struct SharedState {
    rules: RwLock<RuleTable>,
    received: Mutex<Vec<Value>>,
}

impl SharedState {
    fn rules(&self) -> RwLockReadGuard<'_, RuleTable> {
        self.rules.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn rules_mut(&self) -> RwLockWriteGuard<'_, RuleTable> {
        self.rules.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn received(&self) -> MutexGuard<'_, Vec<Value>> {
        self.received.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct RunningServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// HTTP server standing in for a remote API during a test run
///
/// Constructed once per run and owned by whoever drives the run. Rules and
/// recorded bodies survive `stop`/`start` cycles; only [`MockServer::reset`]
/// clears them.
pub struct MockServer {
    bind_address: IpAddr,
    port: u16,
    state: Arc<SharedState>,
    running: Option<RunningServer>,
}

impl MockServer {
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            state: Arc::new(SharedState::default()),
            running: None,
        }
    }

    /// Set the address to bind to instead of the loopback interface
    #[must_use]
    pub fn with_bind_address(mut self, bind_address: IpAddr) -> Self {
        self.bind_address = bind_address;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Address the listener is bound to, while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.addr)
    }

    /// Base URL clients should use, while running
    pub fn base_url(&self) -> Option<String> {
        self.local_addr().map(|addr| format!("http://{addr}"))
    }

    /// Bind the listener and start serving
    ///
    /// # Errors
    ///
    /// Returns [`Error::PortInUse`] if another process holds the port and
    /// [`Error::AlreadyRunning`] if this server was already started.
    #[instrument(skip_all, fields(bind_address = %self.bind_address, port = self.port))]
    pub async fn start(&mut self) -> Result<SocketAddr, Error> {
        if let Some(running) = &self.running {
            return Err(Error::AlreadyRunning { addr: running.addr });
        }

        let addr = SocketAddr::new(self.bind_address, self.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::from_bind(addr, e))?;
        let addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let router = router(Arc::clone(&self.state));
        let handle = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                let result = axum::serve(listener, router)
                    .with_graceful_shutdown(async move { shutdown.cancelled().await })
                    .await;
                if let Err(e) = result {
                    error!(error = %e, "Mock API server terminated unexpectedly");
                }
            }
        });

        self.running = Some(RunningServer {
            addr,
            shutdown,
            handle,
        });

        info!(address = %addr, "Mock API server running on http://{addr}");
        Ok(addr)
    }

    /// Stop accepting connections and release the port
    ///
    /// Replies that are still waiting out their idle time get a short grace
    /// period and are abandoned afterwards.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            debug!("Mock API server is not running, nothing to stop");
            return;
        };

        running.shutdown.cancel();
        let abort = running.handle.abort_handle();
        match tokio::time::timeout(SHUTDOWN_GRACE, running.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Mock API server task failed during shutdown"),
            Err(_) => {
                warn!(
                    grace_ms = SHUTDOWN_GRACE.as_millis() as u64,
                    "Abandoning in-flight mock replies"
                );
                abort.abort();
            }
        }

        info!(address = %running.addr, "Mock API server stopped");
    }

    /// Forget every registered mock and every recorded body
    pub fn reset(&self) {
        self.state.rules_mut().reset();
        self.state.received().clear();
        debug!("Mock API rules and received data reset");
    }

    /// Register a mocked response
    ///
    /// A later registration for the same method, path and query filter
    /// replaces the earlier one.
    pub fn mock_response(&self, response: MockResponse) {
        match &response.query {
            Some(query) => info!(
                route = %response.route,
                method = %response.method,
                query = ?query,
                "Registering mock"
            ),
            None => info!(route = %response.route, method = %response.method, "Registering mock"),
        }
        if response.query.is_some() && !response.method.supports_query_filter() {
            debug!(
                method = %response.method,
                "Query filter ignored, only GET rules match on query parameters"
            );
        }

        let replaced = self.state.rules_mut().register(response.into_rule());
        if replaced {
            debug!("Replaced previously registered mock");
        }
    }

    /// Snapshot of the bodies recorded so far, in recording order
    pub fn received_data(&self) -> Vec<Value> {
        self.state.received().clone()
    }

    pub fn rule_stats(&self) -> RuleTableStats {
        self.state.rules().stats()
    }
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new(DEFAULT_PORT)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.shutdown.cancel();
        }
    }
}

fn router(state: Arc<SharedState>) -> Router {
    Router::new()
        .fallback(handle_request)
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

async fn handle_request(
    State(state): State<Arc<SharedState>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let Some(mock_method) = MockMethod::from_request(&method) else {
        return no_rule(&method, uri.path());
    };

    let request = IncomingRequest {
        method: mock_method,
        path: uri.path().to_string(),
        query: parse_query(uri.query()),
        body,
    };

    // Clone so the lock is released before sleeping
    let matched = state.rules().find(&request).cloned();
    let Some(rule) = matched else {
        return no_rule(&method, uri.path());
    };

    info!(path = %request.path, "Request received");

    if rule.record_body {
        state.received().push(request.body_value());
    }

    if !rule.idle_time.is_zero() {
        tokio::time::sleep(rule.idle_time).await;
    }

    match rule.reply {
        Reply::Text(text) => (StatusCode::OK, text).into_response(),
        Reply::Json(data) => (StatusCode::OK, Json(data)).into_response(),
    }
}

fn no_rule(method: &Method, path: &str) -> Response {
    debug!(%method, path, "No mock rule matched");
    (
        StatusCode::NOT_FOUND,
        format!("No mock rule matched {method} {path}"),
    )
        .into_response()
}

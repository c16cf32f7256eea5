use crate::config::SharedSettings;
use crate::outbound::PpsCounter;
use crate::registry::ClientRegistry;
use crate::resources::ResourceCatalog;
use crate::shutdown::ShutdownCoordinator;
use crate::{CLIENT_VERSION, SERVER_VERSION};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, trace};

/// Registration endpoints, tried in order until one answers.
pub const BACKEND_HOSTS: [&str; 3] = [
    "backend.beammp.com",
    "backup1.beammp.com",
    "backup2.beammp.com",
];

const HEARTBEAT_PATH: &str = "/heartbeat";

/// Idle servers re-register every 30 s; a settings or roster change
/// accelerates the next update to 5 s.
const IDLE_INTERVAL: Duration = Duration::from_secs(30);
const CHANGED_INTERVAL: Duration = Duration::from_secs(5);

const POLL_SLEEP: Duration = Duration::from_millis(100);
const FAILOVER_SLEEP: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request could not be built: {0}")]
    Request(#[from] hyper::http::Error),
    #[error("request failed: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),
    #[error("response body could not be read: {0}")]
    Body(#[from] hyper::Error),
}

/// Minimal outbound HTTP surface the heartbeat needs.
pub trait BackendClient: Send + Sync + 'static {
    fn post(
        &self,
        host: &str,
        path: &str,
        headers: &[(&str, &str)],
        body: String,
    ) -> impl Future<Output = Result<(u16, String), BackendError>> + Send;
}

/// Production implementation over a plain hyper client.
pub struct HttpBackend {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpBackend {
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }
}

impl Default for HttpBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendClient for HttpBackend {
    async fn post(
        &self,
        host: &str,
        path: &str,
        headers: &[(&str, &str)],
        body: String,
    ) -> Result<(u16, String), BackendError> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(format!("http://{}{}", host, path))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Full::new(Bytes::from(body)))?;

        let response = self.client.request(request).await?;
        let status = response.status().as_u16();
        let bytes = response.into_body().collect().await?.to_bytes();
        Ok((status, String::from_utf8_lossy(&bytes).into_owned()))
    }
}

/// Periodically registers the server with the backend and drives the
/// authenticated-session flag. Never terminates on error; only the stop
/// flag, checked at sleep boundaries, ends it.
pub struct HeartbeatEngine<B: BackendClient> {
    settings: SharedSettings,
    registry: Arc<ClientRegistry>,
    resources: Arc<dyn ResourceCatalog>,
    pps: Arc<PpsCounter>,
    backend: B,
    is_auth: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

impl<B: BackendClient> HeartbeatEngine<B> {
    pub fn new(
        settings: SharedSettings,
        registry: Arc<ClientRegistry>,
        resources: Arc<dyn ResourceCatalog>,
        pps: Arc<PpsCounter>,
        backend: B,
    ) -> Self {
        Self {
            settings,
            registry,
            resources,
            pps,
            backend,
            is_auth: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag flipped on the first accepted registration.
    pub fn auth_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.is_auth)
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Starts the worker and registers its teardown with the coordinator.
    pub fn spawn(self, shutdown: &ShutdownCoordinator) {
        let stop = Arc::clone(&self.stop);
        let handle = tokio::spawn(self.run());
        shutdown.register(move || async move {
            stop.store(true, Ordering::SeqCst);
            let _ = handle.await;
        });
    }

    pub async fn run(self) {
        let mut last_body = String::new();
        let mut last_send = Instant::now();

        while !self.stop.load(Ordering::SeqCst) {
            let body = self.generate_call();
            let unchanged = body == last_body;
            let threshold = if unchanged { IDLE_INTERVAL } else { CHANGED_INTERVAL };
            let elapsed = last_send.elapsed();
            if elapsed < threshold {
                sleep(POLL_SLEEP).await;
                continue;
            }
            debug!("heartbeat (after {}s)", elapsed.as_secs());
            last_body = body.clone();

            let mut full = body;
            let config = self.settings.snapshot();
            if let Some(ip) = &config.network.custom_ip {
                full.push_str("&ip=");
                full.push_str(ip);
            }
            full.push_str(&format!("&pps={}", self.pps.published()));

            // A dead backend must not reset the timer; the next pass retries
            // immediately against the 500 ms failover pacing.
            if let Some(response) = self.post_with_failover(&full).await {
                last_send = Instant::now();
                self.interpret_response(&response);
            }
        }
    }

    /// Fixed-order form body; the backend parses it positionally.
    fn generate_call(&self) -> String {
        let config = self.settings.snapshot();
        format!(
            "uuid={}&players={}&maxplayers={}&port={}&map={}&private={}&version={}&clientversion={}&name={}&modlist={}&modstotalsize={}&modstotal={}&playerslist={}&desc={}",
            config.auth.key,
            self.registry.client_count(),
            config.server.max_players,
            config.network.port,
            config.server.map,
            if config.server.is_private { "true" } else { "false" },
            SERVER_VERSION,
            CLIENT_VERSION,
            config.server.name,
            self.resources.trimmed_list(),
            self.resources.total_size(),
            self.resources.mods_loaded(),
            self.players_list(),
            config.server.description,
        )
    }

    fn players_list(&self) -> String {
        let mut list = String::new();
        self.registry.for_each_client(|client| {
            if let Some(client) = client.upgrade() {
                list.push_str(&client.name());
                list.push(';');
            }
            true
        });
        list
    }

    /// Posts to each endpoint in rank order until one returns HTTP 200 with
    /// a JSON object body.
    async fn post_with_failover(&self, body: &str) -> Option<Value> {
        for host in BACKEND_HOSTS {
            match self
                .backend
                .post(host, HEARTBEAT_PATH, &[("api-v", "2")], body.to_string())
                .await
            {
                Ok((200, text)) => {
                    trace!("{}", text);
                    match serde_json::from_str::<Value>(&text) {
                        Ok(response) if response.is_object() => return Some(response),
                        _ => {
                            error!(host, "backend response failed to parse as valid json");
                            debug!("response was: `{}`", text);
                        }
                    }
                }
                Ok((status, _)) => {
                    error!(host, status, "backend rejected heartbeat");
                }
                Err(e) => {
                    error!(host, "heartbeat POST failed: {}", e);
                }
            }
            sleep(FAILOVER_SLEEP).await;
        }
        None
    }

    fn interpret_response(&self, response: &Value) {
        let status = response.get("status").and_then(Value::as_str);
        let code = response.get("code").and_then(Value::as_str);
        let msg = response.get("msg").and_then(Value::as_str);
        let (Some(status), Some(_code), Some(msg)) = (status, code, msg) else {
            error!("missing/invalid json members in backend response");
            return;
        };

        if self.is_auth.load(Ordering::SeqCst) {
            return;
        }
        match status {
            "2000" => {
                self.is_auth.store(true, Ordering::SeqCst);
                info!("Authenticated!");
            }
            "200" => {
                self.is_auth.store(true, Ordering::SeqCst);
                info!("Resumed authenticated session!");
            }
            _ => {
                let msg = if msg.is_empty() {
                    "Backend didn't provide a reason"
                } else {
                    msg
                };
                error!("Backend REFUSED the auth key. {}", msg);
            }
        }
    }
}

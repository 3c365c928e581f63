use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Client;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::AppConfig;
use crate::encode_uri_component;
use crate::errors::{AppError, AppResult};

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_text(&self, url: &str) -> AppResult<String>;
}

pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> AppResult<Self> {
        let http = Client::builder()
            .user_agent(concat!("order-desk/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_text(&self, url: &str) -> AppResult<String> {
        let response = self
            .http
            .get(url)
            .header(ACCEPT, "text/csv")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }
}

/// One way of reaching the published sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Direct,
    /// Relay endpoint prefix; the target URL is appended percent-encoded.
    Relay(String),
}

impl Route {
    fn request_url(&self, target: &str) -> String {
        match self {
            Route::Direct => target.to_string(),
            Route::Relay(prefix) => format!("{prefix}{}", encode_uri_component(target)),
        }
    }

    fn label(&self) -> &str {
        match self {
            Route::Direct => "direct",
            Route::Relay(prefix) => prefix,
        }
    }

    /// Relays sometimes answer 200 with an error page, so their bodies have to
    /// look like CSV before they count.
    fn accepts(&self, body: &str) -> bool {
        match self {
            Route::Direct => true,
            Route::Relay(_) => !body.is_empty() && body.contains(','),
        }
    }
}

/// Runs `attempt` over each candidate in order and returns the first success.
///
/// Failures never abort the sequence. Only the last error is kept.
pub async fn first_success<C, T, F, Fut>(
    candidates: impl IntoIterator<Item = C>,
    mut attempt: F,
) -> Result<T, Option<AppError>>
where
    F: FnMut(C) -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut last_error = None;
    for candidate in candidates {
        match attempt(candidate).await {
            Ok(value) => return Ok(value),
            Err(err) => last_error = Some(err),
        }
    }
    Err(last_error)
}

#[derive(Clone)]
pub struct SheetFetcher {
    transport: Arc<dyn Transport>,
    relays: Vec<String>,
    attempt_timeout: Duration,
}

impl SheetFetcher {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let transport = HttpTransport::new(config.fetch_timeout())?;
        Ok(Self::with_transport(
            Arc::new(transport),
            config.relay_routes.clone(),
            config.fetch_timeout(),
        ))
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        relays: Vec<String>,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            relays,
            attempt_timeout,
        }
    }

    pub fn routes(&self) -> Vec<Route> {
        std::iter::once(Route::Direct)
            .chain(self.relays.iter().cloned().map(Route::Relay))
            .collect()
    }

    /// Fetches the CSV text behind `url`, trying the direct route first and
    /// then each relay in priority order.
    pub async fn fetch(&self, url: &str, dataset: &str) -> AppResult<String> {
        let target = with_cache_buster(url)?;
        let outcome = first_success(self.routes(), |route| {
            self.attempt(route, &target, dataset)
        })
        .await;

        match outcome {
            Ok(body) => Ok(body),
            Err(last_error) => {
                warn!(
                    target: "fetcher",
                    dataset,
                    last_error = ?last_error,
                    "all fetch attempts failed"
                );
                Err(AppError::Fetch {
                    dataset: dataset.to_string(),
                })
            }
        }
    }

    async fn attempt(&self, route: Route, target: &str, dataset: &str) -> AppResult<String> {
        let request_url = route.request_url(target);
        let result = match timeout(self.attempt_timeout, self.transport.get_text(&request_url))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout {
                route: route.label().to_string(),
            }),
        };

        let body = match result {
            Ok(body) if route.accepts(&body) => body,
            Ok(_) => {
                debug!(
                    target: "fetcher",
                    dataset,
                    route = route.label(),
                    "rejected non-CSV payload"
                );
                return Err(AppError::Rejected {
                    route: route.label().to_string(),
                });
            }
            Err(err) => {
                debug!(
                    target: "fetcher",
                    dataset,
                    route = route.label(),
                    error = %err,
                    "fetch attempt failed"
                );
                return Err(err);
            }
        };

        info!(
            target: "fetcher",
            dataset,
            route = route.label(),
            bytes = body.len(),
            "sheet fetched"
        );
        Ok(body)
    }
}

fn with_cache_buster(url: &str) -> AppResult<String> {
    let mut parsed = Url::parse(url)
        .map_err(|err| AppError::Config(format!("invalid sheet URL {url}: {err}")))?;
    parsed
        .query_pairs_mut()
        .append_pair("t", &Utc::now().timestamp_millis().to_string());
    Ok(parsed.to_string())
}

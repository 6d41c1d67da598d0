use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::protocol::{
    login_body, parse_login_response, LoginResponse, APP_ID_PARAM, DEFAULT_APP_ID,
    DEFAULT_HOSTNAME, DEFAULT_USER_AGENT, LOGIN_PATH, TOKEN_PARAM,
};
use crate::session::{calculate_delay, Backoff, RetryState, Session};
use crate::{Error, Result};

/// Per-call query pairs and JSON body. Kept so the call can be re-issued.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub json: Option<Value>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.json = Some(body);
        self
    }
}

pub struct FrisquetClientBuilder {
    hostname: String,
    username: String,
    password: String,
    app_id: Option<String>,
    user_agent: Option<String>,
    backoff: Backoff,
}

impl FrisquetClientBuilder {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            hostname: DEFAULT_HOSTNAME.to_string(),
            username: username.into(),
            password: password.into(),
            app_id: None,
            user_agent: None,
            backoff: Backoff::default(),
        }
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn app_id(mut self, id: impl Into<String>) -> Self {
        self.app_id = Some(id.into());
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn build(self) -> Result<FrisquetClient> {
        for (field, value) in [
            ("hostname", &self.hostname),
            ("username", &self.username),
            ("password", &self.password),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("missing \"{field}\" config field")));
            }
        }

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let http = reqwest::Client::builder().user_agent(user_agent).build()?;

        debug!(
            username = %self.username,
            hostname = %self.hostname,
            "creating Frisquet Connect client"
        );

        Ok(FrisquetClient {
            http,
            base_url: self.hostname.trim_end_matches('/').to_string(),
            app_id: self.app_id.unwrap_or_else(|| DEFAULT_APP_ID.to_string()),
            username: self.username,
            password: self.password,
            backoff: self.backoff,
            session: RwLock::new(None),
            generation: AtomicU64::new(0),
            login_lock: Mutex::new(()),
            retry: RetryState::default(),
        })
    }
}

/// Cloud API client. Attaches the session token to every call and
/// re-authenticates once when the server answers 401/403.
pub struct FrisquetClient {
    http: reqwest::Client,
    base_url: String,
    app_id: String,
    username: String,
    password: String,
    backoff: Backoff,
    session: RwLock<Option<Arc<Session>>>,
    generation: AtomicU64,
    login_lock: Mutex<()>,
    retry: RetryState,
}

impl FrisquetClient {
    pub fn builder(
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> FrisquetClientBuilder {
        FrisquetClientBuilder::new(username, password)
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        Self::builder(&config.username, &config.password)
            .hostname(&config.hostname)
            .build()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn session(&self) -> Option<Arc<Session>> {
        self.session.read().await.clone()
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry.attempts()
    }

    pub async fn login(&self) -> Result<LoginResponse> {
        let _guard = self.login_lock.lock().await;
        self.perform_login().await
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        self.request(Method::GET, path, RequestOptions::new()).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Response> {
        self.request(Method::POST, path, RequestOptions::new().json(body))
            .await
    }

    /// GET `path` and decode the body, failing on any non-2xx status.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.get(path).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Send a call with the current token. Non-2xx statuses come back as
    /// responses; only transport failures are errors.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<Response> {
        let (response, used_generation) = self.send(&method, path, &options).await?;
        let status = response.status().as_u16();
        trace!(status, path, "received response");

        match status {
            401 | 403 => {
                warn!(status, path, "unauthorized response, will retry");
                if let Err(e) = self.reauthenticate(used_generation).await {
                    warn!(error = %e, path, "failed to retry");
                    debug!(error = ?e, "retry failure detail");
                    return Ok(response);
                }

                debug!(path, "retrying request");
                let (retried, _) = self.send(&method, path, &options).await?;
                let status = retried.status().as_u16();
                match status {
                    200 | 201 => self.retry.reset(),
                    _ => warn!(status, path, "retried request still failing"),
                }
                Ok(retried)
            }
            200 | 201 => Ok(response),
            _ => {
                warn!(status, path, "unexpected response status");
                Ok(response)
            }
        }
    }

    async fn send(
        &self,
        method: &Method,
        path: &str,
        options: &RequestOptions,
    ) -> Result<(Response, u64)> {
        let session = self.session().await;
        let url = self.url(path);
        debug!(%method, url = %url, "sending request");

        let mut req = self.http.request(method.clone(), &url);
        if let Some(ref session) = session {
            req = req.query(&[(TOKEN_PARAM, session.token.as_str())]);
        }
        if !options.query.is_empty() {
            req = req.query(&options.query);
        }
        if let Some(ref body) = options.json {
            req = req.json(body);
        }

        let resp = req.send().await?;
        Ok((resp, session.map_or(0, |s| s.generation)))
    }

    /// Back off, log in again and let the fresh session settle.
    async fn reauthenticate(&self, used_generation: u64) -> Result<()> {
        let attempt = self.retry.record_attempt();
        let delay = calculate_delay(attempt, &self.backoff);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off before login");
        tokio::time::sleep(delay).await;

        self.refresh_session(used_generation).await?;
        tokio::time::sleep(self.backoff.settle).await;
        Ok(())
    }

    /// Log in again unless another caller already replaced the session
    /// the failed request was sent with.
    async fn refresh_session(&self, stale_generation: u64) -> Result<()> {
        let _guard = self.login_lock.lock().await;
        if let Some(current) = self.session().await
            && current.generation > stale_generation
        {
            debug!(
                generation = current.generation,
                "session already refreshed by a concurrent call"
            );
            return Ok(());
        }
        self.perform_login().await.map(|_| ())
    }

    async fn perform_login(&self) -> Result<LoginResponse> {
        // The login call itself must not carry a stale token.
        *self.session.write().await = None;

        let url = self.url(LOGIN_PATH);
        debug!(url = %url, username = %self.username, "logging in");

        let resp = self
            .http
            .post(&url)
            .query(&[(APP_ID_PARAM, self.app_id.as_str())])
            .json(&login_body(&self.username, &self.password))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "login rejected");
            return Err(Error::Status {
                status: status.as_u16(),
                path: LOGIN_PATH.to_string(),
            });
        }

        let body = resp.text().await?;
        let login = parse_login_response(&body)?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.session.write().await = Some(Arc::new(Session::new(login.token.clone(), generation)));
        debug!(generation, "login succeeded");
        Ok(login)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

//! Request/response seam to the server: snapshot fetch and mark-as-read.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tally_core::{ConversationId, ReadReceipt, Result, SessionId, TallyError, UnreadSnapshot, UserId};
use tracing::debug;

/// Header naming the push session a mark-read came from.
pub const SESSION_HEADER: &str = "x-tally-session";

/// Server calls the client needs outside the push channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CounterApi: Send + Sync {
    /// Authoritative unread state for `user`.
    async fn snapshot(&self, user: &UserId) -> Result<UnreadSnapshot>;

    /// Mark `conversation` read. `origin` names this client's push session
    /// so the server does not echo the receipt back to it.
    async fn mark_read(
        &self,
        user: &UserId,
        conversation: &ConversationId,
        origin: Option<SessionId>,
    ) -> Result<ReadReceipt>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// [`CounterApi`] over the server's HTTP endpoints.
#[derive(Clone, Debug)]
pub struct HttpCounterApi {
    base: Url,
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpCounterApi {
    /// Client for the server at `base_url`, with a per-request `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| TallyError::InvalidRequest(format!("invalid server URL '{base_url}': {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TallyError::Channel(e.to_string()))?;
        Ok(Self { base, http, timeout })
    }

    /// Server base URL.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        endpoint(&self.base, segments)
    }
}

/// `base` extended by percent-encoded path `segments`.
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|()| TallyError::InvalidRequest(format!("server URL '{base}' cannot be a base")))?;
        let _ = path.pop_if_empty().extend(segments);
    }
    Ok(url)
}

/// Push-channel URL for `user` derived from the HTTP base URL.
pub fn push_url(base_url: &str, user: &UserId) -> Result<Url> {
    let base = Url::parse(base_url)
        .map_err(|e| TallyError::InvalidRequest(format!("invalid server URL '{base_url}': {e}")))?;
    let mut url = endpoint(&base, &["v1", "ws"])?;
    let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|()| TallyError::InvalidRequest(format!("cannot derive push URL from '{base_url}'")))?;
    let _ = url.query_pairs_mut().append_pair("user", user.as_str());
    Ok(url)
}

fn transport_error(err: &reqwest::Error, timeout: Duration) -> TallyError {
    if err.is_timeout() {
        TallyError::Timeout(timeout)
    } else {
        TallyError::Channel(err.to_string())
    }
}

/// Map a non-success response to the error taxonomy.
async fn error_from_response(resp: reqwest::Response, conversation: Option<&ConversationId>) -> TallyError {
    let status = resp.status();
    let body = resp.json::<ErrorBody>().await.ok();
    let message = body
        .as_ref()
        .map_or_else(|| status.to_string(), |b| b.message.clone());
    debug!(%status, code = body.as_ref().map(|b| b.code.as_str()), "server returned error");

    match status {
        StatusCode::NOT_FOUND => match conversation {
            Some(conversation) => TallyError::NotFound(conversation.clone()),
            None => TallyError::InvalidRequest(message),
        },
        StatusCode::BAD_REQUEST => TallyError::InvalidRequest(message),
        StatusCode::SERVICE_UNAVAILABLE => TallyError::TransientStore(message),
        _ => TallyError::Channel(format!("{status}: {message}")),
    }
}

#[async_trait]
impl CounterApi for HttpCounterApi {
    async fn snapshot(&self, user: &UserId) -> Result<UnreadSnapshot> {
        let url = self.endpoint(&["v1", "users", user.as_str(), "snapshot"])?;
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp, None).await);
        }
        resp.json::<UnreadSnapshot>()
            .await
            .map_err(|e| TallyError::Channel(format!("invalid snapshot body: {e}")))
    }

    async fn mark_read(
        &self,
        user: &UserId,
        conversation: &ConversationId,
        origin: Option<SessionId>,
    ) -> Result<ReadReceipt> {
        let url = self.endpoint(&[
            "v1",
            "users",
            user.as_str(),
            "conversations",
            conversation.as_str(),
            "read",
        ])?;
        let mut req = self.http.post(url);
        if let Some(origin) = origin {
            req = req.header(SESSION_HEADER, origin.as_str());
        }
        let resp = req
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp, Some(conversation)).await);
        }
        resp.json::<ReadReceipt>()
            .await
            .map_err(|e| TallyError::Channel(format!("invalid receipt body: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn push_url_from_http_base() {
        let url = push_url("http://127.0.0.1:8787", &"seller".into()).unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:8787/v1/ws?user=seller");
    }

    #[test]
    fn push_url_from_https_base_with_prefix() {
        let url = push_url("https://example.com/counters/", &"a b".into()).unwrap();
        assert_eq!(url.as_str(), "wss://example.com/counters/v1/ws?user=a+b");
    }

    #[test]
    fn endpoint_encodes_segments() {
        let base = Url::parse("http://localhost:1").unwrap();
        let url = endpoint(&base, &["v1", "users", "x/y", "snapshot"]).unwrap();
        assert_eq!(url.path(), "/v1/users/x%2Fy/snapshot");
    }

    #[test]
    fn invalid_base_url() {
        assert_matches!(
            HttpCounterApi::new("not a url", Duration::from_secs(1)),
            Err(TallyError::InvalidRequest(_))
        );
    }
}

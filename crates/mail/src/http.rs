//! HTTP transport seam
//!
//! The Gmail and chat-completion clients talk through [`HttpTransport`] so
//! tests can script responses. The production implementation uses synchronous
//! HTTP (ureq) to stay executor-agnostic.

use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// A fully read HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 200 response with a JSON body
    pub fn ok_json(value: serde_json::Value) -> Self {
        Self::new(200, value.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).context("Failed to parse response body")
    }
}

/// Minimal blocking HTTP client.
///
/// Implementations must return non-2xx statuses as `Ok` responses; only
/// transport-level failures (DNS, TLS, timeouts) are errors.
pub trait HttpTransport: Send + Sync {
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse>;

    fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<HttpResponse>;
}

/// ureq-backed transport with a global per-request timeout
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self { agent }
    }
}

impl HttpTransport for UreqTransport {
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse> {
        let mut request = self.agent.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let mut response = request
            .call()
            .with_context(|| format!("Failed to send GET {}", redact(url)))?;

        let status = response.status().as_u16();
        let body = response
            .body_mut()
            .read_to_string()
            .context("Failed to read response body")?;

        Ok(HttpResponse { status, body })
    }

    fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<HttpResponse> {
        let mut request = self.agent.post(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let mut response = request
            .send_json(body)
            .with_context(|| format!("Failed to send POST {}", redact(url)))?;

        let status = response.status().as_u16();
        let body = response
            .body_mut()
            .read_to_string()
            .context("Failed to read response body")?;

        Ok(HttpResponse { status, body })
    }
}

/// Drop the query string so logged URLs never carry search terms.
fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// A request captured by [`ScriptedTransport`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

struct Route {
    method: &'static str,
    fragment: String,
    responses: VecDeque<Result<HttpResponse, String>>,
}

/// In-memory transport that replays scripted responses.
///
/// Routes match on method plus a URL substring, first match wins. Each route
/// hands out its responses in order and keeps repeating the last one.
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Script a response for GET requests whose URL contains `fragment`
    pub fn on_get(&self, fragment: &str, response: HttpResponse) -> &Self {
        self.push("GET", fragment, Ok(response))
    }

    /// Script a response for POST requests whose URL contains `fragment`
    pub fn on_post(&self, fragment: &str, response: HttpResponse) -> &Self {
        self.push("POST", fragment, Ok(response))
    }

    /// Script a transport-level failure
    pub fn fail_get(&self, fragment: &str, reason: &str) -> &Self {
        self.push("GET", fragment, Err(reason.to_string()))
    }

    pub fn fail_post(&self, fragment: &str, reason: &str) -> &Self {
        self.push("POST", fragment, Err(reason.to_string()))
    }

    fn push(
        &self,
        method: &'static str,
        fragment: &str,
        response: Result<HttpResponse, String>,
    ) -> &Self {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        match routes
            .iter_mut()
            .find(|r| r.method == method && r.fragment == fragment)
        {
            Some(route) => route.responses.push_back(response),
            None => routes.push(Route {
                method,
                fragment: fragment.to_string(),
                responses: VecDeque::from([response]),
            }),
        }
        self
    }

    /// All requests seen so far, in arrival order
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of requests whose URL contains `fragment`
    pub fn count(&self, fragment: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.url.contains(fragment))
            .count()
    }

    fn respond(
        &self,
        method: &'static str,
        url: &str,
        headers: &[(&str, &str)],
        body: Option<&serde_json::Value>,
    ) -> Result<HttpResponse> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedRequest {
                method,
                url: url.to_string(),
                headers: headers
                    .iter()
                    .map(|(n, v)| (n.to_string(), v.to_string()))
                    .collect(),
                body: body.cloned(),
            });

        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        let route = routes
            .iter_mut()
            .find(|r| r.method == method && url.contains(&r.fragment))
            .ok_or_else(|| anyhow!("no scripted response for {} {}", method, url))?;

        let next = if route.responses.len() > 1 {
            route.responses.pop_front()
        } else {
            route.responses.front().cloned()
        };

        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(reason)) => Err(anyhow!(reason)),
            None => Err(anyhow!("no scripted response for {} {}", method, url)),
        }
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport for ScriptedTransport {
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse> {
        self.respond("GET", url, headers, None)
    }

    fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<HttpResponse> {
        self.respond("POST", url, headers, Some(body))
    }
}

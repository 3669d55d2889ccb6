//! Interactive OAuth2 consent
//!
//! Implements the authorization code flow with a loopback redirect: a local
//! HTTP listener receives the callback while the user consents in the browser.

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info, warn};
use serde::Deserialize;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

use crate::config::GmailCredentials;

/// Result of a completed consent flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentGrant {
    pub access_token: String,
    /// Lifetime in seconds
    pub expires_in: u64,
}

/// The identity provider's interactive consent flow.
///
/// Each call is one consent prompt; callers serialize them.
pub trait ConsentFlow: Send + Sync {
    fn request_token(&self, scope: &str) -> Result<ConsentGrant>;
}

/// Failures that mean the flow cannot run here at all, as opposed to the
/// user or provider refusing consent
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsentError {
    #[error("Could not bind to any port in range {start}-{end}")]
    NoCallbackPort { start: u16, end: u16 },
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

/// Browser-based consent with a loopback redirect
pub struct LoopbackConsent {
    client_id: String,
    client_secret: String,
    token_url: String,
    /// How long to wait for the browser callback
    timeout: Duration,
    /// Per-request limit on the code exchange
    request_timeout: Duration,
}

impl LoopbackConsent {
    const AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/v2/auth";
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Port range to try for the local callback server
    const PORT_RANGE_START: u16 = 8080;
    const PORT_RANGE_END: u16 = 8090;

    /// Lifetime assumed when the provider omits `expires_in`
    const DEFAULT_EXPIRES_IN: u64 = 3600;

    pub fn new(credentials: GmailCredentials) -> Self {
        Self {
            client_id: credentials.client_id,
            client_secret: credentials.client_secret,
            token_url: Self::TOKEN_URL.to_string(),
            timeout: Duration::from_secs(120),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn start_local_server(&self) -> Result<(TcpListener, u16)> {
        for port in Self::PORT_RANGE_START..=Self::PORT_RANGE_END {
            if let Ok(listener) = TcpListener::bind(("127.0.0.1", port)) {
                return Ok((listener, port));
            }
        }
        Err(ConsentError::NoCallbackPort {
            start: Self::PORT_RANGE_START,
            end: Self::PORT_RANGE_END,
        }
        .into())
    }

    /// Accept connections until one carries `code` or `error`, or the timeout passes
    fn wait_for_callback(&self, listener: TcpListener) -> Result<String> {
        listener
            .set_nonblocking(true)
            .context("Failed to configure callback listener")?;
        let deadline = Instant::now() + self.timeout;

        while Instant::now() < deadline {
            match listener.accept() {
                Ok((stream, _)) => match handle_callback(stream) {
                    Ok(Some(outcome)) => return outcome,
                    Ok(None) => {}
                    Err(e) => warn!("Ignoring malformed callback: {:#}", e),
                },
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(200));
                }
                Err(e) => return Err(e).context("Failed to accept connection"),
            }
        }

        bail!("No authorization received within {:?}", self.timeout)
    }

    fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse> {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(self.request_timeout))
            .build()
            .into();

        let mut response = agent
            .post(&self.token_url)
            .send_form([
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri),
            ])
            .context("Failed to exchange authorization code")?;

        response
            .body_mut()
            .read_json()
            .context("Failed to parse token response")
    }
}

impl ConsentFlow for LoopbackConsent {
    fn request_token(&self, scope: &str) -> Result<ConsentGrant> {
        let (listener, port) = self.start_local_server()?;
        let redirect_uri = format!("http://localhost:{}", port);
        let auth_url = build_auth_url(Self::AUTH_URL, &self.client_id, &redirect_uri, scope);

        info!("Opening browser for Google sign-in");
        println!("If the browser doesn't open, visit: {}", auth_url);
        if let Err(e) = open::that(&auth_url) {
            warn!("Failed to open browser: {}", e);
        }

        let code = self.wait_for_callback(listener)?;
        debug!("Authorization code received, exchanging for token");
        let token = self.exchange_code(&code, &redirect_uri)?;

        Ok(ConsentGrant {
            access_token: token.access_token,
            expires_in: token.expires_in.unwrap_or(Self::DEFAULT_EXPIRES_IN),
        })
    }
}

fn build_auth_url(base: &str, client_id: &str, redirect_uri: &str, scope: &str) -> String {
    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&prompt=consent",
        base,
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(scope),
    )
}

/// Answer one callback connection.
///
/// `None` means the request was unrelated (e.g. a favicon fetch) and the
/// listener should keep waiting.
fn handle_callback(mut stream: TcpStream) -> Result<Option<Result<String>>> {
    stream
        .set_nonblocking(false)
        .context("Failed to configure callback connection")?;
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .context("Failed to configure callback connection")?;

    let mut request_line = String::new();
    BufReader::new(&stream)
        .read_line(&mut request_line)
        .context("Failed to read request")?;

    let outcome = parse_callback(&request_line);
    let (status, body) = match &outcome {
        Some(Ok(_)) => ("200 OK", "Authentication successful! You can close this window."),
        Some(Err(_)) => ("400 Bad Request", "Authentication failed. Please try again."),
        None => ("404 Not Found", "Not found"),
    };

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body><h1>{}</h1></body></html>",
        status, body
    );
    stream.write_all(response.as_bytes()).ok();

    Ok(outcome)
}

/// Extract the authorization code (or provider error) from a request line
/// such as `GET /?code=AUTH_CODE&scope=... HTTP/1.1`.
fn parse_callback(request_line: &str) -> Option<Result<String>> {
    let target = request_line.split_whitespace().nth(1)?;
    let url = Url::parse("http://localhost").ok()?.join(target).ok()?;

    let mut code = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    match (code, error) {
        (_, Some(err)) => Some(Err(anyhow!("OAuth error: {}", err))),
        (Some(code), None) => Some(Ok(code)),
        (None, None) => None,
    }
}

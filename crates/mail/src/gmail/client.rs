//! Gmail API HTTP client
//!
//! Lists unread inbox messages and fetches their full records. Every request
//! defeats intermediate caches, since Gmail is known to serve stale unread
//! state otherwise.

use log::{debug, info, warn};
use rayon::prelude::*;
use std::sync::Arc;
use url::Url;

use super::api::{GmailMessage, ListMessagesResponse};
use super::token_store::now_ms;
use super::{GMAIL_API_BASE, GmailAuth, normalize_message};
use crate::error::MailError;
use crate::http::{HttpResponse, HttpTransport};
use crate::models::{Message, MessageId};

/// Gmail API client for fetching unread messages
pub struct GmailClient {
    auth: Arc<GmailAuth>,
    http: Arc<dyn HttpTransport>,
    base_url: String,
}

impl GmailClient {
    /// Search restricting results to unread inbox messages
    pub const UNREAD_QUERY: &'static str = "in:inbox is:unread label:UNREAD";

    pub const DEFAULT_MAX_RESULTS: usize = 20;

    pub fn new(auth: Arc<GmailAuth>, http: Arc<dyn HttpTransport>) -> Self {
        Self {
            auth,
            http,
            base_url: GMAIL_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn auth(&self) -> &Arc<GmailAuth> {
        &self.auth
    }

    /// List IDs of unread inbox messages
    ///
    /// # Arguments
    /// * `limit` - Maximum number of IDs to return (1-500)
    pub fn list_unread_ids(&self, limit: usize) -> Result<Vec<MessageId>, MailError> {
        self.list_unread_ids_at(limit, now_ms())
    }

    /// Get the full message by ID
    pub fn get_message(&self, id: &MessageId) -> Result<Message, MailError> {
        self.get_message_at(id, now_ms())
    }

    /// List unread messages and fetch each one concurrently.
    ///
    /// Fails as a whole if any fetch fails. Messages that lost the `UNREAD`
    /// label between the list and get calls are dropped.
    pub fn fetch_unread_messages(&self, limit: usize) -> Result<Vec<Message>, MailError> {
        // One cache-buster per fetch cycle
        let stamp = now_ms();

        let ids = self.list_unread_ids_at(limit, stamp)?;
        if ids.is_empty() {
            info!("No unread messages");
            return Ok(Vec::new());
        }

        let messages = ids
            .par_iter()
            .map(|id| self.get_message_at(id, stamp))
            .collect::<Result<Vec<_>, _>>()?;

        let fetched = messages.len();
        let unread: Vec<Message> = messages.into_iter().filter(|m| m.is_unread()).collect();
        if unread.len() < fetched {
            debug!(
                "Dropped {} messages read since listing",
                fetched - unread.len()
            );
        }

        info!("Fetched {} unread messages", unread.len());
        Ok(unread)
    }

    fn list_unread_ids_at(&self, limit: usize, stamp: i64) -> Result<Vec<MessageId>, MailError> {
        let url = self.endpoint(
            "users/me/messages",
            &[
                ("q", Self::UNREAD_QUERY.to_string()),
                ("maxResults", limit.clamp(1, 500).to_string()),
                ("_", stamp.to_string()),
            ],
        )?;

        let response = self.get(&url)?;
        let list: ListMessagesResponse = response
            .json()
            .map_err(|e| MailError::FetchFailed(format!("{:#}", e)))?;

        let ids: Vec<MessageId> = list
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|m| MessageId::new(m.id))
            .collect();

        debug!("Listed {} unread message ids", ids.len());
        Ok(ids)
    }

    fn get_message_at(&self, id: &MessageId, stamp: i64) -> Result<Message, MailError> {
        let path = format!("users/me/messages/{}", urlencoding::encode(id.as_str()));
        let url = self.endpoint(
            &path,
            &[("format", "full".to_string()), ("_", stamp.to_string())],
        )?;

        let response = self.get(&url)?;
        let message: GmailMessage = response
            .json()
            .map_err(|e| MailError::FetchFailed(format!("message {}: {:#}", id, e)))?;

        Ok(normalize_message(message))
    }

    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<String, MailError> {
        let base = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        Url::parse_with_params(&base, params)
            .map(String::from)
            .map_err(|e| MailError::FetchFailed(format!("invalid URL {}: {}", base, e)))
    }

    /// Authorized, uncached GET. A 401 tears down the session.
    fn get(&self, url: &str) -> Result<HttpResponse, MailError> {
        let token = self.auth.access_token()?;
        let bearer = format!("Bearer {}", token);

        let response = self
            .http
            .get(
                url,
                &[
                    ("Authorization", bearer.as_str()),
                    ("Cache-Control", "no-cache"),
                    ("Pragma", "no-cache"),
                ],
            )
            .map_err(|e| MailError::FetchFailed(format!("{:#}", e)))?;

        match response.status {
            401 => {
                warn!("Gmail rejected the access token");
                self.auth.invalidate();
                Err(MailError::AuthExpired)
            }
            status if !response.is_success() => {
                Err(MailError::FetchFailed(format!("HTTP {}", status)))
            }
            _ => Ok(response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::token_store::{InMemoryTokenStore, TokenStore};
    use crate::http::ScriptedTransport;
    use serde_json::json;

    fn message_json(id: &str, labels: &[&str]) -> serde_json::Value {
        json!({
            "id": id,
            "threadId": format!("t-{}", id),
            "labelIds": labels,
            "snippet": format!("snippet {}", id),
            "payload": { "headers": [{"name": "Subject", "value": format!("Subject {}", id)}] }
        })
    }

    fn client_with(http: Arc<ScriptedTransport>) -> (GmailClient, Arc<InMemoryTokenStore>) {
        let store = Arc::new(InMemoryTokenStore::new());
        store.write("token-1", 3600).unwrap();
        let auth = Arc::new(GmailAuth::new(store.clone(), None, http.clone()));
        let client = GmailClient::new(auth, http).with_base_url("http://gmail.test/v1");
        (client, store)
    }

    #[test]
    fn test_list_request_shape() {
        let http = Arc::new(ScriptedTransport::new());
        http.on_get(
            "/users/me/messages?",
            HttpResponse::ok_json(json!({"messages": [{"id": "a", "threadId": "t"}]})),
        );
        let (client, _) = client_with(http.clone());

        let ids = client.list_unread_ids(20).unwrap();
        assert_eq!(ids, vec![MessageId::new("a")]);

        let request = &http.requests()[0];
        let url = Url::parse(&request.url).unwrap();
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["q"], GmailClient::UNREAD_QUERY);
        assert_eq!(params["maxResults"], "20");
        assert!(params.contains_key("_"));
        assert_eq!(request.header("Authorization"), Some("Bearer token-1"));
        assert_eq!(request.header("Cache-Control"), Some("no-cache"));
        assert_eq!(request.header("Pragma"), Some("no-cache"));
    }

    #[test]
    fn test_fetch_drops_messages_no_longer_unread() {
        let http = Arc::new(ScriptedTransport::new());
        http.on_get(
            "/users/me/messages?",
            HttpResponse::ok_json(json!({"messages": [{"id": "a"}, {"id": "b"}, {"id": "c"}]})),
        )
        .on_get(
            "/messages/a?",
            HttpResponse::ok_json(message_json("a", &["INBOX", "UNREAD"])),
        )
        .on_get("/messages/b?", HttpResponse::ok_json(message_json("b", &["INBOX"])))
        .on_get(
            "/messages/c?",
            HttpResponse::ok_json(message_json("c", &["UNREAD", "INBOX"])),
        );
        let (client, _) = client_with(http.clone());

        let messages = client.fetch_unread_messages(20).unwrap();
        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);

        let gets: Vec<_> = http
            .requests()
            .into_iter()
            .filter(|r| r.url.contains("/messages/"))
            .collect();
        assert_eq!(gets.len(), 3);
        assert!(gets.iter().all(|r| r.url.contains("format=full")));
    }

    #[test]
    fn test_fetch_with_empty_list_makes_no_get_calls() {
        let http = Arc::new(ScriptedTransport::new());
        http.on_get(
            "/users/me/messages?",
            HttpResponse::ok_json(json!({"resultSizeEstimate": 0})),
        );
        let (client, _) = client_with(http.clone());

        assert!(client.fetch_unread_messages(20).unwrap().is_empty());
        assert_eq!(http.requests().len(), 1);
    }

    #[test]
    fn test_list_unauthorized_clears_token() {
        let http = Arc::new(ScriptedTransport::new());
        http.on_get("/users/me/messages?", HttpResponse::new(401, ""));
        let (client, store) = client_with(http);

        assert_eq!(client.list_unread_ids(20), Err(MailError::AuthExpired));
        assert!(store.read().is_none());
        assert!(!client.auth().is_signed_in());
    }

    #[test]
    fn test_list_server_error_is_fetch_failure() {
        let http = Arc::new(ScriptedTransport::new());
        http.on_get("/users/me/messages?", HttpResponse::new(503, "unavailable"));
        let (client, store) = client_with(http);

        let err = client.list_unread_ids(20).unwrap_err();
        assert_eq!(err, MailError::FetchFailed("HTTP 503".to_string()));
        assert!(store.read().is_some());
    }

    #[test]
    fn test_one_failed_get_fails_the_fetch() {
        let http = Arc::new(ScriptedTransport::new());
        http.on_get(
            "/users/me/messages?",
            HttpResponse::ok_json(json!({"messages": [{"id": "a"}, {"id": "b"}]})),
        )
        .on_get(
            "/messages/a?",
            HttpResponse::ok_json(message_json("a", &["UNREAD"])),
        )
        .on_get("/messages/b?", HttpResponse::new(500, ""));
        let (client, _) = client_with(http);

        assert!(matches!(
            client.fetch_unread_messages(20),
            Err(MailError::FetchFailed(_))
        ));
    }

    #[test]
    fn test_get_unauthorized_is_auth_expired() {
        let http = Arc::new(ScriptedTransport::new());
        http.on_get("/messages/a?", HttpResponse::new(401, ""));
        let (client, store) = client_with(http);

        assert_eq!(
            client.get_message(&MessageId::new("a")),
            Err(MailError::AuthExpired)
        );
        assert!(store.read().is_none());
    }

    #[test]
    fn test_requests_without_token_fail_fast() {
        let http = Arc::new(ScriptedTransport::new());
        let (client, store) = client_with(http.clone());
        store.clear();

        assert_eq!(client.list_unread_ids(20), Err(MailError::AuthExpired));
        assert!(http.requests().is_empty());
    }
}

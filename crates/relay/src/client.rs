// SPDX-License-Identifier: Apache-2.0

//! Blocking client for the store-and-forward slate relay.

use std::time::Duration;

use log::debug;
use mw_wallet_core::WalletError;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const RELAY_PATH: &str = "v1/relay/";
/// Added on top of the long-poll wait before a request counts as hung.
const REQUEST_SLACK: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("relay url error: {0}")]
    Url(#[from] url::ParseError),
    #[error("relay returned {status} for {path}")]
    Status { path: String, status: u16 },
    #[error("relay response decode: {0}")]
    Decode(String),
}

impl RelayError {
    pub fn is_transient(&self) -> bool {
        match self {
            RelayError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            RelayError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<RelayError> for WalletError {
    fn from(err: RelayError) -> Self {
        if err.is_transient() {
            return WalletError::NetworkUnavailable(err.to_string());
        }
        match err {
            RelayError::Url(e) => WalletError::InvalidRelayConfig(format!("relay url: {e}")),
            other => WalletError::PeerRejected(other.to_string()),
        }
    }
}

/// One message held by the relay for an address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayMessage {
    /// Monotonic per address; the listener resumes after the last one seen.
    pub id: u64,
    pub from: String,
    pub payload: String,
}

/// The subset of relay operations the listener and senders need.
pub trait RelayClient: Send + Sync + 'static {
    fn publish(&self, to: &str, from: &str, payload: &str) -> Result<(), RelayError>;
    /// Messages for `address` with id greater than `after`, waiting up to
    /// `wait` for one to arrive.
    fn poll(&self, address: &str, after: u64, wait: Duration)
        -> Result<Vec<RelayMessage>, RelayError>;
}

#[derive(Clone)]
pub struct HttpRelay {
    base: Url,
    client: Client,
}

impl HttpRelay {
    /// `base` like "https://relay.example.org:443". `max_wait` bounds the
    /// long-poll wait this client will be asked to perform.
    pub fn new(base: &str, max_wait: Duration) -> Result<Self, RelayError> {
        let mut base = Url::parse(base)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder().timeout(max_wait + REQUEST_SLACK).build()?;
        Ok(Self { base, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn address_url(&self, address: &str) -> Result<Url, RelayError> {
        Ok(self.base.join(RELAY_PATH)?.join(address)?)
    }
}

impl RelayClient for HttpRelay {
    fn publish(&self, to: &str, from: &str, payload: &str) -> Result<(), RelayError> {
        #[derive(Serialize)]
        struct Publish<'a> {
            from: &'a str,
            payload: &'a str,
        }

        let url = self.address_url(to)?;
        debug!("relay publish -> {url}");
        let resp = self.client.post(url).json(&Publish { from, payload }).send()?;
        if !resp.status().is_success() {
            return Err(RelayError::Status {
                path: format!("publish/{to}"),
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }

    fn poll(
        &self,
        address: &str,
        after: u64,
        wait: Duration,
    ) -> Result<Vec<RelayMessage>, RelayError> {
        #[derive(Deserialize)]
        struct Inbox {
            #[serde(default)]
            messages: Vec<RelayMessage>,
        }

        let mut url = self.address_url(address)?;
        url.query_pairs_mut()
            .append_pair("after", &after.to_string())
            .append_pair("wait", &wait.as_secs().to_string());
        let resp = self.client.get(url).send()?;
        if !resp.status().is_success() {
            return Err(RelayError::Status {
                path: format!("poll/{address}"),
                status: resp.status().as_u16(),
            });
        }
        let inbox: Inbox = resp
            .json()
            .map_err(|e| RelayError::Decode(e.to_string()))?;
        Ok(inbox.messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn poll_passes_cursor_and_decodes_inbox() {
        let server = MockServer::start();
        let inbox = server.mock(|when, then| {
            when.method(GET)
                .path("/v1/relay/addr1")
                .query_param("after", "7")
                .query_param("wait", "2");
            then.status(200).json_body(json!({
                "messages": [{"id": 8, "from": "peer", "payload": "hello"}]
            }));
        });

        let relay = HttpRelay::new(&server.base_url(), Duration::from_secs(2)).unwrap();
        let msgs = relay.poll("addr1", 7, Duration::from_secs(2)).unwrap();
        inbox.assert();
        assert_eq!(
            msgs,
            vec![RelayMessage {
                id: 8,
                from: "peer".into(),
                payload: "hello".into()
            }]
        );
    }

    #[test]
    fn publish_posts_body() {
        let server = MockServer::start();
        let publish = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/relay/bob")
                .json_body(json!({"from": "alice", "payload": "pack"}));
            then.status(202);
        });
        let relay = HttpRelay::new(&server.base_url(), Duration::from_secs(1)).unwrap();
        relay.publish("bob", "alice", "pack").unwrap();
        publish.assert();
    }

    #[test]
    fn server_errors_are_transient() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v1/relay/a");
            then.status(503);
        });
        server.mock(|when, then| {
            when.method(POST).path("/v1/relay/a");
            then.status(403);
        });
        let relay = HttpRelay::new(&server.base_url(), Duration::from_secs(1)).unwrap();

        let err = relay.poll("a", 0, Duration::ZERO).unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(
            WalletError::from(err),
            WalletError::NetworkUnavailable(_)
        ));

        let err = relay.publish("a", "b", "c").unwrap_err();
        assert!(!err.is_transient());
        assert!(matches!(WalletError::from(err), WalletError::PeerRejected(_)));
    }
}

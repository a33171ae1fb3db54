//! The process-wide HTTP client used for provider calls.

use std::sync::{Arc, RwLock};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared handle to one `reqwest::Client`.
///
/// Created at startup and closed once at shutdown. After `close` every
/// `get` returns `None`; the client is never recreated.
#[derive(Clone, Debug)]
pub struct SharedHttpClient {
    inner: Arc<RwLock<Option<reqwest::Client>>>,
}

impl SharedHttpClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(client))),
        }
    }

    /// A handle to the client, or `None` once it has been closed.
    pub fn get(&self) -> Option<reqwest::Client> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Closes the client. Returns `true` if it was still open.
    pub fn close(&self) -> bool {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.get().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_is_one_shot_and_visible_to_every_clone() {
        let client = SharedHttpClient::from_client(reqwest::Client::new());
        let other = client.clone();

        assert!(other.get().is_some());
        assert!(client.close());
        assert!(other.is_closed());
        assert!(other.get().is_none());
        assert!(!other.close());
    }
}

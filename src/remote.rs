//! Client for the remote real-time store.
//!
//! The store is a JSON tree addressed by path over REST. The agent reads the
//! bias object from it, writes one record per tick under the records path
//! keyed by timestamp, and flags starts and stops under the signal path.

use serde::{Deserialize, Serialize};

/// Remote store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Root URL of the store, without a trailing slash
    pub base_url: String,
    /// Path of the bias object
    pub bias_path: String,
    /// Path under which records are written
    pub records_path: String,
    /// Path holding the `start` / `stop` flags
    pub signal_path: String,
    /// Token sent as the `auth` query parameter
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Delete all previous records when the pipeline starts
    #[serde(default)]
    pub clear_records_on_start: bool,
}

impl RemoteConfig {
    /// Create a configuration with the default layout under `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bias_path: "bias".to_string(),
            records_path: "records".to_string(),
            signal_path: "signal".to_string(),
            auth_token: None,
            clear_records_on_start: false,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn node_url(&self, path: &str) -> String {
        format!(
            "{}/{}.json",
            self.base_url.trim_end_matches('/'),
            path.trim_matches('/')
        )
    }

    /// URL of the bias object.
    pub fn bias_url(&self) -> String {
        self.node_url(&self.bias_path)
    }

    /// URL of the whole records collection.
    pub fn records_url(&self) -> String {
        self.node_url(&self.records_path)
    }

    /// URL of a single record.
    pub fn record_url(&self, timestamp_ms: i64) -> String {
        self.node_url(&format!(
            "{}/{timestamp_ms}",
            self.records_path.trim_matches('/')
        ))
    }

    /// URL of a lifecycle flag (`start` or `stop`).
    pub fn signal_url(&self, flag: &str) -> String {
        self.node_url(&format!("{}/{flag}", self.signal_path.trim_matches('/')))
    }

    /// URL used by the health probe.
    pub fn health_url(&self) -> String {
        format!("{}/.json?shallow=true", self.base_url.trim_end_matches('/'))
    }
}

/// Remote client error types.
#[derive(Debug)]
pub enum RemoteError {
    /// Configuration error
    Config(String),
    /// Network/HTTP error
    Network(String),
    /// Server returned an error response
    Server { status: u16, message: String },
    /// JSON serialization error
    Serialization(String),
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteError::Config(msg) => write!(f, "Remote config error: {msg}"),
            RemoteError::Network(msg) => write!(f, "Remote network error: {msg}"),
            RemoteError::Server { status, message } => {
                write!(f, "Remote server error ({status}): {message}")
            }
            RemoteError::Serialization(msg) => write!(f, "Remote serialization error: {msg}"),
        }
    }
}

impl std::error::Error for RemoteError {}

#[cfg(feature = "remote")]
pub use client::RemoteClient;

#[cfg(feature = "remote")]
mod client {
    use super::{RemoteConfig, RemoteError};
    use crate::bias::{BiasError, BiasKeys, BiasSource, BiasTerms};
    use crate::core::ScoreRecord;
    use crate::sink::{LifecycleEvent, ScoreSink, SinkError};
    use crate::BoxFuture;
    use serde::Serialize;

    /// HTTP client for the remote store.
    pub struct RemoteClient {
        config: RemoteConfig,
        keys: BiasKeys,
        client: reqwest::Client,
    }

    impl RemoteClient {
        /// Create a new client. `keys` names the fields of the bias object.
        pub fn new(config: RemoteConfig, keys: BiasKeys) -> Result<Self, RemoteError> {
            if config.base_url.is_empty() {
                return Err(RemoteError::Config("base_url is empty".to_string()));
            }

            let client = reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .map_err(|e| RemoteError::Config(format!("Failed to create HTTP client: {e}")))?;

            Ok(Self {
                config,
                keys,
                client,
            })
        }

        pub fn config(&self) -> &RemoteConfig {
            &self.config
        }

        fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
            match &self.config.auth_token {
                Some(token) => request.query(&[("auth", token)]),
                None => request,
            }
        }

        async fn send(
            &self,
            request: reqwest::RequestBuilder,
        ) -> Result<reqwest::Response, RemoteError> {
            let response = self
                .authorize(request)
                .send()
                .await
                .map_err(|e| RemoteError::Network(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(RemoteError::Server {
                    status: status.as_u16(),
                    message,
                });
            }

            Ok(response)
        }

        async fn put<T: Serialize + ?Sized>(&self, url: String, body: &T) -> Result<(), RemoteError> {
            self.send(self.client.put(url).json(body)).await?;
            Ok(())
        }

        async fn delete(&self, url: String) -> Result<(), RemoteError> {
            self.send(self.client.delete(url)).await?;
            Ok(())
        }

        /// Test connection to the store.
        pub async fn health(&self) -> Result<bool, RemoteError> {
            let response = self
                .authorize(self.client.get(self.config.health_url()))
                .send()
                .await
                .map_err(|e| RemoteError::Network(e.to_string()))?;

            Ok(response.status().is_success())
        }

        /// Write one record under its timestamp.
        pub async fn put_record(&self, record: &ScoreRecord) -> Result<(), RemoteError> {
            self.put(self.config.record_url(record.timestamp_ms), record)
                .await
        }

        /// Flag a start or stop under the signal path.
        pub async fn announce(&self, event: LifecycleEvent) -> Result<(), RemoteError> {
            let timestamp_ms = event.timestamp_ms();
            match event {
                LifecycleEvent::Started { .. } => {
                    if self.config.clear_records_on_start {
                        self.delete(self.config.records_url()).await?;
                    }
                    self.delete(self.config.signal_url("stop")).await?;
                    self.put(self.config.signal_url("start"), &timestamp_ms)
                        .await
                }
                LifecycleEvent::Stopped { .. } => {
                    self.delete(self.config.signal_url("start")).await?;
                    self.put(self.config.signal_url("stop"), &timestamp_ms)
                        .await
                }
            }
        }
    }

    impl BiasSource for RemoteClient {
        fn fetch(&self) -> BoxFuture<'_, Result<BiasTerms, BiasError>> {
            Box::pin(async move {
                let response = self
                    .send(self.client.get(self.config.bias_url()))
                    .await
                    .map_err(|e| BiasError::Unavailable(e.to_string()))?;
                let value: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| BiasError::Malformed(e.to_string()))?;
                BiasTerms::from_json(&value, &self.keys)
            })
        }
    }

    impl ScoreSink for RemoteClient {
        fn publish(&self, record: ScoreRecord) -> BoxFuture<'_, Result<(), SinkError>> {
            Box::pin(async move {
                self.put_record(&record)
                    .await
                    .map_err(|e| SinkError::Remote(e.to_string()))
            })
        }

        fn lifecycle(&self, event: LifecycleEvent) -> BoxFuture<'_, Result<(), SinkError>> {
            Box::pin(async move {
                self.announce(event)
                    .await
                    .map_err(|e| SinkError::Remote(e.to_string()))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_config_urls() {
        let config = RemoteConfig::new("https://store.example.com/");
        assert_eq!(config.base_url, "https://store.example.com");
        assert_eq!(config.bias_url(), "https://store.example.com/bias.json");
        assert_eq!(config.records_url(), "https://store.example.com/records.json");
        assert_eq!(
            config.record_url(1709251200000),
            "https://store.example.com/records/1709251200000.json"
        );
        assert_eq!(
            config.signal_url("start"),
            "https://store.example.com/signal/start.json"
        );
        assert_eq!(
            config.health_url(),
            "https://store.example.com/.json?shallow=true"
        );
    }

    #[test]
    fn test_nested_paths() {
        let mut config = RemoteConfig::new("https://store.example.com");
        config.records_path = "/users/a1/records/".to_string();
        assert_eq!(
            config.record_url(5),
            "https://store.example.com/users/a1/records/5.json"
        );
    }

    #[test]
    fn test_config_json_defaults() {
        let json = serde_json::json!({
            "base_url": "https://store.example.com",
            "bias_path": "bias",
            "records_path": "records",
            "signal_path": "signal"
        });
        let config: RemoteConfig = serde_json::from_value(json).unwrap();
        assert!(config.auth_token.is_none());
        assert!(!config.clear_records_on_start);
    }

    #[cfg(feature = "remote")]
    #[test]
    fn test_client_rejects_empty_url() {
        let config = RemoteConfig {
            base_url: String::new(),
            ..RemoteConfig::new("x")
        };
        let result = RemoteClient::new(config, crate::bias::BiasKeys::default());
        assert!(matches!(result, Err(RemoteError::Config(_))));
    }
}

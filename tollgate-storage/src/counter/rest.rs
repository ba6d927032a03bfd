//! Redis counter store over the Upstash-compatible REST protocol.
//!
//! Each command is POSTed as a JSON array (`["INCR", "key"]`) and answered
//! with `{"result": ...}` or `{"error": "..."}`. Transactions go to the
//! `/multi-exec` endpoint and are executed atomically by Redis.

use super::{CounterStore, StoreError, StoreResult, WindowCount};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Connection settings for [`RestCounterStore`].
#[derive(Clone)]
pub struct RestStoreConfig {
    /// Base URL of the REST endpoint, e.g. `https://eu1-example.upstash.io`
    pub url: String,
    /// Bearer token for the endpoint
    pub token: SecretString,
    /// Per-request timeout
    pub timeout: Duration,
}

impl std::fmt::Debug for RestStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestStoreConfig")
            .field("url", &self.url)
            .field("token", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl Reply {
    fn into_result(self) -> StoreResult<Value> {
        match (self.error, self.result) {
            (Some(error), _) => Err(StoreError::Protocol { reason: error }),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// Counter store backed by Redis via its REST interface.
#[derive(Debug, Clone)]
pub struct RestCounterStore {
    client: reqwest::Client,
    config: RestStoreConfig,
}

impl RestCounterStore {
    pub fn new(config: RestStoreConfig) -> StoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StoreError::Unavailable {
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.url.trim_end_matches('/'), path)
    }

    async fn post(&self, path: &str, body: &Value) -> StoreResult<reqwest::Response> {
        let response = self
            .client
            .post(self.endpoint(path))
            .bearer_auth(self.config.token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(StoreError::Unavailable {
                reason: format!("store returned {}", status),
            });
        }
        if !status.is_success() {
            let reason = response
                .json::<Reply>()
                .await
                .ok()
                .and_then(|reply| reply.error)
                .unwrap_or_else(|| format!("store returned {}", status));
            return Err(StoreError::Protocol { reason });
        }
        Ok(response)
    }

    async fn command(&self, args: &[&str]) -> StoreResult<Value> {
        let body = Value::from(args.iter().map(|a| Value::from(*a)).collect::<Vec<_>>());
        let reply: Reply = self
            .post("/", &body)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Protocol {
                reason: format!("malformed reply: {}", e),
            })?;
        reply.into_result()
    }

    async fn transaction(&self, commands: &[Vec<String>]) -> StoreResult<Vec<Value>> {
        let body = serde_json::to_value(commands).map_err(|e| StoreError::Protocol {
            reason: e.to_string(),
        })?;
        let replies: Vec<Reply> = self
            .post("/multi-exec", &body)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Protocol {
                reason: format!("malformed transaction reply: {}", e),
            })?;
        replies.into_iter().map(Reply::into_result).collect()
    }
}

fn as_integer(value: &Value) -> StoreResult<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| StoreError::Protocol {
        reason: format!("expected integer reply, got {}", value),
    })
}

/// Interpret a `PTTL` reply: -2 missing key, -1 no expiry.
fn pttl_to_duration(millis: i64) -> Option<Duration> {
    u64::try_from(millis).ok().map(Duration::from_millis)
}

fn window_millis(window: Duration) -> String {
    window.as_millis().max(1).to_string()
}

#[async_trait]
impl CounterStore for RestCounterStore {
    async fn increment(&self, key: &str) -> StoreResult<u64> {
        let count = as_integer(&self.command(&["INCR", key]).await?)?;
        u64::try_from(count).map_err(|_| StoreError::Protocol {
            reason: format!("negative counter value {}", count),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let millis = window_millis(ttl);
        self.command(&["PEXPIRE", key, millis.as_str()]).await?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let millis = as_integer(&self.command(&["PTTL", key]).await?)?;
        Ok(pttl_to_duration(millis))
    }

    /// `INCR` + `PEXPIRE .. NX` + `PTTL` in one MULTI/EXEC: the expiry is set
    /// only if the key has none, inside the same transaction as the increment.
    async fn increment_in_window(&self, key: &str, window: Duration) -> StoreResult<WindowCount> {
        let commands = vec![
            vec!["INCR".to_string(), key.to_string()],
            vec![
                "PEXPIRE".to_string(),
                key.to_string(),
                window_millis(window),
                "NX".to_string(),
            ],
            vec!["PTTL".to_string(), key.to_string()],
        ];
        let replies = self.transaction(&commands).await?;
        let [count, _, pttl] = replies.as_slice() else {
            return Err(StoreError::Protocol {
                reason: format!("expected 3 transaction replies, got {}", replies.len()),
            });
        };

        let count = as_integer(count)?;
        Ok(WindowCount {
            count: u64::try_from(count).map_err(|_| StoreError::Protocol {
                reason: format!("negative counter value {}", count),
            })?,
            ttl: pttl_to_duration(as_integer(pttl)?),
        })
    }
}

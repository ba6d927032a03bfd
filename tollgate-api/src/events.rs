//! Request Events for the Observability Hook
//!
//! A [`RequestEvent`] is emitted once per successfully handled governed
//! request. Delivery is best-effort: sinks report failures, callers log them
//! and move on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tollgate_core::{PlanTier, WorkspaceId};

/// One tracked API call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEvent {
    /// Endpoint identifier from the endpoint policy
    pub event: String,
    pub workspace_id: WorkspaceId,
    pub plan: PlanTier,
    /// Method, route, status and the tracked query parameters
    pub properties: BTreeMap<String, String>,
}

/// Errors raised while delivering an event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("Event delivery failed: {reason}")]
    Delivery { reason: String },

    #[error("Event sink rejected event with status {status}")]
    Rejected { status: u16 },
}

/// Destination for tracked request events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn track(&self, event: RequestEvent) -> Result<(), EventError>;
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn track(&self, _event: RequestEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// Header carrying the analytics client id.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Sink posting events as JSON to an analytics endpoint.
#[derive(Debug, Clone)]
pub struct HttpEventSink {
    client: reqwest::Client,
    url: String,
    client_id: Option<String>,
}

impl HttpEventSink {
    pub fn new(
        url: impl Into<String>,
        client_id: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EventError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EventError::Delivery {
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            url: url.into(),
            client_id,
        })
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn track(&self, event: RequestEvent) -> Result<(), EventError> {
        let mut request = self.client.post(&self.url).json(&event);
        if let Some(client_id) = &self.client_id {
            request = request.header(CLIENT_ID_HEADER, client_id);
        }

        let response = request.send().await.map_err(|e| EventError::Delivery {
            reason: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(EventError::Rejected {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> RequestEvent {
        RequestEvent {
            event: "monitor.summary".to_string(),
            workspace_id: WorkspaceId::new("12"),
            plan: PlanTier::Pro,
            properties: BTreeMap::from([
                ("method".to_string(), "GET".to_string()),
                ("status".to_string(), "200".to_string()),
            ]),
        }
    }

    #[test]
    fn test_event_serialization() -> Result<(), serde_json::Error> {
        let json = serde_json::to_value(event())?;
        assert_eq!(json["workspaceId"], "12");
        assert_eq!(json["plan"], "pro");
        assert_eq!(json["properties"]["method"], "GET");
        Ok(())
    }

    #[tokio::test]
    async fn test_noop_sink_accepts() {
        assert_eq!(NoopEventSink.track(event()).await, Ok(()));
    }

    #[tokio::test]
    async fn test_unreachable_http_sink_reports_delivery_error() -> Result<(), EventError> {
        let sink = HttpEventSink::new("http://127.0.0.1:9/track", None, Duration::from_millis(500))?;
        assert!(matches!(
            sink.track(event()).await,
            Err(EventError::Delivery { .. })
        ));
        Ok(())
    }
}

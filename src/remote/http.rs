use super::{EventPage, EventStart, LogStore, RawEvent, RemoteError, Result, StreamPage};
use crate::config::types::RemoteConfig;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const DESCRIBE_LOG_STREAMS: &str = "Logs_20140328.DescribeLogStreams";
const GET_LOG_EVENTS: &str = "Logs_20140328.GetLogEvents";
const AMZ_JSON: &str = "application/x-amz-json-1.1";

/// HTTP client for a CloudWatch Logs compatible JSON endpoint.
///
/// Requests are not signed; extra headers from the config are sent as-is.
#[derive(Debug)]
pub struct HttpLogStore {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpLogStore {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let endpoint = config.resolved_endpoint().ok_or_else(|| {
            RemoteError::Config("either 'region' or 'endpoint' must be set".to_string())
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| RemoteError::Config(format!("invalid header name '{}': {}", name, e)))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| RemoteError::Config(format!("invalid value for header '{}': {}", name, e)))?;
            headers.insert(header_name, header_value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<Req, Resp>(&self, target: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Amz-Target", target)
            .header(CONTENT_TYPE, AMZ_JSON)
            .body(serde_json::to_vec(body)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RemoteError::Status {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl LogStore for HttpLogStore {
    async fn list_log_streams(
        &self,
        group: &str,
        prefix: Option<&str>,
        next_token: Option<&str>,
    ) -> Result<StreamPage> {
        let request = DescribeLogStreamsRequest {
            log_group_name: group,
            log_stream_name_prefix: prefix,
            next_token,
        };
        let response: DescribeLogStreamsResponse =
            self.call(DESCRIBE_LOG_STREAMS, &request).await?;
        Ok(response.into())
    }

    async fn get_log_events(
        &self,
        group: &str,
        stream: &str,
        start: &EventStart,
    ) -> Result<EventPage> {
        let request = GetLogEventsRequest::new(group, stream, start);
        let response: GetLogEventsResponse = self.call(GET_LOG_EVENTS, &request).await?;
        Ok(response.into())
    }
}

// ===== Wire Types =====

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogStreamsRequest<'a> {
    log_group_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    log_stream_name_prefix: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogStreamsResponse {
    #[serde(default)]
    log_streams: Vec<LogStreamDescription>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogStreamDescription {
    log_stream_name: String,
}

impl From<DescribeLogStreamsResponse> for StreamPage {
    fn from(response: DescribeLogStreamsResponse) -> Self {
        StreamPage {
            streams: response
                .log_streams
                .into_iter()
                .map(|s| s.log_stream_name)
                .collect(),
            next_token: response.next_token,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GetLogEventsRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
    start_from_head: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_time: Option<i64>,
}

impl<'a> GetLogEventsRequest<'a> {
    fn new(group: &'a str, stream: &'a str, start: &'a EventStart) -> Self {
        let (next_token, start_time) = start.request_params();

        Self {
            log_group_name: group,
            log_stream_name: stream,
            start_from_head: true,
            next_token,
            start_time,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetLogEventsResponse {
    #[serde(default)]
    events: Vec<OutputLogEvent>,
    next_forward_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OutputLogEvent {
    timestamp: i64,
    #[serde(default)]
    message: String,
}

impl From<GetLogEventsResponse> for EventPage {
    fn from(response: GetLogEventsResponse) -> Self {
        EventPage {
            events: response
                .events
                .into_iter()
                .map(|e| RawEvent {
                    timestamp_ms: e.timestamp,
                    message: e.message,
                })
                .collect(),
            next_forward_token: response.next_forward_token,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_store_uses_regional_endpoint() {
        let config = RemoteConfig {
            region: Some("us-east-1".to_string()),
            ..RemoteConfig::default()
        };

        let store = HttpLogStore::new(&config).unwrap();
        assert_eq!(store.endpoint(), "https://logs.us-east-1.amazonaws.com");
    }

    #[test]
    fn test_store_requires_endpoint() {
        let result = HttpLogStore::new(&RemoteConfig::default());
        assert!(matches!(result, Err(RemoteError::Config(_))));
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let config = RemoteConfig {
            endpoint: Some("http://localhost:4566".to_string()),
            headers: HashMap::from([("bad header".to_string(), "x".to_string())]),
            ..RemoteConfig::default()
        };

        let result = HttpLogStore::new(&config);
        assert!(matches!(result, Err(RemoteError::Config(_))));
    }

    #[test]
    fn test_get_log_events_request_body() {
        let token = EventStart::Token("f/123".to_string());
        let body = serde_json::to_value(GetLogEventsRequest::new("group", "stream", &token)).unwrap();
        assert_eq!(
            body,
            json!({
                "logGroupName": "group",
                "logStreamName": "stream",
                "startFromHead": true,
                "nextToken": "f/123"
            })
        );

        let time = EventStart::Time(1_700_000_000_000);
        let body = serde_json::to_value(GetLogEventsRequest::new("group", "stream", &time)).unwrap();
        assert_eq!(body["startTime"], json!(1_700_000_000_000i64));
        assert!(body.get("nextToken").is_none());
    }

    #[test]
    fn test_describe_log_streams_response_parsing() {
        let response: DescribeLogStreamsResponse = serde_json::from_value(json!({
            "logStreams": [
                {"logStreamName": "testprefix1", "storedBytes": 0},
                {"logStreamName": "testprefix2"}
            ],
            "nextToken": "page-2"
        }))
        .unwrap();

        let page: StreamPage = response.into();
        assert_eq!(page.streams, vec!["testprefix1", "testprefix2"]);
        assert_eq!(page.next_token.as_deref(), Some("page-2"));
    }

    #[test]
    fn test_get_log_events_response_parsing() {
        let response: GetLogEventsResponse = serde_json::from_value(json!({
            "events": [
                {"timestamp": 1000, "message": "{\"a\":1}", "ingestionTime": 1001}
            ],
            "nextForwardToken": "f/1",
            "nextBackwardToken": "b/0"
        }))
        .unwrap();

        let page: EventPage = response.into();
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].timestamp_ms, 1000);
        assert_eq!(page.next_forward_token.as_deref(), Some("f/1"));
    }

    #[test]
    fn test_empty_response_parsing() {
        let response: GetLogEventsResponse = serde_json::from_value(json!({})).unwrap();
        let page: EventPage = response.into();
        assert!(page.events.is_empty());
        assert!(page.next_forward_token.is_none());
    }
}

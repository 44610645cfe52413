use super::{EventPage, EventStart, LogStore, RawEvent, RemoteError, Result, StreamPage};
use crate::config::types::RemoteConfig;
use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_cloudwatchlogs::config::{Credentials, Region};
use aws_sdk_cloudwatchlogs::error::DisplayErrorContext;
use aws_sdk_cloudwatchlogs::operation::describe_log_streams::DescribeLogStreamsOutput;
use aws_sdk_cloudwatchlogs::operation::get_log_events::GetLogEventsOutput;
use aws_sdk_cloudwatchlogs::Client;
use tracing::{debug, warn};

const STATIC_CREDENTIALS: &str = "logpull-config";

/// CloudWatch Logs through the AWS SDK.
///
/// Static keys from the config win; otherwise the SDK's default chain
/// (environment, profile, instance role) supplies credentials.
#[derive(Debug, Clone)]
pub struct AwsLogStore {
    client: Client,
    region: Option<String>,
}

impl AwsLogStore {
    pub async fn new(config: &RemoteConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).timeout_config(
            TimeoutConfig::builder()
                .operation_timeout(config.timeout)
                .build(),
        );

        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }

        match (&config.aws_key_id, &config.aws_sec_key) {
            (Some(key_id), Some(secret)) => {
                loader = loader.credentials_provider(Credentials::new(
                    key_id,
                    secret,
                    None,
                    None,
                    STATIC_CREDENTIALS,
                ));
            }
            (None, None) => {}
            _ => {
                return Err(RemoteError::Config(
                    "aws_key_id and aws_sec_key must be set together".to_string(),
                ))
            }
        }

        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint.trim_end_matches('/'));
        }

        if !config.headers.is_empty() {
            warn!("remote.headers are only sent by the http backend, ignoring them");
        }

        let sdk_config = loader.load().await;
        let region = sdk_config.region().map(|r| r.to_string());
        debug!(region = ?region, "AWS SDK configuration loaded");

        Ok(Self {
            client: Client::new(&sdk_config),
            region,
        })
    }

    /// Region the client resolved, from the config or the environment.
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }
}

fn sdk_error<E>(e: E) -> RemoteError
where
    E: std::error::Error + 'static,
{
    RemoteError::Sdk(DisplayErrorContext(&e).to_string())
}

#[async_trait]
impl LogStore for AwsLogStore {
    async fn list_log_streams(
        &self,
        group: &str,
        prefix: Option<&str>,
        next_token: Option<&str>,
    ) -> Result<StreamPage> {
        let output = self
            .client
            .describe_log_streams()
            .log_group_name(group)
            .set_log_stream_name_prefix(prefix.map(str::to_string))
            .set_next_token(next_token.map(str::to_string))
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(stream_page(output))
    }

    async fn get_log_events(
        &self,
        group: &str,
        stream: &str,
        start: &EventStart,
    ) -> Result<EventPage> {
        let (next_token, start_time) = start.request_params();

        let output = self
            .client
            .get_log_events()
            .log_group_name(group)
            .log_stream_name(stream)
            .start_from_head(true)
            .set_next_token(next_token.map(str::to_string))
            .set_start_time(start_time)
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(event_page(output))
    }
}

fn stream_page(output: DescribeLogStreamsOutput) -> StreamPage {
    StreamPage {
        streams: output
            .log_streams
            .unwrap_or_default()
            .into_iter()
            .filter_map(|s| s.log_stream_name)
            .collect(),
        next_token: output.next_token,
    }
}

fn event_page(output: GetLogEventsOutput) -> EventPage {
    EventPage {
        events: output
            .events
            .unwrap_or_default()
            .into_iter()
            .filter_map(|e| {
                Some(RawEvent {
                    timestamp_ms: e.timestamp?,
                    message: e.message.unwrap_or_default(),
                })
            })
            .collect(),
        next_forward_token: output.next_forward_token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_cloudwatchlogs::types::{LogStream, OutputLogEvent};

    #[tokio::test]
    async fn test_half_set_credentials_are_rejected() {
        let config = RemoteConfig {
            region: Some("us-east-1".to_string()),
            aws_key_id: Some("AKIDEXAMPLE".to_string()),
            ..RemoteConfig::default()
        };

        let result = AwsLogStore::new(&config).await;
        assert!(matches!(result, Err(RemoteError::Config(_))));
    }

    #[test]
    fn test_stream_page_from_sdk_output() {
        let output = DescribeLogStreamsOutput::builder()
            .log_streams(LogStream::builder().log_stream_name("testprefix1").build())
            .log_streams(LogStream::builder().log_stream_name("testprefix2").build())
            .next_token("page-2")
            .build();

        let page = stream_page(output);
        assert_eq!(page.streams, vec!["testprefix1", "testprefix2"]);
        assert_eq!(page.next_token.as_deref(), Some("page-2"));
    }

    #[test]
    fn test_event_page_from_sdk_output() {
        let output = GetLogEventsOutput::builder()
            .events(
                OutputLogEvent::builder()
                    .timestamp(1_000)
                    .message(r#"{"a":1}"#)
                    .build(),
            )
            .events(OutputLogEvent::builder().message("no timestamp").build())
            .next_forward_token("f/1")
            .build();

        let page = event_page(output);
        assert_eq!(
            page.events,
            vec![RawEvent {
                timestamp_ms: 1_000,
                message: r#"{"a":1}"#.to_string(),
            }]
        );
        assert_eq!(page.next_forward_token.as_deref(), Some("f/1"));
    }

    #[test]
    fn test_empty_sdk_output() {
        let page = event_page(GetLogEventsOutput::builder().build());
        assert!(page.events.is_empty());
        assert!(page.next_forward_token.is_none());
    }
}

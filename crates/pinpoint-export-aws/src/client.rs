use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_pinpoint::config::http::HttpResponse;
use aws_sdk_pinpoint::config::Region;
use aws_sdk_pinpoint::error::{DisplayErrorContext, SdkError};
use aws_sdk_pinpoint::operation::put_events::PutEventsError;
use aws_sdk_pinpoint::Client;
use tracing::debug;

use pinpoint_export_core::batch::BatchRequest;
use pinpoint_export_core::config::Config;
use pinpoint_export_core::dispatch::EventsApi;
use pinpoint_export_core::error::DispatchError;

use crate::convert::to_events_request;

const CREDENTIALS_PROVIDER: &str = "pinpoint-export-static";

/// [`EventsApi`] backed by the Pinpoint `PutEvents` operation.
///
/// The SDK client is cheap to clone and safe to share between concurrent
/// dispatches.
#[derive(Clone, Debug)]
pub struct PinpointEventsApi {
    client: Client,
}

impl PinpointEventsApi {
    /// Build a client from static credentials and the configured region.
    /// `max_attempts` feeds the SDK's standard retry strategy (exponential
    /// backoff with jitter).
    pub async fn connect(config: &Config) -> Self {
        let credentials = Credentials::new(
            &config.aws_access_key,
            &config.aws_secret_access_key,
            None,
            None,
            CREDENTIALS_PROVIDER,
        );
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.aws_region.clone()))
            .credentials_provider(credentials)
            .retry_config(RetryConfig::standard().with_max_attempts(config.max_attempts))
            .load()
            .await;
        Self::from_client(Client::new(&sdk_config))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventsApi for PinpointEventsApi {
    async fn put_events(
        &self,
        application_id: &str,
        request: &BatchRequest,
    ) -> Result<(), DispatchError> {
        let events_request = to_events_request(request)?;
        self.client
            .put_events()
            .application_id(application_id)
            .events_request(events_request)
            .send()
            .await
            .map_err(classify)?;
        debug!(
            entries = request.len(),
            application_id, "PutEvents accepted"
        );
        Ok(())
    }
}

fn classify(err: SdkError<PutEventsError, HttpResponse>) -> DispatchError {
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::ConstructionFailure(_) => DispatchError::Payload(message),
        SdkError::ServiceError(service) => DispatchError::Destination {
            status: Some(service.raw().status().as_u16()),
            message,
        },
        SdkError::ResponseError(response) => DispatchError::Destination {
            status: Some(response.raw().status().as_u16()),
            message,
        },
        _ => DispatchError::Transport(message),
    }
}

#[cfg(test)]
mod tests {
    use aws_sdk_pinpoint::error::ErrorMetadata;
    use aws_smithy_runtime_api::http::StatusCode;
    use aws_smithy_types::body::SdkBody;

    use super::*;

    fn raw(status: u16) -> HttpResponse {
        HttpResponse::new(StatusCode::try_from(status).unwrap(), SdkBody::empty())
    }

    #[test]
    fn construction_failure_is_a_payload_error() {
        let err = classify(SdkError::construction_failure("missing application id"));
        assert!(matches!(err, DispatchError::Payload(m) if m.contains("missing application id")));
    }

    #[test]
    fn service_error_carries_the_status() {
        let service = PutEventsError::generic(
            ErrorMetadata::builder()
                .code("BadRequestException")
                .message("Invalid event type")
                .build(),
        );
        let err = classify(SdkError::service_error(service, raw(400)));
        match err {
            DispatchError::Destination { status, message } => {
                assert_eq!(status, Some(400));
                assert!(!message.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unreadable_response_is_a_destination_error() {
        let err = classify(SdkError::response_error("truncated body", raw(502)));
        assert!(matches!(
            err,
            DispatchError::Destination {
                status: Some(502),
                ..
            }
        ));
    }

    #[test]
    fn timeout_is_a_transport_error() {
        let err = classify(SdkError::timeout_error("operation timed out"));
        assert!(matches!(err, DispatchError::Transport(_)));
    }

    #[tokio::test]
    async fn connect_uses_configured_region() {
        let config = Config::from_lookup(|key| {
            match key {
                "PINPOINT_AWS_ACCESS_KEY" => Some("AKIDEXAMPLE"),
                "PINPOINT_AWS_SECRET_ACCESS_KEY" => Some("secret"),
                "PINPOINT_AWS_REGION" => Some("eu-west-1"),
                "PINPOINT_APPLICATION_ID" => Some("app-123"),
                "PINPOINT_MAX_ATTEMPTS" => Some("5"),
                _ => None,
            }
            .map(str::to_string)
        })
        .unwrap();
        let api = PinpointEventsApi::connect(&config).await;
        let region = api.client.config().region().map(|r| r.as_ref().to_string());
        assert_eq!(region.as_deref(), Some("eu-west-1"));
    }
}

//! HTTP status and error body translation for the Azure APIs

use reqwest::StatusCode;
use skyfleet_cloud::{ErrorKind, ProviderError, ProviderKind};

/// Map an HTTP status from ARM / Azure Monitor into the unified taxonomy
pub(crate) fn kind_from_status(status: StatusCode) -> ErrorKind {
    match status {
        StatusCode::NOT_FOUND => ErrorKind::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::AuthFailed,
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimited,
        StatusCode::REQUEST_TIMEOUT => ErrorKind::Unavailable,
        s if s.is_server_error() => ErrorKind::Unavailable,
        _ => ErrorKind::InvalidArgument,
    }
}

/// Pull the human message out of an ARM error envelope
/// (`{"error": {"code": ..., "message": ...}}`)
pub(crate) fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

/// Transport-level failure (connect, TLS, client timeout): transient
pub(crate) fn map_transport(operation: &'static str, err: reqwest::Error) -> ProviderError {
    ProviderError::unavailable(ProviderKind::Azure, operation, "transport failure").with_cause(err)
}

/// Turn a non-success response into a ProviderError, reading the body
/// for the provider's own message
pub(crate) async fn check(
    operation: &'static str,
    resp: reqwest::Response,
) -> skyfleet_cloud::Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = extract_error_message(&body)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
    Err(ProviderError::new(
        ProviderKind::Azure,
        operation,
        kind_from_status(status),
        message,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(kind_from_status(StatusCode::NOT_FOUND), ErrorKind::NotFound);
        assert_eq!(kind_from_status(StatusCode::FORBIDDEN), ErrorKind::AuthFailed);
        assert_eq!(kind_from_status(StatusCode::TOO_MANY_REQUESTS), ErrorKind::RateLimited);
        assert_eq!(kind_from_status(StatusCode::SERVICE_UNAVAILABLE), ErrorKind::Unavailable);
        assert_eq!(kind_from_status(StatusCode::BAD_REQUEST), ErrorKind::InvalidArgument);
    }

    #[test]
    fn arm_error_envelope_is_parsed() {
        let body =
            r#"{"error": {"code": "ResourceNotFound", "message": "The Resource 'vm-1' was not found."}}"#;
        assert_eq!(
            extract_error_message(body).as_deref(),
            Some("The Resource 'vm-1' was not found.")
        );
    }
}

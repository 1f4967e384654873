//! AWS SDK error translation
//!
//! Maps SDK service errors into the unified `ProviderError` taxonomy
//! using the error metadata code each service returns.

use aws_sdk_ec2::error::ProvideErrorMetadata;
use skyfleet_cloud::{ErrorKind, ProviderError, ProviderKind};

/// Classify an AWS error code string into the unified taxonomy.
///
/// Unknown codes are treated as transient (`Unavailable`), matching
/// how the SDK's own retry classifier handles unmodeled errors.
pub(crate) fn kind_from_code(code: &str) -> ErrorKind {
    if code.contains("NotFound") {
        return ErrorKind::NotFound;
    }
    match code {
        "AuthFailure" | "UnauthorizedOperation" | "AccessDenied" | "AccessDeniedException"
        | "OptInRequired" | "ExpiredToken" | "InvalidClientTokenId" => ErrorKind::AuthFailed,
        "Throttling" | "ThrottlingException" | "RequestLimitExceeded"
        | "TooManyRequestsException" | "LimitExceededException" => ErrorKind::RateLimited,
        "ValidationError" | "ValidationException" | "MissingParameter"
        | "InvalidParameterValue" | "InvalidParameterCombination" | "InvalidAMIID.Malformed"
        | "InvalidInstanceID.Malformed" => ErrorKind::InvalidArgument,
        _ => ErrorKind::Unavailable,
    }
}

fn build(
    operation: &'static str,
    code: Option<&str>,
    message: Option<&str>,
    cause: impl std::error::Error + Send + Sync + 'static,
) -> ProviderError {
    let kind = kind_from_code(code.unwrap_or_default());
    let message = message.unwrap_or("request failed").to_string();
    ProviderError::new(ProviderKind::Aws, operation, kind, message).with_cause(cause)
}

pub(crate) fn map_ec2<E>(operation: &'static str, err: E) -> ProviderError
where
    aws_sdk_ec2::Error: From<E>,
{
    let err = aws_sdk_ec2::Error::from(err);
    build(operation, err.code(), err.message(), err)
}

pub(crate) fn map_cloudwatch<E>(operation: &'static str, err: E) -> ProviderError
where
    aws_sdk_cloudwatch::Error: From<E>,
{
    let err = aws_sdk_cloudwatch::Error::from(err);
    build(operation, err.code(), err.message(), err)
}

pub(crate) fn map_cost_explorer<E>(operation: &'static str, err: E) -> ProviderError
where
    aws_sdk_costexplorer::Error: From<E>,
{
    let err = aws_sdk_costexplorer::Error::from(err);
    build(operation, err.code(), err.message(), err)
}

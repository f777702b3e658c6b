use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Message returned to callers for failures they cannot act on.
const CONTACT_SUPPORT: &str =
    "Something went wrong while processing your request. Please contact support.";

/// The main error type for Fundway operations
///
/// Each variant is one entry of the public error taxonomy. Business-rule
/// rejections are raised before any row is written; failures after an order
/// has been persisted are surfaced as `ChargeFailed` once the order has been
/// marked as errored.
#[derive(Debug, thiserror::Error)]
pub enum FundwayError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Payment method required: {0}")]
    PaymentMethodRequired(String),

    #[error("Account exists: {0}")]
    AccountExists(String),

    #[error("Charge failed: {0}")]
    ChargeFailed(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// JSON body returned for failed operations.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    pub error_id: String,
}

impl FundwayError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationFailed(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn limit_exceeded(msg: impl Into<String>) -> Self {
        Self::LimitExceeded(msg.into())
    }

    pub fn payment_method_required(msg: impl Into<String>) -> Self {
        Self::PaymentMethodRequired(msg.into())
    }

    pub fn account_exists(msg: impl Into<String>) -> Self {
        Self::AccountExists(msg.into())
    }

    pub fn charge_failed(msg: impl Into<String>) -> Self {
        Self::ChargeFailed(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable code for the error kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationFailed(_) => "VALIDATION_FAILED",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::LimitExceeded(_) => "LIMIT_EXCEEDED",
            Self::PaymentMethodRequired(_) => "PAYMENT_METHOD_REQUIRED",
            Self::AccountExists(_) => "ACCOUNT_EXISTS",
            Self::ChargeFailed(_) => "CHARGE_FAILED",
            Self::Conflict(_) => "CONFLICT",
            Self::Internal(_) | Self::Anyhow(_) => "INTERNAL",
        }
    }

    /// Whether the caller can fix the request and try again.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        !matches!(
            self,
            Self::ChargeFailed(_) | Self::Internal(_) | Self::Anyhow(_)
        )
    }

    /// Message safe to show to the caller.
    ///
    /// Validation and authorization failures keep their message since the
    /// caller needs it to correct the request. Provider and internal failures
    /// are replaced by a generic message unless `dev_mode` is set.
    #[must_use]
    pub fn public_message(&self, dev_mode: bool) -> String {
        if dev_mode || self.is_user_error() {
            self.to_string()
        } else {
            CONTACT_SUPPORT.to_string()
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationFailed(_)
            | Self::PaymentMethodRequired(_)
            | Self::AccountExists(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::LimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::ChargeFailed(_) => StatusCode::PAYMENT_REQUIRED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) | Self::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert into an HTTP response.
    ///
    /// The full error is always logged server-side under a generated error id;
    /// the body only carries [`public_message`](Self::public_message).
    pub fn into_response_with_mode(self, dev_mode: bool) -> Response {
        let status = self.status_code();
        let error_id = uuid::Uuid::new_v4().to_string();

        tracing::error!(
            status = status.as_u16(),
            error_id = %error_id,
            code = self.code(),
            error = %self,
            "Operation failed"
        );

        let body = ErrorResponse {
            error: self.public_message(dev_mode),
            code: self.code(),
            error_id,
        };
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for FundwayError {
    fn into_response(self) -> Response {
        self.into_response_with_mode(false)
    }
}

/// Result type alias for Fundway operations
pub type Result<T> = std::result::Result<T, FundwayError>;

impl From<serde_json::Error> for FundwayError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            FundwayError::ValidationFailed(format!("JSON error: {}", err))
        } else {
            FundwayError::Internal(format!("JSON serialization error: {}", err))
        }
    }
}

impl From<validator::ValidationErrors> for FundwayError {
    fn from(err: validator::ValidationErrors) -> Self {
        let mut field_errors: Vec<String> = err
            .field_errors()
            .iter()
            .map(|(field, errors)| {
                let messages: Vec<&str> = errors
                    .iter()
                    .filter_map(|e| e.message.as_ref().map(|m| m.as_ref()))
                    .collect();
                if messages.is_empty() {
                    format!("{}: invalid", field)
                } else {
                    format!("{}: {}", field, messages.join(", "))
                }
            })
            .collect();
        field_errors.sort();

        FundwayError::ValidationFailed(field_errors.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FundwayError::validation("quantity must be positive");
        assert_eq!(err.to_string(), "Validation failed: quantity must be positive");

        let err = FundwayError::limit_exceeded("too many orders");
        assert_eq!(err.to_string(), "Limit exceeded: too many orders");
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(FundwayError::validation("x").code(), "VALIDATION_FAILED");
        assert_eq!(FundwayError::unauthorized("x").code(), "UNAUTHORIZED");
        assert_eq!(FundwayError::not_found("x").code(), "NOT_FOUND");
        assert_eq!(FundwayError::limit_exceeded("x").code(), "LIMIT_EXCEEDED");
        assert_eq!(FundwayError::payment_method_required("x").code(), "PAYMENT_METHOD_REQUIRED");
        assert_eq!(FundwayError::account_exists("x").code(), "ACCOUNT_EXISTS");
        assert_eq!(FundwayError::charge_failed("x").code(), "CHARGE_FAILED");
        assert_eq!(FundwayError::conflict("x").code(), "CONFLICT");
        assert_eq!(FundwayError::internal("x").code(), "INTERNAL");
    }

    #[test]
    fn test_public_message_hides_provider_details_in_production() {
        let err = FundwayError::charge_failed("card_declined: insufficient funds (acct_123)");
        assert_eq!(err.public_message(false), CONTACT_SUPPORT);
        assert!(err.public_message(true).contains("acct_123"));

        let err = FundwayError::internal("pool exhausted");
        assert_eq!(err.public_message(false), CONTACT_SUPPORT);
    }

    #[test]
    fn test_public_message_keeps_user_errors() {
        let err = FundwayError::unauthorized("You must be an admin of this account");
        assert_eq!(
            err.public_message(false),
            "Unauthorized: You must be an admin of this account"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(FundwayError::validation("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(FundwayError::unauthorized("x").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(FundwayError::limit_exceeded("x").status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(FundwayError::charge_failed("x").status_code(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(FundwayError::conflict("x").status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_from_serde_json_syntax_error() {
        let err: FundwayError = serde_json::from_str::<serde_json::Value>("{ invalid")
            .unwrap_err()
            .into();
        assert!(matches!(err, FundwayError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn test_into_response_uses_generic_message() {
        let response = FundwayError::internal("secret detail").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_into_response_with_dev_mode() {
        let response = FundwayError::not_found("Order 42").into_response_with_mode(true);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

use algocash_sdk::CashError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayerError>;

#[derive(Error, Debug)]
pub enum RelayerError {
    #[error(transparent)]
    Cash(#[from] CashError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl RelayerError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RelayerError::Cash(e) => match e {
                CashError::InvalidAmount(_) | CashError::InvalidAddress(_) => {
                    StatusCode::BAD_REQUEST
                }
                CashError::UnknownCode(_) => StatusCode::NOT_FOUND,
                CashError::AlreadyRedeemed(_)
                | CashError::NotPending(_)
                | CashError::CodeCollision(_) => StatusCode::CONFLICT,
                CashError::InsufficientFunds { .. } | CashError::InsufficientLiquidity { .. } => {
                    StatusCode::PAYMENT_REQUIRED
                }
                CashError::LedgerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                CashError::LedgerRejected(_) | CashError::CorruptEntry { .. } => {
                    StatusCode::BAD_GATEWAY
                }
                CashError::ConfirmationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
                CashError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for RelayerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!("Request failed: {}", self);
        }

        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use algocash_sdk::{Amount, SubmissionId};

    #[test]
    fn test_status_mapping() {
        let cases = [
            (CashError::InvalidAmount("0".into()), StatusCode::BAD_REQUEST),
            (CashError::UnknownCode("NOPE".into()), StatusCode::NOT_FOUND),
            (CashError::AlreadyRedeemed("X".into()), StatusCode::CONFLICT),
            (
                CashError::InsufficientLiquidity {
                    needed: Amount::from_units(5),
                    available: Amount::ZERO,
                },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                CashError::LedgerUnavailable("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (CashError::LedgerRejected("no".into()), StatusCode::BAD_GATEWAY),
            (
                CashError::ConfirmationTimeout(SubmissionId("TX".into())),
                StatusCode::GATEWAY_TIMEOUT,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(RelayerError::from(error).status(), expected);
        }
    }

    #[tokio::test]
    async fn test_error_body() {
        let response = RelayerError::from(CashError::AlreadyRedeemed("ABC".into())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Code already redeemed: ABC");
    }
}

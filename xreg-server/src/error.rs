//! Maps `xreg_core::RegistryError` onto HTTP status codes per §7.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use xreg_core::RegistryError;

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub RegistryError);

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            RegistryError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::Conflict(_) => StatusCode::CONFLICT,
            RegistryError::ModelInvalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RegistryError::Upstream(_) => StatusCode::BAD_GATEWAY,
            RegistryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RegistryError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
        }
    }

    fn error_response(&self) -> HttpResponse {
        tracing::error!(kind = self.0.kind(), error = %self.0, "request failed");
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        }))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn maps_each_error_kind_to_its_status_code() {
        let cases = [
            (RegistryError::bad_request("x"), StatusCode::BAD_REQUEST),
            (RegistryError::not_found("x"), StatusCode::NOT_FOUND),
            (RegistryError::conflict("x"), StatusCode::CONFLICT),
            (RegistryError::model_invalid("x"), StatusCode::UNPROCESSABLE_ENTITY),
            (RegistryError::upstream("x"), StatusCode::BAD_GATEWAY),
            (RegistryError::internal("x"), StatusCode::INTERNAL_SERVER_ERROR),
            (RegistryError::unsupported("x"), StatusCode::NOT_IMPLEMENTED),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).status_code(), expected);
        }
    }
}

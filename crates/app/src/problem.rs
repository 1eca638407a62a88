use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

use crate::catalog::CatalogError;

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    detail: String,
}

#[derive(Debug)]
pub struct ProblemResponse {
    status: StatusCode,
    body: ProblemDetails,
}

impl ProblemResponse {
    pub fn new<S: Into<String>>(status: StatusCode, problem_type: &'static str, detail: S) -> Self {
        Self {
            status,
            body: ProblemDetails {
                problem_type,
                title: status.canonical_reason().unwrap_or("error"),
                detail: detail.into(),
            },
        }
    }

    pub fn invalid_request<S: Into<String>>(detail: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", detail)
    }

    #[cfg(test)]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[cfg(test)]
    pub fn problem_type(&self) -> &'static str {
        self.body.problem_type
    }
}

impl From<JsonRejection> for ProblemResponse {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ProblemResponse {
    fn from(rejection: QueryRejection) -> Self {
        Self::invalid_request(rejection.body_text())
    }
}

impl From<CatalogError> for ProblemResponse {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound => {
                Self::new(StatusCode::NOT_FOUND, "product_not_found", "product is not found")
            }
            CatalogError::SellerNotFound => {
                Self::new(StatusCode::BAD_REQUEST, "seller_not_found", "seller is not found")
            }
            CatalogError::Notification(failure) => {
                warn!(stage = "api", product_uuid = %failure.product.uuid, error = %failure.headline(), "stock notification failed after update");
                Self::new(
                    StatusCode::BAD_GATEWAY,
                    "notification_failed",
                    format!(
                        "product {} was updated but the seller could not be notified: {}",
                        failure.product.uuid,
                        failure.headline()
                    ),
                )
            }
            CatalogError::SellerVanished(product) => {
                warn!(stage = "api", product_uuid = %product.uuid, seller_uuid = %product.seller_uuid, "stock updated without a seller to notify");
                Self::new(
                    StatusCode::BAD_GATEWAY,
                    "notification_failed",
                    format!(
                        "product {} was updated but its seller could not be found to notify",
                        product.uuid
                    ),
                )
            }
            storage @ (CatalogError::Product(_) | CatalogError::Seller(_)) => {
                error!(stage = "api", error = %storage, "catalog storage failure");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "storage_error",
                    "failed to access catalog storage",
                )
            }
        }
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self.body).into_response();
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

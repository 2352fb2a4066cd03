use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Success envelope returned by every handler.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub status_code: u16,
    pub data: T,
    pub message: String,
    pub success: bool,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(status: StatusCode, data: T, message: impl Into<String>) -> Self {
        Self {
            status_code: status.as_u16(),
            data,
            message: message.into(),
            success: status.is_success(),
        }
    }

    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self::new(StatusCode::OK, data, message)
    }

    pub fn created(data: T, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CREATED, data, message)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_status_data_and_message() {
        let resp = ApiResponse::ok(serde_json::json!({"id": 1}), "done");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["statusCode"], 200);
        assert_eq!(json["data"]["id"], 1);
        assert_eq!(json["message"], "done");
        assert_eq!(json["success"], true);
    }

    #[test]
    fn created_sets_201_and_success() {
        let resp = ApiResponse::created((), "made");
        assert_eq!(resp.status_code, 201);
        assert!(resp.success);
    }
}

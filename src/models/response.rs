use serde::Serialize;
use uuid::Uuid;

use crate::models::status::DeliveryState;

#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message,
        }
    }

    pub fn error(error: String, message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            message,
        }
    }
}

/// Admission acknowledgment body. Always carries a stable identifier the
/// caller can poll, regardless of how dispatch proceeds.
#[derive(Debug, Clone, Serialize)]
pub struct AdmitResponseBody {
    pub notification_id: Uuid,
    pub status: DeliveryState,
    pub correlation_id: String,
    pub remaining_requests: u64,
}

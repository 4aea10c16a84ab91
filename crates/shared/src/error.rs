use serde::{Deserialize, Serialize};

/// Error body the research service may return alongside a non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(alias = "detail")]
    pub message: String,
}

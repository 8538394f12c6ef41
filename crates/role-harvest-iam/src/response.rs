use role_harvest::RawRole;
use serde::Deserialize;

/// Response from the IAM role listing endpoint.
/// `GET /v1/roles` or `GET /v1/{parent}/roles`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRolesResponse {
    #[serde(default)]
    pub roles: Vec<RawRole>,
    pub next_page_token: Option<String>,
}

/// Error envelope returned alongside non-success statuses.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
}

use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;

use role_harvest::{RawRole, RoleName, RolePage, RoleRecord, RoleSource, RoleSummary, SourceError};

use crate::response::{ErrorResponse, ListRolesResponse};

pub const DEFAULT_API_BASE: &str = "https://iam.googleapis.com";

/// Configuration for the IAM role source.
#[derive(Debug, Clone)]
pub struct IamRoleSourceConfig {
    /// Resource owning custom roles, e.g. `organizations/123` or
    /// `projects/my-project`. `None` lists the predefined roles.
    pub parent: Option<String>,
    pub page_size: u32,
    pub show_deleted: bool,
    pub token: Option<String>,
    pub api_base_url: Option<String>,
    pub request_timeout: Duration,
}

impl Default for IamRoleSourceConfig {
    fn default() -> Self {
        Self {
            parent: None,
            page_size: 1000,
            show_deleted: false,
            token: None,
            api_base_url: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Reads role definitions from the IAM REST API.
pub struct IamRoleSource {
    config: IamRoleSourceConfig,
    client: reqwest::Client,
}

impl IamRoleSource {
    pub fn new(config: IamRoleSourceConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent("role-harvest")
            .build()
            .map_err(|e| SourceError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    fn api_base(&self) -> &str {
        self.config
            .api_base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
    }

    fn list_url(&self, cursor: Option<&str>) -> Result<Url, SourceError> {
        let base = match &self.config.parent {
            Some(parent) => format!("{}/v1/{}/roles", self.api_base(), parent),
            None => format!("{}/v1/roles", self.api_base()),
        };

        let mut params = vec![
            ("pageSize", self.config.page_size.to_string()),
            ("showDeleted", self.config.show_deleted.to_string()),
        ];
        if let Some(token) = cursor {
            params.push(("pageToken", token.to_owned()));
        }

        Url::parse_with_params(&base, &params)
            .map_err(|e| SourceError::Parse(format!("invalid list URL {base}: {e}")))
    }

    fn detail_url(&self, name: &RoleName) -> Result<Url, SourceError> {
        let url = format!("{}/v1/{}", self.api_base(), name);
        Url::parse(&url).map_err(|e| SourceError::Parse(format!("invalid role URL {url}: {e}")))
    }

    /// Issue a GET and decode the body. `role` names the resource being
    /// looked up so a 404 can be reported as `NotFound`.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        role: Option<&RoleName>,
    ) -> Result<T, SourceError> {
        let mut req = self.client.get(url.clone());
        if let Some(token) = &self.config.token {
            req = req.bearer_auth(token);
        }

        tracing::debug!(%url, "iam request");
        let response = req.send().await.map_err(transport_error)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body, role));
        }

        response.json().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout(e.to_string())
            } else {
                SourceError::Parse(e.to_string())
            }
        })
    }
}

fn transport_error(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout(e.to_string())
    } else {
        SourceError::Unavailable(e.to_string())
    }
}

fn status_error(status: StatusCode, body: &str, role: Option<&RoleName>) -> SourceError {
    let detail = match serde_json::from_str::<ErrorResponse>(body) {
        Ok(envelope) if !envelope.error.status.is_empty() => {
            format!("{} {}", envelope.error.status, envelope.error.message)
        }
        Ok(envelope) => envelope.error.message,
        Err(_) if body.is_empty() => "no response body".to_owned(),
        Err(_) => body.to_owned(),
    };

    match (status, role) {
        (StatusCode::NOT_FOUND, Some(name)) => SourceError::NotFound(name.clone()),
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => {
            SourceError::Auth(format!("HTTP {status}: {detail}"))
        }
        (StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT, _) => {
            SourceError::Timeout(format!("HTTP {status}: {detail}"))
        }
        _ => SourceError::Unavailable(format!("HTTP {status}: {detail}")),
    }
}

fn summary_from(raw: RawRole) -> Result<RoleSummary, SourceError> {
    match raw.name {
        Some(name) if !name.is_empty() => Ok(RoleSummary::new(name)),
        _ => Err(SourceError::Parse("listed role without a name".into())),
    }
}

#[async_trait::async_trait]
impl RoleSource for IamRoleSource {
    fn label(&self) -> &str {
        self.config.parent.as_deref().unwrap_or("predefined")
    }

    async fn list_page(&self, cursor: Option<&str>) -> Result<RolePage, SourceError> {
        let url = self.list_url(cursor)?;
        let response: ListRolesResponse = self.get_json(url, None).await?;

        let roles = response
            .roles
            .into_iter()
            .map(summary_from)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            roles = roles.len(),
            more = response.next_page_token.is_some(),
            "listed role page"
        );

        Ok(RolePage {
            roles,
            next_page_token: response.next_page_token,
        })
    }

    async fn get_detail(&self, name: &RoleName) -> Result<RoleRecord, SourceError> {
        let url = self.detail_url(name)?;
        let raw: RawRole = self.get_json(url, Some(name)).await?;
        raw.into_record()
    }
}

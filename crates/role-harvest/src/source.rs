use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use crate::role::{RoleName, RolePage, RoleRecord, RoleSummary};

/// Errors that can occur when reading from a role source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("role not found: {0}")]
    NotFound(RoleName),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("remote unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl SourceError {
    /// Whether a harvest pass may drop the affected role and keep going.
    /// Only a role that vanished between listing and lookup qualifies.
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// A remote catalog of roles, read in two stages: paginated listing of
/// identifiers, then a point lookup per identifier.
#[async_trait::async_trait]
pub trait RoleSource: Send + Sync {
    /// Human-readable label identifying this source.
    fn label(&self) -> &str;

    /// Fetch one page of role identifiers. `cursor` is the opaque token
    /// returned with the previous page, or `None` for the first page.
    async fn list_page(&self, cursor: Option<&str>) -> Result<RolePage, SourceError>;

    /// Fetch the full record for a single role.
    async fn get_detail(&self, name: &RoleName) -> Result<RoleRecord, SourceError>;
}

#[async_trait::async_trait]
impl<T: RoleSource + ?Sized> RoleSource for Arc<T> {
    fn label(&self) -> &str {
        (**self).label()
    }

    async fn list_page(&self, cursor: Option<&str>) -> Result<RolePage, SourceError> {
        (**self).list_page(cursor).await
    }

    async fn get_detail(&self, name: &RoleName) -> Result<RoleRecord, SourceError> {
        (**self).get_detail(name).await
    }
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Lazily walk every page of the listing, yielding one summary per role.
///
/// Pages are requested only as the stream is polled. The first error ends
/// the stream; restarting means calling this again from the beginning.
pub fn list_summaries<S>(source: &S) -> BoxStream<'_, Result<RoleSummary, SourceError>>
where
    S: RoleSource + ?Sized,
{
    stream::try_unfold(Cursor::Start, move |cursor| async move {
        let token = match cursor {
            Cursor::Done => return Ok(None),
            Cursor::Start => None,
            Cursor::Next(token) => Some(token),
        };

        let page = source.list_page(token.as_deref()).await?;

        let next = match page.next_page_token {
            Some(next) if token.as_deref() == Some(next.as_str()) => {
                return Err(SourceError::Parse(format!(
                    "page cursor did not advance: {next}"
                )));
            }
            Some(next) if !next.is_empty() => Cursor::Next(next),
            _ => Cursor::Done,
        };

        Ok(Some((stream::iter(page.roles.into_iter().map(Ok::<_, SourceError>)), next)))
    })
    .try_flatten()
    .boxed()
}

/// Drain the full listing into memory.
pub async fn collect_summaries<S>(source: &S) -> Result<Vec<RoleSummary>, SourceError>
where
    S: RoleSource + ?Sized,
{
    list_summaries(source).try_collect().await
}

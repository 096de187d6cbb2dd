//! Cursor pagination of list endpoints.
//!
//! Requests carry `starting_after` (forward) or `ending_before` (backward)
//! plus `limit` and an optional `filter`. Responses wrap a page in
//! `{data, has_next, has_prev, next, prev}`.

use crate::error::AuthzError;
use rootcause::Report;
use serde::{Deserialize, Serialize};

/// Page size used when none is given.
pub const DEFAULT_LIMIT: u32 = 50;

/// Largest page the API serves.
pub const MAX_LIMIT: u32 = 1500;

/// Cursor of the first page.
pub const CURSOR_BEGIN: &str = "";

/// Cursor past the last page.
pub const CURSOR_END: &str = "end";

/// Pagination parameters of a list request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pagination {
    /// Return the page after this cursor.
    pub starting_after: Option<String>,
    /// Return the page before this cursor.
    pub ending_before: Option<String>,
    /// Page size.
    pub limit: Option<u32>,
    /// Server-side filter expression.
    pub filter: Option<String>,
}

impl Pagination {
    /// First page of `limit` items.
    #[must_use]
    pub fn with_limit(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Page after `cursor`, keeping limit and filter.
    #[must_use]
    pub fn after(&self, cursor: impl Into<String>) -> Self {
        Self {
            starting_after: Some(cursor.into()),
            ending_before: None,
            limit: self.limit,
            filter: self.filter.clone(),
        }
    }

    /// Page before `cursor`, keeping limit and filter.
    #[must_use]
    pub fn before(&self, cursor: impl Into<String>) -> Self {
        Self {
            starting_after: None,
            ending_before: Some(cursor.into()),
            limit: self.limit,
            filter: self.filter.clone(),
        }
    }

    /// Effective page size.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }

    /// True when this requests the first page going forward.
    #[must_use]
    pub fn is_first_page(&self) -> bool {
        self.ending_before.is_none()
            && self.starting_after.as_deref().unwrap_or(CURSOR_BEGIN) == CURSOR_BEGIN
    }

    /// Checks the parameters before any request is made.
    pub fn validate(&self) -> Result<(), Report<AuthzError>> {
        let limit = self.limit();
        if limit == 0 || limit > MAX_LIMIT {
            return Err(AuthzError::validation(format!(
                "limit '{}' must be between 1 and {}",
                limit, MAX_LIMIT
            ))
            .into());
        }
        if self.starting_after.is_some() && self.ending_before.is_some() {
            return Err(AuthzError::validation(
                "starting_after and ending_before cannot both be set",
            )
            .into());
        }
        if self.ending_before.as_deref() == Some(CURSOR_BEGIN) {
            return Err(AuthzError::validation(
                "the beginning cursor is not valid when paginating backwards",
            )
            .into());
        }
        if self.starting_after.as_deref() == Some(CURSOR_END) {
            return Err(AuthzError::validation(
                "the end cursor is not valid when paginating forwards",
            )
            .into());
        }
        Ok(())
    }

    /// Query parameters for the request.
    #[must_use]
    pub fn query(&self) -> Vec<(String, String)> {
        let mut query = Vec::with_capacity(3);
        match &self.ending_before {
            Some(cursor) => query.push(("ending_before".to_string(), cursor.clone())),
            None => query.push((
                "starting_after".to_string(),
                self.starting_after.clone().unwrap_or_default(),
            )),
        }
        query.push(("limit".to_string(), self.limit().to_string()));
        if let Some(filter) = &self.filter {
            query.push(("filter".to_string(), filter.clone()));
        }
        query
    }
}

/// One page of a list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResponse<T> {
    /// Items of this page.
    pub data: Vec<T>,
    /// Whether a later page exists.
    #[serde(default)]
    pub has_next: bool,
    /// Whether an earlier page exists.
    #[serde(default)]
    pub has_prev: bool,
    /// Cursor of the next page.
    #[serde(default)]
    pub next: Option<String>,
    /// Cursor of the previous page.
    #[serde(default)]
    pub prev: Option<String>,
}

impl<T> ListResponse<T> {
    /// A response holding every item in one page.
    #[must_use]
    pub fn single_page(data: Vec<T>) -> Self {
        Self {
            data,
            has_next: false,
            has_prev: false,
            next: None,
            prev: None,
        }
    }

    /// True when the whole collection fit in this page.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.has_next && !self.has_prev
    }

    /// Fails when the response claims a later page but gives no cursor to it.
    pub fn check_next_cursor(&self) -> Result<(), Report<AuthzError>> {
        if self.has_next && self.next.is_none() {
            return Err(AuthzError::InvalidResponse {
                details: "has_next is set but next cursor is missing".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Request for the page after this one, if any.
    #[must_use]
    pub fn next_page(&self, current: &Pagination) -> Option<Pagination> {
        if !self.has_next {
            return None;
        }
        self.next.as_ref().map(|cursor| current.after(cursor.clone()))
    }
}

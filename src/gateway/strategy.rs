//! Candidate URL shapes for fetching a single conversation
//!
//! The API's addressing scheme for one conversation is not fixed, so the
//! gateway walks an ordered list of shapes and keeps the first that answers.
//! New shapes are added here and listed in the endpoint config.

use reqwest::Url;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    /// `{base}?id={id}`
    QueryId,
    /// `{base}?uniqueId={id}`
    QueryUniqueId,
    /// `{base}/{id}`
    PathSuffix,
    /// `{base}/messages?id={id}`
    MessagesQuery,
    /// `{base}/messages/{id}`
    MessagesPath,
    /// `{base}?id={id}&messages=true`
    QueryIdWithMessages,
}

/// Probe order used when the endpoint config does not name one
pub fn default_fetch_strategies() -> Vec<FetchStrategy> {
    vec![
        FetchStrategy::QueryId,
        FetchStrategy::QueryUniqueId,
        FetchStrategy::PathSuffix,
        FetchStrategy::MessagesQuery,
        FetchStrategy::MessagesPath,
        FetchStrategy::QueryIdWithMessages,
    ]
}

impl FetchStrategy {
    /// Build the candidate URL, or `None` if `base` cannot take path segments
    pub fn url(&self, base: &Url, id: &str) -> Option<Url> {
        let mut url = base.clone();
        match self {
            FetchStrategy::QueryId => {
                url.query_pairs_mut().append_pair("id", id);
            }
            FetchStrategy::QueryUniqueId => {
                url.query_pairs_mut().append_pair("uniqueId", id);
            }
            FetchStrategy::PathSuffix => {
                url.path_segments_mut().ok()?.pop_if_empty().push(id);
            }
            FetchStrategy::MessagesQuery => {
                url.path_segments_mut()
                    .ok()?
                    .pop_if_empty()
                    .push("messages");
                url.query_pairs_mut().append_pair("id", id);
            }
            FetchStrategy::MessagesPath => {
                url.path_segments_mut()
                    .ok()?
                    .pop_if_empty()
                    .push("messages")
                    .push(id);
            }
            FetchStrategy::QueryIdWithMessages => {
                url.query_pairs_mut()
                    .append_pair("id", id)
                    .append_pair("messages", "true");
            }
        }
        Some(url)
    }
}

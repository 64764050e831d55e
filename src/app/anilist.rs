use std::env;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::http::{RetryPolicy, post_json_with_retries};

use super::sync::{CatalogCandidate, CatalogSource, CollaboratorError, MediaRecord};

const DEFAULT_ENDPOINT: &str = "https://graphql.anilist.co";
const ENDPOINT_ENV: &str = "ANISYNC_ANILIST_URL";
const RESULTS_PER_SEARCH: u32 = 15;
const SEARCH_QUERY: &str = r#"
query ($search: String, $perPage: Int) {
  Page(page: 1, perPage: $perPage) {
    media(search: $search, type: ANIME) {
      id
      title { romaji english native }
      synonyms
      episodes
      format
      startDate { year month day }
    }
  }
}
"#;

/// Catalog search against the AniList GraphQL API.
pub(crate) struct AniListCatalog {
    endpoint: String,
    policy: RetryPolicy,
}

impl AniListCatalog {
    pub(crate) fn from_env() -> Self {
        let endpoint = env::var(ENDPOINT_ENV)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        Self {
            endpoint,
            policy: RetryPolicy::default(),
        }
    }
}

impl CatalogSource for AniListCatalog {
    fn search(&mut self, query: &str) -> Result<Vec<CatalogCandidate>, CollaboratorError> {
        let body = json!({
            "query": SEARCH_QUERY,
            "variables": { "search": query, "perPage": RESULTS_PER_SEARCH },
        });
        let raw = post_json_with_retries(&self.endpoint, &body, &self.policy).map_err(|err| {
            if err.retryable {
                CollaboratorError::Transient(err.message)
            } else {
                CollaboratorError::Permanent(err.message)
            }
        })?;
        let candidates = parse_search_response(&raw)
            .map_err(|err| CollaboratorError::Permanent(format!("{err:#}")))?;
        debug!(query, results = candidates.len(), "anilist search");
        Ok(candidates)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    data: Option<SearchData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    #[serde(rename = "Page")]
    page: SearchPage,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    media: Vec<MediaRecord>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

pub(crate) fn parse_search_response(raw: &str) -> Result<Vec<CatalogCandidate>> {
    let response: SearchResponse =
        serde_json::from_str(raw).context("invalid catalog search response")?;
    if let Some(error) = response.errors.first() {
        bail!("catalog search error: {}", error.message);
    }
    let data = response
        .data
        .context("catalog search response has no data")?;
    Ok(data
        .page
        .media
        .into_iter()
        .map(CatalogCandidate::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::sync::MediaFormat;

    #[test]
    fn parses_page_media_into_candidates() {
        let raw = r#"{"data": {"Page": {"media": [
            {"id": 16498,
             "title": {"romaji": "Shingeki no Kyojin", "english": "Attack on Titan", "native": "進撃の巨人"},
             "synonyms": ["AoT"], "episodes": 25, "format": "TV",
             "startDate": {"year": 2013, "month": 4, "day": 7}},
            {"id": 99, "title": {"romaji": "Mystery"}, "synonyms": null,
             "episodes": null, "format": null, "startDate": {"year": null, "month": null, "day": null}}
        ]}}}"#;
        let candidates = parse_search_response(raw).expect("parse");
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].primary_title(), "Shingeki no Kyojin");
        assert!(
            candidates[0]
                .titles
                .alternates
                .iter()
                .any(|title| title == "Attack on Titan")
        );
        assert_eq!(candidates[0].format, MediaFormat::Tv);
        assert_eq!(candidates[1].episode_count, None);
        assert_eq!(candidates[1].start_date, None);
    }

    #[test]
    fn graphql_errors_are_reported() {
        let raw = r#"{"data": null, "errors": [{"message": "Too Many Requests.", "status": 429}]}"#;
        let err = parse_search_response(raw).expect_err("should fail");
        assert!(err.to_string().contains("Too Many Requests"));
    }
}

//! # Course Platform Source
//!
//! Extracts four resources from the Thinkific public REST API:
//!
//! - **`courses`**: a single, unpaginated request.
//! - **`course_reviews`**: one paginated walk per course id, in course order.
//! - **`enrollments`** and **`users`**: paginated walks.
//!
//! Every resource is merged on its `id` field. Requests are issued strictly
//! sequentially and the first failure aborts the whole extraction.

use futures_util::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use tracing::info;

use crate::configs::{ConfigError, RuntimeConfig};
use crate::pipeline::{primary_key_value, ExtractedTable, ResourceSpec, Source};
use crate::retrieve::ky_http::DEFAULT_TIMEOUT;
use crate::retrieve::paginate::extract_items;
use crate::retrieve::{paginate, ApiClient, FetchError, JsonFetch, Page};

/// Public API root.
pub const THINKIFIC_BASE_URL: &str = "https://api.thinkific.com/api/public/v1/";

/// Name of the source, used for configuration lookups.
pub const SOURCE_NAME: &str = "thinkific";

/// Header carrying the API key (`X-Auth-API-Key`). Header names are stored lowercase.
pub const API_KEY_HEADER: &str = "x-auth-api-key";

/// Header carrying the tenant subdomain.
pub const SUBDOMAIN_HEADER: &str = "x-auth-subdomain";

const PRIMARY_KEY: &str = "id";

/// API key and tenant subdomain.
#[derive(Clone, PartialEq, Eq)]
pub struct ThinkificCredentials {
    /// Secret API key.
    pub api_key: String,
    /// Tenant subdomain, e.g. `acme` for `acme.thinkific.com`.
    pub subdomain: String,
}

impl std::fmt::Debug for ThinkificCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThinkificCredentials")
            .field("api_key", &"***")
            .field("subdomain", &self.subdomain)
            .finish()
    }
}

impl ThinkificCredentials {
    /// Resolves `thinkific_api_key` and `thinkific_subdomain` for `pipeline`
    /// through the provider hierarchy.
    pub fn from_config(config: &RuntimeConfig, pipeline: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: config.require_source_value(pipeline, SOURCE_NAME, "thinkific_api_key")?,
            subdomain: config.require_source_value(pipeline, SOURCE_NAME, "thinkific_subdomain")?,
        })
    }

    /// The headers sent with every request.
    pub fn headers(&self) -> Result<HeaderMap, FetchError> {
        let value = |name: &str, raw: &str| {
            HeaderValue::from_str(raw).map_err(|e| FetchError::InvalidHeader {
                name: name.to_string(),
                reason: e.to_string(),
            })
        };

        let mut api_key = value(API_KEY_HEADER, &self.api_key)?;
        api_key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, api_key);
        headers.insert(SUBDOMAIN_HEADER, value(SUBDOMAIN_HEADER, &self.subdomain)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

/// Resolves the API root: a configured `base_url` for the source, or [`THINKIFIC_BASE_URL`].
pub fn base_url(config: &RuntimeConfig, pipeline: &str) -> String {
    config
        .resolve_source_value(pipeline, SOURCE_NAME, "base_url")
        .unwrap_or_else(|| THINKIFIC_BASE_URL.to_string())
}

/// The Thinkific source, generic over how JSON documents are fetched.
#[derive(Debug, Clone)]
pub struct ThinkificSource<F> {
    client: F,
}

impl ThinkificSource<ApiClient> {
    /// Builds a source backed by a real HTTP client.
    pub fn connect(credentials: &ThinkificCredentials, base_url: &str) -> Result<Self, FetchError> {
        let client = ApiClient::new(base_url, credentials.headers()?, DEFAULT_TIMEOUT)?;
        Ok(Self::new(client))
    }
}

impl<F: JsonFetch + Sync> ThinkificSource<F> {
    /// Wraps an existing fetcher.
    pub fn new(client: F) -> Self {
        Self { client }
    }

    /// The underlying fetcher.
    pub fn client(&self) -> &F {
        &self.client
    }

    /// Fetches the course list with a single request.
    pub async fn courses(&self) -> Result<Vec<Page>, FetchError> {
        let body = self.client.get_json("courses", &[]).await?;
        Ok(vec![extract_items("courses", &body)?])
    }

    /// Fetches the reviews of every course in `courses`, one full paginated
    /// walk per course id, in the order the courses were listed.
    pub async fn course_reviews(&self, courses: &[Page]) -> Result<Vec<Page>, FetchError> {
        let mut pages = Vec::new();
        for course in courses.iter().flatten() {
            let course_id = primary_key_value(course, PRIMARY_KEY).ok_or_else(|| FetchError::Decode {
                url: "courses".to_string(),
                reason: "course record has no usable 'id'".to_string(),
            })?;
            let reviews: Vec<Page> = paginate(
                &self.client,
                "course_reviews",
                vec![("course_id".to_string(), course_id)],
            )
            .try_collect()
            .await?;
            pages.extend(reviews);
        }
        Ok(pages)
    }

    /// Fetches every enrollment.
    pub async fn enrollments(&self) -> Result<Vec<Page>, FetchError> {
        paginate(&self.client, "enrollments", Vec::new()).try_collect().await
    }

    /// Fetches every user.
    pub async fn users(&self) -> Result<Vec<Page>, FetchError> {
        paginate(&self.client, "users", Vec::new()).try_collect().await
    }
}

impl<F: JsonFetch + Sync> Source for ThinkificSource<F> {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn resources(&self) -> Vec<ResourceSpec> {
        ["courses", "course_reviews", "enrollments", "users"]
            .iter()
            .map(|name| ResourceSpec::merge(name, PRIMARY_KEY))
            .collect()
    }

    async fn extract(&self) -> Result<Vec<ExtractedTable>, FetchError> {
        let courses = self.courses().await?;
        let course_reviews = self.course_reviews(&courses).await?;
        let enrollments = self.enrollments().await?;
        let users = self.users().await?;

        let tables: Vec<ExtractedTable> = self
            .resources()
            .into_iter()
            .zip([courses, course_reviews, enrollments, users])
            .map(|(spec, pages)| ExtractedTable::new(spec, pages))
            .collect();

        for table in &tables {
            info!(resource = %table.resource.name, rows = table.row_count(), "resource extracted");
        }
        Ok(tables)
    }
}

//! # Page-Number Pagination
//!
//! Walks an endpoint that paginates with a `page`/`limit` pair and reports the
//! following page in `meta.pagination.next_page`:
//!
//! ```json
//! { "items": [ {...}, {...} ], "meta": { "pagination": { "next_page": 2 } } }
//! ```
//!
//! The walk starts at page 1 with a fixed limit of [`PAGE_LIMIT`] and ends when
//! `next_page` is `null` or absent. Pages are produced lazily: a request is
//! only issued when the consumer polls for the next page, and requests are
//! strictly sequential.

use futures_util::stream::{self, Stream};
use serde_json::{Map, Value};
use tracing::debug;

use super::ky_http::{FetchError, JsonFetch};

/// Number of records requested per page.
pub const PAGE_LIMIT: u64 = 250;

/// One JSON object as returned by the API.
pub type Record = Map<String, Value>;

/// The ordered records of one API response.
pub type Page = Vec<Record>;

/// Returns a lazy stream over every page of `path`.
///
/// `params` are sent with every request; `page` and `limit` entries in it are
/// replaced by the cursor. The stream yields `Err` at most once and then ends,
/// so a failed status never yields records for that page.
pub fn paginate<'a, F>(
    client: &'a F,
    path: &'a str,
    params: Vec<(String, String)>,
) -> impl Stream<Item = Result<Page, FetchError>> + Send + 'a
where
    F: JsonFetch + Sync,
{
    let base_params: Vec<(String, String)> = params
        .into_iter()
        .filter(|(key, _)| key != "page" && key != "limit")
        .collect();

    stream::try_unfold(Some(1u64), move |cursor| {
        let mut query = base_params.clone();
        async move {
            let Some(page) = cursor else {
                return Ok(None);
            };

            query.push(("page".to_string(), page.to_string()));
            query.push(("limit".to_string(), PAGE_LIMIT.to_string()));

            let body = client.get_json(path, &query).await?;
            let items = extract_items(path, &body)?;
            let next_page = extract_next_page(path, &body)?;
            debug!(path, page, records = items.len(), ?next_page, "page fetched");

            if let Some(next) = next_page {
                if next <= page {
                    return Err(FetchError::StalledCursor {
                        path: path.to_string(),
                        page,
                        next_page: next,
                    });
                }
            }

            Ok::<_, FetchError>(Some((items, next_page)))
        }
    })
}

/// Pulls the `items` array out of a response body.
pub(crate) fn extract_items(path: &str, body: &Value) -> Result<Page, FetchError> {
    let items = body
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Decode {
            url: path.to_string(),
            reason: "response has no 'items' array".to_string(),
        })?;

    items
        .iter()
        .map(|item| match item {
            Value::Object(record) => Ok(record.clone()),
            other => Err(FetchError::Decode {
                url: path.to_string(),
                reason: format!("item is not an object: {}", other),
            }),
        })
        .collect()
}

/// Reads `meta.pagination.next_page`. `null` and a missing key both mean "no more pages".
fn extract_next_page(path: &str, body: &Value) -> Result<Option<u64>, FetchError> {
    let pagination = body
        .get("meta")
        .and_then(|meta| meta.get("pagination"))
        .ok_or_else(|| FetchError::Decode {
            url: path.to_string(),
            reason: "response has no 'meta.pagination' object".to_string(),
        })?;

    match pagination.get("next_page") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| FetchError::Decode {
            url: path.to_string(),
            reason: format!("'next_page' is not a page number: {}", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{StreamExt, TryStreamExt};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses and records every request it receives.
    struct Replay {
        responses: Mutex<VecDeque<Result<Value, u16>>>,
        requests: Mutex<Vec<(String, Vec<(String, String)>)>>,
    }

    impl Replay {
        fn new(responses: Vec<Result<Value, u16>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<(String, Vec<(String, String)>)> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl JsonFetch for Replay {
        async fn get_json(&self, path: &str, query: &[(String, String)]) -> Result<Value, FetchError> {
            self.requests
                .lock()
                .unwrap()
                .push((path.to_string(), query.to_vec()));
            let next = self.responses.lock().unwrap().pop_front();
            match next {
                Some(Ok(body)) => Ok(body),
                Some(Err(status)) => Err(FetchError::Status {
                    status,
                    url: path.to_string(),
                    body: String::new(),
                }),
                None => panic!("unexpected request to {}", path),
            }
        }
    }

    fn page(ids: &[u64], next_page: Option<u64>) -> Value {
        let items: Vec<Value> = ids.iter().map(|id| json!({ "id": id })).collect();
        json!({ "items": items, "meta": { "pagination": { "next_page": next_page } } })
    }

    fn ids(page: &Page) -> Vec<u64> {
        page.iter().map(|r| r["id"].as_u64().unwrap()).collect()
    }

    #[tokio::test]
    async fn test_yields_every_page_in_order() {
        let replay = Replay::new(vec![
            Ok(page(&[1, 2], Some(2))),
            Ok(page(&[3], Some(3))),
            Ok(page(&[4, 5], None)),
        ]);

        let pages: Vec<Page> = paginate(&replay, "users", Vec::new())
            .try_collect()
            .await
            .unwrap();

        assert_eq!(pages.len(), 3);
        assert_eq!(ids(&pages[0]), vec![1, 2]);
        assert_eq!(ids(&pages[1]), vec![3]);
        assert_eq!(ids(&pages[2]), vec![4, 5]);

        let requested_pages: Vec<String> = replay
            .requests()
            .iter()
            .map(|(_, q)| q.iter().find(|(k, _)| k == "page").unwrap().1.clone())
            .collect();
        assert_eq!(requested_pages, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_missing_next_page_terminates() {
        let replay = Replay::new(vec![Ok(json!({
            "items": [{ "id": 7 }],
            "meta": { "pagination": {} }
        }))]);

        let pages: Vec<Page> = paginate(&replay, "users", Vec::new())
            .try_collect()
            .await
            .unwrap();

        assert_eq!(pages.len(), 1);
        assert_eq!(replay.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_sends_limit_and_overrides_caller_paging() {
        let replay = Replay::new(vec![Ok(page(&[1], None))]);
        let params = vec![
            ("course_id".to_string(), "9".to_string()),
            ("page".to_string(), "40".to_string()),
        ];

        let _: Vec<Page> = paginate(&replay, "course_reviews", params)
            .try_collect()
            .await
            .unwrap();

        let (_, query) = &replay.requests()[0];
        assert!(query.contains(&("course_id".to_string(), "9".to_string())));
        assert!(query.contains(&("page".to_string(), "1".to_string())));
        assert!(query.contains(&("limit".to_string(), "250".to_string())));
        assert_eq!(query.iter().filter(|(k, _)| k == "page").count(), 1);
    }

    #[tokio::test]
    async fn test_error_status_stops_before_yielding_page() {
        let replay = Replay::new(vec![Ok(page(&[1], Some(2))), Err(500)]);

        let results: Vec<Result<Page, FetchError>> =
            paginate(&replay, "enrollments", Vec::new()).collect().await;

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(FetchError::Status { status: 500, .. })));
        assert_eq!(replay.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_stalled_cursor_is_an_error() {
        let replay = Replay::new(vec![Ok(page(&[1], Some(1)))]);

        let result: Result<Vec<Page>, FetchError> =
            paginate(&replay, "users", Vec::new()).try_collect().await;

        assert!(matches!(
            result,
            Err(FetchError::StalledCursor { page: 1, next_page: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_items_is_a_decode_error() {
        let replay = Replay::new(vec![Ok(json!({ "meta": { "pagination": { "next_page": null } } }))]);

        let result: Result<Vec<Page>, FetchError> =
            paginate(&replay, "users", Vec::new()).try_collect().await;

        assert!(matches!(result, Err(FetchError::Decode { .. })));
    }
}

//! In-process stand-in for the Thinkific REST API.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

pub const API_KEY: &str = "test-api-key";
pub const SUBDOMAIN: &str = "acme";

/// What the fake API serves. `users_name_suffix` changes between runs to
/// exercise merging; `fail_users_page` makes that page answer 500.
#[derive(Default)]
pub struct ApiState {
    pub requests: Mutex<Vec<(String, HashMap<String, String>)>>,
    pub users_name_suffix: Mutex<String>,
    pub extra_user: Mutex<bool>,
    pub fail_users_page: Mutex<Option<u64>>,
    pub calls: AtomicUsize,
}

impl ApiState {
    pub fn requests_for(&self, endpoint: &str) -> Vec<HashMap<String, String>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| e == endpoint)
            .map(|(_, q)| q.clone())
            .collect()
    }
}

fn page(items: Vec<Value>, next_page: Option<u64>) -> Response {
    Json(json!({ "items": items, "meta": { "pagination": { "next_page": next_page } } })).into_response()
}

async fn endpoint(
    State(state): State<Arc<ApiState>>,
    Path(endpoint): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    state.calls.fetch_add(1, Ordering::SeqCst);
    state
        .requests
        .lock()
        .unwrap()
        .push((endpoint.clone(), query.clone()));

    let authorized = headers.get("x-auth-api-key").is_some_and(|v| v == API_KEY)
        && headers.get("x-auth-subdomain").is_some_and(|v| v == SUBDOMAIN)
        && headers.get("content-type").is_some_and(|v| v == "application/json");
    if !authorized {
        return (StatusCode::UNAUTHORIZED, r#"{"error":"invalid credentials"}"#).into_response();
    }

    let page_no: u64 = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    match endpoint.as_str() {
        "courses" => page(vec![json!({ "id": 1, "name": "Intro" }), json!({ "id": 2, "name": "Advanced" })], None),
        "course_reviews" => match (query.get("course_id").map(String::as_str), page_no) {
            (Some("1"), 1) => page(vec![json!({ "id": 101, "course_id": 1 }), json!({ "id": 102, "course_id": 1 })], Some(2)),
            (Some("1"), 2) => page(vec![json!({ "id": 103, "course_id": 1 })], None),
            (Some("2"), 1) => page(vec![json!({ "id": 201, "course_id": 2 })], None),
            _ => page(Vec::new(), None),
        },
        "enrollments" => match page_no {
            1 => page(vec![json!({ "id": 1, "user_id": 10 }), json!({ "id": 2, "user_id": 11 })], Some(2)),
            2 => page(vec![json!({ "id": 3, "user_id": 10 })], Some(3)),
            _ => page(vec![json!({ "id": 4, "user_id": 12 })], None),
        },
        "users" => {
            if *state.fail_users_page.lock().unwrap() == Some(page_no) {
                return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
            }
            let suffix = state.users_name_suffix.lock().unwrap().clone();
            match page_no {
                1 => page(
                    vec![
                        json!({ "id": 10, "first_name": format!("Ada{}", suffix) }),
                        json!({ "id": 11, "first_name": format!("Grace{}", suffix) }),
                    ],
                    Some(2),
                ),
                _ => {
                    let mut items = vec![json!({ "id": 12, "first_name": format!("Linus{}", suffix) })];
                    if *state.extra_user.lock().unwrap() {
                        items.push(json!({ "id": 13, "first_name": "Barbara" }));
                    }
                    page(items, None)
                }
            }
        }
        _ => (StatusCode::NOT_FOUND, "unknown endpoint").into_response(),
    }
}

/// Starts the fake API and returns its shared state and base URL.
pub async fn spawn_api() -> (Arc<ApiState>, String) {
    let state = Arc::new(ApiState::default());
    let app = Router::new()
        .route("/api/public/v1/{endpoint}", get(endpoint))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (state, format!("http://{}/api/public/v1/", addr))
}

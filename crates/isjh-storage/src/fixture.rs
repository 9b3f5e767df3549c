//! Canned HTTP responses for fixture-first tests and offline dry runs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value as JsonValue;

use crate::{Fetch, FetchError, FetchedResponse, Pacer};

#[derive(Debug, Clone)]
pub enum FixtureResponse {
    Body { status: StatusCode, body: Vec<u8> },
    Timeout,
    NetworkError,
}

impl FixtureResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        FixtureResponse::Body {
            status: StatusCode::OK,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        FixtureResponse::Body {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RouteMethod {
    Get,
    Post,
    Head,
}

impl RouteMethod {
    fn as_str(&self) -> &'static str {
        match self {
            RouteMethod::Get => "GET",
            RouteMethod::Post => "POST",
            RouteMethod::Head => "HEAD",
        }
    }
}

/// Routes are exact URLs. Unknown URLs answer 404; HEAD falls back to the GET route.
#[derive(Debug, Default)]
pub struct FixtureFetcher {
    routes: Mutex<HashMap<(RouteMethod, String), FixtureResponse>>,
    requests: Mutex<Vec<String>>,
}

impl FixtureFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_get(self, url: impl Into<String>, response: FixtureResponse) -> Self {
        self.set(RouteMethod::Get, url.into(), response);
        self
    }

    pub fn with_html(self, url: impl Into<String>, html: &str) -> Self {
        self.with_get(url, FixtureResponse::ok(html.as_bytes().to_vec()))
    }

    pub fn with_json(self, url: impl Into<String>, value: &JsonValue) -> Self {
        self.with_get(url, FixtureResponse::ok(value.to_string().into_bytes()))
    }

    pub fn with_post_json(self, url: impl Into<String>, value: &JsonValue) -> Self {
        self.set(
            RouteMethod::Post,
            url.into(),
            FixtureResponse::ok(value.to_string().into_bytes()),
        );
        self
    }

    pub fn with_head(self, url: impl Into<String>, response: FixtureResponse) -> Self {
        self.set_head(url, response);
        self
    }

    pub fn set_head(&self, url: impl Into<String>, response: FixtureResponse) {
        self.set(RouteMethod::Head, url.into(), response);
    }

    fn set(&self, method: RouteMethod, url: String, response: FixtureResponse) {
        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((method, url), response);
    }

    /// Every request made so far, formatted as `"METHOD url"`.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn request_count(&self, prefix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.starts_with(prefix))
            .count()
    }

    fn respond(&self, method: RouteMethod, url: &str) -> Result<FetchedResponse, FetchError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(format!("{} {url}", method.as_str()));

        let routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        let route = routes.get(&(method, url.to_string())).or_else(|| {
            (method == RouteMethod::Head)
                .then(|| routes.get(&(RouteMethod::Get, url.to_string())))
                .flatten()
        });

        match route {
            None => Err(FetchError::HttpStatus {
                status: 404,
                url: url.to_string(),
            }),
            Some(FixtureResponse::Timeout) => Err(FetchError::Timeout {
                url: url.to_string(),
            }),
            Some(FixtureResponse::NetworkError) => Err(FetchError::Transport {
                url: url.to_string(),
                message: "connection refused".to_string(),
            }),
            Some(FixtureResponse::Body { status, .. }) if !status.is_success() => {
                Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: url.to_string(),
                })
            }
            Some(FixtureResponse::Body { status, body }) => Ok(FetchedResponse {
                status: *status,
                final_url: url.to_string(),
                body: if method == RouteMethod::Head {
                    Vec::new()
                } else {
                    body.clone()
                },
            }),
        }
    }
}

#[async_trait]
impl Fetch for FixtureFetcher {
    async fn get(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        self.respond(RouteMethod::Get, url)
    }

    async fn post_json(&self, url: &str, _body: &JsonValue) -> Result<FetchedResponse, FetchError> {
        self.respond(RouteMethod::Post, url)
    }

    async fn head(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        self.respond(RouteMethod::Head, url)
    }
}

/// Pacer that records requested delays instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingPacer {
    pauses: Mutex<Vec<Duration>>,
}

impl RecordingPacer {
    pub fn pauses(&self) -> Vec<Duration> {
        self.pauses.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Pacer for RecordingPacer {
    async fn pause(&self, delay: Duration) {
        self.pauses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_routes_are_404_and_head_falls_back_to_get() {
        let fetcher = FixtureFetcher::new().with_html("https://school.test/", "<html></html>");
        let head = fetcher.head("https://school.test/").await.unwrap();
        assert!(head.body.is_empty());
        assert_eq!(
            fetcher.get("https://school.test/missing").await.unwrap_err(),
            FetchError::HttpStatus {
                status: 404,
                url: "https://school.test/missing".into()
            }
        );
        assert_eq!(
            fetcher.requests(),
            vec![
                "HEAD https://school.test/".to_string(),
                "GET https://school.test/missing".to_string()
            ]
        );
    }
}

//! REST client for the hosted document service.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{Query, RemoteError};
use crate::storage::traits::DocumentStore;

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    #[serde(flatten)]
    query: &'a Query,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    documents: Vec<Value>,
}

/// Document store reached over HTTP.
///
/// `GET|PUT|DELETE {base}/v1/documents/{path}` and
/// `POST {base}/v1/query/{collection}`. Each path segment is percent-encoded
/// on its own, so ids may hold any character.
#[derive(Debug, Clone)]
pub struct HttpDocumentStore {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpDocumentStore {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("babylog/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;

        let parsed = Url::parse(base_url)
            .map_err(|e| RemoteError::Unavailable(format!("invalid remote url {}: {}", base_url, e)))?;
        if parsed.cannot_be_a_base() {
            return Err(RemoteError::Unavailable(format!("remote url {} cannot hold paths", base_url)));
        }

        Ok(Self {
            http,
            base_url: parsed,
            token,
        })
    }

    fn endpoint(&self, route: &str, path: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("v1").push(route).extend(path.split('/'));
        }
        url
    }

    fn document_url(&self, path: &str) -> Url {
        self.endpoint("documents", path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        self.authorize(request).send().await.map_err(map_reqwest_error)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout
    } else if e.is_decode() {
        RemoteError::Decode(e.to_string())
    } else {
        RemoteError::Unavailable(e.to_string())
    }
}

async fn error_for_status(res: Response) -> RemoteError {
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    RemoteError::Http { status, body }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, RemoteError> {
        debug!("GET document {}", path);
        let res = self.send(self.http.get(self.document_url(path))).await?;

        match res.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => res.json::<Value>().await.map(Some).map_err(map_reqwest_error),
            _ => Err(error_for_status(res).await),
        }
    }

    async fn set(&self, path: &str, document: Value, merge: bool) -> Result<(), RemoteError> {
        debug!("PUT document {} (merge={})", path, merge);
        let request = self
            .http
            .put(self.document_url(path))
            .query(&[("merge", merge)])
            .json(&document);
        let res = self.send(request).await?;

        if res.status().is_success() {
            Ok(())
        } else {
            Err(error_for_status(res).await)
        }
    }

    async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        debug!("DELETE document {}", path);
        let res = self.send(self.http.delete(self.document_url(path))).await?;

        match res.status() {
            s if s.is_success() || s == StatusCode::NOT_FOUND => Ok(()),
            _ => Err(error_for_status(res).await),
        }
    }

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Value>, RemoteError> {
        debug!("POST query {} {:?}", collection, query);
        let url = self.endpoint("query", collection);
        let res = self.send(self.http.post(url).json(&QueryRequest { query })).await?;

        if res.status().is_success() {
            let body = res.json::<QueryResponse>().await.map_err(map_reqwest_error)?;
            Ok(body.documents)
        } else {
            Err(error_for_status(res).await)
        }
    }
}

//! REST document API client.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::{RecordQuery, RemoteStore};
use crate::config::Config;

/// Remote store speaking JSON over HTTP.
///
/// Layout: `POST /{collection}`, `PUT|DELETE|GET /{collection}/{id}` and
/// `GET /{collection}?userId=...` for queries.
///
/// Ids are generated on the client. The server must store the document under
/// the `id` it was sent and echo it back; a response carrying another id is
/// rejected by the entity services.
#[derive(Clone)]
pub struct HttpRemoteStore {
  client: Client,
  base: Url,
  token: Option<String>,
}

impl HttpRemoteStore {
  pub fn new(config: &Config) -> Result<Self> {
    let url = config
      .remote
      .url
      .as_deref()
      .ok_or_else(|| eyre!("No remote url configured. Set remote.url in the config file."))?;

    Self::with_base(url, config.remote.timeout(), Config::get_api_token())
  }

  pub fn with_base(url: &str, timeout: Duration, token: Option<String>) -> Result<Self> {
    let mut base = Url::parse(url).map_err(|e| eyre!("Invalid remote url {}: {}", url, e))?;
    // Url::join treats the last segment as a file unless it ends with '/'
    if !base.path().ends_with('/') {
      base.set_path(&format!("{}/", base.path()));
    }

    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base,
      token,
    })
  }

  fn url(&self, collection: &str, id: Option<&str>) -> Result<Url> {
    let path = match id {
      Some(id) => format!("{}/{}", collection, id),
      None => collection.to_string(),
    };
    self
      .base
      .join(&path)
      .map_err(|e| eyre!("Invalid document path {}: {}", path, e))
  }

  fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
    match &self.token {
      Some(token) => request.bearer_auth(token),
      None => request,
    }
  }

  async fn send(&self, op: &str, target: &str, request: RequestBuilder) -> Result<reqwest::Response> {
    let response = self
      .authorize(request)
      .send()
      .await
      .map_err(|e| eyre!("{} {} failed: {}", op, target, e))?;
    Ok(response)
  }

  async fn expect_document(op: &str, target: &str, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(eyre!("{} {} failed: HTTP {}: {}", op, target, status, body));
    }
    response
      .json::<Value>()
      .await
      .map_err(|e| eyre!("{} {} failed: invalid response body: {}", op, target, e))
  }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
  async fn create(&self, collection: &str, id: &str, doc: Value) -> Result<Value> {
    let target = format!("{}/{}", collection, id);
    let request = self.client.post(self.url(collection, None)?).json(&doc);
    let response = self.send("create", &target, request).await?;
    Self::expect_document("create", &target, response).await
  }

  async fn update(&self, collection: &str, id: &str, doc: Value) -> Result<Value> {
    let target = format!("{}/{}", collection, id);
    let request = self.client.put(self.url(collection, Some(id))?).json(&doc);
    let response = self.send("update", &target, request).await?;
    Self::expect_document("update", &target, response).await
  }

  async fn delete(&self, collection: &str, id: &str) -> Result<()> {
    let target = format!("{}/{}", collection, id);
    let request = self.client.delete(self.url(collection, Some(id))?);
    let response = self.send("delete", &target, request).await?;

    let status = response.status();
    if status.is_success() || status == StatusCode::NOT_FOUND {
      Ok(())
    } else {
      Err(eyre!("delete {} failed: HTTP {}", target, status))
    }
  }

  async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
    let target = format!("{}/{}", collection, id);
    let request = self.client.get(self.url(collection, Some(id))?);
    let response = self.send("get", &target, request).await?;

    if response.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    Self::expect_document("get", &target, response).await.map(Some)
  }

  async fn query(&self, collection: &str, query: &RecordQuery) -> Result<Vec<Value>> {
    let mut url = self.url(collection, None)?;
    url.query_pairs_mut().extend_pairs(query.to_params());

    let request = self.client.get(url);
    let response = self.send("query", collection, request).await?;
    let body = Self::expect_document("query", collection, response).await?;

    match body {
      Value::Array(docs) => Ok(docs),
      Value::Object(mut map) => match map.remove("documents") {
        Some(Value::Array(docs)) => Ok(docs),
        _ => Err(eyre!("query {} failed: missing documents array", collection)),
      },
      _ => Err(eyre!("query {} failed: unexpected response shape", collection)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_url_building_keeps_base_path() {
    let store = HttpRemoteStore::with_base("https://api.example.com/v1", Duration::from_secs(5), None)
      .unwrap();
    assert_eq!(
      store.url("expenses", Some("e1")).unwrap().as_str(),
      "https://api.example.com/v1/expenses/e1"
    );
    assert_eq!(
      store.url("goals", None).unwrap().as_str(),
      "https://api.example.com/v1/goals"
    );
  }

  #[test]
  fn test_rejects_invalid_url() {
    assert!(HttpRemoteStore::with_base("not a url", Duration::from_secs(5), None).is_err());
  }

  #[tokio::test]
  async fn test_unreachable_host_is_an_error() {
    // Port 9 (discard) on localhost is almost never listening
    let store =
      HttpRemoteStore::with_base("http://127.0.0.1:9/", Duration::from_millis(500), None).unwrap();
    assert!(store.get("expenses", "e1").await.is_err());
  }
}

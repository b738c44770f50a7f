//! Request plumbing shared by the clients.

use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::{ClientError, ClientResult, ErrorBody};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// A base URL plus the credential sent as `Authorization`.
#[derive(Debug, Clone)]
pub(crate) struct Http {
    client: Client,
    base_url: Url,
    credential: String,
}

impl Http {
    pub(crate) fn new(base_url: Url, credential: impl Into<String>) -> ClientResult<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url,
            credential: credential.into(),
        })
    }

    pub(crate) fn credential(&self) -> &str {
        &self.credential
    }

    fn request(&self, method: Method, path: &str) -> ClientResult<RequestBuilder> {
        let url = self.base_url.join(path)?;
        let request = self.client.request(method, url);
        Ok(if self.credential.is_empty() {
            request
        } else {
            request.header(AUTHORIZATION, &self.credential)
        })
    }

    pub(crate) async fn get<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let response = self.request(Method::GET, path)?.send().await?;
        Ok(check(response).await?.json().await?)
    }

    pub(crate) async fn post<B, T>(&self, path: &str, body: Option<&B>) -> ClientResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.request(Method::POST, path)?;
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(check(request.send().await?).await?.json().await?)
    }

    pub(crate) async fn put<B, T>(&self, path: &str, body: &B) -> ClientResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.request(Method::PUT, path)?.json(body).send().await?;
        Ok(check(response).await?.json().await?)
    }

    pub(crate) async fn put_empty<B>(&self, path: &str, body: &B) -> ClientResult<()>
    where
        B: Serialize + ?Sized,
    {
        let response = self.request(Method::PUT, path)?.json(body).send().await?;
        check(response).await.map(|_| ())
    }

    pub(crate) async fn delete(&self, path: &str) -> ClientResult<()> {
        let response = self.request(Method::DELETE, path)?.send().await?;
        check(response).await.map(|_| ())
    }
}

async fn check(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let (error, message) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (body.error, body.message),
        Err(_) => (String::from("UNKNOWN"), text),
    };
    tracing::debug!(%status, %error, "Request rejected");
    Err(ClientError::Api {
        status,
        error,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_replace_base_path() {
        let http = Http::new(Url::parse("http://localhost:8080/ignored/").unwrap(), "").unwrap();
        let request = http.request(Method::GET, "/api/counters").unwrap().build().unwrap();
        assert_eq!(request.url().as_str(), "http://localhost:8080/api/counters");
        assert!(request.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_credential_is_sent() {
        let http = Http::new(Url::parse("http://localhost:8080").unwrap(), "s3cret").unwrap();
        let request = http.request(Method::DELETE, "/api/counters/1").unwrap().build().unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "s3cret");
    }
}

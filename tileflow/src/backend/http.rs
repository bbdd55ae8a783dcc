//! HTTP client abstraction for testability

use std::time::Duration;

use super::types::{BackendError, BoxFuture};

/// A file part of a multipart form upload.
#[derive(Debug, Clone)]
pub struct MultipartFile {
    pub field: &'static str,
    pub file_name: &'static str,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

/// Trait for the HTTP operations a backend needs.
///
/// This abstraction allows for dependency injection and easier testing
/// by enabling scripted HTTP clients in tests.
pub trait AsyncHttpClient: Send + Sync {
    /// Performs an HTTP GET request and only checks the status.
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<(), BackendError>>;

    /// Posts a multipart form with one file part and returns the body.
    fn post_multipart<'a>(
        &'a self,
        url: &'a str,
        file: MultipartFile,
    ) -> BoxFuture<'a, Result<Vec<u8>, BackendError>>;

    /// Posts a JSON document and returns the body.
    fn post_json<'a>(
        &'a self,
        url: &'a str,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<Vec<u8>, BackendError>>;
}

/// Real HTTP client implementation using reqwest.
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a new ReqwestClient whose requests give up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::ClientBuild(e.to_string()))?;

        Ok(Self { client })
    }
}

fn send_error(url: &str, error: reqwest::Error) -> BackendError {
    if error.is_timeout() {
        BackendError::Timeout {
            url: url.to_string(),
        }
    } else {
        BackendError::Http {
            url: url.to_string(),
            reason: error.to_string(),
        }
    }
}

async fn read_body(url: &str, response: reqwest::Response) -> Result<Vec<u8>, BackendError> {
    let status = response.status();
    if !status.is_success() {
        return Err(BackendError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| send_error(url, e))
}

impl AsyncHttpClient for ReqwestClient {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| send_error(url, e))?;

            if !response.status().is_success() {
                return Err(BackendError::Status {
                    status: response.status().as_u16(),
                    url: url.to_string(),
                });
            }
            Ok(())
        })
    }

    fn post_multipart<'a>(
        &'a self,
        url: &'a str,
        file: MultipartFile,
    ) -> BoxFuture<'a, Result<Vec<u8>, BackendError>> {
        Box::pin(async move {
            let part = reqwest::multipart::Part::bytes(file.bytes)
                .file_name(file.file_name)
                .mime_str(file.mime)
                .map_err(|e| BackendError::Encode(e.to_string()))?;
            let form = reqwest::multipart::Form::new().part(file.field, part);

            let response = self
                .client
                .post(url)
                .multipart(form)
                .send()
                .await
                .map_err(|e| send_error(url, e))?;

            read_body(url, response).await
        })
    }

    fn post_json<'a>(
        &'a self,
        url: &'a str,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<Vec<u8>, BackendError>> {
        Box::pin(async move {
            let response = self
                .client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await
                .map_err(|e| send_error(url, e))?;

            read_body(url, response).await
        })
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// A request captured by [`MockHttpClient`].
    #[derive(Debug, Clone)]
    pub struct RecordedRequest {
        pub url: String,
        pub field: Option<String>,
        pub file_name: Option<String>,
        pub body: Vec<u8>,
    }

    /// Mock HTTP client for testing
    pub struct MockHttpClient {
        pub probe: Mutex<Result<(), BackendError>>,
        pub response: Mutex<Result<Vec<u8>, BackendError>>,
        pub requests: Mutex<Vec<RecordedRequest>>,
        pub delay: Option<Duration>,
    }

    impl MockHttpClient {
        pub fn responding(body: impl Into<Vec<u8>>) -> Self {
            Self {
                probe: Mutex::new(Ok(())),
                response: Mutex::new(Ok(body.into())),
                requests: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        pub fn failing(error: BackendError) -> Self {
            Self {
                probe: Mutex::new(Err(error.clone())),
                response: Mutex::new(Err(error)),
                requests: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn set_response(&self, response: Result<Vec<u8>, BackendError>) {
            *self.response.lock() = response;
        }

        pub fn set_probe(&self, probe: Result<(), BackendError>) {
            *self.probe.lock() = probe;
        }

        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().clone()
        }

        async fn respond(&self, request: RecordedRequest) -> Result<Vec<u8>, BackendError> {
            self.requests.lock().push(request);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.response.lock().clone()
        }
    }

    impl AsyncHttpClient for MockHttpClient {
        fn get<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, Result<(), BackendError>> {
            Box::pin(async move { self.probe.lock().clone() })
        }

        fn post_multipart<'a>(
            &'a self,
            url: &'a str,
            file: MultipartFile,
        ) -> BoxFuture<'a, Result<Vec<u8>, BackendError>> {
            Box::pin(self.respond(RecordedRequest {
                url: url.to_string(),
                field: Some(file.field.to_string()),
                file_name: Some(file.file_name.to_string()),
                body: file.bytes,
            }))
        }

        fn post_json<'a>(
            &'a self,
            url: &'a str,
            body: Vec<u8>,
        ) -> BoxFuture<'a, Result<Vec<u8>, BackendError>> {
            Box::pin(self.respond(RecordedRequest {
                url: url.to_string(),
                field: None,
                file_name: None,
                body,
            }))
        }
    }

    #[tokio::test]
    async fn test_mock_client_success() {
        let mock = MockHttpClient::responding(vec![1, 2, 3, 4]);

        let result = mock.post_json("http://example.com", vec![9]).await;
        assert_eq!(result.unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(mock.requests().len(), 1);
        assert_eq!(mock.requests()[0].body, vec![9]);
    }

    #[tokio::test]
    async fn test_mock_client_error() {
        let mock = MockHttpClient::failing(BackendError::Timeout {
            url: "http://example.com".to_string(),
        });

        assert!(mock.get("http://example.com").await.is_err());
        assert!(mock.post_json("http://example.com", Vec::new()).await.is_err());
    }

    #[test]
    fn test_reqwest_client_builds() {
        assert!(ReqwestClient::with_timeout(Duration::from_secs(1)).is_ok());
    }
}

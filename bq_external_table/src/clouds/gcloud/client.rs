//! A Google Cloud REST client.

use bytes::Bytes;
use mime::{self, Mime};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::{
    header::{HeaderMap, CONTENT_TYPE},
    IntoUrl, Method, RequestBuilder, StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{error, fmt, sync::Arc, time::Duration};

use super::auth::{authenticator, AccessToken, Authenticator, TokenProvider as _};
use crate::common::*;
use crate::credentials::Credentials;
use crate::tls::{install_crypto_provider, rustls_client_config};
use crate::wait::{wait, WaitOptions, WaitStatus};

/// The OAuth2 scopes that we'll need.
static SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/devstorage.read_write",
    "https://www.googleapis.com/auth/bigquery",
];

/// An empty query string.
#[derive(Debug, Serialize)]
pub(crate) struct NoQuery;

/// Alternative media types for Google Cloud REST APIs.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Alt {
    /// Return the underlying media data instead of JSON metadata.
    Media,
}

/// An HTTP client error. A missing resource gets its own variant, because
/// several callers treat it as success.
#[derive(Debug)]
pub(crate) enum ClientError {
    /// The resource at URL was not found.
    NotFound { method: String, url: Url },
    /// Another error occured.
    Other(Error),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::NotFound { method, url } => {
                write!(f, "cannot {} {}: Not Found", method, url)
            }
            ClientError::Other(err) => err.fmt(f),
        }
    }
}

impl error::Error for ClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            ClientError::NotFound { .. } => None,
            ClientError::Other(err) => err.source(),
        }
    }
}

impl From<Error> for ClientError {
    fn from(err: Error) -> Self {
        ClientError::Other(err)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Other(err.into())
    }
}

/// May a request be sent more than once?
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Idempotency {
    SafeToRetry,
    UnsafeToRetry,
}

/// How long to wait between attempts, and how many failures to accept.
///
/// Reads back off longer, because a busy GET usually means a busy service.
fn retry_options(method: &Method) -> WaitOptions {
    if *method == Method::GET {
        WaitOptions::default()
            .retry_interval(Duration::from_secs(10))
            .allowed_errors(3)
    } else {
        WaitOptions::default()
            .retry_interval(Duration::from_secs(4))
            .allowed_errors(4)
    }
}

/// A Google Cloud REST client using OAuth2.
#[derive(Clone)]
pub(crate) struct Client {
    authenticator: Authenticator,
    client: reqwest::Client,
}

impl Client {
    /// Create a new Google Cloud client authenticating as `credentials`.
    #[instrument(level = "trace", skip(credentials))]
    pub(crate) fn new(credentials: &Credentials) -> Result<Client, ClientError> {
        // Both `gcp_auth` and `reqwest` expect a process-wide provider.
        install_crypto_provider();
        let authenticator = authenticator(credentials)?;
        let client = reqwest::Client::builder()
            .use_preconfigured_tls(rustls_client_config()?)
            .build()
            .context("could not build HTTP client")?;
        Ok(Client {
            authenticator,
            client,
        })
    }

    /// Send the request made by `build`, retrying temporary failures if
    /// `idempotency` allows it.
    ///
    /// Returns any response which isn't worth retrying, including 4xx
    /// responses. Callers decide what a non-success status means.
    async fn send<F>(
        &self,
        method: Method,
        url: &Url,
        idempotency: Idempotency,
        build: F,
    ) -> Result<reqwest::Response, ClientError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder + Sync,
    {
        trace!("{} {}", method, url);
        let token = self.token().await?;
        let (token, build, method_name) = (&token, &build, method.as_str());
        wait(&retry_options(&method), move || {
            async move {
                let result = build(&self.client)
                    .bearer_auth(token.as_str())
                    .send()
                    .await;
                response_to_wait_status(method_name, url, idempotency, result).await
            }
            .boxed()
        })
        .await
    }

    /// GET `url` with `query`, and deserialize the JSON result.
    #[instrument(level = "trace", skip(self))]
    pub(crate) async fn get<Output, U, Query>(
        &self,
        url: U,
        query: Query,
    ) -> Result<Output, ClientError>
    where
        Output: fmt::Debug + DeserializeOwned,
        U: IntoUrl + fmt::Debug,
        Query: fmt::Debug + Serialize,
    {
        let url = build_url(url, query)?;
        let resp = self
            .send(Method::GET, &url, Idempotency::SafeToRetry, |c| {
                c.get(url.as_str())
            })
            .await?;
        json_response("GET", &url, resp).await
    }

    /// GET `url` with `query`, and return the successful response unread.
    #[instrument(level = "trace", skip(self))]
    pub(crate) async fn get_response<U, Query>(
        &self,
        url: U,
        query: Query,
    ) -> Result<reqwest::Response, ClientError>
    where
        U: IntoUrl + fmt::Debug,
        Query: fmt::Debug + Serialize,
    {
        let url = build_url(url, query)?;
        let resp = self
            .send(Method::GET, &url, Idempotency::SafeToRetry, |c| {
                c.get(url.as_str())
            })
            .await?;
        success_or_error("GET", &url, resp).await
    }

    /// POST `body` as JSON, and deserialize the JSON result.
    ///
    /// With [`Idempotency::SafeToRetry`], this may POST the request multiple
    /// times. The caller is responsible for making sure that repeating the
    /// action is harmless.
    #[instrument(level = "trace", skip(self, body))]
    pub(crate) async fn post<Output, U, Query, Body>(
        &self,
        url: U,
        idempotency: Idempotency,
        query: Query,
        body: Body,
    ) -> Result<Output, ClientError>
    where
        Output: fmt::Debug + DeserializeOwned,
        U: IntoUrl + fmt::Debug,
        Query: fmt::Debug + Serialize,
        Body: fmt::Debug + Serialize + Sync + Send,
    {
        let url = build_url(url, query)?;
        trace!("POST body {}", serde_json::to_string(&body)?);
        let resp = self
            .send(Method::POST, &url, idempotency, |c| {
                c.post(url.as_str()).json(&body)
            })
            .await?;
        json_response("POST", &url, resp).await
    }

    /// POST raw bytes, and deserialize the JSON result.
    ///
    /// Uploads replace the whole object, so repeating one is harmless.
    #[instrument(level = "trace", skip(self, data), fields(len = data.len()))]
    pub(crate) async fn post_bytes<Output, U, Query>(
        &self,
        url: U,
        query: Query,
        data: Bytes,
    ) -> Result<Output, ClientError>
    where
        Output: fmt::Debug + DeserializeOwned,
        U: IntoUrl + fmt::Debug,
        Query: fmt::Debug + Serialize,
    {
        let url = build_url(url, query)?;
        let resp = self
            .send(Method::POST, &url, Idempotency::SafeToRetry, |c| {
                c.post(url.as_str())
                    .header(CONTENT_TYPE, mime::APPLICATION_OCTET_STREAM.as_ref())
                    .body(data.clone())
            })
            .await?;
        json_response("POST", &url, resp).await
    }

    /// DELETE `url`. This is sent once; callers wrap it in their own retries.
    #[instrument(level = "trace", skip(self))]
    pub(crate) async fn delete<U, Query>(
        &self,
        url: U,
        query: Query,
    ) -> Result<(), ClientError>
    where
        U: IntoUrl + fmt::Debug,
        Query: fmt::Debug + Serialize,
    {
        let url = build_url(url, query)?;
        let resp = self
            .send(Method::DELETE, &url, Idempotency::UnsafeToRetry, |c| {
                c.delete(url.as_str())
            })
            .await?;
        success_or_error("DELETE", &url, resp).await?;
        Ok(())
    }

    /// Get an access token.
    #[instrument(level = "trace", skip(self))]
    async fn token(&self) -> Result<Arc<AccessToken>> {
        self.authenticator
            .token(SCOPES)
            .await
            .context("could not get Google Cloud OAuth2 token")
    }
}

/// Classify the outcome of one attempt.
async fn response_to_wait_status(
    method: &str,
    url: &Url,
    idempotency: Idempotency,
    result: Result<reqwest::Response, reqwest::Error>,
) -> WaitStatus<reqwest::Response, ClientError> {
    let retryable = idempotency == Idempotency::SafeToRetry;
    match result {
        // No answer at all (DNS, connection reset, timeout).
        Err(err) => {
            let temporary = retryable && (err.is_request() || err.is_timeout());
            let err = ClientError::from(
                Error::from(err).context(format!("could not {} {}", method, url)),
            );
            if temporary {
                WaitStatus::FailedTemporarily(err)
            } else {
                WaitStatus::FailedPermanently(err)
            }
        }
        Ok(resp) if retryable && should_retry_status_code(resp.status()) => {
            WaitStatus::FailedTemporarily(error_from_response(method, url, resp).await)
        }
        Ok(resp) if resp.status().is_server_error() => {
            WaitStatus::FailedPermanently(error_from_response(method, url, resp).await)
        }
        Ok(resp) => WaitStatus::Finished(resp),
    }
}

/// Pass a successful response through, and turn anything else into an error.
async fn success_or_error(
    method: &str,
    url: &Url,
    resp: reqwest::Response,
) -> Result<reqwest::Response, ClientError> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(error_from_response(method, url, resp).await)
    }
}

/// Deserialize a successful JSON response.
async fn json_response<Output>(
    method: &str,
    url: &Url,
    resp: reqwest::Response,
) -> Result<Output, ClientError>
where
    Output: fmt::Debug + DeserializeOwned,
{
    let output = success_or_error(method, url, resp)
        .await?
        .json::<Output>()
        .await
        .with_context(|| format!("error fetching JSON response from {}", url))?;
    trace!("{} returned {:?}", method, output);
    Ok(output)
}

/// Build a [`ClientError`] from a failed response, reading the body for
/// Google's error description.
async fn error_from_response(
    method: &str,
    url: &Url,
    resp: reqwest::Response,
) -> ClientError {
    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
        return ClientError::NotFound {
            method: method.to_owned(),
            url: url.to_owned(),
        };
    }
    let is_json = claims_to_be_json(resp.headers());
    let err = match resp.bytes().await {
        Ok(body) => error_from_body(status, is_json, &body),
        Err(err) => Error::from(err).context(format!("{} error response unreadable", status)),
    };
    trace!("{} {} failed: {:#}", method, url, err);
    err.context(format!("{} error {}", method, url)).into()
}

/// Decode an error body. Google normally sends an [`ErrorResponse`], but
/// proxies and load balancers may send anything.
fn error_from_body(status: StatusCode, is_json: bool, body: &[u8]) -> Error {
    if is_json {
        if let Ok(resp) = serde_json::from_slice::<ErrorResponse>(body) {
            return resp.error.into();
        }
    }
    format_err!(
        "{}: expected JSON describing error, but got {:?}",
        status,
        String::from_utf8_lossy(body),
    )
}

/// Do these headers say the body is JSON?
fn claims_to_be_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<Mime>().ok())
        .map(|content_type| {
            content_type.type_() == mime::APPLICATION
                && content_type.subtype() == mime::JSON
        })
        .unwrap_or(false)
}

/// Is this HTTP status code something we should retry?
///
/// We only retry failures we have actually seen go away on their own: 503s,
/// and the 403s that Google sends when a rate limit is exceeded.
fn should_retry_status_code(status_code: StatusCode) -> bool {
    [StatusCode::SERVICE_UNAVAILABLE, StatusCode::FORBIDDEN].contains(&status_code)
}

/// Parse `url` and attach `query` as its query string.
fn build_url<U, Query>(url: U, query: Query) -> Result<Url>
where
    U: IntoUrl,
    Query: fmt::Debug + Serialize,
{
    let mut url = url.into_url().context("could not parse URL")?;
    let query_str = serde_urlencoded::to_string(&query)?;
    if !query_str.is_empty() {
        url.set_query(Some(&query_str));
    }
    Ok(url)
}

/// A Google Cloud error response.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: GCloudError,
}

/// A Google Cloud error.
#[derive(Debug, Deserialize)]
pub(crate) struct GCloudError {
    pub(crate) code: i32,
    pub(crate) message: String,
    #[serde(default)]
    pub(crate) errors: Vec<ErrorDetail>,
}

impl fmt::Display for GCloudError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Google Cloud error: {} {}", self.code, self.message)?;
        if let Some(detail) = self.errors.first() {
            write!(f, " ({})", detail.reason)?;
        }
        Ok(())
    }
}

impl error::Error for GCloudError {}

/// One entry in [`GCloudError::errors`].
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorDetail {
    /// A short machine-readable cause, like `notFound` or `rateLimitExceeded`.
    pub(crate) reason: String,
}

/// Percent-encode a string for use as a URL path component.
pub(crate) fn percent_encode(s: &str) -> impl fmt::Display + '_ {
    utf8_percent_encode(s, NON_ALPHANUMERIC)
}

/// Given an `Error`, look to see if it wraps a [`GCloudError`], and if so,
/// return it.
pub(crate) fn original_gcloud_error(err: &Error) -> Option<&GCloudError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<GCloudError>())
}

#[test]
fn build_url_appends_query() {
    #[derive(Debug, Serialize)]
    struct Query<'a> {
        prefix: &'a str,
    }
    let url = build_url(
        "https://storage.googleapis.com/storage/v1/b/bucket/o",
        Query { prefix: "users/2020 a" },
    )
    .unwrap();
    assert_eq!(
        url.as_str(),
        "https://storage.googleapis.com/storage/v1/b/bucket/o?prefix=users%2F2020+a",
    );
    let url = build_url("https://example.com/a", NoQuery).unwrap();
    assert_eq!(url.as_str(), "https://example.com/a");
}

#[test]
fn percent_encode_escapes_slashes() {
    assert_eq!(
        percent_encode("users/a.csv").to_string(),
        "users%2Fa%2Ecsv",
    );
}

#[test]
fn only_rate_limits_and_unavailable_are_retried() {
    assert!(should_retry_status_code(StatusCode::SERVICE_UNAVAILABLE));
    assert!(should_retry_status_code(StatusCode::FORBIDDEN));
    assert!(!should_retry_status_code(StatusCode::BAD_REQUEST));
    assert!(!should_retry_status_code(StatusCode::INTERNAL_SERVER_ERROR));
}

#[test]
fn finds_wrapped_gcloud_error() {
    let gcloud_err = GCloudError {
        code: 403,
        message: "rate limited".to_owned(),
        errors: vec![],
    };
    let err = Error::from(gcloud_err).context("POST error https://example.com/");
    assert_eq!(original_gcloud_error(&err).map(|e| e.code), Some(403));
    assert!(original_gcloud_error(&format_err!("other")).is_none());
}

#[test]
fn decodes_google_error_bodies() {
    let body = br#"{
      "error": {
        "code": 404,
        "message": "Not found: Dataset p:d",
        "errors": [{"domain": "global", "reason": "notFound", "message": "Not found: Dataset p:d"}]
      }
    }"#;
    let err = error_from_body(StatusCode::NOT_FOUND, true, body);
    assert_eq!(original_gcloud_error(&err).map(|e| e.code), Some(404));
    assert_eq!(
        err.to_string(),
        "Google Cloud error: 404 Not found: Dataset p:d (notFound)",
    );
}

#[test]
fn keeps_non_json_error_bodies() {
    let err = error_from_body(StatusCode::BAD_GATEWAY, false, b"upstream timed out");
    assert!(original_gcloud_error(&err).is_none());
    let msg = err.to_string();
    assert!(msg.starts_with("502 Bad Gateway"));
    assert!(msg.contains("upstream timed out"));

    // JSON that isn't Google's error shape falls back to the raw text.
    let err = error_from_body(StatusCode::BAD_REQUEST, true, br#"{"oops": 1}"#);
    assert!(err.to_string().contains("oops"));
}

#[test]
fn recognizes_json_content_types() {
    use reqwest::header::HeaderValue;

    let mut headers = HeaderMap::new();
    assert!(!claims_to_be_json(&headers));
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=UTF-8"),
    );
    assert!(claims_to_be_json(&headers));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
    assert!(!claims_to_be_json(&headers));
}

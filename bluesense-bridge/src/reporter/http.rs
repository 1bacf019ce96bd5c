use std::time::Duration;

use async_trait::async_trait;
use bluesense_core::{StatusEvent, Summary};
use jsonwebtoken::{EncodingKey, Header};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Reporter;

#[derive(Debug, thiserror::Error)]
pub enum HttpReporterError {
    #[error("invalid store URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP request failed: {0}")]
    Request(reqwest::Error),

    #[error("failed to sign auth token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

// The request URL carries the credential in its query string.
impl From<reqwest::Error> for HttpReporterError {
    fn from(err: reqwest::Error) -> Self {
        HttpReporterError::Request(err.without_url())
    }
}

/// How requests authenticate against the store.
#[derive(Clone, Default)]
pub enum Credentials {
    #[default]
    Anonymous,
    /// The database secret itself, with full admin rights.
    Secret(String),
    /// A token signed with the database secret that identifies the bridge
    /// as a password-provider user.
    User { secret: String, email: String },
}

impl Credentials {
    /// Empty strings count as absent. An email without a secret cannot be
    /// signed and falls back to anonymous access.
    pub fn new(secret: Option<String>, email: Option<String>) -> Self {
        let secret = secret.filter(|s| !s.is_empty());
        let email = email.filter(|e| !e.is_empty());

        match (secret, email) {
            (Some(secret), Some(email)) => Credentials::User { secret, email },
            (Some(secret), None) => Credentials::Secret(secret),
            (None, _) => Credentials::Anonymous,
        }
    }

    /// Value of the `auth` query parameter, minted fresh for every request.
    fn auth_param(&self) -> Result<Option<String>, HttpReporterError> {
        match self {
            Credentials::Anonymous => Ok(None),
            Credentials::Secret(secret) => Ok(Some(secret.clone())),
            Credentials::User { secret, email } => {
                Ok(Some(sign_token(secret, email, jiff::Timestamp::now())?))
            }
        }
    }
}

/// Claims of a version 0 realtime-database auth token.
#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    v: u8,
    iat: i64,
    admin: bool,
    debug: bool,
    d: TokenData,
}

/// User data the store's security rules see as `auth`.
#[derive(Debug, Serialize, Deserialize)]
struct TokenData {
    email: String,
    provider: String,
    admin: bool,
    debug: bool,
}

fn sign_token(
    secret: &str,
    email: &str,
    issued_at: jiff::Timestamp,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = TokenClaims {
        v: 0,
        iat: issued_at.as_second(),
        admin: false,
        debug: false,
        d: TokenData {
            email: email.to_owned(),
            provider: "password".to_owned(),
            admin: false,
            debug: false,
        },
    };

    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Posts JSON records to a realtime-database style REST store: every
/// channel is a `<path>.json` collection under the base URL, authenticated
/// through the `auth` query parameter.
pub struct HttpReporter {
    client: Client,
    error_url: Url,
    data_url: Url,
    credentials: Credentials,
}

impl HttpReporter {
    pub fn new(
        base_url: &str,
        credentials: Credentials,
        error_path: &str,
        data_path: &str,
        timeout: Duration,
    ) -> Result<Self, HttpReporterError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            error_url: endpoint(base_url, error_path)?,
            data_url: endpoint(base_url, data_path)?,
            credentials,
        })
    }

    pub fn error_url(&self) -> &Url {
        &self.error_url
    }

    pub fn data_url(&self) -> &Url {
        &self.data_url
    }

    async fn post<T: Serialize + Sync>(&self, url: &Url, body: &T) -> Result<(), HttpReporterError> {
        let mut request = self.client.post(url.clone()).json(body);
        if let Some(auth) = self.credentials.auth_param()? {
            request = request.query(&[("auth", auth)]);
        }

        let response = request.send().await?.error_for_status()?;
        debug!(%url, status = %response.status(), "Posted record");
        Ok(())
    }
}

fn endpoint(base_url: &str, path: &str) -> Result<Url, HttpReporterError> {
    let invalid = |reason: String| HttpReporterError::InvalidUrl {
        url: base_url.to_owned(),
        reason,
    };

    // A base without a trailing slash would have its last segment replaced.
    let base = if base_url.ends_with('/') {
        Url::parse(base_url)
    } else {
        Url::parse(&format!("{base_url}/"))
    }
    .map_err(|e| invalid(e.to_string()))?;

    if base.cannot_be_a_base() {
        return Err(invalid("not a hierarchical URL".to_owned()));
    }

    base.join(&format!("{}.json", path.trim_matches('/')))
        .map_err(|e| invalid(e.to_string()))
}

#[async_trait]
impl Reporter for HttpReporter {
    type Error = HttpReporterError;

    async fn post_event(&self, event: &StatusEvent) -> Result<(), Self::Error> {
        self.post(&self.error_url, event).await
    }

    async fn post_summary(&self, summary: &Summary) -> Result<(), Self::Error> {
        self.post(&self.data_url, summary).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use jsonwebtoken::{Algorithm, DecodingKey, Validation};
    use ordered_float::NotNan;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    use super::*;

    #[test]
    fn endpoints_are_json_collections() {
        let url = endpoint("https://bluesense.example.com", "error").unwrap();
        assert_eq!(url.as_str(), "https://bluesense.example.com/error.json");

        let url = endpoint("https://bluesense.example.com/station/7", "/data/").unwrap();
        assert_eq!(
            url.as_str(),
            "https://bluesense.example.com/station/7/data.json"
        );

        let url = endpoint("https://bluesense.example.com/station/", "data").unwrap();
        assert_eq!(url.as_str(), "https://bluesense.example.com/station/data.json");
    }

    #[test]
    fn rejects_malformed_base() {
        assert!(matches!(
            endpoint("not a url", "data"),
            Err(HttpReporterError::InvalidUrl { .. })
        ));
        assert!(matches!(
            endpoint("mailto:someone@example.com", "data"),
            Err(HttpReporterError::InvalidUrl { .. })
        ));
    }

    /// Accept one request, answer it with `status_line` and hand back the
    /// raw request text.
    async fn serve_once(status_line: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 1024];

            loop {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);

                let text = String::from_utf8_lossy(&raw);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if raw.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }

            let response = format!("HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&raw).into_owned());
        });

        (format!("http://{addr}"), rx)
    }

    #[tokio::test]
    async fn posts_events_with_auth() {
        let (base, request) = serve_once("200 OK").await;
        let reporter = HttpReporter::new(
            &base,
            Credentials::new(Some("s3cret".to_owned()), None),
            "error",
            "data",
            Duration::from_secs(5),
        )
        .unwrap();

        reporter
            .post_event(&StatusEvent::error("broken packet found, disconnected"))
            .await
            .unwrap();

        let request = request.await.unwrap();
        assert!(request.starts_with("POST /error.json?auth=s3cret HTTP/1.1"));
        assert!(request.contains("\"level\":0"));
        assert!(request.contains("\"message\":\"broken packet found, disconnected\""));
    }

    #[tokio::test]
    async fn server_errors_are_reported() {
        let (base, request) = serve_once("500 Internal Server Error").await;
        let reporter = HttpReporter::new(
            &base,
            Credentials::Anonymous,
            "error",
            "data",
            Duration::from_secs(5),
        )
        .unwrap();

        let err = reporter
            .post_event(&StatusEvent::info("program started"))
            .await
            .unwrap_err();

        assert!(matches!(err, HttpReporterError::Request(_)));
        assert!(request.await.unwrap().starts_with("POST /error.json HTTP/1.1"));
    }

    #[tokio::test]
    async fn failed_requests_do_not_leak_the_secret() {
        let (base, _request) = serve_once("500 Internal Server Error").await;
        let reporter = HttpReporter::new(
            &base,
            Credentials::new(Some("TOPSECRET".to_owned()), None),
            "error",
            "data",
            Duration::from_secs(5),
        )
        .unwrap();

        let err = reporter
            .post_event(&StatusEvent::error("data collecting failed"))
            .await
            .unwrap_err();
        assert!(!err.to_string().contains("TOPSECRET"), "{err}");
        assert!(!format!("{err:?}").contains("TOPSECRET"));

        // nothing listens on the discard port
        let reporter = HttpReporter::new(
            "http://127.0.0.1:9",
            Credentials::new(Some("TOPSECRET".to_owned()), None),
            "error",
            "data",
            Duration::from_secs(5),
        )
        .unwrap();
        let err = reporter
            .post_event(&StatusEvent::error("data collecting failed"))
            .await
            .unwrap_err();
        assert!(!err.to_string().contains("TOPSECRET"), "{err}");
    }

    #[tokio::test]
    async fn posts_summaries_to_the_data_channel() {
        let (base, request) = serve_once("200 OK").await;
        let reporter = HttpReporter::new(
            &base,
            Credentials::new(Some("s3cret".to_owned()), None),
            "error",
            "data",
            Duration::from_secs(5),
        )
        .unwrap();

        let summary = Summary {
            metrics: BTreeMap::from([
                (Box::from("temperature"), NotNan::new(25.0).unwrap()),
                (Box::from("pm10"), NotNan::new(12.5).unwrap()),
            ]),
            time: jiff::Timestamp::from_second(1_700_000_000).unwrap(),
        };
        reporter.post_summary(&summary).await.unwrap();

        let request = request.await.unwrap();
        assert!(request.starts_with("POST /data.json?auth=s3cret HTTP/1.1"));

        let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "temperature": 25.0,
                "pm10": 12.5,
                "time": 1_700_000_000.0,
            })
        );
    }

    fn decode_token(token: &str, secret: &str) -> TokenClaims {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        jsonwebtoken::decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .unwrap()
        .claims
    }

    #[test]
    fn user_token_carries_the_email() {
        let issued_at = jiff::Timestamp::from_second(1_700_000_000).unwrap();
        let token = sign_token("s3cret", "station@bluesense.example.com", issued_at).unwrap();

        let claims = decode_token(&token, "s3cret");
        assert_eq!(claims.v, 0);
        assert_eq!(claims.iat, 1_700_000_000);
        assert!(!claims.admin);
        assert_eq!(claims.d.email, "station@bluesense.example.com");
        assert_eq!(claims.d.provider, "password");
        assert!(!token.contains("s3cret"));
    }

    #[test]
    fn credentials_pick_the_strongest_available() {
        assert!(matches!(
            Credentials::new(None, Some("a@b.c".to_owned())),
            Credentials::Anonymous
        ));
        assert!(matches!(
            Credentials::new(Some("s".to_owned()), Some(String::new())),
            Credentials::Secret(_)
        ));
        assert!(matches!(
            Credentials::new(Some("s".to_owned()), Some("a@b.c".to_owned())),
            Credentials::User { .. }
        ));
    }

    #[tokio::test]
    async fn posts_with_a_signed_user_token() {
        let (base, request) = serve_once("200 OK").await;
        let reporter = HttpReporter::new(
            &base,
            Credentials::new(
                Some("s3cret".to_owned()),
                Some("station@bluesense.example.com".to_owned()),
            ),
            "error",
            "data",
            Duration::from_secs(5),
        )
        .unwrap();

        reporter
            .post_event(&StatusEvent::info("program started"))
            .await
            .unwrap();

        let request = request.await.unwrap();
        let request_line = request.lines().next().unwrap();
        assert!(request_line.starts_with("POST /error.json?auth="));
        assert!(!request_line.contains("s3cret"));

        let token = request_line
            .split_once("auth=")
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .unwrap();
        let claims = decode_token(token, "s3cret");
        assert_eq!(claims.d.email, "station@bluesense.example.com");
    }
}

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tokio::sync::{OnceCell, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracestash_core::config::Config;
use tracestash_core::{Result, TracestashError};

const SEARCH_PATH: &str = "/services/search/jobs";
const LOGIN_PATH: &str = "/services/auth/login";
const STREAM_PATH: &str = "/services/receivers/stream";
const RECORD_TERMINATOR: &[u8] = b"\r\n";
const STREAM_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub base_url: String,
    pub verify_tls: bool,
    pub request_timeout: Duration,
}

impl ClientSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            verify_tls: true,
            request_timeout: Duration::from_secs(11),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self {
            verify_tls: cfg.verify_tls,
            request_timeout: cfg.request_timeout,
            ..Self::new(cfg.base_url())
        }
    }
}

/// How the session authenticates.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    None,
    /// Pre-issued authentication token.
    Token(String),
    /// Exchanged once for a session key.
    Basic { username: String, password: String },
    /// Caller-supplied token, sent as a bearer unless it already names a scheme.
    Bearer(String),
}

impl Credential {
    pub fn from_config(cfg: &Config) -> Self {
        if let Some(token) = &cfg.token {
            return Self::Token(token.clone());
        }
        match cfg.basic_auth() {
            Some((username, password)) => Self::Basic {
                username: username.to_string(),
                password: password.to_string(),
            },
            None => Self::None,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Token(_) => f.write_str("Token(..)"),
            Self::Basic { username, .. } => write!(f, "Basic {{ username: {username:?}, .. }}"),
            Self::Bearer(_) => f.write_str("Bearer(..)"),
        }
    }
}

/// One result row keyed by field name. Multi-valued fields are joined with
/// `\n`, which is how `_raw` of a grouped transaction arrives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchRow(BTreeMap<String, String>);

impl SearchRow {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SearchRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

pub type SearchResults = Vec<SearchRow>;

struct Session {
    http: Client,
    authorization: Option<HeaderValue>,
}

impl Session {
    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.authorization {
            Some(value) => req.header(AUTHORIZATION, value.clone()),
            None => req,
        }
    }
}

/// Client for the remote search service. Construction does no I/O; the
/// session is opened on first use and reused afterwards.
pub struct SplunkClient {
    settings: ClientSettings,
    credential: Credential,
    session: OnceCell<Session>,
}

impl fmt::Debug for SplunkClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplunkClient")
            .field("settings", &self.settings)
            .field("credential", &self.credential)
            .field("connected", &self.session.initialized())
            .finish()
    }
}

impl SplunkClient {
    pub fn new(settings: ClientSettings, credential: Credential) -> Self {
        Self {
            settings,
            credential,
            session: OnceCell::new(),
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        self.session.initialized()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.settings.base_url)
    }

    /// Concurrent first callers share one attempt. A failed attempt is not
    /// cached.
    async fn session(&self) -> Result<&Session> {
        self.session.get_or_try_init(|| self.connect()).await
    }

    async fn connect(&self) -> Result<Session> {
        let http = Client::builder()
            .timeout(self.settings.request_timeout)
            .danger_accept_invalid_certs(!self.settings.verify_tls)
            .build()
            .map_err(|e| TracestashError::Connection(format!("building http client: {e}")))?;

        let scheme_value = match &self.credential {
            Credential::None => None,
            Credential::Token(token) => Some(format!("Splunk {token}")),
            Credential::Bearer(token) => {
                if token.starts_with("Splunk ") || token.starts_with("Bearer ") {
                    Some(token.clone())
                } else {
                    Some(format!("Bearer {token}"))
                }
            }
            Credential::Basic { username, password } => {
                let key = self.login(&http, username, password).await?;
                Some(format!("Splunk {key}"))
            }
        };

        let authorization = scheme_value
            .map(|v| {
                let mut value = HeaderValue::from_str(&v).map_err(|e| {
                    TracestashError::Connection(format!("invalid authorization header: {e}"))
                })?;
                value.set_sensitive(true);
                Ok::<_, TracestashError>(value)
            })
            .transpose()?;

        tracing::debug!(
            base_url = %self.settings.base_url,
            credential = ?self.credential,
            "search session established"
        );
        Ok(Session {
            http,
            authorization,
        })
    }

    async fn login(&self, http: &Client, username: &str, password: &str) -> Result<String> {
        let resp = http
            .post(self.url(LOGIN_PATH))
            .form(&[
                ("username", username),
                ("password", password),
                ("output_mode", "json"),
            ])
            .send()
            .await
            .map_err(|e| TracestashError::Connection(format!("login request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TracestashError::Connection(format!(
                "login rejected with {status}: {body}"
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| TracestashError::Connection(format!("invalid login response: {e}")))?;
        body.get("sessionKey")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TracestashError::Connection("login response has no sessionKey".into()))
    }

    /// Runs `query` as a one-shot search and returns its rows in engine order.
    pub async fn search(&self, query: &str) -> Result<SearchResults> {
        let session = self.session().await?;
        tracing::debug!(query = %query, "submitting search");

        let req = session.http.post(self.url(SEARCH_PATH)).form(&[
            ("exec_mode", "oneshot"),
            ("output_mode", "json"),
            ("count", "0"),
            ("search", query),
        ]);
        let resp = session
            .authorize(req)
            .send()
            .await
            .map_err(|e| TracestashError::Connection(format!("search request failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| TracestashError::Search(format!("reading search response: {e}")))?;
        if !status.is_success() {
            return Err(TracestashError::Search(format!(
                "search failed with {status}: {body}"
            )));
        }
        parse_results(&body)
    }

    /// Opens a streaming ingest request. Records written to the returned
    /// attachment are sent as they are produced.
    pub async fn attach(
        &self,
        index: &str,
        source: &str,
        source_type: &str,
    ) -> Result<Attachment> {
        let session = self.session().await?;
        let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(STREAM_BUFFER);

        let req = session
            .http
            .post(self.url(STREAM_PATH))
            .query(&[
                ("index", index),
                ("source", source),
                ("sourcetype", source_type),
            ])
            .header("x-splunk-input-mode", "streaming")
            .body(reqwest::Body::wrap_stream(ReceiverStream::new(rx)));
        let req = session.authorize(req);

        tracing::debug!(index, source, source_type, "attached ingest stream");
        Ok(Attachment {
            tx: Some(tx),
            response: tokio::spawn(async move { req.send().await }),
        })
    }

    /// Attach, write every record, finish.
    pub async fn write<I, R>(
        &self,
        index: &str,
        source: &str,
        source_type: &str,
        records: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[u8]>,
    {
        let mut attachment = self.attach(index, source, source_type).await?;
        for record in records {
            attachment.write(record.as_ref()).await?;
        }
        attachment.finish().await
    }
}

/// Open ingest stream. Each record is framed by a trailing CRLF.
pub struct Attachment {
    tx: Option<mpsc::Sender<std::io::Result<Bytes>>>,
    response: JoinHandle<reqwest::Result<reqwest::Response>>,
}

impl Attachment {
    pub async fn write(&mut self, record: &[u8]) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| TracestashError::Write("ingest stream already finished".into()))?;

        let mut framed = BytesMut::with_capacity(record.len() + RECORD_TERMINATOR.len());
        framed.put_slice(record);
        framed.put_slice(RECORD_TERMINATOR);
        tx.send(Ok(framed.freeze()))
            .await
            .map_err(|_| TracestashError::Write("ingest stream closed by the server".into()))
    }

    /// Closes the stream and waits for the server to acknowledge it.
    pub async fn finish(mut self) -> Result<()> {
        drop(self.tx.take());
        let resp = self
            .response
            .await
            .map_err(|e| TracestashError::Internal(format!("ingest task failed: {e}")))?
            .map_err(|e| TracestashError::Write(format!("ingest request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TracestashError::Write(format!(
                "ingest rejected with {status}: {body}"
            )));
        }
        Ok(())
    }
}

fn parse_results(body: &str) -> Result<SearchResults> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let parsed: Value = serde_json::from_str(body)
        .map_err(|e| TracestashError::Search(format!("invalid search response: {e}")))?;
    let results = parsed
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| TracestashError::Search("search response has no results".into()))?;

    results
        .iter()
        .map(|row| -> Result<SearchRow> {
            let obj = row.as_object().ok_or_else(|| {
                TracestashError::Search(format!("result row is not an object: {row}"))
            })?;
            Ok(obj
                .iter()
                .filter_map(|(k, v)| field_text(v).map(|text| (k.clone(), text)))
                .collect())
        })
        .collect()
}

fn field_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(field_text)
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rows_and_joins_multivalue_fields() {
        let body = r#"{"preview":false,"results":[
            {"_raw":["{\"a\":1}","{\"a\":2}"],"service.name":"api","callcount":3,"skip":null},
            {"name":"get"}
        ]}"#;
        let rows = parse_results(body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("_raw"), Some("{\"a\":1}\n{\"a\":2}"));
        assert_eq!(rows[0].get("callcount"), Some("3"));
        assert_eq!(rows[0].get("skip"), None);
        assert_eq!(rows[1].get("name"), Some("get"));
    }

    #[test]
    fn empty_body_means_no_rows() {
        assert!(parse_results("").unwrap().is_empty());
        assert!(parse_results("<html>").is_err());
        assert!(parse_results("{}").is_err());
    }

    #[test]
    fn credential_prefers_token() {
        let mut cfg = Config {
            username: Some("admin".into()),
            password: Some("changeme".into()),
            ..Config::default()
        };
        assert!(matches!(Credential::from_config(&cfg), Credential::Basic { .. }));
        cfg.token = Some("abc".into());
        assert_eq!(Credential::from_config(&cfg), Credential::Token("abc".into()));
        assert_eq!(format!("{:?}", Credential::Token("abc".into())), "Token(..)");
    }

    #[test]
    fn construction_is_lazy() {
        let client = SplunkClient::new(
            ClientSettings::new("https://localhost:8089/"),
            Credential::None,
        );
        assert!(!client.is_connected());
        assert_eq!(client.url(SEARCH_PATH), "https://localhost:8089/services/search/jobs");
    }
}

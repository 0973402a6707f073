use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Form, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

pub const SESSION_KEY: &str = "fake-session-key";

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRecord {
    pub text: String,
    pub exec_mode: Option<String>,
    pub output_mode: Option<String>,
    pub authorization: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamedBatch {
    pub params: HashMap<String, String>,
    pub input_mode: Option<String>,
    pub authorization: Option<String>,
    pub body: Vec<u8>,
}

impl StreamedBatch {
    /// Body split on the CRLF record terminator.
    pub fn records(&self) -> Vec<String> {
        let text = String::from_utf8_lossy(&self.body);
        let mut records: Vec<String> = text.split("\r\n").map(str::to_string).collect();
        if records.last().is_some_and(String::is_empty) {
            records.pop();
        }
        records
    }
}

#[derive(Default)]
struct Recorded {
    logins: Vec<(String, String)>,
    searches: Vec<SearchRecord>,
    streams: Vec<StreamedBatch>,
}

#[derive(Default)]
struct FakeState {
    recorded: Mutex<Recorded>,
    results: Mutex<VecDeque<Vec<Value>>>,
    failing_logins: AtomicUsize,
    failing_searches: AtomicUsize,
}

impl FakeState {
    fn record(&self, f: impl FnOnce(&mut Recorded)) {
        f(&mut self.recorded.lock().expect("fake state poisoned"));
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// In-process stand-in for the search service's REST endpoints. Records what
/// it receives and answers searches from a queue of canned result sets.
pub struct FakeSplunk {
    addr: SocketAddr,
    state: Arc<FakeState>,
    task: JoinHandle<()>,
}

impl FakeSplunk {
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(FakeState::default());
        let router = Router::new()
            .route("/services/auth/login", post(login))
            .route("/services/search/jobs", post(search))
            .route("/services/receivers/stream", post(stream))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Ok(Self { addr, state, task })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Rows for the next search. Searches past the queue get no rows.
    pub fn push_results(&self, rows: Vec<Value>) {
        self.state
            .results
            .lock()
            .expect("fake state poisoned")
            .push_back(rows);
    }

    pub fn fail_next_logins(&self, n: usize) {
        self.state.failing_logins.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_searches(&self, n: usize) {
        self.state.failing_searches.store(n, Ordering::SeqCst);
    }

    pub fn logins(&self) -> Vec<(String, String)> {
        self.state.recorded.lock().expect("fake state poisoned").logins.clone()
    }

    pub fn searches(&self) -> Vec<SearchRecord> {
        self.state.recorded.lock().expect("fake state poisoned").searches.clone()
    }

    pub fn streams(&self) -> Vec<StreamedBatch> {
        self.state.recorded.lock().expect("fake state poisoned").streams.clone()
    }
}

impl Drop for FakeSplunk {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn login(
    State(state): State<Arc<FakeState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let username = form.get("username").cloned().unwrap_or_default();
    let password = form.get("password").cloned().unwrap_or_default();
    state.record(|r| r.logins.push((username, password)));

    if take_failure(&state.failing_logins) {
        return (StatusCode::UNAUTHORIZED, "Login failed").into_response();
    }
    Json(json!({ "sessionKey": SESSION_KEY })).into_response()
}

async fn search(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let record = SearchRecord {
        text: form.get("search").cloned().unwrap_or_default(),
        exec_mode: form.get("exec_mode").cloned(),
        output_mode: form.get("output_mode").cloned(),
        authorization: header(&headers, AUTHORIZATION.as_str()),
    };
    state.record(|r| r.searches.push(record));

    if take_failure(&state.failing_searches) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "search failed").into_response();
    }
    let rows = state
        .results
        .lock()
        .expect("fake state poisoned")
        .pop_front()
        .unwrap_or_default();
    Json(json!({ "preview": false, "results": rows })).into_response()
}

async fn stream(
    State(state): State<Arc<FakeState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let batch = StreamedBatch {
        params,
        input_mode: header(&headers, "x-splunk-input-mode"),
        authorization: header(&headers, AUTHORIZATION.as_str()),
        body: body.to_vec(),
    };
    state.record(|r| r.streams.push(batch));
    StatusCode::OK
}

//! In-process queue server for integration tests
#![allow(dead_code)]

use axum::{
    Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    routing::{get, post},
};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use ocr_minion::client::HttpQueueClient;
use ocr_minion::config::{ClientConfig, HumanDuration, RetryConfig, WorkerIdentity};

pub const API_KEY: &str = "thisIsSecretApiKey";
pub const WORKER_LABEL: &str = "DockerXYZ";

/// One request as the server saw it
#[derive(Debug, Clone)]
pub struct Call {
    pub path: &'static str,
    pub query: HashMap<String, String>,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl Call {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

type Reply = (StatusCode, Bytes);

/// Scripted replies per endpoint, falling back to a default once exhausted
#[derive(Default)]
pub struct MockState {
    calls: Mutex<Vec<Call>>,
    replies: Mutex<HashMap<&'static str, VecDeque<Reply>>>,
}

impl MockState {
    fn next_reply(&self, path: &'static str) -> Reply {
        let scripted = self
            .replies
            .lock()
            .unwrap()
            .get_mut(path)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| default_reply(path))
    }

    fn record(&self, path: &'static str, query: HashMap<String, String>, headers: &HeaderMap, body: Bytes) {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.calls.lock().unwrap().push(Call {
            path,
            query,
            content_type,
            body,
        });
    }
}

fn default_reply(path: &'static str) -> Reply {
    match path {
        "gettask" => (
            StatusCode::from_u16(420).unwrap(),
            Bytes::from_static(br#"{"error":"empty queue","nextRequestInSec":10}"#),
        ),
        "getdata" => (StatusCode::OK, Bytes::from_static(b"\xff\xd8fake-jpeg\xff\xd9")),
        _ => (StatusCode::OK, Bytes::from_static(b"OK")),
    }
}

pub struct MockQueue {
    pub base: String,
    state: Arc<MockState>,
}

impl MockQueue {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/gettask.ashx", get(get_task))
            .route("/getdata.ashx", get(get_data))
            .route("/donetask.ashx", post(done_task))
            .route("/canceltask.ashx", get(cancel_task))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{}", addr),
            state,
        }
    }

    /// Queue a reply for `path` (gettask, getdata, donetask, canceltask)
    pub fn reply(&self, path: &'static str, status: u16, body: impl Into<Bytes>) {
        self.state
            .replies
            .lock()
            .unwrap()
            .entry(path)
            .or_default()
            .push_back((StatusCode::from_u16(status).unwrap(), body.into()));
    }

    pub fn task(&self, task_id: &str, filename: &str) {
        let body = format!(
            r#"{{"TaskId":"{}","Priority":5,"Intensity":0,"OrigFilename":"{}","localTempFile":null}}"#,
            task_id, filename
        );
        self.reply("gettask", 200, body);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.path == path).collect()
    }

    pub fn client(&self, demo: bool) -> HttpQueueClient {
        client_for(&self.base, demo)
    }
}

/// Client with short retry delays and the test identity
pub fn client_for(base: &str, demo: bool) -> HttpQueueClient {
    let config = ClientConfig {
        base_address: base.to_string(),
        demo,
        ..ClientConfig::default()
    };
    let retry = RetryConfig {
        max_retries: 2,
        network_error_delay: HumanDuration::from_millis(10),
        server_error_delay: HumanDuration::from_millis(10),
        ..RetryConfig::default()
    };
    HttpQueueClient::new(&config, &retry, WorkerIdentity::new(API_KEY, WORKER_LABEL)).unwrap()
}

/// Server that sends `200` headers and the start of a body, then goes quiet
pub async fn start_stalling_server() -> String {
    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = [0u8; 4096];
                let _ = socket.read(&mut request).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4096\r\n\r\n{\"TaskId\":")
                    .await;
                tokio::time::sleep(Duration::from_secs(3600)).await;
            });
        }
    });

    format!("http://{}", addr)
}

async fn get_task(
    State(state): State<Arc<MockState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Reply {
    state.record("gettask", query, &headers, Bytes::new());
    state.next_reply("gettask")
}

async fn get_data(
    State(state): State<Arc<MockState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Reply {
    state.record("getdata", query, &headers, Bytes::new());
    state.next_reply("getdata")
}

async fn done_task(
    State(state): State<Arc<MockState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Reply {
    state.record("donetask", query, &headers, body);
    state.next_reply("donetask")
}

async fn cancel_task(
    State(state): State<Arc<MockState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Reply {
    state.record("canceltask", query, &headers, Bytes::new());
    state.next_reply("canceltask")
}

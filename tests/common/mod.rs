// Shared test fixtures for integration tests
// Functions here are used across different test files
#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use gitarchive::blob::LocalBlobStore;
use gitarchive::model::{ObjectId, RefMap};
use gitarchive::protocol::advertisement::render_advertisement;
use gitarchive::protocol::{pktline, ProgressSink};
use gitarchive::repository::Database;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Create an in-memory test database
pub async fn create_test_db() -> Database {
    Database::new(":memory:").await.unwrap()
}

/// Create an in-memory database with the schema in place
pub async fn setup_db() -> Database {
    let db = create_test_db().await;
    db.init_schema().await.unwrap();
    db
}

/// Create a blob store rooted in a fresh temporary directory
pub async fn create_blob_store() -> (TempDir, LocalBlobStore) {
    let dir = TempDir::new().unwrap();
    let store = LocalBlobStore::open(dir.path()).await.unwrap();
    (dir, store)
}

/// Object id made of one repeated hex digit
pub fn oid(c: char) -> ObjectId {
    ObjectId::parse(&c.to_string().repeat(40)).unwrap()
}

pub fn refs(entries: &[(&str, char)]) -> RefMap {
    entries
        .iter()
        .map(|(name, c)| (name.to_string(), oid(*c)))
        .collect()
}

/// Side-band frame on `channel`
pub fn band(channel: u8, data: &[u8]) -> Bytes {
    pktline::encode(&[&[channel][..], data].concat())
}

/// Upload-pack response carrying `pack` on channel 1
pub fn pack_response(pack: &[u8]) -> Bytes {
    let mut body = vec![
        pktline::encode(b"NAK\n"),
        band(2, b"Enumerating objects: 3, done.\n"),
    ];
    for chunk in pack.chunks(1000) {
        body.push(band(1, chunk));
    }
    body.push(band(2, b"Total 3 (delta 0), reused 0 (delta 0)\n"));
    body.push(pktline::flush());
    body.concat().into()
}

/// Upload-pack response that dies with a channel-3 message mid-pack
pub fn fatal_response(msg: &str) -> Bytes {
    [
        pktline::encode(b"NAK\n"),
        band(1, b"PACK\0\0\0\x02"),
        band(3, msg.as_bytes()),
    ]
    .concat()
    .into()
}

/// Upload-pack response with no pack data at all
pub fn nak_only_response() -> Bytes {
    [pktline::encode(b"NAK\n"), pktline::flush()].concat().into()
}

/// What the fake remote serves for one repository
#[derive(Clone)]
pub struct RepoScript {
    pub advertisement: Bytes,
    pub upload_pack: Bytes,
}

#[derive(Default)]
pub struct RemoteState {
    repos: Mutex<HashMap<String, RepoScript>>,
    /// `(owner/repo, request body)` of every upload-pack POST, in order
    posts: Mutex<Vec<(String, Bytes)>>,
    /// Method, path and headers of every request, in order
    requests: Mutex<Vec<(Method, String, HeaderMap)>>,
}

/// In-process stand-in for a smart-HTTP git host
pub struct FakeRemote {
    pub base: String,
    state: Arc<RemoteState>,
}

impl FakeRemote {
    pub async fn start() -> Self {
        let state = Arc::new(RemoteState::default());
        let app = Router::new().fallback(handle).with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            state,
        }
    }

    /// Serve `refs` for `name`, answering upload-pack with `upload_pack`
    pub fn serve(&self, name: &str, refs: &RefMap, upload_pack: Bytes) {
        let advertisement = render_advertisement(refs, "multi_ack thin-pack side-band-64k ofs-delta");
        self.serve_raw(name, advertisement, upload_pack);
    }

    pub fn serve_raw(&self, name: &str, advertisement: Bytes, upload_pack: Bytes) {
        self.state.repos.lock().unwrap().insert(
            name.to_string(),
            RepoScript {
                advertisement,
                upload_pack,
            },
        );
    }

    pub fn url(&self, name: &str) -> String {
        format!("{}/{}.git", self.base, name)
    }

    pub fn posts(&self) -> Vec<(String, Bytes)> {
        self.state.posts.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<(Method, String, HeaderMap)> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Body of the most recent upload-pack POST, as text
    pub fn last_post(&self) -> String {
        let posts = self.posts();
        let (_, body) = posts.last().expect("no upload-pack request was made");
        String::from_utf8(body.to_vec()).unwrap()
    }
}

// Dispatches on the path the way a git host does:
// /{owner}/{repo}.git/info/refs and /{owner}/{repo}.git/git-upload-pack
async fn handle(
    State(state): State<Arc<RemoteState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state
        .requests
        .lock()
        .unwrap()
        .push((method.clone(), uri.path().to_string(), headers));
    let path = uri.path().trim_start_matches('/');

    if let Some(repo) = path.strip_suffix(".git/info/refs") {
        if method != Method::GET || uri.query() != Some("service=git-upload-pack") {
            return StatusCode::BAD_REQUEST.into_response();
        }
        let Some(script) = state.repos.lock().unwrap().get(repo).cloned() else {
            return StatusCode::NOT_FOUND.into_response();
        };
        return (
            [("content-type", "application/x-git-upload-pack-advertisement")],
            script.advertisement,
        )
            .into_response();
    }

    if let Some(repo) = path.strip_suffix(".git/git-upload-pack") {
        if method != Method::POST {
            return StatusCode::METHOD_NOT_ALLOWED.into_response();
        }
        let Some(script) = state.repos.lock().unwrap().get(repo).cloned() else {
            return StatusCode::NOT_FOUND.into_response();
        };
        state.posts.lock().unwrap().push((repo.to_string(), body));
        return (
            [("content-type", "application/x-git-upload-pack-result")],
            script.upload_pack,
        )
            .into_response();
    }

    StatusCode::NOT_FOUND.into_response()
}

/// Remote that advertises `advertisement`, then answers upload-pack with
/// response headers and a NAK and never sends the rest of the body
pub async fn start_stalled_remote(advertisement: Bytes) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_stalled(stream, advertisement.clone()));
        }
    });
    format!("http://{addr}")
}

async fn serve_stalled(mut stream: TcpStream, advertisement: Bytes) {
    let mut head = Vec::new();
    let mut buf = [0u8; 4096];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }

    if head.starts_with(b"GET ") {
        let header = format!(
            "HTTP/1.1 200 OK\r\n\
             content-type: application/x-git-upload-pack-advertisement\r\n\
             content-length: {}\r\n\
             connection: close\r\n\r\n",
            advertisement.len()
        );
        let _ = stream.write_all(header.as_bytes()).await;
        let _ = stream.write_all(&advertisement).await;
        return;
    }

    let header = "HTTP/1.1 200 OK\r\n\
                  content-type: application/x-git-upload-pack-result\r\n\
                  content-length: 100000\r\n\r\n";
    let _ = stream.write_all(header.as_bytes()).await;
    let _ = stream.write_all(&pktline::encode(b"NAK\n")).await;
    // Hold the connection open without sending anything more
    tokio::time::sleep(Duration::from_secs(300)).await;
    drop(stream);
}

/// Progress sink that keeps everything it is sent
#[derive(Default)]
pub struct CollectProgress {
    pub text: Mutex<Vec<u8>>,
    pub finished: Mutex<bool>,
}

impl ProgressSink for CollectProgress {
    fn message(&self, text: &[u8]) {
        self.text.lock().unwrap().extend_from_slice(text);
    }

    fn finish(&self) {
        *self.finished.lock().unwrap() = true;
    }
}

impl CollectProgress {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.text.lock().unwrap()).into_owned()
    }
}

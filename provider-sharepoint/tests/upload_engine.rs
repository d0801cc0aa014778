//! Upload engine against an in-memory Graph that keeps a folder tree and
//! upload sessions.

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bytes::Bytes;
use core_auth::{AccessTokenProvider, Result as AuthResult};
use core_publish::{BatchOptions, BatchOrchestrator, ConflictBehavior, Document};
use provider_sharepoint::{
    GraphClient, GraphError, ResolvedRepository, UploadEngine, SIMPLE_UPLOAD_LIMIT,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const BASE: &str = "https://graph.test/v1.0";
const UPLOAD_URL: &str = "https://upload.test/session/1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ChunkFault {
    #[default]
    None,
    ItemOnFirstChunk,
    FinalChunkAccepted,
}

#[derive(Default)]
struct FakeGraph {
    folders: Mutex<HashSet<String>>,
    files: Mutex<HashSet<String>>,
    folder_gets: AtomicUsize,
    folder_creates: AtomicUsize,
    simple_uploads: AtomicUsize,
    session_creates: AtomicUsize,
    chunk_puts: AtomicUsize,
    session_deletes: AtomicUsize,
    ranges: Mutex<Vec<String>>,
    unauthenticated_chunks: AtomicUsize,
    patches: Mutex<Vec<Value>>,
    conflict_on_create: bool,
    chunk_fault: ChunkFault,
}

fn item(id: &str, name: &str, size: usize) -> HttpResponse {
    HttpResponse::new(
        201,
        json!({ "id": id, "name": name, "size": size, "webUrl": format!("https://contoso.test/Docs/{}", name) })
            .to_string(),
    )
}

fn decode(path: &str) -> String {
    urlencoding::decode(path).map(|p| p.into_owned()).unwrap_or_default()
}

impl FakeGraph {
    async fn handle_chunk(&self, request: &HttpRequest) -> HttpResponse {
        self.chunk_puts.fetch_add(1, Ordering::SeqCst);
        if request.header_value("Authorization").is_none() {
            self.unauthenticated_chunks.fetch_add(1, Ordering::SeqCst);
        }

        let range = request.header_value("Content-Range").unwrap_or_default().to_string();
        self.ranges.lock().unwrap().push(range.clone());

        // bytes {start}-{end}/{total}
        let (span, total) = range.trim_start_matches("bytes ").split_once('/').unwrap();
        let (start, end) = span.split_once('-').unwrap();
        let (start, end, total): (usize, usize, usize) =
            (start.parse().unwrap(), end.parse().unwrap(), total.parse().unwrap());
        assert_eq!(request.body_len(), end - start + 1);

        let is_final = end + 1 == total;
        match (self.chunk_fault, is_final) {
            (ChunkFault::ItemOnFirstChunk, _) if start == 0 => item("big-item", "bigdoc.md", total),
            (ChunkFault::FinalChunkAccepted, true) => HttpResponse::new(
                202,
                json!({ "nextExpectedRanges": [format!("{}-", end + 1)] }).to_string(),
            ),
            (_, true) => item("big-item", "bigdoc.md", total),
            (_, false) => HttpResponse::new(
                202,
                json!({
                    "expirationDateTime": "2030-01-01T00:00:00Z",
                    "nextExpectedRanges": [format!("{}-", end + 1)]
                })
                .to_string(),
            ),
        }
    }
}

#[async_trait]
impl HttpClient for FakeGraph {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        if request.url.starts_with(UPLOAD_URL) {
            return Ok(match request.method {
                HttpMethod::Put => self.handle_chunk(&request).await,
                HttpMethod::Delete => {
                    self.session_deletes.fetch_add(1, Ordering::SeqCst);
                    HttpResponse::new(204, "")
                }
                _ => HttpResponse::new(405, ""),
            });
        }

        assert_eq!(
            request.header_value("Authorization"),
            Some("Bearer graph-token"),
            "Graph calls must carry the current token"
        );
        let path = request
            .url
            .strip_prefix(&format!("{}/drives/d1", BASE))
            .expect("drive-scoped url")
            .to_string();

        let response = match request.method {
            HttpMethod::Get => {
                self.folder_gets.fetch_add(1, Ordering::SeqCst);
                let target = decode(path.trim_start_matches("/root:/").trim_end_matches(':'));
                if self.folders.lock().unwrap().contains(&target) {
                    HttpResponse::new(200, json!({ "id": target, "name": target, "folder": {} }).to_string())
                } else if self.files.lock().unwrap().contains(&target) {
                    HttpResponse::new(200, json!({ "id": target, "name": target, "file": {} }).to_string())
                } else {
                    HttpResponse::new(404, r#"{"error":{"code":"itemNotFound","message":"missing"}}"#)
                }
            }
            HttpMethod::Post if path.ends_with("/children") => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let body: Value = serde_json::from_slice(request.body.as_deref().unwrap()).unwrap();
                assert_eq!(body["@microsoft.graph.conflictBehavior"], "fail");
                let name = body["name"].as_str().unwrap().to_string();
                let parent = if path == "/root/children" {
                    String::new()
                } else {
                    decode(
                        path.trim_start_matches("/root:/")
                            .trim_end_matches(":/children"),
                    )
                };
                let full = if parent.is_empty() { name } else { format!("{}/{}", parent, name) };

                if self.conflict_on_create {
                    self.folders.lock().unwrap().insert(full);
                    HttpResponse::new(409, r#"{"error":{"code":"nameAlreadyExists","message":"exists"}}"#)
                } else {
                    self.folder_creates.fetch_add(1, Ordering::SeqCst);
                    let created = self.folders.lock().unwrap().insert(full.clone());
                    assert!(created, "duplicate create for {}", full);
                    HttpResponse::new(201, json!({ "id": full, "name": full, "folder": {} }).to_string())
                }
            }
            HttpMethod::Post if path.ends_with(":/createUploadSession") => {
                self.session_creates.fetch_add(1, Ordering::SeqCst);
                HttpResponse::new(
                    200,
                    json!({ "uploadUrl": UPLOAD_URL, "nextExpectedRanges": ["0-"] }).to_string(),
                )
            }
            HttpMethod::Put if path.contains(":/content?") => {
                self.simple_uploads.fetch_add(1, Ordering::SeqCst);
                let target = decode(path.trim_start_matches("/root:/").split(":/content").next().unwrap());
                self.files.lock().unwrap().insert(target.clone());
                let name = target.rsplit('/').next().unwrap().to_string();
                item(&format!("item-{}", name), &name, request.body_len())
            }
            HttpMethod::Patch if path.ends_with("/listItem/fields") => {
                let body: Value = serde_json::from_slice(request.body.as_deref().unwrap()).unwrap();
                self.patches.lock().unwrap().push(body.clone());
                HttpResponse::new(200, body.to_string())
            }
            _ => HttpResponse::new(400, format!("unexpected {} {}", request.method.as_str(), path)),
        };
        Ok(response)
    }
}

struct StaticTokens;

#[async_trait]
impl AccessTokenProvider for StaticTokens {
    async fn access_token(&self) -> AuthResult<String> {
        Ok("graph-token".to_string())
    }

    async fn refresh_after_rejection(&self, _rejected_token: &str) -> AuthResult<String> {
        Ok("graph-token".to_string())
    }
}

fn engine(graph: Arc<FakeGraph>) -> Arc<UploadEngine> {
    let client = GraphClient::new(graph, Arc::new(StaticTokens)).with_base_url(BASE);
    Arc::new(UploadEngine::new(
        Arc::new(client),
        ResolvedRepository {
            site_id: "s1".to_string(),
            drive_id: "d1".to_string(),
            drive_name: "Documents".to_string(),
            site_url: None,
            used_default_drive: false,
        },
    ))
}

fn payload(len: usize) -> Bytes {
    Bytes::from(vec![b'a'; len])
}

#[tokio::test]
async fn test_ensure_folder_twice_creates_once() {
    let graph = Arc::new(FakeGraph::default());
    let engine = engine(graph.clone());

    engine.ensure_folder("Reports").await.unwrap();
    engine.ensure_folder("Reports").await.unwrap();
    engine.ensure_folder("/Reports/").await.unwrap();

    assert_eq!(graph.folder_creates.load(Ordering::SeqCst), 1);
    // Memoised after the first call.
    assert_eq!(graph.folder_gets.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_ensure_folder_walks_segments_and_reuses_existing() {
    let graph = Arc::new(FakeGraph::default());
    graph.folders.lock().unwrap().insert("Published".to_string());
    let engine = engine(graph.clone());

    engine.ensure_folder("Published/2024 Q1/Board").await.unwrap();

    assert_eq!(graph.folder_creates.load(Ordering::SeqCst), 2);
    let folders = graph.folders.lock().unwrap().clone();
    assert!(folders.contains("Published/2024 Q1"));
    assert!(folders.contains("Published/2024 Q1/Board"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ensure_folder_never_duplicates() {
    let graph = Arc::new(FakeGraph::default());
    let engine = engine(graph.clone());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move { engine.ensure_folder("Team/Specs").await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(graph.folder_creates.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_conflict_on_create_is_accepted() {
    let graph = Arc::new(FakeGraph {
        conflict_on_create: true,
        ..Default::default()
    });
    let engine = engine(graph.clone());

    engine.ensure_folder("Shared").await.unwrap();
    assert_eq!(graph.folder_creates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_file_in_the_way_of_a_folder_is_an_error() {
    let graph = Arc::new(FakeGraph::default());
    graph.files.lock().unwrap().insert("Notes".to_string());
    let engine = engine(graph);

    let err = engine.ensure_folder("Notes/2024").await.unwrap_err();
    assert!(matches!(err, GraphError::Conflict(_)));
}

#[tokio::test]
async fn test_upload_routing_is_threshold_exact() {
    let graph = Arc::new(FakeGraph::default());
    let engine = engine(graph.clone());

    for size in [SIMPLE_UPLOAD_LIMIT - 1, SIMPLE_UPLOAD_LIMIT] {
        engine
            .upload("edge.bin", payload(size), "", ConflictBehavior::Replace)
            .await
            .unwrap();
    }
    assert_eq!(graph.simple_uploads.load(Ordering::SeqCst), 2);
    assert_eq!(graph.session_creates.load(Ordering::SeqCst), 0);

    engine
        .upload("edge.bin", payload(SIMPLE_UPLOAD_LIMIT + 1), "", ConflictBehavior::Replace)
        .await
        .unwrap();
    assert_eq!(graph.simple_uploads.load(Ordering::SeqCst), 2);
    assert_eq!(graph.session_creates.load(Ordering::SeqCst), 1);
    // 4 MiB + 1 byte is twelve full chunks and one partial one.
    assert_eq!(graph.chunk_puts.load(Ordering::SeqCst), 13);
}

#[tokio::test]
async fn test_ten_mebibytes_upload_in_thirty_two_chunks() {
    let graph = Arc::new(FakeGraph::default());
    let engine = engine(graph.clone());
    let total = 10 * 1024 * 1024;

    let item = engine
        .upload("bigdoc.md", payload(total), "Archive", ConflictBehavior::Rename)
        .await
        .unwrap();

    assert_eq!(item.id, "big-item");
    assert_eq!(graph.session_creates.load(Ordering::SeqCst), 1);
    assert_eq!(graph.chunk_puts.load(Ordering::SeqCst), 32);
    assert_eq!(graph.unauthenticated_chunks.load(Ordering::SeqCst), 32);

    let ranges = graph.ranges.lock().unwrap().clone();
    assert_eq!(ranges[0], "bytes 0-327679/10485760");
    assert_eq!(ranges[31], "bytes 10158080-10485759/10485760");
}

#[tokio::test]
async fn test_item_on_intermediate_chunk_is_incomplete() {
    let graph = Arc::new(FakeGraph {
        chunk_fault: ChunkFault::ItemOnFirstChunk,
        ..Default::default()
    });
    let engine = engine(graph.clone());

    let err = engine
        .upload("bigdoc.md", payload(SIMPLE_UPLOAD_LIMIT * 2), "", ConflictBehavior::Rename)
        .await
        .unwrap_err();

    assert!(matches!(err, GraphError::IncompleteUpload(_)));
    assert_eq!(graph.chunk_puts.load(Ordering::SeqCst), 1);
    assert_eq!(graph.session_deletes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_accepted_final_chunk_is_incomplete() {
    let graph = Arc::new(FakeGraph {
        chunk_fault: ChunkFault::FinalChunkAccepted,
        ..Default::default()
    });
    let engine = engine(graph.clone());

    let err = engine
        .upload("bigdoc.md", payload(SIMPLE_UPLOAD_LIMIT + 10), "", ConflictBehavior::Rename)
        .await
        .unwrap_err();

    assert!(matches!(err, GraphError::IncompleteUpload(ref m) if m.contains("final chunk")));
    assert_eq!(graph.session_deletes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_metadata_patch_carries_fields_and_tags() {
    let graph = Arc::new(FakeGraph::default());
    let engine = engine(graph.clone());

    let mut metadata = BTreeMap::new();
    metadata.insert("Title".to_string(), Value::from("Quarterly report"));
    engine
        .attach_metadata("item-1", &metadata, &["finance".to_string(), "q1".to_string()])
        .await
        .unwrap();

    let patches = graph.patches.lock().unwrap().clone();
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0]["Title"], "Quarterly report");
    assert_eq!(patches[0]["Tags"], "finance;q1");
}

#[tokio::test]
async fn test_two_mebibyte_document_is_one_simple_upload() {
    let graph = Arc::new(FakeGraph::default());
    let engine = engine(graph.clone());
    let orchestrator = BatchOrchestrator::new(engine, BatchOptions::default().with_concurrency(1));

    let document = Document::new("readme.md", payload(2 * 1024 * 1024), "");
    let summary = orchestrator.publish(vec![document]).await;

    assert_eq!(graph.simple_uploads.load(Ordering::SeqCst), 1);
    assert_eq!(graph.session_creates.load(Ordering::SeqCst), 0);
    let result = &summary.results[0];
    assert!(result.success);
    assert_eq!(result.file_name, "readme.md");
    assert_eq!(result.remote_id.as_deref(), Some("item-readme.md"));
}

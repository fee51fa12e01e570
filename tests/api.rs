use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use pgtq::backend::Backend;
use pgtq::models::{State, TaskResult, TaskState};
use pgtq::publisher::Publisher;
use pgtq::routes::tasks::TaskResponse;
use pgtq::routes::{routes, Api};
use pgtq::store::{MemoryTaskStore, TaskStore};
use serde_json::{json, Value};

fn serve(store: Arc<MemoryTaskStore>) -> SocketAddr {
  let api = Api::new(
    Publisher::new(store.clone()),
    Backend::new(store).with_read_delay(Duration::ZERO),
  )
  .with_sse_interval(Duration::from_millis(10));
  let (addr, server) = warp::serve(routes(api)).bind_ephemeral(([127, 0, 0, 1], 0));
  tokio::spawn(server);
  addr
}

#[tokio::test]
async fn submit_then_read_state() {
  let store = Arc::new(MemoryTaskStore::new());
  let addr = serve(store.clone());
  let client = reqwest::Client::new();

  let response = client
    .post(format!("http://{}/tasks", addr))
    .json(&json!({"id": "t1", "name": "add", "args": [{"type": "int64", "value": 1}]}))
    .send()
    .await
    .unwrap();
  assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
  let body: TaskResponse = response.json().await.unwrap();
  assert_eq!(body.task_id, "t1");
  assert_eq!(body.sse_url, "/sse?task_id=t1");

  let state: TaskState = client
    .get(format!("http://{}/tasks/t1/state", addr))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
  assert_eq!(state.state, State::Pending);

  let pending: Vec<Value> = client
    .get(format!("http://{}/tasks/pending?names=add,mul", addr))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
  assert_eq!(pending.len(), 1);
  assert_eq!(pending[0]["args"][0]["type"], "int64");
}

#[tokio::test]
async fn submit_generates_ids_and_rejects_unsafe_names() {
  let store = Arc::new(MemoryTaskStore::new());
  let addr = serve(store.clone());
  let client = reqwest::Client::new();

  let body: TaskResponse = client
    .post(format!("http://{}/tasks", addr))
    .json(&json!({"name": "echo"}))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
  assert!(uuid::Uuid::parse_str(&body.task_id).is_ok());

  let rejected = client
    .post(format!("http://{}/tasks", addr))
    .json(&json!({"name": "rm -rf"}))
    .send()
    .await
    .unwrap();
  assert_eq!(rejected.status(), reqwest::StatusCode::BAD_REQUEST);
  assert_eq!(store.snapshot().len(), 1);
}

#[tokio::test]
async fn unknown_task_is_404_and_purge_removes() {
  let store = Arc::new(MemoryTaskStore::new());
  let addr = serve(store.clone());
  let client = reqwest::Client::new();

  let missing = client.get(format!("http://{}/tasks/nope/state", addr)).send().await.unwrap();
  assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

  client
    .post(format!("http://{}/tasks", addr))
    .json(&json!({"id": "t1", "name": "add"}))
    .send()
    .await
    .unwrap();
  let purged = client.delete(format!("http://{}/tasks/t1", addr)).send().await.unwrap();
  assert_eq!(purged.status(), reqwest::StatusCode::NO_CONTENT);
  assert!(store.snapshot().is_empty());
}

#[tokio::test]
async fn group_lifecycle() {
  let store = Arc::new(MemoryTaskStore::new());
  let addr = serve(store.clone());
  let client = reqwest::Client::new();

  let init = client
    .post(format!("http://{}/groups/g1", addr))
    .json(&json!({"task_ids": ["a", "b"]}))
    .send()
    .await
    .unwrap();
  assert_eq!(init.status(), reqwest::StatusCode::NO_CONTENT);

  let completed: Value = client
    .get(format!("http://{}/groups/g1/completed?count=2", addr))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
  assert_eq!(completed["completed"], false);

  let done = serde_json::to_value(vec![TaskResult { kind: "bool".into(), value: json!(true) }]).unwrap();
  store.set_success("a", &done).await.unwrap();
  store.set_success("b", &done).await.unwrap();

  let completed: Value = client
    .get(format!("http://{}/groups/g1/completed?count=2", addr))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
  assert_eq!(completed["completed"], true);

  let states: Vec<TaskState> = client
    .get(format!("http://{}/groups/g1/states?count=2", addr))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
  assert_eq!(states.len(), 2);
  assert!(states.iter().all(|s| s.state == State::Success));

  let purged = client.delete(format!("http://{}/groups/g1", addr)).send().await.unwrap();
  assert_eq!(purged.status(), reqwest::StatusCode::NO_CONTENT);
  assert!(store.snapshot().is_empty());
}

#[tokio::test]
async fn sse_streams_until_terminal_state() {
  let store = Arc::new(MemoryTaskStore::new());
  let addr = serve(store.clone());
  let client = reqwest::Client::new();

  client
    .post(format!("http://{}/tasks", addr))
    .json(&json!({"id": "t1", "name": "add"}))
    .send()
    .await
    .unwrap();

  let finisher = {
    let store = store.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(50)).await;
      store.set_failure("t1", "boom").await.unwrap();
    })
  };

  let body = tokio::time::timeout(Duration::from_secs(5), async {
    client
      .get(format!("http://{}/sse?task_id=t1", addr))
      .send()
      .await
      .unwrap()
      .text()
      .await
      .unwrap()
  })
  .await
  .unwrap();
  finisher.await.unwrap();

  assert!(body.contains("\"state\":\"PENDING\""));
  assert!(body.contains("\"state\":\"FAILURE\""));
  assert!(body.contains("boom"));
}

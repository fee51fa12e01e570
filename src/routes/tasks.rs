use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::LazyLock;
use tracing::{error, info};
use uuid::Uuid;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Reply};
use crate::models::{TaskArg, TaskSignature};
use super::{error_reply, json_reply, with_api, Api};

static IDENTIFIER: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^[\w.:-]+$").expect("identifier pattern is valid"));

#[derive(Debug, Deserialize)]
pub struct NewTask {
  pub id: Option<String>,
  pub name: String,
  pub group_id: Option<String>,
  #[serde(default)]
  pub args: Vec<TaskArg>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskResponse {
  pub task_id: String,
  pub status: String,
  pub sse_url: String,
}

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
  pub names: String,
}

fn is_identifier(input: &str) -> bool {
  IDENTIFIER.is_match(input)
}

fn validate(task: &NewTask) -> Result<(), String> {
  if !is_identifier(&task.name) {
    return Err("Invalid or unsafe 'name'".into());
  }
  if task.id.as_deref().is_some_and(|id| !is_identifier(id)) {
    return Err("Invalid or unsafe 'id'".into());
  }
  if task.group_id.as_deref().is_some_and(|id| !is_identifier(id)) {
    return Err("Invalid or unsafe 'group_id'".into());
  }
  Ok(())
}

pub fn task_routes(api: Api) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
  let submit = warp::path!("tasks")
    .and(warp::post())
    .and(warp::body::json())
    .and(with_api(api.clone()))
    .and_then(handle_submit);

  let pending = warp::path!("tasks" / "pending")
    .and(warp::get())
    .and(warp::query::<PendingQuery>())
    .and(with_api(api.clone()))
    .and_then(handle_pending);

  let state = warp::path!("tasks" / String / "state")
    .and(warp::get())
    .and(with_api(api.clone()))
    .and_then(handle_state);

  let purge = warp::path!("tasks" / String)
    .and(warp::delete())
    .and(with_api(api))
    .and_then(handle_purge);

  submit.or(pending).or(state).or(purge)
}

async fn handle_submit(new_task: NewTask, api: Api) -> Result<Response, Infallible> {
  if let Err(e) = validate(&new_task) {
    error!("Task validation failed: {}", e);
    return Ok(json_reply(&json!({ "error": e }), StatusCode::BAD_REQUEST));
  }

  let task = TaskSignature {
    id: new_task.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
    name: new_task.name,
    group_id: new_task.group_id,
    args: new_task.args,
  };
  if let Err(e) = api.publisher.publish(&task).await {
    error!("Failed to publish task {}: {}", task.id, e);
    return Ok(error_reply(&e));
  }

  info!("Task {} submitted successfully", task.id);
  let response = TaskResponse {
    sse_url: format!("/sse?task_id={}", task.id),
    task_id: task.id,
    status: "submitted".into(),
  };
  Ok(json_reply(&response, StatusCode::ACCEPTED))
}

async fn handle_pending(query: PendingQuery, api: Api) -> Result<Response, Infallible> {
  let names: Vec<String> = query
    .names
    .split(',')
    .map(str::trim)
    .filter(|name| !name.is_empty())
    .map(String::from)
    .collect();
  match api.publisher.get_pending_tasks(&names).await {
    Ok(tasks) => Ok(json_reply(&tasks, StatusCode::OK)),
    Err(e) => Ok(error_reply(&e)),
  }
}

async fn handle_state(task_id: String, api: Api) -> Result<Response, Infallible> {
  match api.backend.get_state(&task_id).await {
    Ok(state) => Ok(json_reply(&state, StatusCode::OK)),
    Err(e) => Ok(error_reply(&e)),
  }
}

async fn handle_purge(task_id: String, api: Api) -> Result<Response, Infallible> {
  match api.backend.purge_state(&task_id).await {
    Ok(()) => Ok(StatusCode::NO_CONTENT.into_response()),
    Err(e) => Ok(error_reply(&e)),
  }
}

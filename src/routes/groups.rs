use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Reply};
use super::{error_reply, json_reply, with_api, Api};

#[derive(Debug, Deserialize)]
pub struct InitGroup {
  pub task_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct GroupQuery {
  pub count: usize,
}

pub fn group_routes(api: Api) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
  let init = warp::path!("groups" / String)
    .and(warp::post())
    .and(warp::body::json())
    .and(with_api(api.clone()))
    .and_then(handle_init);

  let states = warp::path!("groups" / String / "states")
    .and(warp::get())
    .and(warp::query::<GroupQuery>())
    .and(with_api(api.clone()))
    .and_then(handle_states);

  let completed = warp::path!("groups" / String / "completed")
    .and(warp::get())
    .and(warp::query::<GroupQuery>())
    .and(with_api(api.clone()))
    .and_then(handle_completed);

  let purge = warp::path!("groups" / String)
    .and(warp::delete())
    .and(with_api(api))
    .and_then(handle_purge);

  init.or(states).or(completed).or(purge)
}

async fn handle_init(group_id: String, body: InitGroup, api: Api) -> Result<Response, Infallible> {
  match api.backend.init_group(&group_id, &body.task_ids).await {
    Ok(()) => Ok(StatusCode::NO_CONTENT.into_response()),
    Err(e) => Ok(error_reply(&e)),
  }
}

async fn handle_states(group_id: String, query: GroupQuery, api: Api) -> Result<Response, Infallible> {
  match api.backend.group_states(&group_id, query.count).await {
    Ok(states) => Ok(json_reply(&states, StatusCode::OK)),
    Err(e) => Ok(error_reply(&e)),
  }
}

async fn handle_completed(group_id: String, query: GroupQuery, api: Api) -> Result<Response, Infallible> {
  match api.backend.group_completed(&group_id, query.count).await {
    Ok(completed) => Ok(json_reply(&json!({ "group_id": group_id, "completed": completed }), StatusCode::OK)),
    Err(e) => Ok(error_reply(&e)),
  }
}

async fn handle_purge(group_id: String, api: Api) -> Result<Response, Infallible> {
  match api.backend.purge_group_meta(&group_id).await {
    Ok(()) => Ok(StatusCode::NO_CONTENT.into_response()),
    Err(e) => Ok(error_reply(&e)),
  }
}

use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Reply};
use crate::backend::Backend;
use crate::error::QueueError;
use crate::publisher::Publisher;

pub mod groups;
pub mod sse;
pub mod tasks;

/// Handles the HTTP layer needs: enqueueing and state reads.
#[derive(Clone)]
pub struct Api {
  pub publisher: Publisher,
  pub backend: Backend,
  pub sse_interval: Duration,
}

impl Api {
  pub fn new(publisher: Publisher, backend: Backend) -> Self {
    Self {
      publisher,
      backend,
      sse_interval: Duration::from_secs(2),
    }
  }

  pub fn with_sse_interval(mut self, sse_interval: Duration) -> Self {
    self.sse_interval = sse_interval;
    self
  }
}

pub fn routes(api: Api) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
  tasks::task_routes(api.clone())
    .or(groups::group_routes(api.clone()))
    .or(sse::sse_route(api))
}

pub(crate) fn with_api(api: Api) -> impl Filter<Extract = (Api,), Error = Infallible> + Clone {
  warp::any().map(move || api.clone())
}

pub(crate) fn json_reply<T: Serialize>(value: &T, status: StatusCode) -> Response {
  warp::reply::with_status(warp::reply::json(value), status).into_response()
}

pub(crate) fn error_reply(err: &QueueError) -> Response {
  let status = match err {
    QueueError::NotFound { .. } => StatusCode::NOT_FOUND,
    QueueError::Connectivity { .. } => StatusCode::SERVICE_UNAVAILABLE,
    QueueError::Serialization { .. } => StatusCode::BAD_REQUEST,
    QueueError::Constraint { .. } => StatusCode::CONFLICT,
    _ => StatusCode::INTERNAL_SERVER_ERROR,
  };
  json_reply(&json!({ "error": err.to_string() }), status)
}

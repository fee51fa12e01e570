use futures::stream;
use serde::Deserialize;
use std::convert::Infallible;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::warn;
use warp::sse::Event;
use warp::{Filter, Reply};
use crate::error::QueueError;
use crate::models::TaskState;
use super::{with_api, Api};

#[derive(Debug, Deserialize)]
pub struct SseQuery {
  pub task_id: String,
}

pub fn sse_route(api: Api) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
  warp::path("sse")
    .and(warp::path::end())
    .and(warp::get())
    .and(warp::query::<SseQuery>())
    .and(with_api(api))
    .and_then(handle_sse)
}

fn state_event(state: &TaskState) -> Event {
  Event::default()
    .event("state")
    .json_data(state)
    .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

fn error_event(err: &QueueError) -> Event {
  Event::default().event("error").data(err.to_string())
}

/// Streams the task's state on every tick and ends once it is terminal.
async fn handle_sse(query: SseQuery, api: Api) -> Result<impl Reply, Infallible> {
  let mut ticker = interval(api.sse_interval);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

  let events = stream::unfold(Some(ticker), move |ticker: Option<Interval>| {
    let backend = api.backend.clone();
    let task_id = query.task_id.clone();
    async move {
      let mut ticker = ticker?;
      ticker.tick().await;
      match backend.get_state(&task_id).await {
        Ok(state) => {
          let next = if state.state.is_terminal() { None } else { Some(ticker) };
          Some((Ok::<_, Infallible>(state_event(&state)), next))
        }
        Err(e) => {
          warn!("Stopping state stream for task {}: {}", task_id, e);
          Some((Ok(error_event(&e)), None))
        }
      }
    }
  });

  Ok(warp::sse::reply(warp::sse::keep_alive().stream(events)))
}

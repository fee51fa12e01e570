use anyhow::{anyhow, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use crate::dispatcher::{TaskErrorPolicy, DEFAULT_MAX_PARALLEL_TASKS};

#[derive(Debug, Clone)]
pub struct Config {
  pub database_url: String,
  pub server_port: u16,
  pub worker_id: String,
  pub registered_tasks: Vec<String>,
  pub max_parallel_tasks: usize,
  pub poll_interval: Duration,
  pub cleanup_interval: Duration,
  pub retention: Duration,
  pub state_read_delay: Duration,
  pub task_error_policy: TaskErrorPolicy,
}

impl Config {
  pub fn from_env() -> Result<Self> {
    Self::from_lookup(|key| env::var(key).ok())
  }

  pub fn from_lookup<F>(lookup: F) -> Result<Self>
  where
    F: Fn(&str) -> Option<String>,
  {
    let database_url = lookup("DATABASE_URL").ok_or_else(|| anyhow!("DATABASE_URL is not set"))?;
    let task_error_policy = match lookup("TASK_ERROR_POLICY") {
      Some(raw) => raw.parse().map_err(|e: String| anyhow!(e))?,
      None => TaskErrorPolicy::default(),
    };
    let registered_tasks = lookup("REGISTERED_TASKS")
      .map(|raw| {
        raw
          .split(',')
          .map(str::trim)
          .filter(|name| !name.is_empty())
          .map(String::from)
          .collect()
      })
      .unwrap_or_default();

    Ok(Self {
      database_url,
      server_port: parse_or(&lookup, "SERVER_PORT", 8080),
      worker_id: lookup("WORKER_ID").unwrap_or_else(|| "worker".into()),
      registered_tasks,
      max_parallel_tasks: parse_or(&lookup, "MAX_PARALLEL_TASKS", DEFAULT_MAX_PARALLEL_TASKS),
      poll_interval: Duration::from_millis(parse_or(&lookup, "POLL_INTERVAL_MS", 1000)),
      cleanup_interval: Duration::from_secs(parse_or(&lookup, "CLEANUP_INTERVAL_SECS", 600)),
      retention: Duration::from_secs(parse_or(&lookup, "RETENTION_HOURS", 24u64).saturating_mul(60 * 60)),
      state_read_delay: Duration::from_millis(parse_or(&lookup, "STATE_READ_DELAY_MS", 4000)),
      task_error_policy,
    })
  }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
  F: Fn(&str) -> Option<String>,
  T: FromStr,
{
  lookup(key)
    .and_then(|raw| raw.trim().parse().ok())
    .unwrap_or(default)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn config(vars: &[(&str, &str)]) -> Result<Config> {
    let vars: HashMap<String, String> =
      vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    Config::from_lookup(|key| vars.get(key).cloned())
  }

  #[test]
  fn defaults_apply_when_unset() {
    let config = config(&[("DATABASE_URL", "postgres://localhost/tasks")]).unwrap();
    assert_eq!(config.server_port, 8080);
    assert_eq!(config.max_parallel_tasks, 6);
    assert_eq!(config.poll_interval, Duration::from_secs(1));
    assert_eq!(config.cleanup_interval, Duration::from_secs(600));
    assert_eq!(config.retention, Duration::from_secs(86_400));
    assert_eq!(config.state_read_delay, Duration::from_secs(4));
    assert_eq!(config.task_error_policy, TaskErrorPolicy::RecordFailure);
    assert!(config.registered_tasks.is_empty());
  }

  #[test]
  fn overrides_are_parsed() {
    let config = config(&[
      ("DATABASE_URL", "postgres://localhost/tasks"),
      ("SERVER_PORT", "not-a-port"),
      ("REGISTERED_TASKS", "add, mul,,sleep"),
      ("MAX_PARALLEL_TASKS", "2"),
      ("TASK_ERROR_POLICY", "stop"),
    ])
    .unwrap();
    assert_eq!(config.server_port, 8080);
    assert_eq!(config.registered_tasks, vec!["add", "mul", "sleep"]);
    assert_eq!(config.max_parallel_tasks, 2);
    assert_eq!(config.task_error_policy, TaskErrorPolicy::Stop);
  }

  #[test]
  fn huge_retention_saturates() {
    let hours = u64::MAX.to_string();
    let config = config(&[
      ("DATABASE_URL", "postgres://localhost/tasks"),
      ("RETENTION_HOURS", hours.as_str()),
    ])
    .unwrap();
    assert_eq!(config.retention, Duration::from_secs(u64::MAX));
  }

  #[test]
  fn missing_database_url_is_an_error() {
    assert!(config(&[]).is_err());
    assert!(config(&[("DATABASE_URL", "x"), ("TASK_ERROR_POLICY", "ignore")]).is_err());
  }
}

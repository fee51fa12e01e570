use std::sync::Arc;
use tracing::info;
use pgtq::{
  backend::Backend,
  config::Config,
  database::setup_database,
  publisher::Publisher,
  retention::CleanupRoutine,
  routes::{routes, Api},
  store::{DynStore, PgTaskStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt::init();
  let config = Config::from_env()?;
  let db_pool = setup_database(&config.database_url).await?;
  let store: DynStore = Arc::new(PgTaskStore::new(db_pool));

  let cleanup = CleanupRoutine::new(store.clone())
    .with_interval(config.cleanup_interval)
    .with_retention(config.retention);
  cleanup.start().await;

  let api = Api::new(
    Publisher::new(store.clone()),
    Backend::new(store).with_read_delay(config.state_read_delay),
  );
  let (addr, server) = warp::serve(routes(api))
    .try_bind_with_graceful_shutdown(([0, 0, 0, 0], config.server_port), async {
      let _ = tokio::signal::ctrl_c().await;
    })?;
  info!("Listening on {}", addr);
  server.await;

  cleanup.stop().await;
  Ok(())
}

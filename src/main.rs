use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use automerge_bot::controller::Controller;
use automerge_bot::controller::workers::{WorkerContext, spawn_supervisor};
use automerge_bot::github::{GitHubClient, Throttler, TokenCache, throttle};
use automerge_bot::queue::{QueueStore, RedisStore, WorkerRegistry};
use automerge_bot::server::{AppState, router};

/// How often the supervisor sweeps for dead workers.
const SUPERVISE_INTERVAL: Duration = Duration::from_secs(15);

fn env_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} must be set"))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "automerge_bot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let webhook_secret = env_var("AUTOMERGE_WEBHOOK_SECRET");
    let app_id: u64 = env_var("AUTOMERGE_APP_ID")
        .parse()
        .expect("AUTOMERGE_APP_ID must be a number");
    let private_key_pem = env_var("AUTOMERGE_PRIVATE_KEY");
    let bot_login = env_var("AUTOMERGE_BOT_LOGIN");
    let redis_url =
        std::env::var("AUTOMERGE_REDIS_URL").unwrap_or_else(|_| "redis://localhost".into());
    let api_base = std::env::var("AUTOMERGE_GITHUB_API_BASE")
        .unwrap_or_else(|_| "https://api.github.com".into());
    let port: u16 = std::env::var("AUTOMERGE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()
        .expect("AUTOMERGE_PORT must be a port number");

    let http = reqwest::Client::new();
    let throttler = Throttler::new(throttle::DEFAULT_RATE_PER_HOUR);
    let tokens = Arc::new(
        TokenCache::new(
            http.clone(),
            &api_base,
            app_id,
            &private_key_pem,
            throttler.clone(),
        )
        .expect("invalid app private key"),
    );
    let client = Arc::new(GitHubClient::new(http, &api_base, tokens, throttler));

    let store: Arc<dyn QueueStore> = Arc::new(
        RedisStore::connect(&redis_url)
            .await
            .expect("failed to connect to Redis"),
    );

    let controller = Arc::new(Controller::new(
        client.clone(),
        store.clone(),
        app_id,
        bot_login,
    ));
    let registry = Arc::new(WorkerRegistry::new());
    let ctx = WorkerContext::new(controller, store, registry.clone());

    ctx.recover_workers()
        .await
        .expect("failed to recover queue workers");
    spawn_supervisor(registry, SUPERVISE_INTERVAL);

    let app = router(AppState::new(ctx, client, webhook_secret, app_id));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

mod distributor;
mod handlers;
mod metrics;
mod routes;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use arbiter_common::problems::FileProblemStore;
use arbiter_common::rpc::RpcClient;
use arbiter_common::settings::Settings;
use arbiter_common::verdict::VerdictMarkers;

use distributor::Distributor;

pub struct AppState {
    pub rpc: RpcClient,
    pub distributor: Arc<Distributor>,
    pub problems: FileProblemStore,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Arbiter API booting...");

    let settings = Settings::from_env();

    let (rpc, replies) = RpcClient::connect(&settings)
        .await
        .expect("Failed to connect to broker");
    info!("Connected to broker: {}", settings.redis_url);

    let dist = Arc::new(Distributor::new(VerdictMarkers::default()));
    tokio::spawn(distributor::run(Arc::clone(&dist), replies));

    let state = Arc::new(AppState {
        rpc,
        distributor: dist,
        problems: FileProblemStore::new(settings.problem_dir.clone()),
    });

    let app = routes::routes().with_state(state);

    let listener = TcpListener::bind(&settings.bind_addr)
        .await
        .expect("Failed to bind to address");

    info!("HTTP server listening on {}", settings.bind_addr);
    info!("Ready to accept submissions");

    axum::serve(listener, app).await.expect("Server error");
}

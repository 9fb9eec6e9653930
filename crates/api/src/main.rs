use anyhow::Context;
use tracing::{info, warn};

use kitchenline_api::app::{self, services};
use kitchenline_api::config::AppConfig;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// The runtime is built by hand so the worker pool is stopped outside async
// context: pipeline collaborators own blocking HTTP clients.
fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    kitchenline_observability::init_with(config.log_format);
    if config.insecure_jwt_secret {
        warn!("JWT_SECRET not set; using insecure dev default");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let services = runtime
        .block_on(services::start(&config))
        .context("failed to start job services")?;
    let router = app::build_app(&config.jwt_secret, services.jobs.clone());

    let served = runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", config.bind_addr))?;
        info!(addr = %listener.local_addr()?, "listening");
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("server error")
    });

    services.shutdown();
    drop(runtime);
    served
}

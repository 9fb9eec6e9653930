//! Process wiring: job store, artifact store, pipelines, worker pool and
//! watchdog.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use kitchenline_infra::artifacts::LocalArtifactStore;
use kitchenline_infra::external::{
    ArtifactMediaProbe, DisabledEnhancer, HtmlMenuExtractor, HttpImageEnhancer, HttpMenuExtractor, HttpPageFetcher,
    HttpReconstructionClient, NoDiscovery, SearchApiDiscovery, SignedUrlLinker,
};
use kitchenline_infra::jobs::{
    ActiveRuns, DispatcherConfig, DispatcherHandle, InMemoryJobStore, JobDispatcher, JobService, JobStore,
    JobStoreError, PostgresJobStore, Watchdog, WatchdogConfig, WatchdogHandle,
};
use kitchenline_pipeline::ar_generate::{self, ArGenerateServices};
use kitchenline_pipeline::menu_import::{self, ImageEnhancer, MenuExtractor, MenuImportServices, SourceDiscovery};
use kitchenline_pipeline::{ArtifactError, ArtifactStore, PipelineError, PipelineRegistry, RetryPolicy};

use crate::config::AppConfig;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("job store: {0}")]
    Store(#[from] JobStoreError),
    #[error("artifact store: {0}")]
    Artifacts(#[from] ArtifactError),
    #[error("pipeline definition: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("failed to start background threads: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Everything the HTTP layer and the background threads share.
pub struct Services {
    pub jobs: Arc<JobService>,
    dispatcher: DispatcherHandle,
    watchdog: WatchdogHandle,
}

impl Services {
    /// Stop the watchdog, then let in-flight runs finish and join the workers.
    ///
    /// Call outside the async runtime: joining blocks.
    pub fn shutdown(self) {
        self.watchdog.shutdown();
        let stats = self.dispatcher.stats();
        info!(
            completed = stats.jobs_completed,
            failed = stats.jobs_failed,
            canceled = stats.jobs_canceled,
            running = stats.current_running,
            "stopping dispatcher"
        );
        self.dispatcher.shutdown();
    }
}

async fn open_store(config: &AppConfig) -> Result<Arc<dyn JobStore>, StartupError> {
    let Some(url) = config.database_url.as_deref() else {
        warn!("DATABASE_URL not set; jobs are kept in memory and lost on restart");
        return Ok(InMemoryJobStore::arc());
    };
    let pool = PgPoolOptions::new()
        .max_connections((config.workers as u32 + 4).max(8))
        .connect(url)
        .await?;
    let store = PostgresJobStore::new(pool)?;
    store.ensure_schema().await?;
    info!("using PostgreSQL job store");
    Ok(Arc::new(store))
}

/// Pipelines for every job kind the configuration enables.
pub fn build_registry(
    config: &AppConfig,
    artifacts: Arc<dyn ArtifactStore>,
) -> Result<PipelineRegistry, PipelineError> {
    let retry = RetryPolicy::default();

    let discovery: Arc<dyn SourceDiscovery> = match config.search_api_url.as_deref() {
        Some(url) => Arc::new(SearchApiDiscovery::new(url, config.search_api_key.clone())),
        None => Arc::new(NoDiscovery),
    };
    let enhancer: Arc<dyn ImageEnhancer> = match config.enhancer_url.as_deref() {
        Some(url) => Arc::new(HttpImageEnhancer::new(url)),
        None => Arc::new(DisabledEnhancer),
    };
    let extractor: Arc<dyn MenuExtractor> = match config.extractor_url.as_deref() {
        Some(url) => Arc::new(HttpMenuExtractor::new(url)),
        None => Arc::new(HtmlMenuExtractor),
    };

    let menu = menu_import::pipeline(MenuImportServices {
        discovery,
        fetcher: Arc::new(HttpPageFetcher::default()),
        extractor,
        enhancer,
        artifacts: artifacts.clone(),
        retry_policy: retry.clone(),
    })?;
    let mut registry = PipelineRegistry::new().with(Arc::new(menu));

    match (config.reconstruction_url.as_deref(), config.media_base_url.as_deref()) {
        (Some(reconstruction), Some(media)) => {
            let ar = ar_generate::pipeline(ArGenerateServices {
                probe: Arc::new(ArtifactMediaProbe::new(artifacts.clone())),
                linker: Arc::new(SignedUrlLinker::new(media, config.jwt_secret.as_bytes())),
                reconstruction: Arc::new(HttpReconstructionClient::new(reconstruction)),
                artifacts,
                retry_policy: retry,
                poll_interval: ArGenerateServices::DEFAULT_POLL_INTERVAL,
                link_ttl: ArGenerateServices::DEFAULT_LINK_TTL,
            })?;
            registry.register(Arc::new(ar));
        }
        _ => warn!("RECONSTRUCTION_URL or MEDIA_BASE_URL not set; ar-generate jobs are disabled"),
    }

    Ok(registry)
}

/// Open the stores, then start the worker pool and the watchdog.
///
/// Must run inside a multi-threaded tokio runtime when a database is
/// configured.
pub async fn start(config: &AppConfig) -> Result<Services, StartupError> {
    let store = open_store(config).await?;
    let artifacts: Arc<dyn ArtifactStore> = Arc::new(LocalArtifactStore::new(config.artifact_dir.clone())?);
    let registry = build_registry(config, artifacts.clone())?;
    let runs = Arc::new(ActiveRuns::new());

    let jobs = Arc::new(JobService::new(store.clone(), registry.clone(), artifacts, runs.clone()));

    let kinds = registry.kinds();
    let dispatcher = JobDispatcher::new(store.clone(), registry, runs.clone()).spawn(
        DispatcherConfig::default()
            .with_workers(config.workers)
            .with_poll_interval(config.poll_interval)
            .with_kinds(kinds),
    )?;
    let watchdog = Watchdog::new(
        store,
        runs,
        WatchdogConfig::default()
            .with_max_run_time(config.max_run_time)
            .with_interval(Duration::from_secs(30).min(config.max_run_time)),
    )
    .spawn()?;

    Ok(Services {
        jobs,
        dispatcher,
        watchdog,
    })
}

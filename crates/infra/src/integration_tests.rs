//! End-to-end job lifecycle through the real worker pool.
//!
//! JobService -> InMemoryJobStore -> JobDispatcher threads -> pipeline stages
//! -> InMemoryArtifactStore, with network collaborators replaced by fakes.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;

use kitchenline_auth::{Principal, Role};
use kitchenline_core::{JobId, JobKind, JobStatus, PrincipalId};
use kitchenline_pipeline::ar_generate::{
    self, ArGenerateServices, ReconstructionOutput, ReconstructionService, ReconstructionStatus,
};
use kitchenline_pipeline::menu_import::manifest::Manifest;
use kitchenline_pipeline::menu_import::{self, FetchedBinary, MenuImportServices, PageFetcher};
use kitchenline_pipeline::{ArtifactStore, PipelineRegistry, RetryPolicy, ServiceError};

use crate::artifacts::InMemoryArtifactStore;
use crate::external::media::fixtures::iso_media;
use crate::external::{ArtifactMediaProbe, DisabledEnhancer, HtmlMenuExtractor, NoDiscovery, SignedUrlLinker};
use crate::jobs::{
    ActiveRuns, DispatcherConfig, DispatcherHandle, InMemoryJobStore, Job, JobDispatcher, JobService, JobStore,
};

const MENU_PAGE: &str = r#"<html><body>
<nav><a href="/">Home</a> <a href="/menu">Menu</a></nav>
<h2>STARTERS</h2>
<p>Burrata $14.50</p>
<p>Crispy Calamari $12.00</p>
<h2>MAINS</h2>
<p>Duck Confit (GF) $24.00</p>
<img src="/img/duck.jpg" alt="Duck confit">
</body></html>"#;

#[derive(Default)]
struct FakeSite {
    pages: HashMap<String, String>,
    images: HashMap<String, Vec<u8>>,
}

impl PageFetcher for FakeSite {
    fn fetch_text(&self, url: &str) -> Result<String, ServiceError> {
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| ServiceError::unavailable(format!("connection refused: {url}")))
    }

    fn fetch_bytes(&self, url: &str) -> Result<FetchedBinary, ServiceError> {
        self.images
            .get(url)
            .map(|bytes| FetchedBinary {
                bytes: bytes.clone(),
                content_type: Some("image/jpeg".into()),
            })
            .ok_or_else(|| ServiceError::not_found(url.to_string()))
    }
}

/// Stays pending until `finish` is set.
#[derive(Default)]
struct FakeStudio {
    finish: AtomicBool,
}

impl ReconstructionService for FakeStudio {
    fn start(&self, _source_url: &str, item_id: &str) -> Result<String, ServiceError> {
        Ok(format!("task-{item_id}"))
    }

    fn status(&self, _task_id: &str) -> Result<ReconstructionStatus, ServiceError> {
        if self.finish.load(Ordering::SeqCst) {
            Ok(ReconstructionStatus::Done(ReconstructionOutput {
                glb: b"glTF".to_vec(),
                usdz: b"PK\x03\x04usdz".to_vec(),
                poster: None,
            }))
        } else {
            Ok(ReconstructionStatus::Pending { fraction: 0.4 })
        }
    }
}

struct World {
    store: Arc<InMemoryJobStore>,
    artifacts: Arc<InMemoryArtifactStore>,
    runs: Arc<ActiveRuns>,
    studio: Arc<FakeStudio>,
    service: JobService,
    pool: Option<DispatcherHandle>,
}

impl World {
    fn start() -> Self {
        let store = InMemoryJobStore::arc();
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let runs = Arc::new(ActiveRuns::new());
        let studio = Arc::new(FakeStudio::default());

        let mut site = FakeSite::default();
        site.pages
            .insert("https://gildedfork.example/menu".into(), MENU_PAGE.into());
        site.images
            .insert("https://gildedfork.example/img/duck.jpg".into(), vec![0xff, 0xd8, 0xff, 0xe0]);

        let retry = RetryPolicy::fixed(2, Duration::from_millis(1));
        let menu = menu_import::pipeline(MenuImportServices {
            discovery: Arc::new(NoDiscovery),
            fetcher: Arc::new(site),
            extractor: Arc::new(HtmlMenuExtractor),
            enhancer: Arc::new(DisabledEnhancer),
            artifacts: artifacts.clone(),
            retry_policy: retry.clone(),
        })
        .unwrap();
        let ar = ar_generate::pipeline(ArGenerateServices {
            probe: Arc::new(ArtifactMediaProbe::new(artifacts.clone())),
            linker: Arc::new(SignedUrlLinker::new("https://media.example", "test-secret")),
            reconstruction: studio.clone(),
            artifacts: artifacts.clone(),
            retry_policy: retry,
            poll_interval: Duration::from_millis(5),
            link_ttl: ArGenerateServices::DEFAULT_LINK_TTL,
        })
        .unwrap();
        let registry = PipelineRegistry::new().with(Arc::new(menu)).with(Arc::new(ar));

        let service = JobService::new(store.clone(), registry.clone(), artifacts.clone(), runs.clone());
        let pool = JobDispatcher::new(store.clone(), registry, runs.clone())
            .spawn(
                DispatcherConfig::default()
                    .with_name("it-dispatcher")
                    .with_workers(2)
                    .with_poll_interval(Duration::from_millis(5)),
            )
            .unwrap();

        Self {
            store,
            artifacts,
            runs,
            studio,
            service,
            pool: Some(pool),
        }
    }

    fn wait_for(&self, id: JobId, what: &str, done: impl Fn(&Job) -> bool) -> Job {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let job = self.store.get(id).unwrap().unwrap();
            if done(&job) {
                return job;
            }
            assert!(Instant::now() < deadline, "timed out waiting for {what}: {job:?}");
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.studio.finish.store(true, Ordering::SeqCst);
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
    }
}

fn operator() -> Principal {
    Principal::with_roles(PrincipalId::new(), vec![Role::new("operator")])
}

#[test]
fn menu_import_with_override_completes_and_serves_zip() {
    let world = World::start();
    let op = operator();

    let job = world
        .service
        .submit(
            &op,
            JobKind::MenuImport,
            json!({"restaurant_name": "The Gilded Fork", "website_override": "https://gildedfork.example/menu"}),
        )
        .unwrap();
    let done = world.wait_for(job.id, "completion", |j| j.status.is_terminal());

    assert_eq!(done.status, JobStatus::Completed, "{:?}", done.error);
    assert_eq!(done.progress, 100);
    assert_eq!(done.metadata["items_count"], json!(3));
    let key = done.result_ref.clone().unwrap();
    assert!(key.starts_with(&format!("menu-importer/{}/", job.id)));
    assert!(key.ends_with(".zip"));

    let download = world.service.download(&op, job.id).unwrap();
    assert_eq!(download.content_type, "application/zip");
    let mut archive = zip::ZipArchive::new(Cursor::new(download.bytes)).unwrap();
    let mut raw = String::new();
    archive
        .by_name("the-gilded-fork/manifest.json")
        .unwrap()
        .read_to_string(&mut raw)
        .unwrap();
    let manifest: Manifest = serde_json::from_str(&raw).unwrap();
    let names: Vec<&str> = manifest.categories.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Starters", "Mains"]);
    assert_eq!(manifest.categories.iter().map(|c| c.items.len()).sum::<usize>(), 3);
}

#[test]
fn unreachable_override_fails_at_acquisition() {
    let world = World::start();

    let job = world
        .service
        .submit(
            &operator(),
            JobKind::MenuImport,
            json!({"restaurant_name": "Nowhere Diner", "website_override": "nowhere.example"}),
        )
        .unwrap();
    let done = world.wait_for(job.id, "failure", |j| j.status.is_terminal());

    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(done.error.unwrap().stage, "Acquisition");
    assert!(done.result_ref.is_none());
}

#[test]
fn canceled_run_can_be_retried_and_stale_writes_are_fenced() {
    let world = World::start();
    let op = operator();
    world
        .artifacts
        .put("uploads/burger.mp4", &iso_media(b"isom", 1_000, 10_000), "video/mp4")
        .unwrap();

    let job = world
        .service
        .submit(
            &op,
            JobKind::ArGenerate,
            json!({"item_id": "burger-01", "video_ref": "uploads/burger.mp4"}),
        )
        .unwrap();
    world.wait_for(job.id, "model synthesis", |j| {
        j.status == JobStatus::Running && j.current_step.as_deref() == Some("Model Synthesis")
    });

    let canceled = world.service.cancel(&op, job.id).unwrap();
    assert_eq!(canceled.status, JobStatus::Canceled);
    let deadline = Instant::now() + Duration::from_secs(10);
    while world.runs.is_active(job.id) {
        assert!(Instant::now() < deadline, "canceled run never stopped");
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(world.store.get(job.id).unwrap().unwrap().status, JobStatus::Canceled);

    world.studio.finish.store(true, Ordering::SeqCst);
    let retried = world.service.retry(&op, job.id).unwrap();
    assert_eq!(retried.run_generation, 2);
    assert_eq!(retried.progress, 0);

    let done = world.wait_for(job.id, "retried completion", |j| j.status.is_terminal());
    assert_eq!(done.status, JobStatus::Completed, "{:?}", done.error);
    assert_eq!(done.result_ref, Some(format!("ar/{}/assets.json", job.id)));

    // Writes tagged with the first run's generation no longer land.
    assert!(!world.store.append_log(job.id, 1, "late write").unwrap());
    assert!(!world.store.set_progress(job.id, 1, 10, "Model Synthesis").unwrap());
    let after = world.store.get(job.id).unwrap().unwrap();
    assert_eq!(after.status, JobStatus::Completed);
    assert!(after.logs.iter().all(|l| l.message != "late write"));
}

//! Vigil Camserver
//!
//! Main entry point: wires the camera, the per-frame pipeline, the alarm
//! worker and the HTTP server together.

use anyhow::Context;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::runtime::Handle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil_camserver::{
    acquisition::{AcquisitionConfig, AcquisitionLoop, CameraStatus},
    alarm_dispatcher::{
        AlarmDispatcher, AlarmSink, AlarmWorker, LineAlarmSink, DEFAULT_MAX_IN_FLIGHT,
        DEFAULT_QUEUE_CAPACITY,
    },
    camera::FfmpegCamera,
    identity::{
        IdentityConfig, IdentityResolver, KnownIdentityGallery, SelfLearningCache,
        SelfLearningConfig,
    },
    inference_client::InferenceClient,
    motion_detector::{MotionDetector, MotionDetectorConfig},
    motion_trigger::MotionTriggeredStateMachine,
    pipeline::{FaceRecognitionStage, FrameDispatcher, PipelineControls},
    state::{AppConfig, AppState},
    state_store::StateStore,
    storage::{
        CloudinaryConfig, CloudinaryStorage, ImageStorage, LocalStorage, StorageBackend,
    },
    tracker::{IouTracker, IouTrackerConfig, TrackIdAllocator},
    web_api,
};

/// Face detection runs on a half-size frame
const FACE_RESIZE_FACTOR: f32 = 0.5;

fn build_storage(config: &AppConfig) -> anyhow::Result<Arc<dyn ImageStorage>> {
    let backend: StorageBackend = config.storage_backend.parse()?;
    let storage: Arc<dyn ImageStorage> = match backend {
        StorageBackend::Local => Arc::new(LocalStorage::new(
            config.alarm_image_dir.clone(),
            config.alarm_public_url.clone(),
        )),
        StorageBackend::Cloudinary => Arc::new(CloudinaryStorage::new(CloudinaryConfig {
            cloud_name: config.cloudinary_cloud_name.clone(),
            api_key: config.cloudinary_api_key.clone(),
            api_secret: config.cloudinary_api_secret.clone(),
        })?),
    };
    Ok(storage)
}

fn build_sink(config: &AppConfig) -> anyhow::Result<Option<Arc<dyn AlarmSink>>> {
    if !config.alarm_enabled {
        return Ok(None);
    }
    match &config.line_ip {
        Some(url) => Ok(Some(Arc::new(LineAlarmSink::new(url.clone())?))),
        None => {
            tracing::warn!("ALARM_FLAG is set but LINE_IP is empty, alarms will only be logged");
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil_camserver=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Vigil Camserver v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Arc::new(AppConfig::default());
    tracing::info!(
        camera = %config.camera,
        width = config.camera_width,
        height = config.camera_height,
        fps = config.camera_fps,
        known_faces_dir = %config.known_faces_dir.display(),
        inference_url = %config.inference_url,
        storage_backend = %config.storage_backend,
        alarm_enabled = config.alarm_enabled,
        "Configuration loaded"
    );

    // Inference adapter (blocks the acquisition thread on this runtime)
    let inference = Arc::new(InferenceClient::new(
        config.inference_url.clone(),
        Handle::current(),
    )?);
    if !inference.health_check().await {
        tracing::warn!(url = %config.inference_url, "Inference service not reachable yet");
    }

    // Gallery: a missing root is fatal
    let gallery = {
        let root = config.known_faces_dir.clone();
        let analyzer = inference.clone();
        tokio::task::spawn_blocking(move || KnownIdentityGallery::load(root, analyzer.as_ref()))
            .await
            .context("gallery loader panicked")??
    };
    tracing::info!(identities = gallery.len(), "Known identity gallery loaded");
    let learning = SelfLearningCache::new(config.known_faces_dir.clone(), SelfLearningConfig::default())?;

    // Alarms
    let (alarms, alarm_rx) = AlarmDispatcher::new(DEFAULT_QUEUE_CAPACITY);
    let alarms = Arc::new(alarms);
    AlarmWorker::new(
        alarm_rx,
        build_storage(&config)?,
        build_sink(&config)?,
        DEFAULT_MAX_IN_FLIGHT,
    )
    .spawn();

    // Shared state
    let store = Arc::new(StateStore::new());
    let motion_config = MotionDetectorConfig::default();
    let controls = Arc::new(PipelineControls::new(config.toggles, &motion_config));
    let camera_status = Arc::new(CameraStatus::default());

    // Per-frame pipeline; both trackers feed one resolver, so ids come from one sequence
    let track_ids = TrackIdAllocator::new();
    let resolver = IdentityResolver::new(
        IdentityConfig::default(),
        inference.clone(),
        gallery,
        learning,
        Some(alarms.clone()),
    );
    let faces = FaceRecognitionStage::new(
        inference.clone(),
        Box::new(IouTracker::with_ids(IouTrackerConfig::default(), track_ids.clone())),
        FACE_RESIZE_FACTOR,
    );
    let trigger = MotionTriggeredStateMachine::new(
        MotionDetector::new(motion_config.clone(), Some(alarms.clone())),
        inference.clone(),
        Box::new(IouTracker::with_ids(IouTrackerConfig::default(), track_ids)),
    );
    let dispatcher = FrameDispatcher::new(
        store.clone(),
        controls.clone(),
        MotionDetector::new(motion_config, Some(alarms.clone())),
        faces,
        resolver,
        trigger,
    );

    // Acquisition thread
    let acquisition = AcquisitionLoop::new(
        AcquisitionConfig {
            flip: config.flip_frame,
            capture: config.capture_properties(),
            ..Default::default()
        },
        FfmpegCamera::new(config.camera_spec()),
        dispatcher,
        camera_status.clone(),
    );
    let stop = acquisition.stop_handle();
    let acquisition_thread = std::thread::Builder::new()
        .name("acquisition".to_string())
        .spawn(move || acquisition.run())
        .context("failed to spawn acquisition thread")?;
    tracing::info!("Acquisition thread started");

    // HTTP server
    let state = AppState {
        config: config.clone(),
        store,
        controls,
        camera: camera_status,
        alarms,
    };
    let app = web_api::create_router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown requested");
        })
        .await?;

    stop.store(true, Ordering::Relaxed);
    if tokio::task::spawn_blocking(move || acquisition_thread.join())
        .await?
        .is_err()
    {
        tracing::error!("Acquisition thread panicked");
    }

    tracing::info!("Vigil Camserver stopped");
    Ok(())
}

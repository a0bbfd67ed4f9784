use anyhow::Context;
use loopcam::capture::list_cameras;
use loopcam::{SessionConfig, SessionController, SessionEvents};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const CONFIG_ENV: &str = "LOOPCAM_CONFIG";
const DEFAULT_CONFIG: &str = "loopcam.json";

fn load_config() -> anyhow::Result<SessionConfig> {
    let path = std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));

    if !path.exists() {
        tracing::info!("No config at {:?}, using defaults", path);
        return Ok(SessionConfig::default());
    }
    SessionConfig::from_json_file(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    loopcam::init_tracing();

    let config = load_config()?;
    config.validate().context("invalid session config")?;

    for camera in list_cameras() {
        tracing::info!("Camera {}: {} ({})", camera.index, camera.name, camera.description);
    }

    let controller = Arc::new(SessionController::webcam(config));
    controller.subscribe(
        SessionEvents::new()
            .on_countdown(|left| tracing::info!("Recording in {}...", left))
            .on_start(|| tracing::info!("Recording"))
            .on_stop(|| tracing::info!("Camera closed"))
            .on_error(|message| tracing::error!("Session error: {}", message)),
    )?;

    // Ctrl-C finalizes the open clip instead of killing the encoder
    let interrupted = Arc::clone(&controller);
    ctrlc::set_handler(move || {
        tracing::info!("Interrupted, closing camera");
        interrupted.close_camera();
    })
    .context("failed to install Ctrl-C handler")?;

    controller.start_camera()?;
    controller.start_recording()?;

    // Infinite loops run until interrupted
    let state = controller.wait_until_finished(Duration::from_secs(u64::from(u32::MAX)));
    controller.close_camera();

    for clip in controller.clips() {
        tracing::info!(
            "{}: {} frames, {:.2}s",
            clip.path.display(),
            clip.frames_written,
            clip.elapsed.as_secs_f64()
        );
    }
    tracing::info!("Session ended: {}", state);
    Ok(())
}

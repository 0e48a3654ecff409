use std::sync::Arc;

use cam_events::{EventStream, MotionListenerRegistry};
use homecam::config::Settings;
use homecam::registry::PreBufferRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    homecam::logging::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "homecam.json".to_string());
    let settings: Settings = serde_json::from_str(&std::fs::read_to_string(&config_path)?)?;

    let prebuffers = Arc::new(PreBufferRegistry::new());
    let listeners = Arc::new(MotionListenerRegistry::new());
    let shutdown = CancellationToken::new();

    for camera in &settings.cameras {
        let prebuffer = prebuffers.ensure(camera);
        if camera.prebuffer.enabled {
            match prebuffer.start().await {
                Ok(_session) => {}
                Err(e) => error!(camera = %camera.name, error = %e, "prebuffer start failed"),
            }
        }

        if let Some(url) = &camera.events_url {
            let name = camera.name.clone();
            listeners.on_motion(camera.channel, move |event| {
                info!(camera = %name, kind = %event.kind, active = event.active, "motion");
                Ok(())
            });

            let stream = EventStream::new(url.clone());
            let registry = listeners.clone();
            let token = shutdown.clone();
            let name = camera.name.clone();
            tokio::spawn(async move {
                if let Err(e) = stream.run(registry, token).await {
                    warn!(camera = %name, error = %e, "event stream terminated");
                }
            });
        }
    }

    info!(cameras = settings.cameras.len(), "homecam initialized successfully");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    shutdown.cancel();
    for camera in &settings.cameras {
        prebuffers.remove(&camera.name);
    }

    Ok(())
}

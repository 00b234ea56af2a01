use std::sync::Arc;

use parcel_dispatch::config::{Config, LogFormat};
use parcel_dispatch::engine::Policy;
use parcel_dispatch::error::AppError;
use parcel_dispatch::geo::{FallbackGeocoder, Gazetteer, GeoProvider, NominatimGeocoder};
use parcel_dispatch::notify::{LogNotifier, Notifier, WebhookNotifier};
use parcel_dispatch::state::AppState;
use parcel_dispatch::store::MemoryStore;
use parcel_dispatch::api;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Compact => subscriber.compact().init(),
    }

    let geo = build_geocoder(&config)?;
    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => Arc::new(
            WebhookNotifier::new(url.clone(), config.notify_timeout)
                .map_err(|err| AppError::Internal(err.to_string()))?,
        ),
        None => {
            tracing::warn!("NOTIFY_WEBHOOK_URL not set; notifications are only logged");
            Arc::new(LogNotifier)
        }
    };

    let policy = Policy {
        duplicate_guard: config.duplicate_guard,
        geocode_timeout: config.geocode_timeout,
        notify_timeout: config.notify_timeout,
    };
    let store = Arc::new(MemoryStore::new(config.tracking_seed));
    let shared_state = Arc::new(AppState::new(
        store,
        geo,
        notifier,
        policy,
        config.event_buffer_size,
    ));

    let app = api::rest::router(shared_state).fallback_service(tower_http::services::ServeDir::new(&config.static_dir));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

fn build_geocoder(config: &Config) -> Result<Arc<dyn GeoProvider>, AppError> {
    let gazetteer = match &config.gazetteer_path {
        Some(path) => {
            let gazetteer = Gazetteer::from_json_file(path)?;
            tracing::info!(places = gazetteer.len(), path = %path.display(), "gazetteer loaded");
            Some(gazetteer)
        }
        None => None,
    };

    let remote = config.geocoder_url.clone().map(|url| {
        NominatimGeocoder::new(
            url,
            config.geocoder_api_key.clone(),
            config.geocoder_requires_key,
        )
    });

    match (remote, gazetteer) {
        (Some(remote), Some(gazetteer)) => Ok(Arc::new(FallbackGeocoder::new(
            Box::new(remote),
            Box::new(gazetteer),
        ))),
        (Some(remote), None) => Ok(Arc::new(remote)),
        (None, Some(gazetteer)) => Ok(Arc::new(gazetteer)),
        (None, None) => Err(AppError::Internal(
            "no geocoder configured: set GEOCODER_URL or GAZETTEER_PATH".to_string(),
        )),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}

use anyhow::Result;
use booking_service::api;
use booking_service::cache::{MemoryCache, RedisCache, StatusCache};
use booking_service::config::{Args, LogFormat, StoreBackend};
use booking_service::notify::{FanoutSink, KafkaSink, LogSink, NotificationSink};
use booking_service::store::{run_migrations, BookingStore, MemoryStore, PgStore};
use booking_service::InventoryManager;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const NOTIFICATION_QUEUE: usize = 1024;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let store: Arc<dyn BookingStore> = match args.store {
        StoreBackend::Postgres => {
            run_migrations(&args.database_url).await?;
            Arc::new(PgStore::connect(&args.database_url, args.pool_size).await?)
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store; bookings are lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let cache: Arc<dyn StatusCache> = match &args.redis_url {
        Some(url) => {
            info!("Connecting status cache to {}", url);
            Arc::new(RedisCache::connect(url).await?)
        }
        None => Arc::new(MemoryCache::new()),
    };

    let notifier: Arc<dyn NotificationSink> = match &args.kafka_brokers {
        Some(brokers) => {
            let (kafka, _publisher) =
                KafkaSink::spawn(brokers, args.notification_topic.clone(), NOTIFICATION_QUEUE)?;
            info!("Publishing notifications to topic {}", args.notification_topic);
            Arc::new(FanoutSink::new(vec![Box::new(LogSink), Box::new(kafka)]))
        }
        None => Arc::new(LogSink),
    };

    let manager = Arc::new(InventoryManager::new(
        store,
        cache,
        notifier,
        args.manager_config(),
        args.cache_config(),
    ));

    let app_state = api::AppState {
        manager,
        max_tickets: args.max_tickets,
    };
    let app = api::create_router(app_state, args.rate_limit_config());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;

    info!("Booking service web server started on port {}", args.port);
    info!("Booking service ready to accept HTTP requests at http://0.0.0.0:{}/api/events", args.port);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

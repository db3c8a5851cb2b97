//! Entrypoint for the distributor node server

use std::{num::NonZeroUsize, path::PathBuf, sync::Arc};

use distributor_cache::{CacheError, CacheStore, ContentDir};
use distributor_clap_blocks::{bind_addr::BindAddress, byte_size::ByteSize};
use distributor_download::{DownloadConfig, DownloadCoordinator, HttpOriginClient};
use distributor_resolver::{
    BucketSelection, CachedMetadataSource, EndpointResolver, LatencyProber, LatencyTracker,
    MetadataError, ObjectLocator, SnapshotMetadataSource,
};
use distributor_server::{
    AssetService, BackgroundTasks, CommonServerState, MaintenanceConfig, ServeError,
    builder::ServerBuilder, serve, wait_for_signal,
};
use distributor_types::{BucketId, FamilyMetadata, MetadataValidationError, WorkerId};
use iox_time::{SystemProvider, TimeProvider};
use observability_deps::tracing::info;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use trogging::cli::LoggingConfig;

/// The default bind address for the HTTP API.
pub const DEFAULT_HTTP_BIND_ADDR: &str = "0.0.0.0:3334";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read family config {path:?}: {source}")]
    FamilyConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse family config {path:?}: {source}")]
    FamilyConfigParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid family config: {0}")]
    FamilyConfigInvalid(#[from] MetadataValidationError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Failed to initialize the cache: {0}")]
    Startup(#[from] ServeError),

    #[error("Failed to create HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Failed to bind address")]
    BindAddress(#[source] std::io::Error),

    #[error("Failed to register signal handler: {0}")]
    Signal(#[source] std::io::Error),

    #[error("Server error: {0}")]
    Server(#[from] distributor_server::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, clap::Parser)]
#[clap(group(
    clap::ArgGroup::new("bucket_selection")
        .required(true)
        .args(["buckets", "worker_id"])
))]
pub struct Config {
    /// logging options
    #[clap(flatten)]
    pub(crate) logging_config: LoggingConfig,

    /// Identifier of this node, reported by the status endpoint
    #[clap(
    long = "node-id",
    env = "DISTRIBUTOR_NODE_ID",
    default_value = "distributor-1",
    action,
    )]
    pub node_id: String,

    /// The address on which the node will serve HTTP API requests
    #[clap(
    long = "http-bind",
    env = "DISTRIBUTOR_HTTP_BIND_ADDR",
    default_value = DEFAULT_HTTP_BIND_ADDR,
    action,
    )]
    pub http_bind_address: BindAddress,

    /// Directory holding the cached payloads
    #[clap(long = "data-dir", env = "DISTRIBUTOR_DATA_DIR", action)]
    pub data_dir: PathBuf,

    /// Capacity of the payload cache, e.g. `500GB` or `64GiB`
    #[clap(
    long = "cache-capacity",
    env = "DISTRIBUTOR_CACHE_CAPACITY",
    default_value = "10GiB",
    action,
    )]
    pub cache_capacity: ByteSize,

    /// Number of downloads from storage nodes that may run at once; further downloads queue
    #[clap(
    long = "max-concurrent-downloads",
    env = "DISTRIBUTOR_MAX_CONCURRENT_DOWNLOADS",
    default_value = "20",
    action,
    )]
    pub max_concurrent_downloads: NonZeroUsize,

    /// How long a storage node may take to respond, and to send each part of a payload, before
    /// the next one is tried
    #[clap(
    long = "attempt-timeout",
    env = "DISTRIBUTOR_ATTEMPT_TIMEOUT",
    default_value = "30s",
    action,
    )]
    pub attempt_timeout: humantime::Duration,

    /// JSON metadata snapshot describing objects, buckets and storage operators
    #[clap(long = "metadata-file", env = "DISTRIBUTOR_METADATA_FILE", action)]
    pub metadata_file: PathBuf,

    /// JSON family metadata of this node, used to prefer storage nodes in the same region
    #[clap(long = "family-config", env = "DISTRIBUTOR_FAMILY_CONFIG", action)]
    pub family_config: Option<PathBuf>,

    /// Distribution buckets served by this node
    #[clap(
    long = "buckets",
    env = "DISTRIBUTOR_BUCKETS",
    value_delimiter = ',',
    num_args = 1..,
    )]
    pub buckets: Vec<BucketId>,

    /// Serve every distribution bucket operated by this worker
    #[clap(long = "worker-id", env = "DISTRIBUTOR_WORKER_ID", action)]
    pub worker_id: Option<u64>,

    /// How long object metadata lookups are cached
    #[clap(
    long = "metadata-cache-ttl",
    env = "DISTRIBUTOR_METADATA_CACHE_TTL",
    default_value = "1m",
    action,
    )]
    pub metadata_cache_ttl: humantime::Duration,

    /// Interval at which metadata, served buckets and storage operators are reloaded
    #[clap(
    long = "metadata-refresh-interval",
    env = "DISTRIBUTOR_METADATA_REFRESH_INTERVAL",
    default_value = "1m",
    action,
    )]
    pub metadata_refresh_interval: humantime::Duration,

    /// Interval at which cached objects that are no longer served are removed
    #[clap(
    long = "cache-cleanup-interval",
    env = "DISTRIBUTOR_CACHE_CLEANUP_INTERVAL",
    default_value = "1m",
    action,
    )]
    pub cache_cleanup_interval: humantime::Duration,

    /// Interval at which the latency of storage nodes is measured
    #[clap(
    long = "latency-check-interval",
    env = "DISTRIBUTOR_LATENCY_CHECK_INTERVAL",
    default_value = "1m",
    action,
    )]
    pub latency_check_interval: humantime::Duration,
}

impl Config {
    fn bucket_selection(&self) -> BucketSelection {
        match self.worker_id {
            Some(worker_id) => BucketSelection::AllByWorkerId(WorkerId::new(worker_id)),
            None => BucketSelection::Ids(self.buckets.clone()),
        }
    }

    fn maintenance_config(&self) -> MaintenanceConfig {
        MaintenanceConfig {
            metadata_refresh_interval: self.metadata_refresh_interval.into(),
            cache_cleanup_interval: self.cache_cleanup_interval.into(),
            latency_check_interval: self.latency_check_interval.into(),
        }
    }
}

async fn load_family_config(path: PathBuf) -> Result<FamilyMetadata> {
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|source| Error::FamilyConfigRead {
            path: path.clone(),
            source,
        })?;
    let family: FamilyMetadata = serde_json::from_slice(&bytes)
        .map_err(|source| Error::FamilyConfigParse { path, source })?;
    family.validate()?;
    Ok(family)
}

pub async fn command(config: Config) -> Result<()> {
    info!(
        node_id = %config.node_id,
        version = env!("CARGO_PKG_VERSION"),
        "distributor node starting",
    );

    let metrics = Arc::new(metric::Registry::new());
    let time_provider = Arc::new(SystemProvider::new());
    let shutdown = CancellationToken::new();

    let family = match config.family_config.clone() {
        Some(path) => Some(load_family_config(path).await?),
        None => None,
    };
    if let Some(family) = &family {
        info!(family_id = %family.family_id, areas = family.areas.len(), "loaded family config");
    }

    let snapshot = Arc::new(SnapshotMetadataSource::from_file(&config.metadata_file).await?);
    let source = Arc::new(CachedMetadataSource::new(
        snapshot,
        config.metadata_cache_ttl.into(),
        Arc::clone(&time_provider) as _,
    ));
    let locator = Arc::new(ObjectLocator::new(source, config.bucket_selection()).await?);

    let content_dir = ContentDir::open(&config.data_dir).await?;
    let cache = Arc::new(CacheStore::new(
        config.cache_capacity.bytes(),
        Arc::clone(&time_provider) as _,
        &metrics,
    ));

    let latency = Arc::new(LatencyTracker::new());
    let resolver = Arc::new(EndpointResolver::new(family, Arc::clone(&latency)));
    let client = reqwest::Client::builder().build()?;
    let coordinator = DownloadCoordinator::new(
        DownloadConfig {
            max_concurrent_downloads: config.max_concurrent_downloads.get(),
            attempt_timeout: config.attempt_timeout.into(),
        },
        Arc::new(HttpOriginClient::new(client.clone())),
        Arc::clone(&resolver),
        cache,
        content_dir.clone(),
        Arc::clone(&time_provider) as _,
        &metrics,
    );
    let assets = Arc::new(AssetService::new(
        locator,
        coordinator,
        content_dir,
        &metrics,
    ));

    assets.update_operators().await?;
    let indexed = assets.rebuild_index().await?;
    info!(indexed, data_dir = %config.data_dir.display(), "cache ready");

    let prober = Arc::new(LatencyProber::new(
        client,
        config.attempt_timeout.into(),
        latency,
    ));
    prober.probe(resolver.probe_targets()).await;

    let background = BackgroundTasks::new();
    background.start_maintenance(Arc::clone(&assets), prober, config.maintenance_config());

    let listener = TcpListener::bind(*config.http_bind_address)
        .await
        .map_err(Error::BindAddress)?;
    let common_state = CommonServerState::new(
        Arc::clone(&metrics),
        config.node_id.as_str(),
        time_provider.now(),
    );
    let server = ServerBuilder::new(common_state)
        .assets(assets)
        .time_provider(time_provider)
        .tcp_listener(listener)
        .build();

    let frontend = serve(server, shutdown.clone());
    tokio::pin!(frontend);
    let served = tokio::select! {
        res = &mut frontend => res,
        res = wait_for_signal() => {
            res.map_err(Error::Signal)?;
            info!("shutting down");
            shutdown.cancel();
            frontend.await
        }
    };

    background.shutdown().await;
    served?;
    info!("distributor node stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::Parser;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const REQUIRED: [&str; 5] = [
        "serve",
        "--data-dir",
        "/var/lib/distributor",
        "--metadata-file",
        "metadata.json",
    ];

    fn parse(extra: &[&str]) -> Result<Config, clap::Error> {
        Config::try_parse_from(REQUIRED.iter().chain(extra))
    }

    #[test]
    fn defaults() {
        let config = parse(&["--worker-id", "7"]).unwrap();
        assert_eq!(config.node_id, "distributor-1");
        assert_eq!(config.http_bind_address.port(), 3334);
        assert_eq!(config.cache_capacity.bytes(), 10 * 1024 * 1024 * 1024);
        assert_eq!(config.max_concurrent_downloads.get(), 20);
        assert_eq!(
            Duration::from(config.attempt_timeout),
            Duration::from_secs(30)
        );
        assert_eq!(
            config.bucket_selection(),
            BucketSelection::AllByWorkerId(WorkerId::new(7))
        );
        let maintenance = config.maintenance_config();
        assert_eq!(
            maintenance.metadata_refresh_interval,
            Duration::from_secs(60)
        );
        assert_eq!(maintenance.latency_check_interval, Duration::from_secs(60));
    }

    #[test]
    fn explicit_buckets() {
        let config = parse(&[
            "--buckets",
            "1:0,1:3",
            "--cache-capacity",
            "500MB",
            "--attempt-timeout",
            "5s",
        ])
        .unwrap();
        assert_eq!(
            config.bucket_selection(),
            BucketSelection::Ids(vec!["1:0".parse().unwrap(), "1:3".parse().unwrap()])
        );
        assert_eq!(config.cache_capacity.bytes(), 500_000_000);
        assert_eq!(Duration::from(config.attempt_timeout), Duration::from_secs(5));
    }

    #[test]
    fn bucket_selection_is_required_and_exclusive() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["--buckets", "1:0", "--worker-id", "1"]).is_err());
        assert!(parse(&["--buckets", "not a bucket"]).is_err());
    }

    #[tokio::test]
    async fn family_config_is_validated() {
        let dir = tempfile::tempdir().unwrap();

        let valid = dir.path().join("valid.json");
        std::fs::write(
            &valid,
            r#"{"familyId": "eu", "areas": [{"countryCode": "DE"}], "latencyTestTargets": []}"#,
        )
        .unwrap();
        let family = load_family_config(valid).await.unwrap();
        assert_eq!(family.family_id.as_str(), "eu");

        let invalid = dir.path().join("invalid.json");
        std::fs::write(
            &invalid,
            r#"{"familyId": "eu", "areas": [{"countryCode": "Germany"}]}"#,
        )
        .unwrap();
        assert!(matches!(
            load_family_config(invalid).await,
            Err(Error::FamilyConfigInvalid(_))
        ));

        let unknown_field = dir.path().join("unknown.json");
        std::fs::write(&unknown_field, r#"{"familyId": "eu", "colour": "blue"}"#).unwrap();
        assert!(matches!(
            load_family_config(unknown_field).await,
            Err(Error::FamilyConfigParse { .. })
        ));

        assert!(matches!(
            load_family_config(dir.path().join("missing.json")).await,
            Err(Error::FamilyConfigRead { .. })
        ));
    }
}

use clap::{Args, Parser, Subcommand, ValueEnum};
use devbox_controller::commit::next_commit_history;
use devbox_controller::{
    desired_pod, desired_service, ApiClient, ClusterClient, ControllerConfig, DaemonCommitter,
    DevboxReconciler, Runner,
};
use devbox_core::{load_devbox_manifest, to_yaml};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "devbox-controller", about = "Devbox reconciliation controller")]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the devbox reconciler and the commit daemon
    Run {
        /// Kubernetes API server URL
        #[arg(long, env = "DEVBOX_API_SERVER", default_value = "http://127.0.0.1:8001")]
        api_server: String,
        /// Bearer token for the API server
        #[arg(long, env = "DEVBOX_API_TOKEN")]
        token: Option<String>,
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Print the Pod and Service a Devbox manifest would produce
    Render {
        /// Path to a Devbox manifest (YAML or JSON)
        #[arg(long)]
        file: PathBuf,
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[derive(Args)]
struct ConfigArgs {
    /// Registry committed images are pushed to
    #[arg(long, env = "DEVBOX_COMMIT_IMAGE_REGISTRY", default_value = "sealos.hub:5000")]
    registry: String,
    /// CPU request = CPU limit / rate
    #[arg(long, env = "DEVBOX_CPU_REQUEST_RATE", default_value_t = 10.0)]
    cpu_request_rate: f64,
    /// Memory request = memory limit / rate
    #[arg(long, env = "DEVBOX_MEMORY_REQUEST_RATE", default_value_t = 10.0)]
    memory_request_rate: f64,
    #[arg(long, env = "DEVBOX_EPHEMERAL_STORAGE_REQUEST", default_value = "500Mi")]
    ephemeral_storage_request: String,
    #[arg(long, env = "DEVBOX_EPHEMERAL_STORAGE_LIMIT", default_value = "10Gi")]
    ephemeral_storage_limit: String,
    /// Always start pods from spec.image
    #[arg(long, env = "DEVBOX_DEBUG_MODE")]
    debug_mode: bool,
    /// Ignore create events for devboxes older than this many seconds at startup
    #[arg(long, env = "DEVBOX_RESTART_PREDICATE_SECS", default_value_t = 60)]
    restart_predicate_secs: u64,
    #[arg(long, env = "DEVBOX_MAX_CONCURRENT_RECONCILES", default_value_t = 10)]
    max_concurrent_reconciles: usize,
    #[arg(long, env = "DEVBOX_POLL_INTERVAL_SECS", default_value_t = 2)]
    poll_interval_secs: u64,
    #[arg(long, env = "DEVBOX_RESYNC_INTERVAL_SECS", default_value_t = 30)]
    resync_interval_secs: u64,
}

impl ConfigArgs {
    fn into_config(self) -> ControllerConfig {
        ControllerConfig {
            commit_image_registry: self.registry,
            cpu_request_rate: self.cpu_request_rate,
            memory_request_rate: self.memory_request_rate,
            ephemeral_storage_request: self.ephemeral_storage_request,
            ephemeral_storage_limit: self.ephemeral_storage_limit,
            debug_mode: self.debug_mode,
            restart_predicate_window: Duration::from_secs(self.restart_predicate_secs),
            max_concurrent_reconciles: self.max_concurrent_reconciles,
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            resync_interval: Duration::from_secs(self.resync_interval_secs.max(1)),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    match cli.command {
        Commands::Run {
            api_server,
            token,
            config,
        } => run(&api_server, token, config.into_config()).await,
        Commands::Render { file, config } => render(&file, &config.into_config()),
    }
}

/// Run both reconcilers until ctrl-c
async fn run(api_server: &str, token: Option<String>, config: ControllerConfig) -> miette::Result<()> {
    info!("Starting devbox controller against {}", api_server);

    let mut api_client = ApiClient::new(api_server);
    if let Some(token) = token {
        api_client = api_client.with_token(token);
    }
    let client: Arc<dyn ClusterClient> = Arc::new(api_client);

    let shutdown = CancellationToken::new();

    let reconciler = Arc::new(DevboxReconciler::new(Arc::clone(&client), config.clone()));
    let controller = Runner::new(reconciler, Arc::clone(&client), config.clone());
    let controller_token = shutdown.clone();
    let controller_handle = tokio::spawn(async move {
        if let Err(e) = controller.run(controller_token).await {
            error!("Devbox reconciler error: {}", e);
        }
    });

    let committer = Arc::new(DaemonCommitter::new(Arc::clone(&client), config.clone()));
    let daemon = Runner::new(committer, Arc::clone(&client), config);
    let daemon_token = shutdown.clone();
    let daemon_handle = tokio::spawn(async move {
        if let Err(e) = daemon.run(daemon_token).await {
            error!("Commit daemon error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;

    info!("Shutting down gracefully...");
    shutdown.cancel();

    let shutdown_timeout = Duration::from_secs(5);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = tokio::join!(controller_handle, daemon_handle);
    })
    .await;

    info!("Shutdown complete");
    Ok(())
}

/// Print the desired Pod and Service for a manifest
fn render(file: &std::path::Path, config: &ControllerConfig) -> miette::Result<()> {
    let devbox = load_devbox_manifest(file)?;
    let history = next_commit_history(&config.commit_image_registry, &devbox);

    let pod = desired_pod(&devbox, &history, config)?;
    let service = desired_service(&devbox);

    println!("{}---\n{}", to_yaml(&pod)?, to_yaml(&service)?);
    Ok(())
}

use clap::{ArgGroup, Parser, ValueEnum};
use speakerfix_core::PodScope;
use speakerfix_runtime::{
    ApiClient, EnqueueHandler, PodEventHandler, PodWatcher, PodWatcherConfig, RepairController,
    RepairControllerConfig, SpeakerSelector, WorkQueue,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Environment variable older deployments use for the application label
const LEGACY_APP_LABEL_ENV: &str = "PLEX_APP_LABEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "speakerfix",
    about = "Restarts load-balancer speaker pods that started before the workload they announce became ready"
)]
#[command(group(ArgGroup::new("scope").args(["app_label", "pod_name"]).multiple(false)))]
struct Cli {
    /// Value of the application label selecting workload pods
    #[arg(long, env = "APP_LABEL")]
    app_label: Option<String>,
    /// Label key compared against --app-label
    #[arg(long, env = "APP_LABEL_KEY", default_value = "app")]
    app_label_key: String,
    /// Watch a single workload pod by name instead of filtering by label
    #[arg(long, env = "WATCH_POD_NAME")]
    pod_name: Option<String>,
    /// Namespace of the workload pods
    #[arg(long, env = "KUBE_NAMESPACE", default_value = "default")]
    namespace: String,
    /// Namespace the speaker daemon runs in
    #[arg(long, env = "SPEAKER_NAMESPACE", default_value = "kube-system")]
    speaker_namespace: String,
    /// Value of the speaker pods' `app` label
    #[arg(long, env = "SPEAKER_APP", default_value = "metallb")]
    speaker_app: String,
    /// Value of the speaker pods' `component` label
    #[arg(long, env = "SPEAKER_COMPONENT", default_value = "speaker")]
    speaker_component: String,
    /// Log stale speakers without deleting them
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,
    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,
}

impl Cli {
    /// Resolve the workload scope, honouring the legacy label variable
    fn scope(&self, legacy_app_label: Option<String>) -> miette::Result<PodScope> {
        let scope = match (&self.app_label, &self.pod_name) {
            (_, Some(name)) => PodScope::ByName(name.clone()),
            (Some(value), None) => PodScope::ByLabel {
                key: self.app_label_key.clone(),
                value: value.clone(),
            },
            (None, None) => match legacy_app_label {
                Some(value) => PodScope::ByLabel {
                    key: self.app_label_key.clone(),
                    value,
                },
                None => {
                    return Err(miette::miette!(
                        help = "Set --app-label (APP_LABEL) or --pod-name (WATCH_POD_NAME)",
                        "No workload scope configured"
                    ))
                }
            },
        };
        scope.validate()?;
        Ok(scope)
    }

    fn speaker_selector(&self) -> SpeakerSelector {
        SpeakerSelector {
            namespace: self.speaker_namespace.clone(),
            app: self.speaker_app.clone(),
            component: self.speaker_component.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_format);

    let scope = cli.scope(std::env::var(LEGACY_APP_LABEL_ENV).ok())?;

    info!(
        "Starting speakerfix for pods with {} in namespace '{}'",
        scope, cli.namespace
    );

    let api_client = ApiClient::try_default().await?;

    info!("Connected to Kubernetes cluster");

    let token = CancellationToken::new();
    let queue = WorkQueue::default();

    // 1. Spawn pod watch
    let watcher = PodWatcher::new(
        api_client.client(),
        PodWatcherConfig {
            namespace: cli.namespace.clone(),
            scope: scope.clone(),
        },
    );
    let store = watcher.store();
    let handler: Arc<dyn PodEventHandler> = Arc::new(EnqueueHandler::new(queue.clone()));
    let watch_token = token.clone();
    let watch_handle = tokio::spawn(async move {
        if let Err(e) = watcher.run(handler, watch_token).await {
            error!("Pod watch error: {}", e);
        }
    });

    // 2. Spawn repair controller
    let controller = RepairController::new(
        Arc::new(store),
        Arc::new(api_client),
        queue,
        RepairControllerConfig {
            scope,
            speaker: cli.speaker_selector(),
            dry_run: cli.dry_run,
        },
    );
    let controller_token = token.clone();
    let controller_handle = tokio::spawn(async move {
        if let Err(e) = controller.run(controller_token).await {
            error!("Repair controller error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;

    info!("Shutting down gracefully...");
    token.cancel();

    let shutdown_timeout = std::time::Duration::from_secs(5);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = tokio::join!(watch_handle, controller_handle);
    })
    .await;

    info!("Shutdown complete");

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["speakerfix"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_label_scope() {
        let cli = parse(&["--app-label", "plex", "--namespace", "media"]);
        assert_eq!(cli.scope(None).unwrap(), PodScope::app_label("plex"));
        assert_eq!(cli.namespace, "media");
        assert_eq!(cli.speaker_selector(), SpeakerSelector::default());
    }

    #[test]
    fn test_name_scope() {
        let cli = parse(&["--pod-name", "web-1"]);
        assert_eq!(
            cli.scope(None).unwrap(),
            PodScope::ByName("web-1".to_string())
        );
    }

    #[test]
    fn test_scope_args_are_exclusive() {
        let result = Cli::try_parse_from([
            "speakerfix",
            "--app-label",
            "plex",
            "--pod-name",
            "web-1",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_legacy_label_fallback() {
        let cli = parse(&[]);
        assert_eq!(
            cli.scope(Some("plex".to_string())).unwrap(),
            PodScope::app_label("plex")
        );
        assert!(cli.scope(None).is_err());
    }

    #[test]
    fn test_speaker_overrides() {
        let cli = parse(&[
            "--app-label",
            "plex",
            "--speaker-namespace",
            "metallb-system",
            "--speaker-component",
            "announcer",
            "--log-format",
            "json",
        ]);
        let selector = cli.speaker_selector();
        assert_eq!(selector.namespace, "metallb-system");
        assert_eq!(selector.app, "metallb");
        assert_eq!(selector.component, "announcer");
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}

use anyhow::Result;
use clap::Parser;
use console::style;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shortform_transcriptor::output::{self, SpinnerProgress};
use shortform_transcriptor::providers::EnvCredentials;
use shortform_transcriptor::transcribe::{LogSink, NoopProgress, ProgressSink};
use shortform_transcriptor::utils::{normalize_url, video_id};
use shortform_transcriptor::{CancellationHandle, Cli, Commands, Config, Orchestrator, TranscriptorError};

fn init_tracing(cli: &Cli) {
    let default_filter = if cli.verbose {
        "shortform_transcriptor=debug"
    } else {
        "shortform_transcriptor=info"
    };
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    let json = cli.json_logs.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr));
    let text = (!cli.json_logs).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry().with(filter).with(json).with(text).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Transcribe {
            url,
            tier,
            format,
            output,
        } => {
            let spinner = (!cli.quiet).then(|| Arc::new(SpinnerProgress::new()));
            let progress: Arc<dyn ProgressSink> = match &spinner {
                Some(spinner) => spinner.clone() as Arc<dyn ProgressSink>,
                None => Arc::new(NoopProgress),
            };
            let orchestrator = Orchestrator::from_config(&config, Arc::new(LogSink), progress)
                .map_err(|e| TranscriptorError::ConfigError(format!("{e:#}")))?;

            let cancel = CancellationHandle::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::warn!("interrupt_received");
                        cancel.cancel();
                    }
                });
            }

            tracing::info!(url = %url, tier = %tier, "transcription_requested");
            let result = orchestrator.acquire_transcript(&url, tier, cancel).await;

            if let Some(spinner) = &spinner {
                spinner.finish();
            }

            match output {
                Some(path) => {
                    let label = normalize_url(&url)
                        .map(|normalized| video_id(&normalized))
                        .unwrap_or_else(|_| "transcript".to_string());
                    let path = output::resolve_output_path(path, &label, &format);
                    output::save_to_file(&result, &path, &format)
                        .map_err(|e| TranscriptorError::FileError(format!("{e:#}")))?;
                    println!("Transcript saved to: {}", path.display());
                }
                None => {
                    output::print_to_console(&result, &format)?;
                }
            }

            if !cli.quiet {
                output::print_summary(&result);
            }

            if let Some(kind) = result.kind() {
                return Err(TranscriptorError::AcquisitionFailed(kind).into());
            }
        }
        Commands::Providers { tier } => {
            let registry = config.registry();
            println!("Provider order for the {} tier:", tier);
            for (descriptor, reason) in registry.explain(tier, &EnvCredentials) {
                let status = match reason {
                    None => style("usable".to_string()).green(),
                    Some(reason) => style(format!("skipped ({})", reason.as_str())).yellow(),
                };
                println!(
                    "  {:>3}  {} [{}] {}",
                    descriptor.priority, descriptor.id, descriptor.kind, status
                );
            }
        }
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                println!("Configuration file: {}", Config::config_path(cli.config.as_deref())?.display());
                println!("Edit it to add providers, tune retries, or change the automation target.");
            }
        }
    }

    Ok(())
}

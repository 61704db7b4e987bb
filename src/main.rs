use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use archhub_watch::api::HttpBackend;
use archhub_watch::auth;
use archhub_watch::config;
use archhub_watch::model::{Id, Playback};
use archhub_watch::notify::{LogNotifier, Notifier, StdoutNotifier};
use archhub_watch::poller::Poller;
use archhub_watch::resolver::GatedResolver;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Watch for new job applications until Ctrl-C
    Watch {
        /// Override poller.interval_ms from the config
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Emit notifications as log events instead of stdout lines
        #[arg(long)]
        log_only: bool,
    },
    /// Resolve a lesson and print its playback state
    Play {
        #[arg(long)]
        course: String,
        #[arg(long)]
        lesson: String,
    },
    /// Enroll in a course
    Enroll {
        #[arg(long)]
        course: String,
    },
    /// Print an example config file
    ExampleConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if let Command::ExampleConfig = args.command {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let backend = Arc::new(HttpBackend::from_config(&cfg).context("failed to build HTTP client")?);
    let credentials = auth::from_config(&cfg);

    match args.command {
        Command::Watch {
            interval_ms,
            log_only,
        } => {
            let interval = interval_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| cfg.poll_interval());
            let notifier: Arc<dyn Notifier> = if log_only {
                Arc::new(LogNotifier)
            } else {
                Arc::new(StdoutNotifier)
            };
            let poller = Poller::new(backend, credentials, notifier, cfg.poller.start_from);
            poller.start(interval).await?;
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            poller.stop().await;
            let snapshot = poller.snapshot().await;
            info!(
                delivered = snapshot.delivered,
                cursor = ?snapshot.cursor,
                "watch finished"
            );
        }
        Command::Play { course, lesson } => {
            let resolver = GatedResolver::load(backend, credentials, &Id::new(course)).await?;
            resolver.select(&Id::new(lesson)).await?;
            print_playback(&resolver.current().await);
        }
        Command::Enroll { course } => {
            let resolver = GatedResolver::load(backend, credentials, &Id::new(course)).await?;
            let enrollment = resolver.enroll().await?;
            println!(
                "enrolled in \"{}\" ({}){}",
                resolver.course().title,
                enrollment.course_id,
                enrollment
                    .enrolled_at
                    .map(|at| format!(" at {}", at.format("%Y-%m-%d %H:%M")))
                    .unwrap_or_default()
            );
        }
        Command::ExampleConfig => {}
    }

    Ok(())
}

fn print_playback(playback: &Playback) {
    match playback {
        Playback::Playable { lesson_id, url } => println!("lesson {}: {}", lesson_id, url),
        Playback::Locked(info) => println!(
            "lesson {} is locked: enroll in \"{}\" for {:.2} to unlock {} lessons ({} free previews)",
            info.lesson_id, info.course_title, info.price, info.total_lessons, info.free_lessons
        ),
        Playback::Unavailable { lesson_id } => println!("lesson {}: no content yet", lesson_id),
        Playback::Idle | Playback::Resolving { .. } => println!("no lesson resolved"),
    }
}

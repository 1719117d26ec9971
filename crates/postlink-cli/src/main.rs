use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use postlink_core::{JobName, JobState};
use postlink_storage::{PgStore, ReconciliationStore};
use postlink_sync::{build_scheduler, pipelines_from_config, JobRunner, Pipelines, SyncConfig};
use postlink_web::AppState;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "postlink")]
#[command(about = "Links social posts to the blog articles they promote")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the admin API (and run the scheduler when enabled).
    Serve,
    /// Create or upgrade the database schema.
    Migrate,
    /// Run one job in the foreground.
    Run {
        #[arg(value_parser = parse_job)]
        job: JobName,
    },
    /// Pin a post to an article by hand.
    MapPost {
        #[arg(long)]
        post_id: String,
        #[arg(long)]
        blog_url: String,
        #[arg(long)]
        title: Option<String>,
    },
    /// Run only the cron scheduler until interrupted.
    Schedule,
}

fn parse_job(raw: &str) -> Result<JobName, String> {
    raw.parse::<JobName>().map_err(|e| e.to_string())
}

async fn connect(config: &SyncConfig) -> Result<Arc<dyn ReconciliationStore>> {
    let url = config.require_database_url()?;
    let store = PgStore::connect(url).await.context("connecting to postgres")?;
    store.ensure_schema().await.context("ensuring schema")?;
    Ok(Arc::new(store))
}

async fn pipelines(config: SyncConfig) -> Result<Arc<Pipelines>> {
    let store = connect(&config).await?;
    Ok(Arc::new(pipelines_from_config(config, store)?))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("postlink=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let port = config.web_port;
            let pipelines = pipelines(config).await?;
            let state = AppState::new(pipelines);
            let scheduler = build_scheduler(state.runner.clone()).await?;
            if let Some(sched) = &scheduler {
                sched.start().await.context("starting scheduler")?;
                info!("scheduler started");
            }
            postlink_web::serve(state, port).await?;
        }
        Commands::Migrate => {
            connect(&config).await?;
            println!("schema is up to date");
        }
        Commands::Run { job } => {
            let runner = JobRunner::new(pipelines(config).await?);
            let status = runner.run_now(job).await?;
            let output = status.output.unwrap_or_default();
            if status.status == JobState::Error {
                bail!("{job} failed: {output}");
            }
            println!("{job}: {output}");
        }
        Commands::MapPost {
            post_id,
            blog_url,
            title,
        } => {
            let store = connect(&config).await?;
            let found = store
                .update_post_mapping(&post_id, &blog_url, title.as_deref(), true)
                .await?;
            if !found {
                bail!("no post with id {post_id}");
            }
            println!("mapped {post_id} -> {blog_url}");
        }
        Commands::Schedule => {
            let config = SyncConfig {
                scheduler_enabled: true,
                ..config
            };
            let runner = JobRunner::new(pipelines(config).await?);
            let Some(mut sched) = build_scheduler(runner).await? else {
                bail!("scheduler could not be built");
            };
            sched.start().await.context("starting scheduler")?;
            info!("scheduler running; press ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}

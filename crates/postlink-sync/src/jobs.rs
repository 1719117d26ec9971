//! Background execution of the pipelines and the single status row that
//! reports on them.
//!
//! The status row is advisory: two triggers in quick succession both run, and
//! the row reflects whichever wrote last.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use postlink_adapters::{OcrEngine, PageRenderer};
use postlink_core::{JobName, JobState, JobStatus};
use postlink_storage::{HttpGet, ObjectStore, ReconciliationStore, StoreError};
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::articles::ArticleIngestor;
use crate::matching::run_matching;
use crate::posts::PostIngestor;
use crate::timestamps::TimestampReconciler;
use crate::SyncConfig;

/// Reads and writes the job status row.
#[derive(Clone)]
pub struct JobTracker {
    store: Arc<dyn ReconciliationStore>,
}

impl JobTracker {
    pub fn new(store: Arc<dyn ReconciliationStore>) -> Self {
        Self { store }
    }

    /// Marks `job` running and clears the previous output.
    pub async fn start(&self, job: JobName) -> Result<JobStatus, StoreError> {
        let status = JobStatus {
            status: JobState::Running,
            script_name: Some(job.as_str().to_string()),
            start_time: Some(Utc::now()),
            end_time: None,
            output: None,
        };
        self.store.set_job_status(&status).await?;
        Ok(status)
    }

    /// Records a terminal state, keeping the name and start time of the run.
    pub async fn finish(&self, state: JobState, output: String) -> Result<JobStatus, StoreError> {
        let mut status = self.store.job_status().await?;
        status.status = state;
        status.end_time = Some(Utc::now());
        status.output = Some(output);
        self.store.set_job_status(&status).await?;
        Ok(status)
    }

    pub async fn current(&self) -> Result<JobStatus, StoreError> {
        self.store.job_status().await
    }
}

/// Every collaborator a pipeline may need, built once and shared.
pub struct Pipelines {
    config: SyncConfig,
    store: Arc<dyn ReconciliationStore>,
    http: Arc<dyn HttpGet>,
    objects: Arc<dyn ObjectStore>,
    ocr: Option<Arc<dyn OcrEngine>>,
    renderer: Option<Arc<dyn PageRenderer>>,
}

impl Pipelines {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn ReconciliationStore>,
        http: Arc<dyn HttpGet>,
        objects: Arc<dyn ObjectStore>,
        ocr: Option<Arc<dyn OcrEngine>>,
        renderer: Option<Arc<dyn PageRenderer>>,
    ) -> Self {
        Self {
            config,
            store,
            http,
            objects,
            ocr,
            renderer,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn ReconciliationStore> {
        Arc::clone(&self.store)
    }

    /// Runs one pipeline to completion and returns its summary line.
    pub async fn run(&self, job: JobName) -> Result<String> {
        let store = self.store.as_ref();
        let summary = match job {
            JobName::IngestArticles => ArticleIngestor::new(
                self.http.as_ref(),
                store,
                &self.config.sitemap_url,
                &self.config.target_domain,
            )
            .run()
            .await?
            .to_string(),
            JobName::IngestPosts => {
                PostIngestor::new(self.http.as_ref(), store, self.objects.as_ref(), &self.config)
                    .run()
                    .await?
                    .to_string()
            }
            JobName::RunMatching => run_matching(store, self.ocr.as_deref()).await?.to_string(),
            JobName::SyncTimestamps => {
                let renderer = self
                    .renderer
                    .as_deref()
                    .ok_or_else(|| anyhow!("BROWSERLESS_URL is not set"))?;
                TimestampReconciler::new(store, renderer)
                    .run(Utc::now())
                    .await?
                    .to_string()
            }
        };
        Ok(summary)
    }
}

/// Starts pipelines in the background and records how they end.
#[derive(Clone)]
pub struct JobRunner {
    tracker: JobTracker,
    pipelines: Arc<Pipelines>,
}

impl JobRunner {
    pub fn new(pipelines: Arc<Pipelines>) -> Self {
        Self {
            tracker: JobTracker::new(pipelines.store()),
            pipelines,
        }
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    /// Marks `job` running and returns as soon as it is spawned. Pipeline
    /// failures never reach the caller; they end up in the status row.
    pub async fn trigger(&self, job: JobName) -> Result<JoinHandle<JobStatus>, StoreError> {
        self.tracker.start(job).await?;
        let runner = self.clone();
        Ok(tokio::spawn(async move { runner.execute(job).await }))
    }

    /// Runs `job` on the current task and returns the final status.
    pub async fn run_now(&self, job: JobName) -> Result<JobStatus, StoreError> {
        self.tracker.start(job).await?;
        Ok(self.execute(job).await)
    }

    async fn execute(&self, job: JobName) -> JobStatus {
        let run_id = Uuid::new_v4();
        let pipelines = Arc::clone(&self.pipelines);
        let span = info_span!("job", job = job.as_str(), %run_id);

        info!(parent: &span, "job started");
        // Own task so a panic surfaces as a JoinError instead of unwinding here.
        let outcome = tokio::spawn(async move { pipelines.run(job).await }.instrument(span.clone())).await;

        let (state, output) = match outcome {
            Ok(Ok(summary)) => (JobState::Completed, summary),
            Ok(Err(err)) => (JobState::Error, format!("{err:#}")),
            Err(join_err) => (JobState::Error, format!("job aborted: {join_err}")),
        };
        match state {
            JobState::Completed => info!(parent: &span, output = output.as_str(), "job completed"),
            _ => error!(parent: &span, output = output.as_str(), "job failed"),
        }

        match self.tracker.finish(state, output.clone()).await {
            Ok(status) => status,
            Err(err) => {
                error!(parent: &span, error = %err, "failed to record job outcome");
                JobStatus {
                    status: state,
                    script_name: Some(job.as_str().to_string()),
                    start_time: None,
                    end_time: Some(Utc::now()),
                    output: Some(output),
                }
            }
        }
    }
}

/// Cron-driven ingestion and matching, or `None` when scheduling is disabled.
pub async fn build_scheduler(runner: JobRunner) -> Result<Option<JobScheduler>> {
    let config = runner.pipelines.config().clone();
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let plans: [(&str, &[JobName]); 2] = [
        (
            config.cron_ingest.as_str(),
            &[JobName::IngestArticles, JobName::IngestPosts],
        ),
        (config.cron_match.as_str(), &[JobName::RunMatching]),
    ];

    for (cron, jobs) in plans {
        let jobs = jobs.to_vec();
        let runner = runner.clone();
        let job = Job::new_async(cron, move |_uuid, _l| {
            let runner = runner.clone();
            let jobs = jobs.clone();
            Box::pin(async move {
                for job in jobs {
                    if let Err(err) = runner.run_now(job).await {
                        error!(job = job.as_str(), error = %err, "scheduled job could not start");
                    }
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        info!(cron, "scheduled jobs registered");
    }
    Ok(Some(sched))
}

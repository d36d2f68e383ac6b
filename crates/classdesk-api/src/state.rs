//! Application state wiring all services together.
//!
//! AppState pins the generic core services and workflows to the SQLite
//! repositories and the configured HTTP collaborators.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use classdesk_core::grading::{AnalyzeSubmissionWorkflow, GradingService};
use classdesk_core::import::{ImportService, ProcessImportWorkflow};
use classdesk_core::schedule::{ScheduleChangedWorkflow, SessionCancelledWorkflow};
use classdesk_core::workflow::{BatchProcessor, WorkflowEngine};
use classdesk_infra::config::{api_key_from_env, load_config, resolve_data_dir};
use classdesk_infra::grading::HttpGradingAnalyzer;
use classdesk_infra::mail::ConfiguredMailer;
use classdesk_infra::sqlite::pool::database_url;
use classdesk_infra::sqlite::{
    DatabasePool, SqliteDirectory, SqliteGradingRepository, SqliteImportRepository,
    SqliteWorkflowRepository,
};
use classdesk_types::config::ClassdeskConfig;

/// Concrete type aliases for the generics pinned to infra implementations.
pub type ConcreteEngine = WorkflowEngine<SqliteWorkflowRepository>;

pub type ConcreteGradingService = GradingService<SqliteGradingRepository, SqliteWorkflowRepository>;

pub type ConcreteImportService =
    ImportService<SqliteImportRepository, SqliteDirectory, SqliteWorkflowRepository>;

/// Shared application state used by every CLI command.
#[derive(Clone)]
pub struct AppState {
    pub config: ClassdeskConfig,
    pub data_dir: PathBuf,
    pub engine: Arc<ConcreteEngine>,
    pub workflow_repo: Arc<SqliteWorkflowRepository>,
    pub grading_repo: Arc<SqliteGradingRepository>,
    pub import_repo: Arc<SqliteImportRepository>,
    pub directory: Arc<SqliteDirectory>,
    pub grading_service: Arc<ConcreteGradingService>,
    pub import_service: Arc<ConcreteImportService>,
}

impl AppState {
    /// Initialize the application state: load config, connect to DB, wire
    /// services. Workflows are not registered; see [`AppState::register_workflows`].
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();

        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let config = load_config(&data_dir).await;

        let db_url = database_url(&data_dir);
        let db_pool = DatabasePool::new(&db_url)
            .await
            .with_context(|| format!("failed to open database {db_url}"))?;

        let workflow_repo = Arc::new(SqliteWorkflowRepository::new(db_pool.clone()));
        let grading_repo = Arc::new(SqliteGradingRepository::new(db_pool.clone()));
        let import_repo = Arc::new(SqliteImportRepository::new(db_pool.clone()));
        let directory = Arc::new(SqliteDirectory::new(db_pool.clone()));

        let engine = Arc::new(WorkflowEngine::new(Arc::clone(&workflow_repo), &config.engine));

        let grading_service = Arc::new(GradingService::new(
            Arc::clone(&grading_repo),
            Arc::clone(engine.bus()),
        ));
        let import_service = Arc::new(ImportService::new(
            Arc::clone(&import_repo),
            Arc::clone(&directory),
            Arc::clone(engine.bus()),
        ));

        tracing::debug!(data_dir = %data_dir.display(), "application state ready");

        Ok(Self {
            config,
            data_dir,
            engine,
            workflow_repo,
            grading_repo,
            import_repo,
            directory,
            grading_service,
            import_service,
        })
    }

    /// Build the analyzer and mailer from config and subscribe every
    /// workflow to its trigger event in this process.
    pub fn register_workflows(&self) -> anyhow::Result<()> {
        let grading = &self.config.grading;
        let api_key = api_key_from_env(&grading.api_key_env)
            .context("grading analyzer needs an API key")?;
        let analyzer = Arc::new(
            HttpGradingAnalyzer::new(api_key, grading).context("failed to build grading analyzer")?,
        );

        let mailer = Arc::new(
            ConfiguredMailer::from_config(&self.config.mail).context("failed to build mailer")?,
        );
        tracing::info!(
            analyzer_model = analyzer.model(),
            mail_backend = mailer.backend(),
            "workflow collaborators ready"
        );

        let import = &self.config.csv_import;
        let notifications = &self.config.notifications;

        self.engine.register(AnalyzeSubmissionWorkflow::new(
            Arc::clone(&self.grading_repo),
            analyzer,
        ))?;
        self.engine.register(ProcessImportWorkflow::new(
            Arc::clone(&self.import_repo),
            Arc::clone(&self.directory),
            Arc::clone(&mailer),
            BatchProcessor::new(import.batch_size, import.batch_delay()),
        ))?;
        self.engine.register(ScheduleChangedWorkflow::new(
            Arc::clone(&self.directory),
            Arc::clone(&mailer),
            notifications.debounce(),
            BatchProcessor::new(notifications.batch_size, notifications.batch_delay()),
        ))?;
        self.engine.register(SessionCancelledWorkflow::new(
            Arc::clone(&self.directory),
            mailer,
            BatchProcessor::new(notifications.batch_size, notifications.batch_delay()),
        ))?;

        Ok(())
    }
}

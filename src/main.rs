use std::{path::PathBuf, process, sync::Arc};

use clap::Parser;
use medtrack::{
    application::{
        error::AppError,
        export::ExportPipeline,
        guard::OperationFlags,
        mutation::MutationService,
        query::QueryService,
        signing::SigningService,
        transport::Transport,
    },
    cache::{CacheConfig, CacheStore, EventQueue, Invalidator, SubscriptionRegistry},
    config::{self, CliArgs, Command, LoadError, Settings},
    infra::{
        archive::ZipArchiveWriter, client::HttpTransport, error::InfraError,
        render::JsonRenderer, telemetry,
    },
};
use thiserror::Error;
use tracing::{Dispatch, Level, dispatcher, error};
use tracing_subscriber::fmt as tracing_fmt;

mod commands;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    App(#[from] AppError),
    #[error("failed to read input file {path}: {source}")]
    InputFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    OutputFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to render output: {0}")]
    Output(#[from] serde_json::Error),
}

/// Services shared by every command.
pub struct AppContext {
    pub queries: QueryService,
    pub exports: ExportPipeline,
    pub signing: SigningService,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_error(&error);
        process::exit(1);
    }
}

fn report_error(error: &CliError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "command failed");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "command failed");
    });
}

async fn run() -> Result<(), CliError> {
    let args = CliArgs::parse();
    let settings = config::load(&args)?;
    telemetry::init(&settings.logging)?;

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::from_settings(&settings.api)?);
    let app = build_application_context(&settings, transport);

    match args.command {
        Command::Get(get) => commands::get(&app, get).await,
        Command::Export(export) => commands::export(&app, export).await,
        Command::Sign(sign) => commands::sign(&app, sign).await,
    }
}

fn build_application_context(settings: &Settings, transport: Arc<dyn Transport>) -> AppContext {
    let store = Arc::new(CacheStore::new(CacheConfig::from(&settings.cache)));
    let invalidator = Arc::new(Invalidator::new(
        store,
        Arc::new(SubscriptionRegistry::new()),
        Arc::new(EventQueue::new()),
    ));

    let queries = QueryService::new(Arc::clone(&transport), Arc::clone(&invalidator));
    let mutations = MutationService::new(transport, invalidator);

    let flags = OperationFlags::new();
    let exports = ExportPipeline::new(
        flags.clone(),
        settings.bulk.export_concurrency.get(),
        Arc::new(JsonRenderer),
        Arc::new(ZipArchiveWriter::default()),
    );
    let signing = SigningService::new(
        mutations,
        flags,
        settings.bulk.sign_concurrency.get(),
    );

    AppContext {
        queries,
        exports,
        signing,
    }
}

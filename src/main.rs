use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use contract_pipeline::analysis::{AnalysisInput, AnalysisStage};
use contract_pipeline::api::{ApiRequest, ApiResponse, ApiRouter};
use contract_pipeline::config::AppConfig;
use contract_pipeline::extraction::{ExtractionInput, TextExtractionStage};
use contract_pipeline::intake::IntakeStage;
use contract_pipeline::local_extractor::LocalTextExtractor;
use contract_pipeline::logging::{init_logging, OperationTimer};
use contract_pipeline::ollama::OllamaClient;
use contract_pipeline::orchestrator::LocalOrchestrator;
use contract_pipeline::query::QueryService;
use contract_pipeline::services::{ExecutionInput, ObjectRef, PipelineServices};
use contract_pipeline::storage::FsObjectStorage;
use contract_pipeline::validation::InputValidator;
use contract_pipeline::{ContractStore, Database, NlpProcessor, PlatformError};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a contract, upload the file and optionally run the pipeline
    Upload {
        /// Owner identity
        #[arg(short, long)]
        user: String,

        /// File to upload
        #[arg(short, long)]
        file: PathBuf,

        /// MIME type (guessed from the extension when omitted)
        #[arg(long)]
        content_type: Option<String>,

        /// Only register and upload; do not run extraction and analysis
        #[arg(long)]
        no_run: bool,
    },
    /// Run text extraction for a contract
    Extract {
        /// Contract identifier
        #[arg(short, long)]
        contract: String,
    },
    /// Run AI analysis on a contract's extracted text
    Analyze {
        /// Contract identifier
        #[arg(short, long)]
        contract: String,
    },
    /// Run extraction then analysis for a contract
    Run {
        /// Contract identifier
        #[arg(short, long)]
        contract: String,
    },
    /// Show a contract
    Get {
        /// Caller identity
        #[arg(short, long)]
        user: String,

        /// Contract identifier
        #[arg(short, long)]
        contract: String,
    },
    /// Show a contract's analysis
    Analysis {
        /// Caller identity
        #[arg(short, long)]
        user: String,

        /// Contract identifier
        #[arg(short, long)]
        contract: String,
    },
    /// List the caller's contracts
    List {
        /// Caller identity
        #[arg(short, long)]
        user: String,

        /// Page size
        #[arg(short, long)]
        limit: Option<String>,

        /// Only contracts in this status
        #[arg(short, long)]
        status: Option<String>,

        /// Continuation token from a previous page
        #[arg(long)]
        last_key: Option<String>,
    },
}

struct App {
    config: AppConfig,
    store: Arc<Database>,
    storage: Arc<FsObjectStorage>,
    router: ApiRouter,
    extraction: Arc<TextExtractionStage>,
    analysis: Arc<AnalysisStage>,
    orchestrator: LocalOrchestrator,
}

impl App {
    fn build(config: AppConfig) -> Result<Self> {
        let store = Arc::new(Database::new(Path::new(&config.store.path))?);
        let storage = Arc::new(FsObjectStorage::new(&config.storage.root_dir));
        let extractor = LocalTextExtractor::new(storage.clone(), config.extraction.result_page_size);

        let services = PipelineServices {
            store: store.clone(),
            storage: storage.clone(),
            extractor: Arc::new(extractor),
            analyzer: Arc::new(OllamaClient::new(&config.analysis)?),
            language: Arc::new(NlpProcessor::new()?),
        };

        let extraction = Arc::new(TextExtractionStage::new(&services, config.extraction.clone()));
        let analysis = Arc::new(AnalysisStage::new(&services, config.analysis.clone()));
        let orchestrator = LocalOrchestrator::new(extraction.clone(), analysis.clone());

        // The CLI awaits the pipeline itself, so intake runs without an orchestrator
        let intake = Arc::new(IntakeStage::new(
            store.clone(),
            storage.clone(),
            config.storage.clone(),
            config.upload.clone(),
        ));
        let router = ApiRouter::new(intake, QueryService::new(store.clone(), config.api.clone()));

        Ok(Self {
            config,
            store,
            storage,
            router,
            extraction,
            analysis,
            orchestrator,
        })
    }

    fn object_for(&self, storage_key: &str) -> ObjectRef {
        ObjectRef::new(self.config.storage.bucket.clone(), storage_key)
    }

    async fn load(&self, contract: &str) -> Result<contract_pipeline::ContractRecord> {
        let contract_id = InputValidator::parse_contract_id(contract)?;
        self.store
            .get(contract_id)
            .await?
            .ok_or_else(|| PlatformError::NotFound(contract.to_string()).into())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging; the guard flushes the log file on exit
    let log_file = config.logging.file_path.as_deref().map(Path::new);
    let _guard = init_logging(
        Some(&config.get_log_level()),
        log_file,
        config.logging.format == "json",
    )?;

    info!("Starting contract-pipeline");

    // Parse command line arguments
    let cli = Cli::parse();
    let app = App::build(config)?;

    let result = match &cli.command {
        Commands::Upload {
            user,
            file,
            content_type,
            no_run,
        } => upload(&app, user, file, content_type.as_deref(), *no_run).await,
        Commands::Extract { contract } => extract(&app, contract).await,
        Commands::Analyze { contract } => analyze(&app, contract).await,
        Commands::Run { contract } => run(&app, contract).await,
        Commands::Get { user, contract } => {
            let request = ApiRequest::get(&format!("/contracts/{contract}"), Some(user));
            respond(&app, &request).await
        }
        Commands::Analysis { user, contract } => {
            let request = ApiRequest::get(&format!("/contracts/{contract}/analysis"), Some(user));
            respond(&app, &request).await
        }
        Commands::List {
            user,
            limit,
            status,
            last_key,
        } => {
            let mut request = ApiRequest::get("/contracts", Some(user));
            for (key, value) in [("limit", limit), ("status", status), ("last_key", last_key)] {
                if let Some(value) = value {
                    request = request.with_query(key, value);
                }
            }
            respond(&app, &request).await
        }
    };

    app.store.flush().await?;
    result
}

#[allow(clippy::print_stdout)]
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a stage result, or its error envelope
fn report<T: Serialize>(result: contract_pipeline::Result<T>) -> Result<()> {
    match result {
        Ok(outcome) => print_json(&outcome),
        Err(err) => {
            print_json(&ApiResponse::from_error(&err, None))?;
            Err(anyhow!(err))
        }
    }
}

async fn respond(app: &App, request: &ApiRequest) -> Result<()> {
    let response = app.router.handle(request).await;
    print_json(&response)?;
    if response.status_code >= 400 {
        return Err(anyhow!("Request failed with status {}", response.status_code));
    }
    Ok(())
}

fn guess_content_type(file: &Path) -> &'static str {
    match file
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("doc") => "application/msword",
        _ => "application/octet-stream",
    }
}

async fn upload(app: &App, user: &str, file: &Path, content_type: Option<&str>, no_run: bool) -> Result<()> {
    let timer = OperationTimer::new("upload");
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("{} has no file name", file.display()))?;
    let content_type = content_type.unwrap_or_else(|| guess_content_type(file));

    let request = ApiRequest {
        method: "POST".to_string(),
        path: "/contracts".to_string(),
        body: Some(serde_json::to_string(&serde_json::json!({
            "filename": filename,
            "file_size": bytes.len(),
            "content_type": content_type,
        }))?),
        user_id: Some(user.to_string()),
        request_id: Uuid::new_v4().to_string(),
        ..ApiRequest::default()
    };
    let response = app.router.handle(&request).await;
    print_json(&response)?;
    if response.status_code != 201 {
        return Err(anyhow!("Upload rejected with status {}", response.status_code));
    }

    let upload_url = response.body["upload_url"]
        .as_str()
        .ok_or_else(|| anyhow!("Upload response carries no upload URL"))?;
    let object = app
        .storage
        .put_with_credential(upload_url, content_type, &bytes)
        .await?;
    let contract_id: Uuid = serde_json::from_value(response.body["contract_id"].clone())?;
    info!(%contract_id, key = %object.key, "File uploaded");
    timer.finish();

    if no_run {
        return Ok(());
    }
    let input = ExecutionInput {
        contract_id,
        storage_bucket: object.bucket,
        storage_key: object.key,
    };
    report(app.orchestrator.run(&input).await)
}

async fn extract(app: &App, contract: &str) -> Result<()> {
    let record = app.load(contract).await?;
    let input = ExtractionInput {
        contract_id: record.contract_id,
        object: app.object_for(&record.storage_key),
    };
    report(app.extraction.run(&input, &Uuid::new_v4().to_string()).await)
}

async fn analyze(app: &App, contract: &str) -> Result<()> {
    let record = app.load(contract).await?;
    let Some(extracted_text) = record.extracted_text else {
        warn!(contract_id = %record.contract_id, status = %record.status, "Contract has no extracted text yet");
        return Err(anyhow!("Contract {} has no extracted text; run extract first", record.contract_id));
    };
    let input = AnalysisInput {
        contract_id: record.contract_id,
        extracted_text,
    };
    report(app.analysis.run(&input, &Uuid::new_v4().to_string()).await)
}

async fn run(app: &App, contract: &str) -> Result<()> {
    let record = app.load(contract).await?;
    let input = ExecutionInput {
        contract_id: record.contract_id,
        storage_bucket: app.config.storage.bucket.clone(),
        storage_key: record.storage_key,
    };
    report(app.orchestrator.run(&input).await)
}

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::error;

use localrag::core::config::{AppPaths, RagConfig};
use localrag::llm::schema::{EntityResolutions, ExtractedEdges, ExtractedEntities, ExtractionSchema};
use localrag::llm::{model_available, Message};
use localrag::logging;
use localrag::rag::IngestReport;
use localrag::state::AppState;

#[derive(Parser, Debug)]
#[command(
    name = "localrag",
    version,
    about = "Ingest documents and ask questions against a local model"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the vector table (and optionally a starter config.yml)
    Init(InitArgs),
    /// Ingest files from the documents folder
    IngestDocs(IngestDocsArgs),
    /// Ingest a web page, or a whole site through its sitemap
    IngestSite(IngestSiteArgs),
    /// Answer one question
    Ask(AskArgs),
    /// Interactive question loop
    Chat,
    /// List models served by the generation backend
    Models,
    /// Extract structured data from a text file
    Extract(ExtractArgs),
    /// Delete every stored chunk
    Clear,
}

#[derive(Args, Debug)]
struct InitArgs {
    #[arg(long, default_value_t = false)]
    write_config: bool,
}

#[derive(Args, Debug)]
struct IngestDocsArgs {
    /// Defaults to `<project root>/documents`
    #[arg(long, env = "LOCALRAG_DOCUMENTS_DIR")]
    dir: Option<PathBuf>,

    /// Only files with these extensions, e.g. `--ext txt --ext md`
    #[arg(long = "ext")]
    extensions: Vec<String>,
}

#[derive(Args, Debug)]
struct IngestSiteArgs {
    url: String,

    /// Follow `<url>/sitemap.xml` instead of ingesting the single page
    #[arg(long, default_value_t = false)]
    sitemap: bool,
}

#[derive(Args, Debug)]
struct AskArgs {
    #[arg(required = true)]
    question: Vec<String>,

    /// Print the answer and its sources as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Shape {
    Edges,
    Entities,
    Resolutions,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    file: PathBuf,

    #[arg(long, value_enum, default_value_t = Shape::Edges)]
    shape: Shape,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let paths = Arc::new(AppPaths::new());
    logging::init(&paths);

    if let Err(err) = run(cli, paths).await {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli, paths: Arc<AppPaths>) -> Result<()> {
    if let Commands::Init(args) = &cli.command {
        if args.write_config {
            write_starter_config(&paths)?;
        }
    }

    let state = AppState::with_paths(paths).context("failed to initialize")?;

    match cli.command {
        Commands::Init(_) => init(&state).await,
        Commands::IngestDocs(args) => ingest_docs(&state, args).await,
        Commands::IngestSite(args) => ingest_site(&state, args).await,
        Commands::Ask(args) => ask(&state, args).await,
        Commands::Chat => chat(&state).await,
        Commands::Models => models(&state).await,
        Commands::Extract(args) => extract(&state, args).await,
        Commands::Clear => clear(&state).await,
    }
}

fn write_starter_config(paths: &AppPaths) -> Result<()> {
    let path = paths.project_root.join("config.yml");
    if path.exists() {
        println!("{} already exists, leaving it untouched", path.display());
        return Ok(());
    }
    let yaml = serde_yaml::to_string(&RagConfig::default())?;
    std::fs::write(&path, yaml).with_context(|| format!("writing {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

async fn init(state: &AppState) -> Result<()> {
    let effective = state
        .config_service
        .redact_sensitive_values(&serde_json::to_value(state.config.as_ref())?);
    tracing::debug!("Effective configuration: {}", effective);

    let store = state.open_store().await?;
    println!(
        "{} store ready: table '{}', {} dimensions, {} records",
        store.name(),
        state.config.store.table,
        store.dimension(),
        store.count().await?
    );
    Ok(())
}

fn print_report(report: &IngestReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    if !report.is_clean() {
        tracing::warn!("{} item(s) failed during ingestion", report.failures.len());
    }
    Ok(())
}

async fn ingest_docs(state: &AppState, args: IngestDocsArgs) -> Result<()> {
    let dir = args.dir.unwrap_or_else(|| state.paths.documents_dir.clone());
    let pipeline = state.ingestion_pipeline().await?;
    let report = pipeline.ingest_directory(&dir, &args.extensions).await?;
    print_report(&report)
}

async fn ingest_site(state: &AppState, args: IngestSiteArgs) -> Result<()> {
    let pipeline = state.ingestion_pipeline().await?;
    let report = if args.sitemap {
        let sitemap = state.sitemap_client()?;
        pipeline.ingest_site(&args.url, &sitemap).await?
    } else {
        pipeline.ingest_url(&args.url).await
    };
    print_report(&report)
}

async fn ask(state: &AppState, args: AskArgs) -> Result<()> {
    let question = args.question.join(" ");
    let orchestrator = state.orchestrator().await?;

    if args.json {
        let answer = orchestrator.answer_detailed(&question).await?;
        println!("{}", serde_json::to_string_pretty(&answer)?);
    } else {
        println!("{}", orchestrator.answer(&question).await);
    }
    Ok(())
}

async fn chat(state: &AppState) -> Result<()> {
    let model = &state.config.generation.model;
    if !model_available(state.generation.as_ref(), model).await? {
        bail!(
            "model '{}' is not available on {}; pull it first",
            model,
            state.generation.name()
        );
    }

    let orchestrator = state.orchestrator().await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("Ask a question (type 'exit' or 'quit' to leave).");
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.eq_ignore_ascii_case("exit") || query.eq_ignore_ascii_case("quit") {
            break;
        }
        if query.is_empty() {
            continue;
        }

        println!("{}\n", orchestrator.answer(query).await);
    }
    Ok(())
}

async fn models(state: &AppState) -> Result<()> {
    let backend = &state.generation;
    if !backend.health_check().await? {
        bail!("{} is not reachable at {}", backend.name(), state.config.generation.base_url());
    }

    let listed = backend.list_models().await?;
    for model in &listed {
        println!("{}", model.name);
    }

    let generation_model = &state.config.generation.model;
    let available = model_available(backend.as_ref(), generation_model).await?;
    print_model_status("generation", generation_model, available);

    let catalog = state.embedding_catalog()?;
    let embedding_model = &state.config.embedding.model;
    if catalog.health_check().await? {
        let available = model_available(catalog.as_ref(), embedding_model).await?;
        print_model_status("embedding", embedding_model, available);
    } else {
        println!(
            "embedding model {}: {} is not reachable at {}",
            embedding_model,
            catalog.name(),
            state.config.embedding.base_url()
        );
    }
    Ok(())
}

fn print_model_status(role: &str, name: &str, available: bool) {
    println!(
        "{} model {}: {}",
        role,
        name,
        if available { "installed" } else { "missing" }
    );
}

async fn extract(state: &AppState, args: ExtractArgs) -> Result<()> {
    let text = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("reading {}", args.file.display()))?;

    let (schema, instruction) = match args.shape {
        Shape::Edges => (
            ExtractionSchema::for_type::<ExtractedEdges>()?,
            "Extract the factual relationships between entities mentioned in the text.",
        ),
        Shape::Entities => (
            ExtractionSchema::for_type::<ExtractedEntities>()?,
            "Extract the named entities mentioned in the text.",
        ),
        Shape::Resolutions => (
            ExtractionSchema::for_type::<EntityResolutions>()?,
            "Decide which of the listed entities are duplicates of each other.",
        ),
    };

    let mut messages = vec![Message::system(instruction), Message::user(text)];
    let value = state
        .llm
        .generate_structured(&mut messages, Some(&schema))
        .await?;

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn clear(state: &AppState) -> Result<()> {
    let store = state.open_store().await?;
    let removed = store.clear().await?;
    println!("Removed {} records", removed);
    Ok(())
}

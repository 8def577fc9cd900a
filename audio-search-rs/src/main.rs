use anyhow::Context;
use audio_search::config::Settings;
use audio_search::content_type::ContentType;
use audio_search::embedding::EmbeddingProvider;
use audio_search::indexer::{run_index_job, IndexJob};
use audio_search::pipeline::{SearchPipeline, SearchRequest};
use audio_search::server;
use clap::{Args, Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "audio-search",
    version,
    about = "Semantic audio search: text queries ranked against audio embeddings"
)]
struct Cli {
    /// TOML settings file; built-in defaults when absent
    #[arg(long, global = true, env = "AUDIO_SEARCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Command,
}

/// Values applied on top of the settings file.
#[derive(Args, Debug)]
struct Overrides {
    /// Root of the audio corpus
    #[arg(long, global = true, env = "AUDIO_SEARCH_AUDIO_DIR")]
    audio_dir: Option<PathBuf>,

    /// General (sfx) corpus directory
    #[arg(long, global = true, env = "AUDIO_SEARCH_EMBEDDINGS_DIR")]
    embeddings_dir: Option<PathBuf>,

    /// Music corpus directory
    #[arg(long, global = true, env = "AUDIO_SEARCH_MUSIC_EMBEDDINGS_DIR")]
    music_embeddings_dir: Option<PathBuf>,

    /// Embedding backend: hash | tract (requires --features tract)
    #[arg(long, global = true, env = "AUDIO_SEARCH_BACKEND")]
    backend: Option<String>,

    /// auto | cuda | mps | cpu
    #[arg(long, global = true, env = "AUDIO_SEARCH_DEVICE")]
    device: Option<String>,

    /// googletrans | google | deepl
    #[arg(long, global = true, env = "TRANSLATION_PROVIDER")]
    translation_provider: Option<String>,

    #[arg(long, global = true, env = "TRANSLATION_API_KEY", hide_env_values = true)]
    translation_api_key: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API
    Serve(ServeArgs),
    /// Embed an audio directory and write a searchable corpus
    Index(IndexArgs),
    /// Run one query against the local corpus
    Query(QueryArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, env = "AUDIO_SEARCH_HOST")]
    host: Option<String>,

    #[arg(long, env = "AUDIO_SEARCH_PORT")]
    port: Option<u16>,
}

#[derive(Args, Debug, Clone)]
struct IndexArgs {
    /// Output directory [default: data/embeddings/<content-type>]
    #[arg(long = "output-dir")]
    output_dir: Option<PathBuf>,

    /// Corpus kind: sfx | song
    #[arg(long = "content-type", default_value = "sfx")]
    content_type: ContentType,

    /// Force musicness scores on
    #[arg(long, conflicts_with = "no_musicness")]
    musicness: bool,

    /// Force musicness scores off
    #[arg(long = "no-musicness")]
    no_musicness: bool,
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Query text, any language
    text: String,

    /// Number of results
    #[arg(long = "top-k")]
    top_k: Option<usize>,

    /// Skip detection: sfx | song
    #[arg(long = "content-type")]
    content_type: Option<ContentType>,

    /// Output JSON to stdout only
    #[arg(long = "json", default_value_t = false)]
    json: bool,

    /// Show pretty table (stderr); disable with --show-table false
    #[arg(long = "show-table", default_value_t = true, action = clap::ArgAction::Set)]
    show_table: bool,
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    let o = &cli.overrides;
    if let Some(dir) = &o.audio_dir {
        settings.audio_dir = dir.clone();
    }
    if let Some(dir) = &o.embeddings_dir {
        settings.embeddings_dir = dir.clone();
    }
    if let Some(dir) = &o.music_embeddings_dir {
        settings.music_embeddings_dir = dir.clone();
    }
    if let Some(backend) = &o.backend {
        settings.model.backend = backend.clone();
    }
    if let Some(device) = &o.device {
        settings.model.device = device.clone();
    }
    if let Some(provider) = &o.translation_provider {
        settings.translation.provider = provider.clone();
    }
    if let Some(key) = &o.translation_api_key {
        settings.translation.api_key = Some(key.clone());
    }
    if let Command::Serve(args) = &cli.command {
        if let Some(host) = &args.host {
            settings.host = host.clone();
        }
        if let Some(port) = args.port {
            settings.port = port;
        }
    }
    settings.validate()?;
    Ok(settings)
}

fn run_index(settings: &Settings, args: &IndexArgs) -> anyhow::Result<()> {
    let mut model = settings.model.clone();
    // the music model only embeds song corpora
    model.enable_music_model &= args.content_type == ContentType::Song;
    let provider = EmbeddingProvider::from_settings(&model)?;

    let compute_musicness = match (args.musicness, args.no_musicness) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    };
    let job = IndexJob {
        audio_dir: settings.audio_dir.clone(),
        output_dir: args.output_dir.clone(),
        content_type: args.content_type,
        compute_musicness,
    };
    match run_index_job(&provider, &job)? {
        Some(summary) => {
            eprintln!(
                "{} {}/{} files embedded into {}",
                "Indexed".green().bold(),
                summary.successful,
                summary.total,
                summary.output_dir.display()
            );
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        None => eprintln!("{}", "No audio files found".yellow()),
    }
    Ok(())
}

async fn run_query(settings: &Settings, args: &QueryArgs) -> anyhow::Result<()> {
    let pipeline = SearchPipeline::from_settings(settings)?;
    let mut request = SearchRequest::new(args.text.clone());
    request.top_k = args.top_k;
    request.content_type = args.content_type;
    let response = pipeline.search(request).await?;

    if args.show_table && !args.json {
        let mut table = comfy_table::Table::new();
        table.set_header(vec![
            "#".bold(),
            "File".bold(),
            "Similarity".bold(),
            "Folder".bold(),
        ]);
        for (rank, r) in response.results.iter().enumerate() {
            table.add_row(vec![
                (rank + 1).to_string(),
                r.filename.clone(),
                format!("{:.3}", r.similarity),
                r.folder.clone(),
            ]);
        }
        let title = format!(
            "Results for \"{}\" ({})",
            response.resolved_query, response.content_type
        );
        eprintln!("{}", title.green().bold());
        if let Some(warning) = &response.translation_warning {
            eprintln!("{}", warning.yellow());
        }
        eprintln!("{table}");
    }
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries JSON only
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = load_settings(&cli).context("loading settings")?;
    info!("audio-search v{}", env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Command::Serve(_) => server::serve(settings).await?,
        Command::Index(args) => {
            let args = args.clone();
            tokio::task::spawn_blocking(move || run_index(&settings, &args)).await??
        }
        Command::Query(args) => run_query(&settings, args).await?,
    }
    Ok(())
}

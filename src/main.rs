use kudo_rag::cli::{Cli, Commands, ConfigAction};
use kudo_rag::config::{Config, ConfigValidator};
use kudo_rag::embedding::{FastEmbedProvider, HnswIndex, IndexError, PassageIndex};
use kudo_rag::error::{KudoError, Result};
use kudo_rag::llm::ChatClient;
use kudo_rag::retrieval::{
    KudoRetriever, MetadataFilter, QueryReformulator, Reranker, Retrieval, SourceCitation,
};
use kudo_rag::storage::load_passages;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    // Config commands must work even when the current file is invalid
    if let Commands::Config { action } = cli.command {
        return cmd_config(cli.config, cli.profile.as_deref(), action);
    }

    let config = load_config(cli.config.clone(), cli.profile.as_deref())?;

    match cli.command {
        Commands::Index { file, rebuild } => {
            cmd_index(&config, &file, rebuild)?;
        }
        Commands::Query {
            query,
            top_k,
            category,
            filters,
            context,
            json,
        } => {
            cmd_query(&config, &query, top_k, category, &filters, &context, json)?;
        }
        Commands::Decompose { question } => {
            cmd_decompose(&config, &question)?;
        }
        Commands::Stats { json } => {
            cmd_stats(&config, json)?;
        }
        Commands::Config { .. } => unreachable!("handled above"),
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if verbose {
        "kudo_rag=debug"
    } else {
        "kudo_rag=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn load_config(config_path: Option<PathBuf>, profile: Option<&str>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };
    Config::load_or_default(&path, profile)
}

fn open_index(config: &Config) -> Result<HnswIndex> {
    let provider = Arc::new(FastEmbedProvider::new(&config.embedding.model)?);
    let store = config.collection_store();

    HnswIndex::open(provider, config.hnsw_params(), store).map_err(|e| match e {
        IndexError::NotFound(name) => KudoError::Config(format!(
            "Collection '{}' not found. Run 'kudo-rag index <FILE>' first.",
            name
        )),
        other => other.into(),
    })
}

fn build_retriever(config: &Config, index: Arc<dyn PassageIndex>) -> Result<KudoRetriever> {
    let mut retriever = KudoRetriever::new(index, config.retrieval.clone())?;

    if config.retrieval.enable_reformulation {
        match build_reformulator(config)? {
            Some(reformulator) => retriever = retriever.with_reformulator(Arc::new(reformulator)),
            None => tracing::info!("LLM disabled, using keyword expansion instead of reformulation"),
        }
    }

    if config.retrieval.enable_reranking {
        let reranker = Reranker::load(true, &config.retrieval.reranker_model);
        retriever = retriever.with_reranker(Arc::new(reranker));
    }

    Ok(retriever)
}

fn build_reformulator(config: &Config) -> Result<Option<QueryReformulator>> {
    if !config.llm.enabled {
        return Ok(None);
    }

    let client = ChatClient::from_config(&config.llm)?;
    Ok(Some(QueryReformulator::new(
        Arc::new(client),
        config.retrieval.num_variations,
    )))
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| KudoError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn cmd_index(config: &Config, file: &Path, rebuild: bool) -> Result<()> {
    let passages = load_passages(file)?;

    let provider = Arc::new(FastEmbedProvider::new(&config.embedding.model)?);
    let index = HnswIndex::open_or_create(provider, config.hnsw_params(), config.collection_store())?
        .with_batch_size(config.embedding.batch_size);

    if rebuild {
        index.delete_collection()?;
    }

    let added = index.insert(&passages)?;
    let stats = index.stats()?;

    println!("✓ Indexed {} new passages ({} read)", added, passages.len());
    println!(
        "  Collection: {} ({} passages)",
        stats.collection_name, stats.count
    );
    Ok(())
}

#[derive(Serialize)]
struct QueryOutput<'a> {
    query: &'a str,
    confidence: f32,
    sources: Vec<SourceCitation>,
}

fn cmd_query(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    category: Option<String>,
    filter_pairs: &[String],
    context: &[String],
    json: bool,
) -> Result<()> {
    let mut config = config.clone();
    if let Some(top_k) = top_k {
        config.retrieval.top_k = top_k;
        ConfigValidator::validate(&config)?;
    }

    let mut filters = if filter_pairs.is_empty() {
        config.retrieval.metadata_filters.clone()
    } else {
        MetadataFilter::from_pairs(filter_pairs).map_err(|e| KudoError::InvalidConfigValue {
            path: "--filter".to_string(),
            message: e.to_string(),
        })?
    };
    if let Some(category) = category {
        filters = filters.with_category(category);
    }

    let index: Arc<dyn PassageIndex> = Arc::new(open_index(&config)?);
    let retriever = build_retriever(&config, index)?;

    let enriched = kudo_rag::retrieval::enrich_with_context(query, context);
    let passages = runtime()?.block_on(retriever.retrieve_filtered(&enriched, &filters))?;
    let retrieval = Retrieval {
        confidence: kudo_rag::retrieval::estimate_confidence(&passages),
        passages,
    };

    if json {
        let output = QueryOutput {
            query,
            confidence: retrieval.confidence,
            sources: SourceCitation::from_passages(&retrieval.passages),
        };
        let json = serde_json::to_string_pretty(&output).map_err(|e| KudoError::Json {
            source: e,
            context: "Failed to serialize results".to_string(),
        })?;
        println!("{}", json);
        return Ok(());
    }

    if retrieval.passages.is_empty() {
        println!("No relevant passage found.");
        return Ok(());
    }

    println!("Confidence: {:.2}\n", retrieval.confidence);
    for citation in SourceCitation::from_passages(&retrieval.passages) {
        println!(
            "[{}] {:.3}  {} | {} | {}",
            citation.source_id,
            citation.relevance_score,
            citation.section,
            citation.category,
            citation.article_ref
        );
        println!("    {}", citation.excerpt.replace('\n', " "));
    }

    Ok(())
}

fn cmd_decompose(config: &Config, question: &str) -> Result<()> {
    let sub_questions = match build_reformulator(config)? {
        Some(reformulator) => reformulator.decompose_query(question),
        None => {
            tracing::warn!("LLM disabled, nothing to decompose");
            vec![question.to_string()]
        }
    };

    for (i, sub_question) in sub_questions.iter().enumerate() {
        println!("{}. {}", i + 1, sub_question);
    }
    Ok(())
}

fn cmd_stats(config: &Config, json: bool) -> Result<()> {
    let stats = open_index(config)?.stats()?;

    if json {
        let json = serde_json::to_string_pretty(&stats).map_err(|e| KudoError::Json {
            source: e,
            context: "Failed to serialize stats".to_string(),
        })?;
        println!("{}", json);
        return Ok(());
    }

    println!("Collection Stats");
    println!("================");
    println!("Name:      {}", stats.collection_name);
    println!("Passages:  {}", stats.count);
    println!("Model:     {} ({}D)", stats.embedding_model, stats.dimension);
    if let Some(path) = stats.path {
        println!("Path:      {}", path.display());
    }
    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<&str>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, profile)?;
            let value = serde_json::to_value(&config).map_err(|e| KudoError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            let value = match section {
                Some(section) => value.get(&section).cloned().ok_or_else(|| {
                    KudoError::Config(format!("Unknown config section: {}", section))
                })?,
                None => value,
            };

            let json = serde_json::to_string_pretty(&value).map_err(|e| KudoError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

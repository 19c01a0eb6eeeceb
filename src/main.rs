use anyhow::Context;
use kbground::cli::{Cli, Commands, ConfigAction};
use kbground::config::{Config, ConfigValidator};
use kbground::embedding::{provider_from_config, EmbeddingGateway};
use kbground::index::{load_articles, IndexBuilder};
use kbground::retry::RetryPolicy;
use kbground::{Query, RetrievalPipeline};
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Ask {
            question,
            category,
            top_k,
            json,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_ask(&config, question, category, top_k, json).await?;
        }
        Commands::Search {
            query,
            category,
            top_k,
            json,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_search(&config, query, category, top_k, json).await?;
        }
        Commands::Index { paths } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_index(&config, &paths).await?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "kbground=debug" } else { "kbground=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_query(
    config: &Config,
    text: String,
    category: Option<String>,
    top_k: Option<usize>,
) -> Query {
    let mut query = Query::new(text).with_top_k(top_k.unwrap_or(config.retrieval.default_top_k));
    if let Some(category) = category {
        query = query.with_category(category);
    }
    query
}

async fn cmd_ask(
    config: &Config,
    question: String,
    category: Option<String>,
    top_k: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let pipeline = RetrievalPipeline::open(config)?;
    let query = build_query(config, question, category, top_k);

    let answer = pipeline.retrieve(query).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&answer).context("Failed to serialize answer")?
        );
    } else {
        print!("{}", answer.render());
    }
    Ok(())
}

async fn cmd_search(
    config: &Config,
    text: String,
    category: Option<String>,
    top_k: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let pipeline = RetrievalPipeline::open(config)?;
    let query = build_query(config, text, category, top_k);

    let results = pipeline.search_results(query).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&results.hits).context("Failed to serialize hits")?
        );
        return Ok(());
    }

    if results.is_empty() {
        println!("No matching articles.");
        return Ok(());
    }

    for (hit, article) in results.hits.iter().zip(&results.articles) {
        let strategies = hit
            .strategy_scores
            .iter()
            .map(|(strategy, score)| format!("{}={:.3}", strategy, score))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{:>2}. [{}] {} ({})  fused={:.4}  {}",
            hit.rank, article.id, article.title, article.category, hit.fused_score, strategies
        );
    }
    println!(
        "\n{} of {} candidates shown",
        results.hits.len(),
        results.candidates_considered
    );
    Ok(())
}

async fn cmd_index(config: &Config, paths: &[PathBuf]) -> anyhow::Result<()> {
    let articles = load_articles(paths)?;
    if articles.is_empty() {
        println!("No articles found in the given paths.");
        return Ok(());
    }

    let retry = RetryPolicy::from_config(&config.retry)?;
    let provider = provider_from_config(&config.embedding)?;
    let gateway = Arc::new(EmbeddingGateway::from_config(
        provider,
        &config.embedding,
        retry,
    )?);

    let data_dir = config.data_dir()?;
    let report = IndexBuilder::new(&data_dir, gateway)
        .build(articles)
        .await?;

    println!("✓ Indexed {} articles into {}", report.total, data_dir.display());
    println!(
        "  Embedded: {}  Reused: {}  Retries: {}  Time: {}ms",
        report.embedded, report.reused, report.embedding_retries, report.duration_ms
    );
    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, profile)?;
            let value = toml::Value::try_from(&config).context("Failed to serialize config")?;

            let shown = match section {
                Some(name) => {
                    let table = value
                        .get(&name)
                        .cloned()
                        .with_context(|| format!("Unknown config section: {}", name))?;
                    toml::to_string_pretty(&toml::map::Map::from_iter([(name, table)]))?
                }
                None => toml::to_string_pretty(&value)?,
            };
            println!("{}", shown);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            ConfigValidator::validate(&config)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
            println!("  Profiles: {}", config.profiles.len());
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

            let config = Config::default();
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
            println!("  Data directory: {}", config.data_dir()?.display());
            println!("  Set {} before running `kbground index`", config.llm.api_key_env);
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> anyhow::Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'kbground config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        ConfigValidator::validate(&config)?;
        return Ok(config);
    }

    let config = match profile {
        Some(profile) => Config::load_with_profile(&path, &profile)?,
        None => Config::load(&path)?,
    };
    Ok(config)
}

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use futures_util::StreamExt;
use research_federation::config::{default_config_path, load_config, Config};
use research_federation::engine::{
    PubMedPaperEngine, QueryEngine, ScopusAuthorEngine, ScopusInstitutionEngine,
    ScopusPaperEngine,
};
use research_federation::federation::Reconciler;
use research_federation::models::{
    AuthorField, AuthorSearchQuery, Comparison, InstitutionField, InstitutionSearchQuery,
    PaperField, PaperSearchQuery, Predicate, QueryField, Value,
};
use research_federation::selector::{AuthorSelector, InstitutionSelector, PaperSelector};
use research_federation::sources::{PubMedClient, ScopusClient};
use research_federation::utils::{
    FileQuotaStore, FileResultCountCache, HttpTransport, MemoryQuotaStore, MemoryResultCountCache,
    QuotaStore, ResultCountCache, Transport,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_PAPER_FIELDS: &[&str] = &[
    "paper_id.doi",
    "title",
    "authors.name",
    "publication_date",
    "source_title",
];

const DEFAULT_AUTHOR_FIELDS: &[&str] =
    &["author_id", "name", "affiliations.name", "document_count"];

/// Research Federation - query PubMed and Scopus through one selector-driven interface
#[derive(Parser, Debug)]
#[command(name = "research-federation")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Federated bibliographic queries over PubMed and Scopus", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (-v, -vv)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Keep quota and result counts in memory only
    #[arg(long, global = true, default_value_t = false)]
    no_cache: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where a paper query is sent
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum PaperBackend {
    Pubmed,
    Scopus,
    /// PubMed for candidates, Scopus for details
    Federated,
}

#[derive(Args, Debug)]
struct PaperArgs {
    /// Free-text search over title, abstract and keywords
    keyword: Option<String>,

    #[arg(long)]
    title: Option<String>,

    #[arg(long, short)]
    author: Option<String>,

    #[arg(long)]
    affiliation: Option<String>,

    #[arg(long)]
    journal: Option<String>,

    #[arg(long)]
    doi: Option<String>,

    /// Year filter (e.g. "2020", "2018-2022", "2010-", "-2015")
    #[arg(long)]
    year: Option<String>,

    /// Comma-separated field paths to return, e.g. "title,authors.name"
    #[arg(long, short, value_delimiter = ',')]
    select: Vec<String>,

    #[arg(long, short, default_value_t = 10)]
    max_results: usize,

    #[arg(long, short, value_enum, default_value_t = PaperBackend::Federated)]
    backend: PaperBackend,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search papers
    #[command(alias = "p")]
    Papers {
        #[command(flatten)]
        args: PaperArgs,

        /// Print records one JSON line at a time (single backend only)
        #[arg(long)]
        stream: bool,
    },

    /// Search Scopus authors
    Authors {
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        affiliation: Option<String>,

        #[arg(long)]
        orcid: Option<String>,

        #[arg(long, short, value_delimiter = ',')]
        select: Vec<String>,

        #[arg(long, short, default_value_t = 10)]
        max_results: usize,
    },

    /// Search Scopus institutions
    Institutions {
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        city: Option<String>,

        #[arg(long)]
        country: Option<String>,

        #[arg(long, short, default_value_t = 10)]
        max_results: usize,
    },

    /// Show the operations and request estimate of a paper query without running it
    Plan {
        #[command(flatten)]
        args: PaperArgs,
    },

    /// Show the remaining Scopus request quota
    Quota,

    /// Write a configuration file with default values
    Init {
        /// Destination (defaults to the platform config directory)
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_tracing(&cli, &config);

    match cli.command {
        Commands::Papers { args, stream } => {
            let query = paper_query(&args)?;
            match args.backend {
                PaperBackend::Pubmed => {
                    let engine = PubMedPaperEngine::new(pubmed_client(&config)?)?;
                    run_papers(&engine, &query, stream).await?;
                }
                PaperBackend::Scopus => {
                    let engine = ScopusPaperEngine::new(scopus_client(&config, cli.no_cache)?)?;
                    run_papers(&engine, &query, stream).await?;
                }
                PaperBackend::Federated => {
                    if stream {
                        bail!("--stream needs a single backend (--backend pubmed|scopus)");
                    }
                    let reconciler = Reconciler::new(
                        PubMedPaperEngine::new(pubmed_client(&config)?)?,
                        ScopusPaperEngine::new(scopus_client(&config, cli.no_cache)?)?,
                    )
                    .config(config.reconcile.clone());
                    let result = reconciler.reconcile(&query).await?;
                    if result.metadata.degraded {
                        tracing::warn!(
                            residual = result.metadata.residual,
                            "Detailed results are incomplete; raise reconcile.max_requests to fill them"
                        );
                    }
                    print_json(&result)?;
                }
            }
        }

        Commands::Authors {
            name,
            affiliation,
            orcid,
            select,
            max_results,
        } => {
            let predicate = conjunction(vec![
                text_leaf(AuthorField::Name, name)?,
                text_leaf(AuthorField::Affiliation, affiliation)?,
                id_leaf(AuthorField::Orcid, orcid)?,
            ])?;
            let selector = if select.is_empty() {
                AuthorSelector::from_paths(DEFAULT_AUTHOR_FIELDS)?
            } else {
                AuthorSelector::from_paths(&as_paths(&select))?
            };
            let query = AuthorSearchQuery::new(predicate)
                .selector(selector)
                .max_results(max_results);

            let engine = ScopusAuthorEngine::new(scopus_client(&config, cli.no_cache)?)?;
            print_json(&engine.execute(&query).await?)?;
        }

        Commands::Institutions {
            name,
            city,
            country,
            max_results,
        } => {
            let predicate = conjunction(vec![
                text_leaf(InstitutionField::Name, name)?,
                text_leaf(InstitutionField::City, city)?,
                text_leaf(InstitutionField::Country, country)?,
            ])?;
            let query = InstitutionSearchQuery::new(predicate)
                .selector(InstitutionSelector::all())
                .max_results(max_results);

            let engine = ScopusInstitutionEngine::new(scopus_client(&config, cli.no_cache)?)?;
            print_json(&engine.execute(&query).await?)?;
        }

        Commands::Plan { args } => {
            let query = paper_query(&args)?;
            let mut plans = Vec::new();
            if args.backend != PaperBackend::Scopus {
                let engine = PubMedPaperEngine::new(pubmed_client(&config)?)?;
                plans.push(describe_plan(&engine, &query).await);
            }
            if args.backend != PaperBackend::Pubmed {
                let engine = ScopusPaperEngine::new(scopus_client(&config, cli.no_cache)?)?;
                plans.push(describe_plan(&engine, &query).await);
            }
            print_json(&plans)?;
        }

        Commands::Quota => {
            let client = scopus_client(&config, cli.no_cache)?;
            print_json(&serde_json::json!({
                "service": "scopus",
                "remaining": client.remaining_requests(),
            }))?;
        }

        Commands::Init { path } => {
            let path = path
                .or_else(default_config_path)
                .context("no config directory on this platform; pass a path")?;
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            Config::default().save(&path)?;
            if !cli.quiet {
                eprintln!("Wrote {}", path.display());
            }
        }
    }

    Ok(())
}

fn init_tracing(cli: &Cli, config: &Config) {
    let level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => config.logging.level.as_str(),
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("research_federation={}", level)),
    );

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.is_json() {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn pubmed_client(config: &Config) -> Result<PubMedClient> {
    let transport: Arc<dyn Transport> = Arc::new(
        HttpTransport::new()?.rate_limit(config.rate_limits.pubmed_requests_per_second),
    );
    Ok(PubMedClient::new(transport)
        .api_key(config.api_keys.ncbi.clone())
        .email(config.api_keys.ncbi_email.clone()))
}

fn scopus_client(config: &Config, no_cache: bool) -> Result<ScopusClient> {
    let Some(api_key) = config.api_keys.scopus.clone() else {
        bail!("Scopus needs an API key: set SCOPUS_API_KEY or api_keys.scopus in the config file");
    };

    let transport: Arc<dyn Transport> = Arc::new(
        HttpTransport::new()?
            .rate_limit(config.rate_limits.scopus_requests_per_second)
            .header("Accept", "application/json"),
    );
    let limit = config.quota.scopus_weekly_limit;
    let ttl = config.cache.result_count_ttl_seconds;

    let cache_dir = if config.cache.enabled && !no_cache {
        config.cache.resolved_directory()
    } else {
        None
    };

    let quota: Arc<dyn QuotaStore>;
    let counts: Arc<dyn ResultCountCache>;
    match cache_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create cache directory {}", dir.display()))?;
            tracing::debug!(directory = %dir.display(), "Using persistent caches");
            quota = Arc::new(
                FileQuotaStore::open(dir.join("quota.json"))?.with_limit("scopus", limit),
            );
            counts = Arc::new(FileResultCountCache::open(dir.join("result_counts.jsonl"), ttl)?);
        }
        None => {
            quota = Arc::new(MemoryQuotaStore::new().with_limit("scopus", limit));
            counts = Arc::new(MemoryResultCountCache::new(ttl));
        }
    }

    Ok(ScopusClient::new(transport, api_key)
        .inst_token(config.api_keys.scopus_inst_token.clone())
        .with_quota_store(quota)
        .with_count_cache(counts))
}

fn paper_query(args: &PaperArgs) -> Result<PaperSearchQuery> {
    let predicate = conjunction(vec![
        text_leaf(PaperField::Keyword, args.keyword.clone())?,
        text_leaf(PaperField::Title, args.title.clone())?,
        text_leaf(PaperField::Author, args.author.clone())?,
        text_leaf(PaperField::Affiliation, args.affiliation.clone())?,
        text_leaf(PaperField::Journal, args.journal.clone())?,
        id_leaf(PaperField::Doi, args.doi.clone())?,
        args.year.as_deref().map(year_filter).transpose()?,
    ])?;

    let selector = if args.select.is_empty() {
        PaperSelector::from_paths(DEFAULT_PAPER_FIELDS)?
    } else {
        PaperSelector::from_paths(&as_paths(&args.select))?
    };

    Ok(PaperSearchQuery::new(predicate)
        .selector(selector)
        .max_results(args.max_results))
}

fn as_paths(select: &[String]) -> Vec<&str> {
    select
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect()
}

fn text_leaf<F: QueryField>(field: F, text: Option<String>) -> Result<Option<Predicate<F>>> {
    Ok(text.map(|t| Predicate::contains(field, t)).transpose()?)
}

fn id_leaf<F: QueryField>(field: F, id: Option<String>) -> Result<Option<Predicate<F>>> {
    Ok(id.map(|v| Predicate::equals(field, v)).transpose()?)
}

fn conjunction<F: QueryField>(leaves: Vec<Option<Predicate<F>>>) -> Result<Predicate<F>> {
    let mut leaves: Vec<_> = leaves.into_iter().flatten().collect();
    match leaves.len() {
        0 => bail!("give at least one search criterion"),
        1 => Ok(leaves.remove(0)),
        _ => Ok(Predicate::and(leaves)?),
    }
}

/// Parse "2020", "2018-2022", "2010-" or "-2015"
fn year_filter(range: &str) -> Result<Predicate<PaperField>> {
    let year = |s: &str| -> Result<i64> {
        s.trim()
            .parse::<i64>()
            .with_context(|| format!("invalid year {:?}", s))
    };

    let predicate = match range.split_once('-') {
        None => Predicate::equals(PaperField::Year, year(range)?)?,
        Some((lo, hi)) => match (lo.trim().is_empty(), hi.trim().is_empty()) {
            (false, false) => Predicate::between(PaperField::Year, year(lo)?, year(hi)?)?,
            (false, true) => Predicate::leaf(
                PaperField::Year,
                Comparison::GreaterThan(Value::Int(year(lo)? - 1)),
            )?,
            (true, false) => Predicate::leaf(
                PaperField::Year,
                Comparison::LessThan(Value::Int(year(hi)? + 1)),
            )?,
            (true, true) => bail!("invalid year range {:?}", range),
        },
    };
    Ok(predicate)
}

async fn run_papers<E>(engine: &E, query: &PaperSearchQuery, stream: bool) -> Result<()>
where
    E: QueryEngine<Field = PaperField, Selector = PaperSelector>,
{
    if !stream {
        print_json(&engine.execute(query).await?)?;
        return Ok(());
    }

    let mut records = engine.stream(query).await?;
    while let Some(record) = records.next().await {
        println!("{}", serde_json::to_string(&record?)?);
    }
    tracing::info!(
        requests = records.metadata().requests_used,
        "Stream finished"
    );
    Ok(())
}

#[derive(Serialize)]
struct PlanSummary {
    backend: String,
    #[serde(flatten)]
    outcome: serde_json::Value,
}

async fn describe_plan<E>(engine: &E, query: &PaperSearchQuery) -> PlanSummary
where
    E: QueryEngine<Field = PaperField, Selector = PaperSelector>,
{
    let outcome = match engine.plan(query).await {
        Ok(plan) => serde_json::json!({
            "operations": plan.operations.list(),
            "estimated_requests": plan.estimated_requests,
            "remaining_requests": engine.remaining_requests().await,
        }),
        Err(e) => serde_json::json!({ "error": e.to_string() }),
    };
    PlanSummary {
        backend: engine.backend().to_string(),
        outcome,
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

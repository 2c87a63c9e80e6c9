use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use filmtree::{
    Error,
    actor_tree::populate_actors_tree,
    cache::{CachedLookup, LookupCache},
    config::{DEFAULT_PATTERN, LOOKUP_CACHE_FILE, RetryPolicy, Settings},
    enrich::{EnrichMode, generate_films_index},
    filmography::generate_actors_filmography,
    logging::init_logger,
    provider::{Lookup, MetadataLookup, MetadataResult},
    roster::generate_actors_list,
    scan::{ScanOptions, generate_base_index, normalize_files},
    tmdb::TmdbClient,
    tree::{Dimension, LinkMode, TreeSummary, create_films_tree},
    video::{FilmPattern, NormalizeFailure},
    wikidata::WikidataRoster,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TreeType {
    Director,
    Genre,
    Actor,
}

impl From<TreeType> for Dimension {
    fn from(tree_type: TreeType) -> Self {
        match tree_type {
            TreeType::Director => Dimension::Director,
            TreeType::Genre => Dimension::Genre,
            TreeType::Actor => Dimension::Actor,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Keep rows already in the films index
    Extend,
    /// Look every film up again
    Overwrite,
}

impl From<Mode> for EnrichMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Extend => EnrichMode::Extend,
            Mode::Overwrite => EnrichMode::Overwrite,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Rename film files to the "(YEAR) TITLE [tag].ext" form
    #[command(visible_alias = "nff")]
    NormalizeFilmFiles {
        libdir: PathBuf,
        #[arg(long, default_value = DEFAULT_PATTERN)]
        regex: String,
        #[arg(long)]
        dry_run: bool,
        /// Ask for a new name when a file cannot be normalized
        #[arg(short, long)]
        interactive: bool,
    },
    /// Scan the library and write base_index.tsv
    #[command(visible_alias = "gbi")]
    GenerateBaseIndex {
        libdir: PathBuf,
        #[arg(long, default_value = DEFAULT_PATTERN)]
        regex: String,
        /// Only scan this sub-directory of the library
        #[arg(long)]
        restrict: Option<PathBuf>,
        /// Skip files whose (title, year) was already indexed
        #[arg(long)]
        nodups: bool,
    },
    /// Look up every indexed film and write films_index.tsv
    #[command(visible_alias = "gfi")]
    GenerateFilmsIndex {
        libdir: PathBuf,
        #[arg(short, long, value_enum, default_value_t = Mode::Extend)]
        mode: Mode,
    },
    /// Build a director, genre or actor tree of links
    #[command(visible_alias = "cft")]
    CreateFilmsTree {
        libdir: PathBuf,
        #[arg(short = 't', long = "type", value_enum)]
        tree_type: TreeType,
        /// Tree directory name inside the library (default "Films by <Type>")
        #[arg(long)]
        dirname: Option<String>,
        /// Create symbolic links instead of hard links
        #[arg(long)]
        symlinks: bool,
    },
    /// Fetch the Oscar-nominated actors and write actors_list.tsv
    #[command(visible_alias = "gal")]
    GenerateActorsList { libdir: PathBuf },
    /// Fetch every listed actor's filmography (resumable)
    #[command(visible_alias = "gaf")]
    GenerateActorsFilmography {
        libdir: PathBuf,
        #[arg(long, default_value_t = 7.0)]
        min_rating: f32,
    },
    /// Link owned films under each actor who appears in them
    #[command(visible_alias = "pat")]
    PopulateActorsTree {
        libdir: PathBuf,
        #[arg(long)]
        dirname: Option<String>,
        /// Prefix link names with the film's rating
        #[arg(long)]
        include_ratings: bool,
        #[arg(long)]
        symlinks: bool,
    },
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Concurrent requests to the metadata provider
    #[arg(long, global = true, default_value_t = 4)]
    workers: usize,

    #[arg(long, global = true, default_value_t = 5)]
    max_retries: u32,

    /// Timeout for a single network call
    #[arg(long, global = true, default_value_t = 30)]
    timeout_secs: u64,

    #[arg(long, global = true, env = "TMDB_API_TOKEN", hide_env_values = true)]
    tmdb_token: Option<String>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

impl Args {
    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn settings(&self, libdir: &Path) -> Settings {
        Settings {
            workers: self.workers.max(1),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                request_timeout: self.timeout(),
                ..RetryPolicy::default()
            },
            ..Settings::new(libdir)
        }
    }

    fn tmdb(&self, top_billed: usize) -> Result<TmdbClient> {
        let token = self
            .tmdb_token
            .clone()
            .context("No TMDB API token: set TMDB_API_TOKEN or pass --tmdb-token")?;
        Ok(TmdbClient::new(token, self.timeout(), top_billed)?)
    }
}

/// Stands in for TMDB when no token is configured, so fully cached runs still work.
struct NoToken;

#[async_trait]
impl MetadataLookup for NoToken {
    async fn lookup(&self, _title: &str, _year: u16) -> MetadataResult {
        Lookup::TransientError("no TMDB API token".to_string())
    }

    async fn check(&self) -> filmtree::Result<()> {
        Err(Error::ProviderUnreachable(
            "no TMDB API token: set TMDB_API_TOKEN or pass --tmdb-token".to_string(),
        ))
    }
}

fn link_mode(symlinks: bool) -> LinkMode {
    if symlinks {
        LinkMode::Symlink
    } else {
        LinkMode::Hardlink
    }
}

fn with_symlink_hint(err: Error) -> anyhow::Error {
    match err {
        Error::CrossDevice { .. } => {
            anyhow::Error::new(err).context("Hard links cannot be created here; rerun with --symlinks")
        }
        err => err.into(),
    }
}

/// Run `job` unless Ctrl-C arrives first.
async fn until_interrupted<F: Future>(job: F, persisted: &str) -> Result<F::Output> {
    tokio::select! {
        output = job => Ok(output),
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted; {}", persisted);
            bail!("Interrupted")
        }
    }
}

fn print_tree_summary(summary: &TreeSummary, root: &str) {
    println!(
        "{}: {} created, {} kept, {} removed",
        root.bold(),
        summary.created.to_string().green(),
        summary.kept,
        summary.removed.to_string().yellow()
    );
}

fn prompt_for_name(path: &Path, failure: &NormalizeFailure) -> Option<String> {
    let file_name = path.file_name()?.to_string_lossy();
    println!("{} {} ({})", "Cannot normalize".yellow(), file_name, failure);
    inquire::Text::new("New name:")
        .with_help_message("e.g. (1997) Titanic [HD]; leave empty to skip")
        .prompt()
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_logger(args.verbose);

    match &args.command {
        Commands::NormalizeFilmFiles {
            libdir,
            regex,
            dry_run,
            interactive,
        } => {
            let pattern = FilmPattern::new(regex)?;
            let outcome = normalize_files(libdir, &pattern, *dry_run, |path, failure| {
                if *interactive {
                    prompt_for_name(path, failure)
                } else {
                    None
                }
            })?;
            for rename in &outcome.renamed {
                println!(
                    "{}{} {} {}",
                    if *dry_run { "[dry run] " } else { "" },
                    rename.from.display().to_string().dimmed(),
                    "->".cyan(),
                    rename.to.display().to_string().green()
                );
            }
            println!(
                "{} renamed, {} already canonical",
                outcome.renamed.len(),
                outcome.unchanged
            );
            outcome.report.print("normalize-film-files");
        }
        Commands::GenerateBaseIndex {
            libdir,
            regex,
            restrict,
            nodups,
        } => {
            let pattern = FilmPattern::new(regex)?;
            let options = ScanOptions {
                restrict: restrict.clone(),
                nodups: *nodups,
            };
            let outcome = generate_base_index(&args.settings(libdir), &pattern, &options)?;
            println!("{} films indexed", outcome.entries.len().to_string().green());
            for duplicate in &outcome.duplicates {
                println!("{} {}", "duplicate skipped:".yellow(), duplicate.display());
            }
            outcome.report.print("generate-base-index");
        }
        Commands::GenerateFilmsIndex { libdir, mode } => {
            let settings = args.settings(libdir);
            let inner: Arc<dyn MetadataLookup> = match args.tmdb(settings.top_billed) {
                Ok(client) => Arc::new(client),
                Err(err) => {
                    tracing::warn!("{}; only cached lookups are available", err);
                    Arc::new(NoToken)
                }
            };
            let cache = LookupCache::open(&settings.path(LOOKUP_CACHE_FILE))
                .context("Failed to open the lookup cache")?;
            let lookup = CachedLookup::new(inner, Arc::new(cache));

            let outcome = until_interrupted(
                generate_films_index(&settings, &lookup, (*mode).into()),
                "finished lookups are cached and will be reused",
            )
            .await??;
            println!(
                "{} films enriched ({} reused, {} looked up)",
                outcome.records.len().to_string().green(),
                outcome.reused,
                outcome.looked_up
            );
            outcome.report.print("generate-films-index");
        }
        Commands::CreateFilmsTree {
            libdir,
            tree_type,
            dirname,
            symlinks,
        } => {
            let dimension = Dimension::from(*tree_type);
            let summary = create_films_tree(
                &args.settings(libdir),
                dimension,
                dirname.as_deref(),
                link_mode(*symlinks),
            )
            .map_err(with_symlink_hint)?;
            let root = dirname.clone().unwrap_or_else(|| dimension.default_dirname());
            print_tree_summary(&summary, &root);
            summary.report.print("create-films-tree");
        }
        Commands::GenerateActorsList { libdir } => {
            let source = WikidataRoster::new(args.timeout())?;
            let roster = generate_actors_list(&args.settings(libdir), &source).await?;
            println!("{} actors listed", roster.len().to_string().green());
        }
        Commands::GenerateActorsFilmography { libdir, min_rating } => {
            let settings = args.settings(libdir);
            let client = args.tmdb(settings.top_billed)?;
            let outcome = until_interrupted(
                generate_actors_filmography(&settings, &client, *min_rating),
                "completed actors are checkpointed and will be skipped next time",
            )
            .await??;
            println!(
                "{} filmographies fetched, {} already done",
                outcome.fetched.to_string().green(),
                outcome.skipped
            );
            outcome.report.print("generate-actors-filmography");
        }
        Commands::PopulateActorsTree {
            libdir,
            dirname,
            include_ratings,
            symlinks,
        } => {
            let summary = populate_actors_tree(
                &args.settings(libdir),
                dirname.as_deref(),
                *include_ratings,
                link_mode(*symlinks),
            )
            .map_err(with_symlink_hint)?;
            let root = dirname
                .clone()
                .unwrap_or_else(|| Dimension::Actor.default_dirname());
            print_tree_summary(&summary, &root);
            summary.report.print("populate-actors-tree");
        }
    }

    Ok(())
}

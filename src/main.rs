//! symsrv: publish debug symbols into a deduplicated symbol store.
//!
//! # Usage
//!
//! ```text
//! symsrv publish --arti https://arti.example.com/artifactory [--repo libs-release]...
//! symsrv publish --dir /mnt/builds --exclude "/test/,/obj/"
//! symsrv publish --file https://arti.example.com/artifactory/libs/app/1.0/app.pdb
//! symsrv publish --s3 build-artifacts [--prefix release/]    (feature `s3`)
//! symsrv find --hash 3f2a... | --filename app.pdb
//! symsrv dump
//! ```

use clap::{ArgAction, ArgGroup, Args, Parser, Subcommand};
use derive_more::{Display, Error};
use exn::{OptionExt, ResultExt};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use symsrv_config::{Config, Overrides, parse_excludes};
use symsrv_publish::{Blake3Digest, FormatChain, HashProvider, Params, Publisher, publish_location, publish_repository};
use symsrv_storage::{Node, RepositoryHandle};
use symsrv_storage::backend::{HttpOptions, HttpRepository, LocalRepository};
use symsrv_store::{Database, SymbolStore};

type Result<T> = std::result::Result<T, exn::Exn<ErrorKind>>;

#[cfg(not(feature = "s3"))]
const SOURCE_USAGE: &str = "pass one of --arti, --dir or --file";
#[cfg(feature = "s3")]
const SOURCE_USAGE: &str = "pass one of --arti, --dir, --file or --s3";

#[derive(Debug, Display, Error)]
enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("could not open symbol store at {_0}")]
    Store(#[error(not(source))] String),
    #[display("could not open repository {_0}")]
    Repository(#[error(not(source))] String),
    #[display("publish run failed")]
    Publish,
    #[display("{_0}")]
    Usage(#[error(not(source))] &'static str),
}

#[derive(Parser, Debug)]
#[command(name = "symsrv", version, about = "Publish debug symbols into a deduplicated symbol store", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// More log output (repeatable).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Less log output (repeatable).
    #[arg(short, long, global = true, action = ArgAction::Count, conflicts_with = "verbose")]
    quiet: u8,

    /// Configuration file layered over the per-user one.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Symbol store directory (database, ledger, copied artifacts).
    #[arg(long, global = true, value_name = "DIR")]
    store: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Crawl a repository (or publish one file) into the store.
    Publish(PublishArgs),

    /// Look up a symbol by hash or filename.
    Find {
        #[arg(long)]
        hash: Option<String>,
        #[arg(long)]
        filename: Option<String>,
    },

    /// Print every symbol and source in the store.
    Dump,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("source").required(true).multiple(false)))]
struct PublishArgs {
    /// Artifactory base URL.
    #[arg(long, value_name = "URL", group = "source")]
    arti: Option<String>,

    /// Artifactory repository to crawl (repeatable; default: all non-virtual).
    #[arg(long = "repo", value_name = "KEY", requires = "arti", conflicts_with_all = ["dir", "file"])]
    repos: Vec<String>,

    /// Local directory to crawl.
    #[arg(long, value_name = "PATH", group = "source")]
    dir: Option<PathBuf>,

    /// A single local path or URL to publish.
    #[arg(long, value_name = "LOCATION", group = "source")]
    file: Option<String>,

    /// S3 bucket to crawl. Credentials come from the configuration.
    #[cfg(feature = "s3")]
    #[arg(long, value_name = "BUCKET", group = "source")]
    s3: Option<String>,

    /// Key prefix inside the bucket where the crawl starts.
    #[cfg(feature = "s3")]
    #[arg(long, value_name = "PREFIX", requires = "s3")]
    prefix: Option<String>,

    /// Region of the S3 bucket.
    #[cfg(feature = "s3")]
    #[arg(long, value_name = "REGION", requires = "s3")]
    s3_region: Option<String>,

    /// Endpoint of an S3-compatible service.
    #[cfg(feature = "s3")]
    #[arg(long, value_name = "URL", requires = "s3")]
    s3_endpoint: Option<String>,

    /// Comma-separated substrings; matching locations are skipped.
    #[arg(long, value_name = "LIST")]
    exclude: Option<String>,

    /// Write pointer files instead of copying artifacts.
    #[arg(long)]
    link_mode: bool,

    /// Republish artifacts the store already knows.
    #[arg(long)]
    overwrite: bool,

    /// Concurrent directory listings.
    #[arg(long, value_name = "N")]
    threads: Option<usize>,

    /// Persist the ledger every N artifacts.
    #[arg(long, value_name = "N")]
    flush_every: Option<usize>,

    /// Bytes per ranged request for remote artifacts.
    #[arg(long, value_name = "BYTES")]
    window_size: Option<usize>,

    /// HTTP request timeout in seconds.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Bearer token for Artifactory.
    #[arg(long, env = "SYMSRV_TOKEN", hide_env_values = true)]
    token: Option<String>,
}
impl PublishArgs {
    fn overrides(&self, store: Option<PathBuf>) -> Overrides {
        Overrides {
            store,
            threads: self.threads,
            exclude: self.exclude.as_deref().map(parse_excludes),
            link_mode: self.link_mode.then_some(true),
            overwrite: self.overwrite.then_some(true),
            flush_every: self.flush_every,
            window_size: self.window_size,
            timeout_secs: self.timeout,
            token: self.token.clone(),
            #[cfg(feature = "s3")]
            s3_region: self.s3_region.clone(),
            #[cfg(feature = "s3")]
            s3_endpoint: self.s3_endpoint.clone(),
            ..Overrides::default()
        }
    }
}

/// What a publish run works through.
enum Target {
    Crawl(RepositoryHandle),
    Location(RepositoryHandle, Node),
}

fn init_tracing(verbose: u8, quiet: u8) {
    use tracing_subscriber::{EnvFilter, fmt};

    let default = match i16::from(verbose) - i16::from(quiet) {
        ..=-2 => "error",
        -1 => "warn",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = match verbose + quiet {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        _ => EnvFilter::new(default),
    };
    let _ = fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).try_init();
}

async fn open_store(config: &Config) -> Result<Database> {
    Database::open_store(&config.store).await.or_raise(|| ErrorKind::Store(config.store.display().to_string()))
}

fn http_options(config: &Config) -> HttpOptions {
    HttpOptions {
        window_size: config.window_size,
        timeout: config.timeout(),
        token: config.token.clone(),
    }
}

#[cfg(feature = "s3")]
async fn s3_repository(bucket: String, prefix: Option<String>, config: &Config) -> Result<RepositoryHandle> {
    use symsrv_storage::backend::S3Repository;

    let (key_id, key_secret) = config.s3_credentials().or_raise(|| ErrorKind::Config)?;
    let name = format!("s3://{bucket}");
    let repository = S3Repository::new(
        name.as_str(),
        bucket,
        prefix,
        config.s3_region.as_str(),
        config.s3_endpoint.clone(),
        key_id,
        key_secret,
    )
    .await
    .or_raise(|| ErrorKind::Repository(name.clone()))?;
    Ok(Arc::new(repository.with_window_size(config.window_size)))
}

/// Turn the chosen source flags into a repository (and, for `--file`, the one
/// node to publish).
async fn resolve(args: PublishArgs, config: &Config) -> Result<Target> {
    if !args.repos.is_empty() && args.arti.is_none() {
        exn::bail!(ErrorKind::Usage("--repo only applies to --arti"));
    }
    #[cfg(feature = "s3")]
    if let Some(bucket) = args.s3 {
        return Ok(Target::Crawl(s3_repository(bucket, args.prefix, config).await?));
    }
    let options = http_options(config);
    if let Some(base) = args.arti {
        let repository =
            HttpRepository::new(base.as_str(), &base, args.repos, options).or_raise(|| ErrorKind::Repository(base.clone()))?;
        return Ok(Target::Crawl(Arc::new(repository)));
    }
    if let Some(dir) = args.dir {
        let invalid = || ErrorKind::Repository(dir.display().to_string());
        let root = tokio::fs::canonicalize(&dir).await.or_raise(invalid)?;
        let repository = LocalRepository::new(root.display().to_string(), &root).or_raise(invalid)?;
        return Ok(Target::Crawl(Arc::new(repository)));
    }
    let location = args.file.ok_or_raise(|| ErrorKind::Usage(SOURCE_USAGE))?;
    let (repository, node) =
        symsrv_storage::locate(&location, &options).await.or_raise(|| ErrorKind::Repository(location.clone()))?;
    Ok(Target::Location(repository, node))
}

async fn publish(args: PublishArgs, config: Config) -> Result<()> {
    let target = resolve(args, &config).await?;
    let db = open_store(&config).await?;
    let params = Params::new(&config.store)
        .with_excludes(config.exclude.clone())
        .with_link_mode(config.link_mode)
        .with_overwrite(config.overwrite)
        .with_flush_every(config.flush_every);
    let hasher: Arc<dyn HashProvider> = Arc::new(FormatChain::new().with(Blake3Digest));
    let publisher = Publisher::open(params, SymbolStore::from(&db), hasher).await;

    let result = match target {
        Target::Crawl(repository) => publish_repository(repository, publisher, config.threads).await,
        Target::Location(repository, node) => publish_location(repository, node, publisher).await,
    };
    let report = result.or_raise(|| ErrorKind::Publish);
    db.close().await;
    let report = report?;
    println!("{report}");
    Ok(())
}

async fn find(config: Config, hash: Option<String>, filename: Option<String>) -> Result<()> {
    if hash.is_none() && filename.is_none() {
        exn::bail!(ErrorKind::Usage("pass --hash or --filename"));
    }
    // Stored filenames are never empty, so an empty one matches nothing.
    let filename = filename.unwrap_or_default();
    let db = open_store(&config).await?;
    let store = SymbolStore::from(&db);
    let found = store.find_symbol(hash.as_deref(), &filename).await.or_raise(|| ErrorKind::Store(config.store.display().to_string()));
    db.close().await;
    match found? {
        Some(symbol) => println!(
            "{}\t{}\t{}\t{}",
            symbol.hash,
            symbol.filename,
            symbol.origin_url.unwrap_or_default(),
            symbol.store_path.unwrap_or_default(),
        ),
        None => println!("not found"),
    }
    Ok(())
}

async fn dump(config: Config) -> Result<()> {
    let db = open_store(&config).await?;
    let store = SymbolStore::from(&db);
    let invalid = || ErrorKind::Store(config.store.display().to_string());
    let listed = async { Ok::<_, symsrv_store::error::Error>((store.list_symbols().await?, store.list_sources().await?)) }.await;
    db.close().await;
    let (symbols, sources) = listed.or_raise(invalid)?;
    println!("# symbols ({})", symbols.len());
    for symbol in symbols {
        println!(
            "{}\t{}\t{}\t{}",
            symbol.hash,
            symbol.filename,
            symbol.origin_url.unwrap_or_default(),
            symbol.store_path.unwrap_or_default(),
        );
    }
    println!("# sources ({})", sources.len());
    for source in sources {
        println!("{}\tloaded={}\tfailures={}", source.path, source.loaded, source.failure_count);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let store = cli.global.store;
    let overrides = match &cli.command {
        Commands::Publish(args) => args.overrides(store),
        Commands::Find { .. } | Commands::Dump => Overrides {
            store,
            ..Overrides::default()
        },
    };
    let config = symsrv_config::load(cli.global.config.as_deref(), &overrides).or_raise(|| ErrorKind::Config)?;
    tracing::debug!(store = %config.store.display(), threads = config.threads, "Loaded configuration");
    match cli.command {
        Commands::Publish(args) => publish(args, config).await,
        Commands::Find { hash, filename } => find(config, hash, filename).await,
        Commands::Dump => dump(config).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose, cli.global.quiet);
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:?}");
            ExitCode::FAILURE
        },
    }
}

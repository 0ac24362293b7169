use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use reqwest::Url;
use tokio::runtime::Handle;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use wikipeek::calc::bind::{BindingValue, VariableBindings};
use wikipeek::calc::OffenseInputs;
use wikipeek::config::PreviewSettings;
use wikipeek::dom::Document;
use wikipeek::fetch::ContentFetcher;
use wikipeek::links::{LinkDiscoverer, TriggerLink};
use wikipeek::preview::runtime::spawn_preview_worker;
use wikipeek::preview::{PreviewEvent, PreviewManager};
use wikipeek::resolve::UrlResolver;
use wikipeek::server::{DEFAULT_BIND, run_site_server};
use wikipeek::session::{FileSessionStore, MemorySessionStore, SessionStore};

const LOG_DIR_ENV: &str = "WIKIPEEK_LOG_DIR";
const FILE_LOG_ENV: &str = "WIKIPEEK_FILE_LOG";

#[derive(Debug, Parser)]
#[command(name = "wikipeek", about = "Hover previews for statically published note wikis")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve an exported wiki directory for local testing.
    Serve {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        #[arg(long, default_value = DEFAULT_BIND)]
        bind: String,
    },
    /// Resolve link targets as seen from a page.
    Resolve {
        #[arg(long)]
        page: String,
        targets: Vec<String>,
    },
    /// Fetch a page and print its preview content.
    Fetch { url: String },
    /// List the trigger links found in an HTML file.
    Links {
        file: PathBuf,
        /// Page URL used to resolve each link.
        #[arg(long)]
        page: Option<String>,
    },
    /// Hover a link on a live page and print the preview it opens.
    Hover {
        #[arg(long)]
        page: String,
        /// Display text of the link to hover.
        link: String,
    },
    /// Run the offense calculator over its nine input fields.
    Calc { fields: Vec<String> },
    /// Evaluate an expression over the bound variables.
    Eval {
        expr: String,
        /// Bind a variable before evaluating, as `NAME=VALUE`.
        #[arg(long = "set", value_name = "NAME=VALUE")]
        assignments: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_tracing()?;

    let cli = Cli::parse();
    let settings = PreviewSettings::from_env().context("failed to load configuration")?;

    match cli.command {
        Commands::Serve { root, bind } => run_site_server(&root, &bind).await?,
        Commands::Resolve { page, targets } => {
            let resolver = UrlResolver::new(parse_url(&page)?, &settings.resolver);
            for target in targets {
                println!("{target}\t{}", resolver.resolve(&target));
            }
        }
        Commands::Fetch { url } => fetch_preview(&settings, &url).await?,
        Commands::Links { file, page } => list_links(&settings, &file, page.as_deref())?,
        Commands::Hover { page, link } => hover_link(&settings, &page, &link).await?,
        Commands::Calc { fields } => {
            println!("{}", OffenseInputs::from_fields(fields.as_slice()).compute());
        }
        Commands::Eval { expr, assignments } => evaluate(&settings, &expr, &assignments)?,
    }

    Ok(())
}

async fn fetch_preview(settings: &PreviewSettings, raw_url: &str) -> Result<()> {
    let url = parse_url(raw_url)?;
    let fetcher = ContentFetcher::new(settings.fetch_timeout_ms, settings.page_extension.clone());
    match fetcher.fetch(&url).await {
        Ok(page) => {
            if let Some(title) = &page.title {
                println!("# {title}");
            }
            println!("{}", page.html);
            Ok(())
        }
        Err(error) => {
            println!("{}", error.user_message());
            Err(error).context("preview fetch failed")
        }
    }
}

fn list_links(settings: &PreviewSettings, file: &Path, page: Option<&str>) -> Result<()> {
    let html = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read `{}`", file.display()))?;
    let resolver = page
        .map(|page| parse_url(page).map(|url| UrlResolver::new(url, &settings.resolver)))
        .transpose()?;

    let mut document = Document::parse(&html);
    let body = document.body();
    for node in LinkDiscoverer::new().discover(&mut document, body) {
        let Some(link) = TriggerLink::from_node(&document, node) else {
            continue;
        };
        let target = link.raw_target();
        match &resolver {
            Some(resolver) => println!("{}\t{target}\t{}", link.text, resolver.resolve(&target)),
            None => println!("{}\t{target}", link.text),
        }
    }
    Ok(())
}

async fn hover_link(settings: &PreviewSettings, raw_page: &str, link_text: &str) -> Result<()> {
    let page_url = parse_url(raw_page)?;
    let html = reqwest::get(page_url.clone())
        .await
        .and_then(reqwest::Response::error_for_status)
        .with_context(|| format!("failed to load page `{page_url}`"))?
        .text()
        .await
        .with_context(|| format!("failed to read page `{page_url}`"))?;

    let mut manager = PreviewManager::init(Document::parse(&html), page_url, settings.clone())
        .with_session(open_session(settings)?);
    manager.start().context("failed to start previews")?;
    let body = manager.document().body();
    let link = manager
        .trigger_links_in(body)
        .into_iter()
        .find(|node| manager.document().text_content(*node).trim() == link_text)
        .with_context(|| format!("no previewable link named `{link_text}`"))?;

    let fetcher = ContentFetcher::new(settings.fetch_timeout_ms, settings.page_extension.clone());
    let (handle, mut events) = spawn_preview_worker(&Handle::current(), manager, fetcher);
    handle.pointer_moved(Some(link));
    handle.link_entered(link);

    let wait = settings.timing.show_delay
        + Duration::from_millis(settings.fetch_timeout_ms)
        + Duration::from_secs(1);
    let ready = tokio::time::timeout(wait, async {
        while let Some(event) = events.recv().await {
            if let PreviewEvent::ContentReady { html, title, .. } = event {
                return Some((html, title));
            }
        }
        None
    })
    .await;
    handle.shutdown();

    match ready {
        Ok(Some((html, title))) => {
            if let Some(title) = title {
                println!("# {title}");
            }
            println!("{html}");
            Ok(())
        }
        Ok(None) => bail!("preview worker stopped before content arrived"),
        Err(_) => bail!("no preview content within {}ms", wait.as_millis()),
    }
}

fn evaluate(settings: &PreviewSettings, expr: &str, assignments: &[String]) -> Result<()> {
    let mut store = open_session(settings)?;
    let mut bindings = VariableBindings::load(store.as_ref());
    for assignment in assignments {
        let (name, raw) = assignment
            .split_once('=')
            .with_context(|| format!("expected NAME=VALUE, got `{assignment}`"))?;
        let value = match raw.trim().parse::<f64>() {
            Ok(number) => BindingValue::Number(number),
            Err(_) => BindingValue::Text(raw.to_owned()),
        };
        bindings
            .set(store.as_mut(), name.trim(), value)
            .context("failed to store binding")?;
    }
    println!("{}", bindings.render(expr));
    Ok(())
}

fn open_session(settings: &PreviewSettings) -> Result<Box<dyn SessionStore + Send>> {
    match &settings.session_file {
        Some(path) => {
            let store = FileSessionStore::open(path).context("failed to open session file")?;
            Ok(Box::new(store))
        }
        None => Ok(Box::new(MemorySessionStore::default())),
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).with_context(|| format!("invalid URL `{raw}`"))
}

fn init_tracing() -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,wikipeek=debug"));
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(env_filter);

    let (file_layer, guard) = match std::env::var_os(LOG_DIR_ENV) {
        Some(log_dir) => {
            let appender = tracing_appender::rolling::daily(log_dir, "wikipeek.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_filter =
                EnvFilter::try_from_env(FILE_LOG_ENV).unwrap_or_else(|_| EnvFilter::new("debug"));
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(file_filter);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;
    Ok(guard)
}

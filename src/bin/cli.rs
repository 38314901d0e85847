//! tabgrove CLI - run organizing passes against a tab snapshot
//!
//! Usage: tabgrove-cli [OPTIONS] <COMMAND>
//!
//! The snapshot is a JSON file with `tabs`, `groups` and optional
//! `ineligibleWindows` / `metaText`; the pass mutates an in-memory copy and
//! prints the resulting groups.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use tabgrove_lib::ai_client::OpenAiClient;
use tabgrove_lib::cache::{CacheStore, FileCache};
use tabgrove_lib::host::{HostCapabilities, HostSnapshot, MemoryTabHost, TabHost};
use tabgrove_lib::settings::Settings;
use tabgrove_lib::tabs::{TabScope, WindowId};
use tabgrove_lib::{Error, Result, TabOrganizer};

#[derive(Parser)]
#[command(name = "tabgrove-cli")]
#[command(version, about = "Sort browser tabs into groups with embeddings and an LLM", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Settings file (default: <config dir>/tabgrove/settings.json)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Cache file (default: <cache dir>/tabgrove/cache.json)
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    /// Output as JSON for scripting
    #[arg(long, global = true)]
    json: bool,

    /// Detailed logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one organizing pass over a tab snapshot
    Organize {
        /// Snapshot JSON file
        #[arg(long)]
        tabs: PathBuf,
        /// Only organize this window
        #[arg(long)]
        window: Option<i64>,
        /// Override the leftover clustering distance threshold
        #[arg(long)]
        threshold: Option<f32>,
        /// Clear caches before the pass
        #[arg(long)]
        fresh: bool,
    },
    /// Categorize a single page
    Categorize {
        #[arg(long)]
        url: String,
        #[arg(long)]
        title: String,
        /// Auxiliary page text (meta description)
        #[arg(long, default_value = "")]
        meta: String,
        /// Comma-separated categories (default: from settings)
        #[arg(long)]
        categories: Option<String>,
    },
    /// Settings operations
    Settings {
        #[command(subcommand)]
        cmd: SettingsCommands,
    },
    /// Cache operations
    Cache {
        #[command(subcommand)]
        cmd: CacheCommands,
    },
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Show effective settings
    Show,
    /// Store the API key
    SetKey { key: String },
    /// Store the completion model
    SetModel { model: String },
    /// Store the category list (comma-separated)
    SetCategories { categories: String },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Drop every cached decision, embedding and snapshot
    Clear,
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open_cache(cli: &Cli) -> Result<Arc<FileCache>> {
    let path = cli.cache.clone().unwrap_or_else(FileCache::default_path);
    Ok(Arc::new(FileCache::open(&path).await?))
}

async fn cmd_organize(
    cli: &Cli,
    settings: Settings,
    tabs: &PathBuf,
    window: Option<i64>,
    fresh: bool,
) -> Result<()> {
    settings.validate()?;
    let client = Arc::new(OpenAiClient::from_settings(&settings)?);
    let cache = open_cache(cli).await?;
    let host = Arc::new(MemoryTabHost::new(HostSnapshot::from_file(tabs)?));
    let capabilities = HostCapabilities { tab_groups: settings.tab_groups_supported };

    let organizer = TabOrganizer::new(host.clone(), client.clone(), client, cache, settings, capabilities);
    if fresh {
        organizer.initialize().await?;
    }

    let scope = window.map(|w| TabScope::Window(WindowId(w))).unwrap_or(TabScope::AllWindows);
    let report = organizer.organize(scope).await?;

    if cli.json {
        #[derive(serde::Serialize)]
        struct Output<'a> {
            report: &'a tabgrove_lib::OrganizeReport,
            state: HostSnapshot,
        }
        return print_json(&Output { report: &report, state: host.snapshot() });
    }

    println!(
        "{} candidates, {} categorized, {} into existing groups, {} new groups, {} clusters, {} ungrouped{}",
        report.candidates,
        report.categorized,
        report.placed_existing.len(),
        report.created_groups.len(),
        report.clustered.len(),
        report.ungrouped.len(),
        if report.clustering_skipped { " (clustering skipped)" } else { "" }
    );
    let state = host.snapshot();
    for group in host.get_groups(scope).await? {
        println!("\n[{}] {} ({})", group.id.0, group.title, group.color.as_str());
        for tab_id in host.tabs_in_group(group.id) {
            if let Some(tab) = state.tabs.iter().find(|t| t.id == tab_id) {
                println!("  - {} ({})", tab.title, tab.domain);
            }
        }
    }
    Ok(())
}

async fn cmd_categorize(
    cli: &Cli,
    settings: Settings,
    url: &str,
    title: &str,
    meta: &str,
    categories: Option<&str>,
) -> Result<()> {
    let categories = categories.map(split_list).unwrap_or_else(|| settings.categories());
    if categories.is_empty() {
        return Err(Error::Config("no categories given and none configured".into()));
    }

    let client = Arc::new(OpenAiClient::from_settings(&settings)?);
    let cache = open_cache(cli).await?;
    let host = Arc::new(MemoryTabHost::new(HostSnapshot::default()));
    let organizer = TabOrganizer::new(host, client.clone(), client, cache, settings, HostCapabilities::default());

    let category = organizer.categorizer().categorize(url, title, meta, &categories).await;
    if cli.json {
        return print_json(&serde_json::json!({ "category": category }));
    }
    println!("{}", category.as_deref().unwrap_or("(none)"));
    Ok(())
}

fn cmd_settings(cli: &Cli, path: &PathBuf, mut settings: Settings, cmd: &SettingsCommands) -> Result<()> {
    match cmd {
        SettingsCommands::Show => {
            let mut shown = settings.clone();
            shown.api_key = settings.masked_api_key();
            shown.model = settings.model();
            if cli.json {
                return print_json(&shown);
            }
            println!("{}", serde_json::to_string_pretty(&shown)?);
            println!("settings file: {}", path.display());
            return Ok(());
        }
        SettingsCommands::SetKey { key } => settings.api_key = Some(key.clone()).filter(|k| !k.is_empty()),
        SettingsCommands::SetModel { model } => settings.model = Some(model.clone()).filter(|m| !m.is_empty()),
        SettingsCommands::SetCategories { categories } => settings.category_list = split_list(categories),
    }
    settings.save(path)?;
    println!("Saved {}", path.display());
    Ok(())
}

async fn run(cli: &Cli) -> Result<()> {
    let settings_path = cli.settings.clone().unwrap_or_else(Settings::default_path);
    let settings = Settings::load(&settings_path);

    match &cli.command {
        Commands::Organize { tabs, window, threshold, fresh } => {
            let mut settings = settings;
            if let Some(t) = threshold {
                settings.cluster_distance_threshold = *t;
            }
            cmd_organize(cli, settings, tabs, *window, *fresh).await
        }
        Commands::Categorize { url, title, meta, categories } => {
            cmd_categorize(cli, settings, url, title, meta, categories.as_deref()).await
        }
        Commands::Settings { cmd } => cmd_settings(cli, &settings_path, settings, cmd),
        Commands::Cache { cmd: CacheCommands::Clear } => {
            let cache = open_cache(cli).await?;
            cache.clear().await?;
            println!("Cache cleared");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::WARN };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("news, sports,,  docs "), vec!["news", "sports", "docs"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_parse_organize() {
        let cli = Cli::try_parse_from(["tabgrove-cli", "organize", "--tabs", "tabs.json", "--threshold", "0.25", "--json"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Organize { threshold, fresh, .. } => {
                assert_eq!(threshold, Some(0.25));
                assert!(!fresh);
            }
            _ => panic!("expected organize"),
        }
    }
}

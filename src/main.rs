//! `moim` command line: call the API through the same client, cache and
//! local stores an application would use.

use clap::{Parser, Subcommand};
use exn::ResultExt;
use moim::models::{GatheringsQuery, ReviewsQuery};
use moim::{ErrorKind, Moim, Result};
use moim_config::Config;
use moim_http::{Method, QueryParams};
use moim_loading::LogIndicator;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "moim", about = "Talk to the moim gathering API", version)]
struct Cli {
    /// Configuration file merged over the defaults and the user config.
    #[arg(long, value_name = "path", global = true)]
    config: Option<PathBuf>,
    /// Bearer token for this invocation.
    #[arg(long, env = "MOIM_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// GET an API path and print the JSON response.
    Get {
        path: String,
        /// Query parameter as `key=value`; may be repeated.
        #[arg(short, long = "query", value_name = "key=value", value_parser = parse_pair)]
        query: Vec<(String, String)>,
    },
    /// Favorites kept on this device.
    #[command(subcommand)]
    Favorites(FavoritesCommand),
    /// First page of reviews.
    Reviews {
        #[arg(long)]
        gathering: Option<u64>,
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Debug, Subcommand)]
enum FavoritesCommand {
    /// Favorite a gathering, or unfavorite it if it already is one.
    Toggle {
        #[arg(long)]
        user: u64,
        #[arg(long)]
        gathering: u64,
    },
    /// Print the favorite gathering ids of a user.
    List {
        #[arg(long)]
        user: u64,
    },
    /// Fetch the favorite gatherings of a user.
    Gatherings {
        #[arg(long)]
        user: u64,
        #[arg(long = "type")]
        kind: Option<String>,
    },
}

fn parse_pair(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).or_raise(|| ErrorKind::Encode)?;
    println!("{rendered}");
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let moim = Moim::builder(config).indicator(Arc::new(LogIndicator)).build().await?;
    if let Some(token) = cli.token {
        moim.tokens.set(token);
    }

    match cli.command {
        Command::Get { path, query } => {
            let params: QueryParams = query.into_iter().map(|(key, value)| (key, Some(value))).collect();
            let value = moim::error::api(moim.client.request(Method::GET, path).query(params).send_value().await)?;
            print_json(&value)
        },
        Command::Favorites(FavoritesCommand::Toggle { user, gathering }) => {
            let liked = moim.favorites().toggle(user, gathering).await?;
            print_json(&serde_json::json!({ "gatheringId": gathering, "liked": liked }))
        },
        Command::Favorites(FavoritesCommand::List { user }) => print_json(&moim.favorites().ids(user).await?),
        Command::Favorites(FavoritesCommand::Gatherings { user, kind }) => {
            let filter = GatheringsQuery { kind, ..Default::default() };
            let subscription = moim.favorites().gatherings(user, &filter).await?;
            let state = subscription.settled().await;
            if let Some(error) = state.error {
                return Err(exn::Exn::from(ErrorKind::query(&error)));
            }
            let gatherings = state.data.map(|data| (*data).clone()).unwrap_or_default();
            print_json(&gatherings)
        },
        Command::Reviews { gathering, limit } => {
            let filter = ReviewsQuery { gathering_id: gathering, limit, ..Default::default() };
            let pages = moim::error::query(moim.reviews().list(filter).next_page().await)?;
            let reviews: Vec<_> = pages.pages.iter().flat_map(|page| page.data.iter()).collect();
            print_json(&reviews)
        },
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(?error, "command failed");
            ExitCode::FAILURE
        },
    }
}

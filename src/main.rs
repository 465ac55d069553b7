// src/main.rs
use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::{info, warn};
use matchday_governor::{
    api::ApiFootballClient,
    config::load_settings,
    football::{FootballApi, DATE_FORMAT},
    utils::{setup_logging, Timer},
    Governor, GovernorError,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "matchday", version, about = "Query football data through the rate-limited request governor")]
struct Cli {
    /// Issue the same request this many times (later ones should hit the cache)
    #[arg(long, default_value_t = 1)]
    repeat: u32,

    /// Print governor statistics after the command
    #[arg(long)]
    stats: bool,

    /// Single-line JSON output
    #[arg(long)]
    compact: bool,

    /// Overrides LOG_LEVEL (error, warn, info, debug, trace)
    #[arg(long, value_parser = parse_level)]
    log_level: Option<log::LevelFilter>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fixtures for a date (defaults to today, UTC)
    Fixtures {
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },
    /// Fixtures currently in play
    Live,
    Fixture {
        #[arg(long)]
        id: u64,
    },
    /// Head-to-head history between two teams
    H2h {
        #[arg(long)]
        home: u64,
        #[arg(long)]
        away: u64,
        #[arg(long)]
        last: Option<u32>,
    },
    Predictions {
        #[arg(long)]
        fixture: u64,
    },
    Statistics {
        #[arg(long)]
        fixture: u64,
    },
    Events {
        #[arg(long)]
        fixture: u64,
    },
    Lineups {
        #[arg(long)]
        fixture: u64,
    },
    Odds {
        #[arg(long)]
        fixture: u64,
    },
    Standings {
        #[arg(long)]
        league: u32,
        #[arg(long)]
        season: u16,
    },
    Team {
        #[arg(long)]
        id: u64,
    },
    TeamStats {
        #[arg(long)]
        league: u32,
        #[arg(long)]
        season: u16,
        #[arg(long)]
        team: u64,
    },
    Leagues {
        #[arg(long)]
        country: Option<String>,
    },
    Players {
        #[arg(long)]
        team: u64,
        #[arg(long)]
        season: u16,
        #[arg(long)]
        page: Option<u32>,
    },
    TopScorers {
        #[arg(long)]
        league: u32,
        #[arg(long)]
        season: u16,
    },
}

fn parse_level(raw: &str) -> Result<log::LevelFilter, String> {
    raw.parse().map_err(|_| format!("unknown log level: {}", raw))
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|e| format!("expected YYYY-MM-DD: {}", e))
}

async fn run_command(api: &FootballApi, command: &Command) -> Result<Arc<Value>, GovernorError> {
    match command {
        Command::Fixtures { date: Some(date) } => api.fixtures_by_date(*date).await,
        Command::Fixtures { date: None } => api.todays_fixtures().await,
        Command::Live => api.live_fixtures().await,
        Command::Fixture { id } => api.fixture(*id).await,
        Command::H2h { home, away, last } => api.head_to_head(*home, *away, *last).await,
        Command::Predictions { fixture } => api.predictions(*fixture).await,
        Command::Statistics { fixture } => api.fixture_statistics(*fixture).await,
        Command::Events { fixture } => api.fixture_events(*fixture).await,
        Command::Lineups { fixture } => api.fixture_lineups(*fixture).await,
        Command::Odds { fixture } => api.odds(*fixture).await,
        Command::Standings { league, season } => api.standings(*league, *season).await,
        Command::Team { id } => api.team(*id).await,
        Command::TeamStats { league, season, team } => api.team_statistics(*league, *season, *team).await,
        Command::Leagues { country } => api.leagues(country.as_deref()).await,
        Command::Players { team, season, page } => api.players(*team, *season, *page).await,
        Command::TopScorers { league, season } => api.top_scorers(*league, *season).await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = load_settings();
    setup_logging(cli.log_level.unwrap_or(settings.log_level)).context("failed to initialize logging")?;
    settings.validate_and_log().context("invalid settings")?;

    let upstream = ApiFootballClient::from_settings(&settings)?;
    let governor = Governor::new(settings.governor.clone(), Arc::new(upstream))?;
    let api = FootballApi::new(governor.clone());

    for round in 1..=cli.repeat.max(1) {
        let timer = Timer::start(&format!("{:?} (round {})", cli.command, round));
        let outcome = run_command(&api, &cli.command).await;
        timer.finish_with_threshold(Duration::from_secs(5));

        let data = match outcome {
            Ok(data) => data,
            Err(GovernorError::NoCredential) => {
                anyhow::bail!("no API key configured: set FOOTBALL_API_KEY (or add it to .env)");
            }
            Err(err) => {
                warn!("Request failed: {}", err);
                return Err(err).context("request failed");
            }
        };

        // Later rounds are cache hits; only the first response is printed
        if round == 1 {
            let rendered = if cli.compact {
                serde_json::to_string(data.as_ref())?
            } else {
                serde_json::to_string_pretty(data.as_ref())?
            };
            println!("{}", rendered);
        }
    }

    let stats = governor.stats();
    info!("📊 {}", stats);
    if cli.stats {
        eprintln!("{}", serde_json::to_string_pretty(&stats)?);
    }
    Ok(())
}

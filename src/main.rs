mod cli;
mod ui;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use console::Style;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use lightning_dispatch::DispatchApi;
use lightning_dispatch::clock::{Clock, ManualClock, SystemClock};
use lightning_dispatch::config::DispatchConfig;
use lightning_dispatch::dispatch::{
    AcceptanceWindow, DispatchPolicy, DispatchRequest, GeoPoint, Urgency,
};
use lightning_dispatch::locator::{Availability, ContractorProfile, RosterLocator};
use lightning_dispatch::notify::{ExpoPushBridge, LogBridge, NotificationBridge};
use lightning_dispatch::store::{FileStore, MemoryStore};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => DispatchConfig::load_from(path),
        None => DispatchConfig::load(),
    }
    .context("loading configuration")?;
    if let Some(secs) = cli.window_secs {
        config.acceptance_window = AcceptanceWindow::uniform(secs);
    }
    if cli.max_rounds.is_some() {
        config.max_rounds = cli.max_rounds;
    }
    config.validate().context("invalid --window-secs")?;

    if let Command::Demo = cli.command {
        return run_demo().await;
    }

    let api = build_api(&config).await?;
    let clock = SystemClock;

    match cli.command {
        Command::Ping {
            job_id,
            lat,
            lng,
            job_type,
            value,
            urgency,
        } => {
            // Lapsed offers have to be expired before the job can move on.
            if let Err(e) = api.watcher(config.sweep_interval()).sweep().await {
                tracing::warn!(error = %e, "Pre-ping sweep failed");
            }
            let request = DispatchRequest {
                job_id,
                location: GeoPoint { lat, lng },
                job_type,
                estimated_value: value,
                urgency: urgency.into(),
            };
            let response = api.ping(request).await;
            if let Some(error) = &response.error {
                ui::print_error(error);
            }
            print_json(&response)?;
        }
        Command::Accept { assignment_id } => {
            let response = api.accept_assignment(&assignment_id).await;
            if let Some(error) = &response.error {
                ui::print_error(error);
            }
            print_json(&response)?;
        }
        Command::Reject { assignment_id } => {
            let response = api.reject_assignment(&assignment_id).await;
            if let Some(error) = &response.error {
                ui::print_error(error);
            }
            print_json(&response)?;
        }
        Command::Pending { contractor_id } => {
            let pending = api.get_pending_assignments(&contractor_id).await?;
            print_json(&pending)?;
        }
        Command::RegisterPush {
            contractor_id,
            token,
        } => {
            print_json(&api.register_push_token(&contractor_id, &token).await)?;
        }
        Command::Cancel { job_id } => {
            let response = api.cancel_job(&job_id).await;
            if let Some(error) = &response.error {
                ui::print_error(error);
            }
            print_json(&response)?;
        }
        Command::Status { job_id: Some(job_id) } => {
            let report = api.job_report(&job_id).await?;
            ui::print_report(&report, clock.now());
        }
        Command::Status { job_id: None } => {
            let jobs = api.list_jobs().await?;
            if jobs.is_empty() {
                println!("  No dispatch sessions yet");
            }
            for state in jobs {
                let report = api.job_report(&state.job_id).await?;
                ui::print_report(&report, clock.now());
            }
        }
        Command::Sweep => {
            let report = api.watcher(config.sweep_interval()).sweep().await?;
            print_json(&report)?;
        }
        Command::Watch => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Could not listen for Ctrl-C");
                }
                on_signal.cancel();
            });

            let mut progress = ui::WatchProgress::start(config.sweep_interval_secs);
            let watcher = Arc::new(api.watcher(config.sweep_interval()));
            watcher.run(cancel, |report| progress.sweep(report)).await;
            progress.finish();
        }
        // Runs before any store is opened.
        Command::Demo => {}
    }

    api.settle().await;
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn build_api(config: &DispatchConfig) -> Result<DispatchApi> {
    let store = FileStore::open(&config.state_path)
        .await
        .with_context(|| format!("opening state file {}", config.state_path.display()))?;
    let locator = RosterLocator::load(&config.roster_path, config.max_distance_miles)?;
    tracing::debug!(contractors = locator.len(), "Roster loaded");

    let bridge: Arc<dyn NotificationBridge> = if config.push.enabled {
        let bridge = ExpoPushBridge::with_endpoint(
            config.push.endpoint.clone(),
            config.push.access_token.clone(),
            config.push.retry(),
        )?
        .with_token_file(config.push.tokens_path.clone())
        .await?;
        Arc::new(bridge)
    } else {
        Arc::new(LogBridge::new())
    };

    Ok(DispatchApi::new(
        Arc::new(store),
        Arc::new(locator),
        bridge,
        Arc::new(SystemClock),
        DispatchPolicy::from(config),
    ))
}

fn demo_contractor(id: &str, lat: f64, rating: f64) -> ContractorProfile {
    ContractorProfile {
        id: id.to_string(),
        name: format!("Contractor {id}"),
        lat,
        lng: -97.7431,
        rating,
        completed_jobs: 25,
        availability: Availability::Available,
        verified: true,
    }
}

fn demo_request(job_id: &str) -> DispatchRequest {
    DispatchRequest {
        job_id: job_id.to_string(),
        location: GeoPoint {
            lat: 30.2672,
            lng: -97.7431,
        },
        job_type: "Plumbing".to_string(),
        estimated_value: 350.0,
        urgency: Urgency::Normal,
    }
}

/// In-memory walkthrough of the dispatch protocol on a manual clock.
async fn run_demo() -> Result<()> {
    let heading = Style::new().cyan().bold();
    let ok = Style::new().green();
    let bad = Style::new().red();

    let clock = ManualClock::new(Utc::now());
    let roster = RosterLocator::new(
        vec![
            demo_contractor("C1", 30.2745, 4.9),
            demo_contractor("C2", 30.3100, 4.7),
            demo_contractor("C3", 30.3700, 4.9),
        ],
        50.0,
    );
    let api = DispatchApi::new(
        Arc::new(MemoryStore::new()),
        Arc::new(roster),
        Arc::new(LogBridge::new()),
        Arc::new(clock.clone()),
        DispatchPolicy {
            window: AcceptanceWindow::uniform(300),
            max_rounds: None,
        },
    );
    let watcher = api.watcher(std::time::Duration::from_secs(30));

    println!("{}", heading.apply_to("1. Reject moves the job to the next contractor"));
    let a1 = api
        .ping(demo_request("J1"))
        .await
        .assignment
        .context("J1 got no first offer")?;
    ui::print_offer(&a1, clock.now());
    clock.advance(Duration::seconds(10));
    api.reject_assignment(&a1.id).await;
    api.settle().await;
    let a2 = api
        .get_pending_assignments("C2")
        .await?
        .into_iter()
        .next()
        .context("J1 was not re-offered to C2")?;
    ui::print_offer(&a2, clock.now());

    println!("{}", heading.apply_to("2. An unanswered offer expires on the next sweep"));
    clock.advance(Duration::seconds(300));
    let report = watcher.sweep().await?;
    for a in report.expired.iter().chain(&report.redispatched) {
        ui::print_offer(a, clock.now());
    }
    let a3 = report
        .redispatched
        .into_iter()
        .next()
        .context("J1 was not re-offered to C3")?;

    println!("{}", heading.apply_to("3. Acceptance settles the job"));
    let accepted = api.accept_assignment(&a3.id).await;
    println!("  accept {} -> {}", a3.id, ok.apply_to(accepted.success));
    let stray = api.reject_assignment(&a3.id).await;
    if let Some(error) = &stray.error {
        println!("  stray reject -> {}", bad.apply_to(error.kind));
    }

    println!("{}", heading.apply_to("4. Concurrent accepts have a single winner"));
    let b1 = api
        .ping(demo_request("J2"))
        .await
        .assignment
        .context("J2 got no offer")?;
    let (first, second) = tokio::join!(
        api.accept_assignment(&b1.id),
        api.accept_assignment(&b1.id)
    );
    for response in [first, second] {
        match response.error {
            None => println!("  {}", ok.apply_to("accepted")),
            Some(error) => println!("  {}", bad.apply_to(error.kind)),
        }
    }

    println!("{}", heading.apply_to("5. Running out of contractors is terminal"));
    api.ping(demo_request("J3")).await;
    for contractor in ["C1", "C2", "C3"] {
        for offer in api.get_pending_assignments(contractor).await? {
            if offer.job_id == "J3" {
                api.reject_assignment(&offer.id).await;
                api.settle().await;
            }
        }
    }
    for _ in 0..2 {
        let response = api.ping(demo_request("J3")).await;
        if let Some(error) = &response.error {
            ui::print_error(error);
        }
    }

    for job_id in ["J1", "J2", "J3"] {
        ui::print_report(&api.job_report(job_id).await?, clock.now());
    }
    Ok(())
}

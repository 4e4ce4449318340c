// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use anyhow::Result;
use log::debug;
use log::error;
use log::info;
use log::warn;
use lowmemd::config::Config;
use lowmemd::config::ConfigProvider;
use lowmemd::config::DirectoryConfigProvider;
use lowmemd::cooldown::CooldownState;
use lowmemd::logger;
use lowmemd::memory::ProcfsSnapshotProvider;
use lowmemd::process::ProcfsProcessSource;
use lowmemd::process::SignalProcessController;
use lowmemd::psi::PsiWatcher;
use lowmemd::psi::Trigger;
use lowmemd::reclaimer::KillOutcome;
use lowmemd::reclaimer::Reclaimer;
use lowmemd::table_manager::TableManager;
use lowmemd::table_manager::DEFAULT_PROFILE;
use lowmemd::table_manager::SCREEN_OFF_PROFILE;
use tokio::runtime::Builder;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::time::Interval;
use tokio::time::MissedTickBehavior;

const IDENT: &str = "lowmemd";
const LOG_TO_STDERR_ENV: &str = "LOWMEMD_LOG_TO_STDERR";

enum Event {
    Tick,
    Pressure(io::Result<()>),
    Profile(&'static str),
    Reload,
}

fn new_ticker(poll_interval: Option<Duration>) -> Option<Interval> {
    poll_interval.map(|period| {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    })
}

fn evaluate(reclaimer: &Reclaimer, trigger: &str) {
    match reclaimer.evaluate(Instant::now()) {
        KillOutcome::NoActionNeeded => {}
        KillOutcome::DeferredCooldownActive => debug!("{}: waiting for the last kill", trigger),
        KillOutcome::Killed { pid, freed_pages } => {
            info!("{}: killed {}, about {} pages freed", trigger, pid, freed_pages)
        }
        KillOutcome::NoEligibleVictim => warn!("{}: under pressure, nothing to kill", trigger),
    }
}

fn apply_config(reclaimer: &Reclaimer, config: &Config) {
    logger::set_debug_level(config.debug_level);
    reclaimer
        .cooldown()
        .set_grace_period(config.deathpending_timeout);
    let tables = reclaimer.tables();
    tables.replace_profiles(config.profiles());
    if !tables.activate_profile(&config.profile) {
        warn!("Unknown threshold profile {}", config.profile);
    }
}

async fn run(
    reclaimer: &Reclaimer,
    provider: &dyn ConfigProvider,
    mut poll_interval: Option<Duration>,
) -> Result<()> {
    let mut screen_off = signal(SignalKind::user_defined1())?;
    let mut screen_on = signal(SignalKind::user_defined2())?;
    let mut reload = signal(SignalKind::hangup())?;

    let mut psi = match PsiWatcher::new_memory_pressure(Trigger::default()) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("PSI is not available, polling only: {}", e);
            None
        }
    };
    let mut ticker = new_ticker(poll_interval);
    if psi.is_none() && ticker.is_none() {
        warn!("Polling is disabled and PSI is not available, only signals are handled");
    }

    loop {
        let event = tokio::select! {
            _ = async {
                match ticker.as_mut() {
                    Some(ticker) => {
                        ticker.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            } => Event::Tick,
            result = async {
                match psi.as_mut() {
                    Some(watcher) => watcher.wait().await,
                    None => std::future::pending().await,
                }
            } => Event::Pressure(result),
            Some(_) = screen_off.recv() => Event::Profile(SCREEN_OFF_PROFILE),
            Some(_) = screen_on.recv() => Event::Profile(DEFAULT_PROFILE),
            Some(_) = reload.recv() => Event::Reload,
        };

        match event {
            Event::Tick => evaluate(reclaimer, "poll"),
            Event::Pressure(Ok(())) => evaluate(reclaimer, "psi"),
            Event::Pressure(Err(e)) => {
                error!("Failed to wait for PSI, polling only: {}", e);
                psi = None;
            }
            Event::Profile(name) => {
                if reclaimer.tables().activate_profile(name) {
                    evaluate(reclaimer, name);
                }
            }
            Event::Reload => match provider.read_config() {
                Ok(config) => {
                    info!("Reloaded config");
                    apply_config(reclaimer, &config);
                    if config.poll_interval != poll_interval {
                        poll_interval = config.poll_interval;
                        ticker = new_ticker(poll_interval);
                    }
                }
                Err(e) => error!("Failed to reload config: {:#}", e),
            },
        }
    }
}

// Must run after the logger is installed so errors are reported.
fn load_config(provider: &dyn ConfigProvider) -> Config {
    provider.read_config().unwrap_or_else(|e| {
        error!("Failed to load config, using defaults: {:#}", e);
        Config::default()
    })
}

fn main() -> Result<()> {
    let log_to_stderr = std::env::var_os(LOG_TO_STDERR_ENV).is_some();
    logger::init(IDENT, log_to_stderr, Config::default().debug_level)?;

    let provider = DirectoryConfigProvider {
        root: PathBuf::from("/"),
    };
    let config = load_config(&provider);
    logger::set_debug_level(config.debug_level);

    info!("Starting lowmemd");

    let tables = Arc::new(TableManager::with_profiles(
        config.profiles(),
        &config.profile,
    ));
    let reclaimer = Reclaimer::new(
        Arc::new(ProcfsSnapshotProvider::new()),
        Arc::new(ProcfsProcessSource::new()),
        Arc::new(SignalProcessController::new()),
        tables,
        CooldownState::new(config.deathpending_timeout),
    );

    let rt = Builder::new_current_thread().enable_all().build()?;
    rt.block_on(run(&reclaimer, &provider, config.poll_interval))
}

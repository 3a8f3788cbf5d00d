use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tc_audio::bank::AnalyzerBank;
use tc_audio::capture::DeviceSource;
use tc_audio::replay::FileSource;
use tc_audio::source::AudioBufferSource;
use tc_core::config::AppConfig;

pub mod cli;
pub mod engine;
pub mod hotreload;
pub mod monitor;
pub mod orchestrator;
pub mod report;

fn main() -> Result<()> {
    // 1. Parser CLI
    let cli = cli::Cli::parse();

    // 2. Initialiser le logging
    env_logger::Builder::new()
        .filter_level(cli.log_level.parse().unwrap_or(log::LevelFilter::Warn))
        .init();

    // 3. Ctrl-C → canal d'arrêt
    let (shutdown_tx, shutdown_rx) = flume::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .context("Impossible d'installer le handler Ctrl-C")?;

    let result = match cli.command() {
        cli::Command::Catalog => print_catalog(&cli),
        cli::Command::Monitor { port, bind, count } => monitor::run(&bind, port, count, &shutdown_rx),
        cli::Command::Run => run(&cli, &shutdown_rx),
    };
    if let Err(ref e) = result {
        log::error!("{e:#}");
    }
    result
}

/// Catalogue d'adresses pour la config courante, en JSON sur stdout.
fn print_catalog(cli: &cli::Cli) -> Result<()> {
    let mut config = resolve_config(cli)?;
    cli.apply_overrides(&mut config);
    config.validate().context("Configuration invalide")?;
    let bank = AnalyzerBank::from_config(&config)?;
    println!("{}", serde_json::to_string_pretty(&**bank.catalog())?);
    Ok(())
}

fn run(cli: &cli::Cli, shutdown: &flume::Receiver<()>) -> Result<()> {
    // 4. Charger la config + overrides CLI
    let mut config = resolve_config(cli)?;
    cli.apply_overrides(&mut config);

    // 5. Ouvrir la source (fichier ou périphérique)
    let source: Box<dyn AudioBufferSource> = if let Some(ref path) = cli.input {
        let file = FileSource::open(path, config.audio.buffer_size, !cli.fast)?;
        // Le flux suit le fichier, pas le périphérique
        config.audio.sample_rate = file.sample_rate();
        config.audio.channels = u16::try_from(file.channels())
            .with_context(|| format!("{} canaux non supportés", file.channels()))?;
        Box::new(file)
    } else {
        Box::new(DeviceSource::open(&config.audio)?)
    };

    // 6. Démarrer la session
    let mut orchestrator = orchestrator::Orchestrator::new(config);
    let _watcher = if cli.config.exists() {
        match hotreload::spawn_tuning_watcher(&cli.config, orchestrator.tuning()) {
            Ok(w) => Some(w),
            Err(e) => {
                log::warn!("Hot-reload désactivé : {e:#}");
                None
            }
        }
    } else {
        None
    };
    orchestrator.start(source)?;

    // 7. Attendre Ctrl-C ou la fin du fichier
    loop {
        match shutdown.recv_timeout(Duration::from_millis(200)) {
            Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => {
                log::info!("Arrêt demandé");
                break;
            }
            Err(flume::RecvTimeoutError::Timeout) => {
                if orchestrator.is_finished() {
                    log::info!("Fin du fichier");
                    break;
                }
            }
        }
    }

    orchestrator.stop();
    let (engine, sink) = orchestrator.counters();
    println!(
        "{} ticks, {} paquets ({} octets), {} échecs d'envoi",
        engine.ticks, sink.packets, sink.bytes, sink.failures
    );
    Ok(())
}

/// Config file, or the defaults when it is missing.
fn resolve_config(cli: &cli::Cli) -> Result<AppConfig> {
    if cli.config.exists() {
        tc_core::config::load_config(&cli.config)
    } else {
        log::warn!(
            "Config introuvable : {}. Utilisation des défauts.",
            cli.config.display()
        );
        Ok(AppConfig::default())
    }
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tc_core::config::{AppConfig, SendMode};

/// tonecast : extraction de features audio temps réel, diffusées en OSC/UDP.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Fichier de configuration TOML. Défaut : config/default.toml.
    #[arg(short, long, default_value = "config/default.toml", global = true)]
    pub config: PathBuf,

    /// Hôte OSC de destination.
    #[arg(long)]
    pub host: Option<String>,

    /// Port OSC de destination.
    #[arg(long)]
    pub port: Option<u16>,

    /// Taille de buffer (frames par tick).
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Fréquence d'échantillonnage du périphérique.
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Rejouer un fichier audio au lieu du périphérique d'entrée.
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Avec --input : rejouer aussi vite que possible.
    #[arg(long, default_value_t = false)]
    pub fast: bool,

    /// Nom du périphérique d'entrée (défaut : celui du système).
    #[arg(long)]
    pub device: Option<String>,

    /// Encodage et envoi sur un thread dédié.
    #[arg(long, default_value_t = false)]
    pub queued: bool,

    /// Niveau de log : error, warn, info, debug, trace.
    #[arg(long, default_value = "warn", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Sous-commandes. Sans sous-commande : `run`.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Capture, analyse et envoi (défaut).
    Run,
    /// Affiche le catalogue d'adresses OSC en JSON.
    Catalog,
    /// Écoute un port UDP et affiche les bundles reçus.
    Monitor {
        /// Port à écouter.
        #[arg(long, default_value_t = 1331)]
        port: u16,
        /// Adresse d'écoute.
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        /// Arrêt après N paquets.
        #[arg(long)]
        count: Option<usize>,
    },
}

impl Cli {
    /// Subcommand to run, `run` when none is given.
    #[must_use]
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }

    /// Apply command-line overrides on top of the loaded config.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(ref host) = self.host {
            config.osc.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.osc.port = port;
        }
        if let Some(frames) = self.buffer_size {
            config.audio.buffer_size = frames;
        }
        if let Some(rate) = self.sample_rate {
            config.audio.sample_rate = rate;
        }
        if self.device.is_some() {
            config.audio.device.clone_from(&self.device);
        }
        if self.queued {
            config.osc.send_mode = SendMode::Queued;
        }
    }
}

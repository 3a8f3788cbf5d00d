use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tc_core::config::Tuning;

/// Relit `path` et publie la partie « tuning » si elle a changé.
///
/// Returns `true` when a new tuning was stored. Structural fields of the
/// file are ignored until restart.
///
/// # Errors
/// Returns an error if the file cannot be read, parsed or validated; the
/// current tuning is kept.
pub fn reload_tuning(path: &Path, tuning: &ArcSwap<Tuning>) -> Result<bool> {
    let config = tc_core::config::load_config(path)?;
    config.validate().context("Configuration rechargée invalide")?;
    let fresh = config.tuning();
    if **tuning.load() == fresh {
        return Ok(false);
    }
    tuning.store(Arc::new(fresh));
    Ok(true)
}

/// Lance un watcher sur le fichier config ; chaque modification recharge le tuning.
///
/// Retourne le Watcher (doit rester vivant tant que l'app tourne).
///
/// # Errors
/// Returns an error if the watcher cannot be created or the path cannot be watched.
pub fn spawn_tuning_watcher(config_path: &Path, tuning: &Arc<ArcSwap<Tuning>>) -> Result<impl Watcher + use<>> {
    let tuning = Arc::clone(tuning);
    let path = config_path.to_path_buf();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res
            && matches!(event.kind, EventKind::Modify(_))
        {
            match reload_tuning(&path, &tuning) {
                Ok(true) => log::info!("Tuning rechargé depuis {}", path.display()),
                Ok(false) => log::debug!("{} modifié, tuning inchangé", path.display()),
                // On garde l'ancien tuning. Pas de panic.
                Err(e) => log::warn!("Erreur de rechargement config : {e:#}"),
            }
        }
    })?;

    watcher.watch(config_path, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

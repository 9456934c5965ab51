//! Mediation node bootstrap.
//!
//! Loads configuration, initialises structured logging, opens and migrates
//! the mediation store, makes sure the routing identity exists, and logs a
//! summary of the relationships the store holds. Message transport is wired
//! in by the hosting agent.

mod config;

use mediation_core::{MediationError, MediationManager, RoutingDid};
use mediation_types::MediationState;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("MEDIATOR_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

/// Returns the routing identity, creating it when the store has none.
///
/// Another process may create it between the lookup and the insert; the
/// stored identity is read back in that case.
fn bootstrap_routing_did(manager: &MediationManager) -> Result<RoutingDid, MediationError> {
    if let Some(existing) = manager.retrieve_routing_did()? {
        return Ok(existing);
    }
    match manager.create_routing_did() {
        Err(MediationError::RoutingDidExists) => manager
            .retrieve_routing_did()?
            .ok_or(MediationError::RoutingDidExists),
        other => other,
    }
}

fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("mediation.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration; the node cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let pool = mediation_db::create_pool(
        &config.database.path,
        config.database.runtime_settings(),
    )
    .expect("failed to create database pool; check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied =
            mediation_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    let manager = MediationManager::new(pool, config.mediation.clone())
        .expect("failed to initialise mediation manager");

    let routing = bootstrap_routing_did(&manager).expect("failed to load routing DID");
    tracing::info!(
        did = %routing.did,
        verkey = %routing.verkey,
        endpoint = %manager.settings().default_endpoint,
        "mediator routing identity ready"
    );

    for state in [
        MediationState::Requested,
        MediationState::Granted,
        MediationState::Denied,
    ] {
        match manager.list_records(state) {
            Ok(records) => tracing::info!(%state, count = records.len(), "mediation records"),
            Err(e) => tracing::warn!(%state, error = %e, "failed to list mediation records"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediation_core::MediationSettings;
    use mediation_db::{create_pool, run_migrations, DbRuntimeSettings};

    #[test]
    fn bootstrap_creates_then_reuses_routing_did() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.db");
        let pool = create_pool(path.to_str().unwrap(), DbRuntimeSettings::default()).unwrap();
        run_migrations(&pool.get().unwrap()).unwrap();
        let manager = MediationManager::new(pool, MediationSettings::default()).unwrap();

        let first = bootstrap_routing_did(&manager).unwrap();
        let second = bootstrap_routing_did(&manager).unwrap();
        assert_eq!(first, second);
    }
}

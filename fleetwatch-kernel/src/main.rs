/**
 * FLEETWATCH KERNEL - Point d'entrée principal du serveur FleetWatch
 *
 * RÔLE : Orchestration de tous les modules : config, moteurs de flotte, MQTT, HTTP, health.
 * Bootstrap du système complet avec gestion d'erreurs et logging.
 *
 * ARCHITECTURE : snapshots entrants via MQTT → FleetEngine par collection → API REST.
 * Les mutations locales sont optimistes, les écritures distantes partent en MQTT.
 */

mod bulk;
mod config;
mod csv_import;
mod engine;
mod health;
mod http;
mod incidents;
mod models;
mod mqtt;
mod reconciler;
mod remote;
mod state;
mod store;
mod view;

use crate::config::load_config;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::remote::{MqttRemoteStore, RemoteStore};
use crate::state::{new_state, Fleets};

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fleetwatch_kernel=info")),
        )
        .init();

    let cfg = Arc::new(load_config().await);

    // un moteur par collection monitorée
    let fleets = new_state(Fleets::from_config(&cfg));
    info!(collections = cfg.collections.len(), active = %fleets.lock().active(), "[kernel] fleets ready");

    let health_tracker = HealthTracker::new();

    // Client MQTT partagé : snapshots entrants, écritures sortantes, alarmes, health
    let (mqtt_client, eventloop) = mqtt::create_mqtt_client(&cfg);
    let remote: Arc<dyn RemoteStore> = Arc::new(MqttRemoteStore::new(mqtt_client.clone()));

    mqtt::spawn_mqtt_listener(fleets.clone(), mqtt_client.clone(), eventloop, health_tracker.clone());

    // démarre la publication auto du health
    health_tracker.spawn_health_publisher(mqtt_client, fleets.clone());

    let app_state = AppState {
        fleets,
        cfg: cfg.clone(),
        health_tracker,
        remote,
    };

    // HTTP
    let app = http::build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("[kernel] listening on http://{addr}");
    axum::serve(listener, app).await.context("HTTP server stopped")?;
    Ok(())
}

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use stereo_lavalink::config::Config;
use stereo_lavalink::{Manager, ManagerEvent};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stereo_lavalink=debug".parse()?),
        )
        .init();

    info!("🎵 Iniciando stereo-lavalink v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load().context("configuración inválida")?;
    info!("{}", config.summary());

    // Sin gateway real: los payloads de voz solo se registran
    let options = config.manager_options(|guild, payload| {
        debug!("📨 Gateway payload para {}: {:?}", guild, payload);
    });

    let (manager, mut events) = Manager::new(vec![config.node_options()], options)
        .context("no se pudo construir el manager")?;
    manager
        .init(config.bot_user_id.clone())
        .context("no se pudo inicializar el manager")?;

    // Búsqueda opcional de prueba: `stereo-lavalink <query>`
    let query = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let mut searched = query.is_empty();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("⚠️ Señal de shutdown recibida, cerrando...");
                manager.shutdown();
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match &event {
                    ManagerEvent::SocketConnect(node) => {
                        info!("✅ Nodo {} conectado", node.id());
                        if !searched {
                            searched = true;
                            search(&manager, &query).await;
                        }
                    }
                    ManagerEvent::SocketError { node, error } => {
                        error!("❌ Nodo {}: {}", node.id(), error);
                    }
                    ManagerEvent::SocketDisconnect { node, code, reason } => {
                        warn!("🔌 Nodo {} desconectado ({} {})", node.id(), code, reason);
                    }
                    other => info!("📣 {}", other.name()),
                }
            }
        }
    }

    Ok(())
}

async fn search(manager: &Manager, query: &str) {
    match manager.search(query, "cli", None).await {
        Ok(result) => {
            info!("🔎 {:?}: {} resultados", result.load_type, result.tracks.len());
            for track in result.tracks.iter().take(10) {
                info!(
                    "  • {} - {} ({})",
                    track.author().unwrap_or("?"),
                    track.title().unwrap_or("?"),
                    stereo_lavalink::utils::to_time_string(track.duration().unwrap_or(0))
                );
            }
        }
        Err(e) => error!("❌ Búsqueda fallida: {}", e),
    }
}

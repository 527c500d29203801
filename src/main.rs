use anyhow::Result;
use open_lavalink::{
    bot::{SerenityGateway, VoiceRelay},
    ClientEvent, Config, NodeRegistry,
};
use serenity::{model::gateway::GatewayIntents, Client};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_lavalink=debug".parse()?)
                .add_directive("serenity=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando open-lavalink v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    let gateway = Arc::new(SerenityGateway::new(config.shard_count));
    let registry = Arc::new(NodeRegistry::new(Arc::clone(&config), gateway.clone()));
    registry.events().subscribe_fn(log_event);

    // Solo hacen falta los eventos de voz
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(VoiceRelay::new(Arc::clone(&registry), config.bot_user_id))
        .await?;
    gateway.attach(Arc::clone(&client.shard_manager), Arc::clone(&client.cache));

    info!("🎼 Conectando nodos Lavalink...");
    let connected = registry.connect_all().await?;
    info!("✅ {} nodo(s) Lavalink conectados", connected);

    // Manejar shutdown graceful
    let shard_manager = Arc::clone(&client.shard_manager);
    let shutdown_registry = Arc::clone(&registry);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        shutdown_registry.shutdown();
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start_shards(config.shard_count).await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

fn log_event(event: &ClientEvent) {
    match event {
        ClientEvent::SessionConnected {
            node,
            session_id,
            resumed,
        } => info!("🔗 Nodo {} listo (sesión {}, reanudada: {})", node, session_id, resumed),
        ClientEvent::SessionDisconnected { node, code, reason } => {
            warn!("🔌 Nodo {} desconectado ({:?}): {}", node, code, reason)
        }
        ClientEvent::TrackStarted { guild_id, track } => {
            info!("▶️ Reproduciendo: {} en guild {}", track.info.title, guild_id)
        }
        ClientEvent::TrackEnded {
            guild_id,
            track,
            reason,
        } => info!("🎵 Track terminó en guild {}: {} ({:?})", guild_id, track.info.title, reason),
        ClientEvent::TrackException {
            guild_id,
            exception,
            ..
        } => error!("❌ Error en track para guild {}: {:?}", guild_id, exception.message),
        other => tracing::debug!(event = other.name(), guild = ?other.guild_id(), "Evento"),
    }
}

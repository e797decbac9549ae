//! notabot - a chat network bot with commands, triggers and
//! authority-backed identities.
//!
//! Connects to one network, answers prefixed commands and pattern
//! triggers, and resolves participants' accounts through the network's
//! authority service before running admin commands.

mod bot;
mod common;
mod config;
mod dispatch;
mod identity;
mod outbound;
mod plugins;
mod registry;
mod transport;

use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tracing::{error, info, warn};

use bot::{BotHandle, ChannelBundle};
use config::{env::get_config_path, load_and_validate};
use dispatch::Dispatcher;
use identity::{IdentityPlugin, IdentityResolver, ResolverHealth};
use outbound::{ChannelSink, OutboundQueue, Sender};
use plugins::CorePlugin;
use registry::Registry;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("notabot v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = get_config_path();
    info!("Loading configuration from {}...", config_path);

    let config = load_and_validate(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        error!("Please ensure {} exists and is properly formatted.", config_path);
        e
    })?;

    info!("Configuration loaded successfully");
    info!("  Server: {}:{}", config.server.host, config.server.port);
    info!("  Nick: {}", config.server.nick);
    info!("  Channels: {}", config.server.channels.join(", "));
    if config.authority.enabled() {
        info!("  Authority: {}", config.authority.account);
    } else {
        warn!("  Authority: none, admin checks use display names");
    }

    let mut registry = Registry::new();
    registry.load_plugin(&CorePlugin)?;
    registry.load_plugin(&IdentityPlugin)?;
    let registry = registry.into_shared();

    let channels = ChannelBundle::new();
    let (outbound, outbound_rx) = OutboundQueue::new();
    let identity = IdentityResolver::new(&config.authority, outbound.clone())?;

    let sender = Sender::new(outbound_rx, ChannelSink::new(channels.core.line_tx), &config.flood);
    let sender_task = tokio::spawn(sender.run());

    let health_task = {
        let mut health = identity.health();
        tokio::spawn(async move {
            while health.changed().await.is_ok() {
                let current = *health.borrow();
                match current {
                    ResolverHealth::Healthy => info!("Identity resolver healthy"),
                    ResolverHealth::Unhealthy => warn!("Identity resolver unhealthy"),
                }
            }
        })
    };

    let bot = BotHandle::new(
        registry,
        outbound,
        identity,
        config.bot.clone(),
        channels.control.shutdown_tx,
    );

    let mut transport_task = tokio::spawn(transport::run(config.server.clone(), channels.transport));

    let dispatcher = Dispatcher::new(bot.clone(), &config.rate_limit);
    let mut dispatch_task = tokio::spawn(dispatcher.run(channels.core.event_rx, channels.core.shutdown_rx));

    let mut quit_rx = bot.subscribe_shutdown();
    let shutdown = tokio::select! {
        biased;
        _ = shutdown_signal() => {
            info!("Shutdown signal received - leaving the network...");
            true
        }
        _ = quit_rx.wait_for(|quit| *quit) => {
            info!("Quit command received - leaving the network...");
            true
        }
        _ = &mut transport_task => false,
        _ = &mut dispatch_task => false,
    };

    if shutdown {
        bot.request_shutdown();
        match tokio::time::timeout(Duration::from_secs(5), transport_task).await {
            Ok(Ok(())) => info!("Disconnected gracefully"),
            Ok(Err(e)) => warn!("Transport task panicked: {}", e),
            Err(_) => warn!("Disconnect timed out"),
        }
    }

    dispatch_task.abort();
    health_task.abort();
    sender_task.abort();

    info!("Exiting...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

//! Connection lifecycle: register, keep alive, forward, reconnect.

use std::time::Duration;

use backon::BackoffBuilder;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

use crate::bot::channels::TransportChannels;
use crate::common::error::{TransportError, TransportResult};
use crate::common::fold_nick;
use crate::config::ServerConfig;
use crate::transport::codec::IrcLineCodec;
use crate::transport::parse::{to_event, RawMessage};

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Shutdown was requested and QUIT sent.
    Shutdown,
}

/// Exponential backoff between connection attempts, unlimited retries.
fn reconnect_backoff(config: &ServerConfig) -> impl Iterator<Item = Duration> {
    backon::ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(config.reconnect_min_secs))
        .with_max_delay(Duration::from_secs(config.reconnect_max_secs))
        .with_factor(2.0)
        .with_jitter()
        .without_max_times()
        .build()
}

async fn connect(config: &ServerConfig) -> TransportResult<TcpStream> {
    TcpStream::connect((config.host.as_str(), config.port))
        .await
        .map_err(|source| TransportError::ConnectFailed {
            host: config.host.clone(),
            port: config.port,
            source,
        })
}

/// Connect and keep reconnecting until shutdown.
pub async fn run(config: ServerConfig, mut channels: TransportChannels) {
    let mut backoff = reconnect_backoff(&config);

    loop {
        if *channels.shutdown_rx.borrow() {
            break;
        }

        info!("Connecting to {}:{}...", config.host, config.port);
        match connect(&config).await {
            Ok(stream) => {
                info!("Connected to {}", config.host);
                backoff = reconnect_backoff(&config);
                match run_session(stream, &config, &mut channels).await {
                    Ok(SessionEnd::Shutdown) => {
                        info!("Disconnected from {}", config.host);
                        break;
                    }
                    Err(e) => error!("Connection lost: {}", e),
                }
            }
            Err(e) => error!("{}", e),
        }

        let delay = backoff
            .next()
            .unwrap_or(Duration::from_secs(config.reconnect_max_secs));
        info!("Reconnecting in {:.1} seconds...", delay.as_secs_f64());

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = channels.shutdown_rx.changed() => {
                if changed.is_err() || *channels.shutdown_rx.borrow() {
                    info!("Shutdown signal received during backoff");
                    break;
                }
            }
        }
    }
}

/// Run one registered session over `io` until it ends.
pub async fn run_session<T>(io: T, config: &ServerConfig, channels: &mut TransportChannels) -> TransportResult<SessionEnd>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(io, IrcLineCodec::default());
    let mut nick = config.nick.clone();

    framed.send(format!("NICK {}", nick)).await?;
    framed
        .send(format!("USER {} 0 * :{}", config.nick, config.realname))
        .await?;

    loop {
        tokio::select! {
            biased;

            changed = channels.shutdown_rx.changed() => {
                if changed.is_err() || *channels.shutdown_rx.borrow() {
                    info!("Leaving: {}", config.leave_message);
                    framed.send(format!("QUIT :{}", config.leave_message)).await?;
                    return Ok(SessionEnd::Shutdown);
                }
            }
            outbound = channels.line_rx.recv() => match outbound {
                Some(line) => framed.send(line).await?,
                None => return Err(TransportError::SinkClosed),
            },
            inbound = framed.next() => match inbound {
                Some(Ok(line)) => {
                    trace!("<- {}", line);
                    let Some(raw) = RawMessage::parse(&line) else {
                        debug!("Unparsable line: {}", line);
                        continue;
                    };
                    for reply in handle_line(&raw, &mut nick, config, channels)? {
                        framed.send(reply).await?;
                    }
                }
                Some(Err(e)) => return Err(e),
                None => return Err(TransportError::ConnectionClosed),
            },
        }
    }
}

/// Apply one inbound line; returns the lines to write back.
fn handle_line(
    raw: &RawMessage,
    nick: &mut String,
    config: &ServerConfig,
    channels: &TransportChannels,
) -> TransportResult<Vec<String>> {
    let mut replies = Vec::new();

    match raw.command.as_str() {
        "PING" => {
            replies.push(format!("PONG :{}", raw.param(0)));
            return Ok(replies);
        }
        "433" => {
            nick.push('_');
            warn!("Nick in use, trying {}", nick);
            replies.push(format!("NICK {}", nick));
            return Ok(replies);
        }
        "001" => {
            if !raw.param(0).is_empty() {
                *nick = raw.param(0).to_string();
            }
            info!("Registered as {}", nick);
            for channel in &config.channels {
                replies.push(format!("JOIN {}", channel));
            }
        }
        "ERROR" => {
            warn!("Server error: {}", raw.param(0));
            return Ok(replies);
        }
        _ => {}
    }

    let Some(event) = to_event(raw) else {
        return Ok(replies);
    };
    let own = fold_nick(&event.source.nick) == fold_nick(nick);
    if own && raw.command == "NICK" {
        *nick = event.target.clone();
        return Ok(replies);
    }
    if own && raw.command == "JOIN" {
        info!("Joined {}", event.target);
        return Ok(replies);
    }

    channels
        .event_tx
        .send(event)
        .map_err(|_| TransportError::SinkClosed)?;
    Ok(replies)
}

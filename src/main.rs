// Companion Desktop - headless remote control host
//
// Shows the consent disclosure for the chosen tier, and once accepted
// registers a session code with the relay and serves commands until
// Ctrl-C, expiry, or relay loss.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use companion_desktop::services::headless::HeadlessHost;
use companion_desktop::services::remote::{
    ControlSessionEvent, ControlSessionManager, HostCallbackRegistry, SessionSettings,
    WebSocketRelay,
};
use companion_desktop::storage::ConfigService;
use companion_desktop::utils::logging::init_logging;
use companion_desktop::{CapabilityTier, ConsentDisclosure, TierConsent};
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser, Debug)]
#[command(name = "companion-desktop")]
#[command(about = "Share control of this desktop session through a one-time code")]
struct Cli {
    /// Capability tier to offer: light, standard or full
    #[arg(long, default_value = "light")]
    tier: CapabilityTier,

    /// Relay WebSocket URL (overrides the config file for this run)
    #[arg(long, env = "COMPANION_RELAY_URL")]
    relay_url: Option<String>,

    /// Path to remote_control.json
    #[arg(long)]
    config: Option<PathBuf>,

    /// Accept the disclosure shown for the tier and start the session
    #[arg(long)]
    accept_consent: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _logging = init_logging().context("failed to initialize logging")?;

    let config_service = match &cli.config {
        Some(path) => ConfigService::with_path(path.clone()),
        None => ConfigService::new(),
    }
    .context("failed to load remote control config")?;

    let mut config = config_service.get_config_clone();
    if let Some(url) = cli.relay_url {
        config.relay_url = url;
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid --relay-url: {}", e))?;
    }

    let disclosure = ConsentDisclosure::for_tier(cli.tier);
    println!("{}", disclosure.render());
    if !cli.accept_consent {
        println!("Nothing started. Re-run with --accept-consent to share control.");
        return Ok(());
    }
    let consent = TierConsent::accept(&disclosure);

    let registry = Arc::new(HostCallbackRegistry::new());
    let host = HeadlessHost::default();
    host.install(&registry)?;

    let relay = Arc::new(WebSocketRelay::new(
        config.relay_url.clone(),
        config.reconnect.clone(),
    ));
    let manager = ControlSessionManager::new(relay, registry, SessionSettings::from(&config));
    let mut events = manager.subscribe();

    let code = manager
        .start(consent)
        .await
        .with_context(|| format!("could not start a session via {}", config.relay_url))?;
    println!("Session code: {}  (tier: {})", code, cli.tier);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                manager.stop().await;
                break;
            }
            event = events.recv() => match event {
                Ok(ControlSessionEvent::ControllerConnectionChanged { connected }) => {
                    println!("Controller {}", if connected { "connected" } else { "disconnected" });
                }
                Ok(ControlSessionEvent::CommandReceived { label, .. }) => {
                    println!("{}", label);
                }
                Ok(ControlSessionEvent::SessionEnded { reason }) => {
                    println!("Session ended: {}", reason);
                    break;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "UI event stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    tracing::debug!(host = ?host.snapshot(), "Host state at exit");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_to_light_without_consent() {
        let cli = Cli::parse_from(["companion-desktop"]);
        assert_eq!(cli.tier, CapabilityTier::Light);
        assert!(!cli.accept_consent);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_parses_tier_case_insensitively() {
        let cli = Cli::parse_from(["companion-desktop", "--tier", "FULL", "--accept-consent"]);
        assert_eq!(cli.tier, CapabilityTier::Full);
        assert!(cli.accept_consent);
    }

    #[test]
    fn test_cli_rejects_unknown_tier() {
        assert!(Cli::try_parse_from(["companion-desktop", "--tier", "root"]).is_err());
    }
}

//! Tier Consent
//!
//! Disclosure text for each capability tier and the token proving the local
//! user accepted it. The core never renders consent; it only refuses to start
//! a session without a `TierConsent`, and a `TierConsent` can only be built
//! from the disclosure for the same tier.

use serde::Serialize;

use crate::catalog::{CapabilityTier, RemoteAction};

/// Everything a consent screen must show before a session can start.
#[derive(Debug, Clone, Serialize)]
pub struct ConsentDisclosure {
    pub tier: CapabilityTier,
    pub headline: &'static str,
    /// One line per unlocked action, in catalog order.
    pub capabilities: Vec<&'static str>,
    /// Extra warnings for the invasive parts of the tier.
    pub warnings: Vec<&'static str>,
}

impl ConsentDisclosure {
    pub fn for_tier(tier: CapabilityTier) -> Self {
        let capabilities = tier
            .allowed_actions()
            .iter()
            .map(|action| disclosure_line(*action))
            .collect();

        let (headline, warnings) = match tier {
            CapabilityTier::Light => (
                "The controller can toggle visual and ambient effects on this computer.",
                vec!["The controller can trigger a panic stop at any time."],
            ),
            CapabilityTier::Standard => (
                "The controller can toggle effects, play media, send haptic pulses and duck your audio.",
                vec![
                    "The controller can trigger a panic stop at any time.",
                    "The controller can see the progress of the session you are running.",
                ],
            ),
            CapabilityTier::Full => (
                "The controller can run timed sessions on this computer on your behalf.",
                vec![
                    "The controller can see and start any of your sessions.",
                    "The controller can enable strict lock, which cannot be undone until the session ends.",
                    "The controller can disable your local emergency-stop shortcut.",
                ],
            ),
        };

        Self {
            tier,
            headline,
            capabilities,
            warnings,
        }
    }

    /// Plain-text rendering for terminal hosts.
    pub fn render(&self) -> String {
        let mut text = format!("Remote control ({} tier)\n{}\n\nAllows:\n", self.tier, self.headline);
        for line in &self.capabilities {
            text.push_str(&format!("  - {}\n", line));
        }
        if !self.warnings.is_empty() {
            text.push_str("\nWarnings:\n");
            for line in &self.warnings {
                text.push_str(&format!("  ! {}\n", line));
            }
        }
        text
    }
}

/// Queries have no feedback label worth showing, so they get their own line.
fn disclosure_line(action: RemoteAction) -> &'static str {
    match action {
        RemoteAction::CurrentProgress => "Read the progress of the running session",
        RemoteAction::AvailableSessions => "List your available sessions",
        RemoteAction::FindSession => "Look up one of your sessions",
        direct => direct.label(),
    }
}

/// Proof that the local user accepted the disclosure for one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierConsent {
    tier: CapabilityTier,
}

impl TierConsent {
    /// Record acceptance of `disclosure`.
    pub fn accept(disclosure: &ConsentDisclosure) -> Self {
        Self {
            tier: disclosure.tier,
        }
    }

    pub fn tier(&self) -> CapabilityTier {
        self.tier
    }
}

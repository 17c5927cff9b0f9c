//! Session Code Issuer
//!
//! Mints short human-typable codes and registers them with the relay,
//! retrying on collisions.

use companion_core::{CapabilityTier, RelayRegistration};
use rand::Rng;

use super::relay::{RelayChannel, RelaySubscription};
use super::types::{RemoteError, SessionCode};

/// Characters used in codes. No 0/O, 1/I/L to keep codes readable aloud.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Issues session codes against a relay.
#[derive(Debug, Clone)]
pub struct SessionCodeIssuer {
    code_length: usize,
    max_attempts: u32,
}

impl SessionCodeIssuer {
    pub fn new(code_length: usize, max_attempts: u32) -> Self {
        Self {
            code_length: code_length.max(1),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Generate a random code without contacting the relay.
    pub fn generate(&self) -> SessionCode {
        let mut rng = rand::thread_rng();
        let raw: String = (0..self.code_length)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        SessionCode(raw)
    }

    fn generate_avoiding(&self, avoid: Option<&SessionCode>) -> SessionCode {
        loop {
            let code = self.generate();
            if avoid != Some(&code) {
                return code;
            }
        }
    }

    /// Mint a code and register it for `tier`.
    ///
    /// The returned code never equals `avoid`. Collisions are retried with a
    /// fresh code. Every failure surfaces as `RelayUnavailable`.
    pub async fn issue(
        &self,
        relay: &dyn RelayChannel,
        tier: CapabilityTier,
        avoid: Option<&SessionCode>,
    ) -> Result<(SessionCode, RelaySubscription), RemoteError> {
        for attempt in 1..=self.max_attempts {
            let code = self.generate_avoiding(avoid);
            let registration = RelayRegistration {
                code: code.as_str().to_string(),
                tier,
            };

            match relay.register(registration).await {
                Ok(subscription) => {
                    tracing::debug!(
                        code = %code,
                        tier = %tier,
                        relay = relay.name(),
                        attempt,
                        "Session code registered"
                    );
                    return Ok((code, subscription));
                }
                Err(RemoteError::CodeCollision) => {
                    tracing::debug!(code = %code, attempt, "Session code collided, retrying");
                }
                Err(RemoteError::RelayUnavailable(reason)) => {
                    return Err(RemoteError::RelayUnavailable(reason));
                }
                Err(other) => return Err(RemoteError::RelayUnavailable(other.to_string())),
            }
        }

        Err(RemoteError::RelayUnavailable(format!(
            "no free session code after {} attempts",
            self.max_attempts
        )))
    }
}

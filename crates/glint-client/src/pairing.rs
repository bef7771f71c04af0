//! PIN pairing.
//!
//! The PIN is display-only; the trust handshake itself happens inside the
//! host client. Pairing waits for the user to type the PIN on the host, so
//! the request timeout is stretched for the call and put back afterwards.

use std::fmt;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::host::{HostClient, HostError, DEFAULT_REQUEST_TIMEOUT};
use crate::types::{HostRecord, PairOutcome};

pub const PAIRING_TIMEOUT: Duration = Duration::from_secs(60);

/// A 4-digit pairing PIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pin([u8; 4]);

impl Pin {
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut digits = [0u8; 4];
        for digit in &mut digits {
            *digit = rng.gen_range(0..10);
        }
        Self(digits)
    }

    pub fn digits(&self) -> [u8; 4] {
        self.0
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for digit in self.0 {
            write!(f, "{}", digit)?;
        }
        Ok(())
    }
}

/// Sets a timeout on the client and restores another one when dropped, so
/// every return path (including unwinding) gets the short timeout back.
struct TimeoutGuard<'a> {
    client: &'a mut dyn HostClient,
    restore: Duration,
}

impl<'a> TimeoutGuard<'a> {
    fn extend(client: &'a mut dyn HostClient, timeout: Duration, restore: Duration) -> Self {
        client.set_timeout(timeout);
        Self { client, restore }
    }
}

impl Drop for TimeoutGuard<'_> {
    fn drop(&mut self) {
        self.client.set_timeout(self.restore);
    }
}

#[derive(Debug, Clone)]
pub struct PairingHandler {
    pub pair_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for PairingHandler {
    fn default() -> Self {
        Self {
            pair_timeout: PAIRING_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl PairingHandler {
    /// Generates a PIN, hands it to `show_pin` so it can be displayed before
    /// the blocking call, then submits the pairing request.
    pub fn pair<R: Rng + ?Sized>(
        &self,
        client: &mut dyn HostClient,
        host: &HostRecord,
        rng: &mut R,
        show_pin: impl FnOnce(&Pin),
    ) -> Result<PairOutcome, HostError> {
        let pin = Pin::generate(rng);
        info!("Please enter the following PIN on the target PC: {}", pin);
        show_pin(&pin);

        let outcome = {
            let guard = TimeoutGuard::extend(client, self.pair_timeout, self.request_timeout);
            guard.client.pair(host, &pin)
        };

        match &outcome {
            Ok(result) => info!(
                "paired with {} (current game {})",
                host.address, result.current_game
            ),
            Err(e) => warn!("failed to pair to {}: {}", host.address, e),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Call, Journal, SimulatedHost};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn timeouts(journal: &Journal) -> Vec<Duration> {
        journal
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::SetTimeout(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_pin_is_four_digits() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let pin = Pin::generate(&mut rng);
            let text = pin.to_string();
            assert_eq!(text.len(), 4);
            assert!(text.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_pair_success_restores_short_timeout() {
        let journal = Journal::default();
        let mut host = SimulatedHost::new(journal.clone());
        let record = HostRecord::new("10.0.0.2");
        let mut rng = StdRng::seed_from_u64(1);
        let mut shown = None;

        let outcome = PairingHandler::default()
            .pair(&mut host, &record, &mut rng, |pin| shown = Some(*pin))
            .unwrap();

        assert!(outcome.paired);
        assert!(shown.is_some());
        assert_eq!(timeouts(&journal), vec![PAIRING_TIMEOUT, DEFAULT_REQUEST_TIMEOUT]);
    }

    #[test]
    fn test_pair_failure_restores_short_timeout() {
        let journal = Journal::default();
        let mut host = SimulatedHost::new(journal.clone())
            .fail_pairing(HostError::Gamestream("PIN rejected".into()));
        let record = HostRecord::new("10.0.0.2");
        let mut rng = StdRng::seed_from_u64(2);

        let err = PairingHandler::default()
            .pair(&mut host, &record, &mut rng, |_| {})
            .unwrap_err();

        assert_eq!(err, HostError::Gamestream("PIN rejected".into()));
        assert_eq!(timeouts(&journal), vec![PAIRING_TIMEOUT, DEFAULT_REQUEST_TIMEOUT]);
    }

    #[test]
    fn test_pair_submits_displayed_pin() {
        let journal = Journal::default();
        let mut host = SimulatedHost::new(journal.clone());
        let record = HostRecord::new("10.0.0.2");
        let mut rng = StdRng::seed_from_u64(3);
        let mut shown = String::new();

        PairingHandler::default()
            .pair(&mut host, &record, &mut rng, |pin| shown = pin.to_string())
            .unwrap();

        assert!(journal.calls().contains(&Call::Pair(shown)));
    }
}

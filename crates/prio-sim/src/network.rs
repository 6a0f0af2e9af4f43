use prio_core::{GatewayRequest, OpId};
use serde::{Deserialize, Serialize};

use crate::rng::DeterministicRng;

/// Fault injection configuration for simulated request delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Maximum delivery delay in rounds.
    pub max_delay_rounds: u8,
    /// Percentage of requests lost before reaching the server.
    pub drop_rate_percent: u8,
    /// Percentage of requests whose response is delivered twice.
    pub duplicate_rate_percent: u8,
    /// Percentage chance of reversing a round's ready batch.
    pub reorder_rate_percent: u8,
    /// Percentage of requests the server answers with a 5xx.
    pub server_error_rate_percent: u8,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            max_delay_rounds: 2,
            drop_rate_percent: 5,
            duplicate_rate_percent: 3,
            reorder_rate_percent: 5,
            server_error_rate_percent: 5,
        }
    }
}

/// What happens to a request, decided once at send time. Duplicates share
/// their original's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// The server applies the request and answers 2xx.
    Apply,
    /// The server answers with this status and changes nothing.
    Reject { status: u16 },
    /// The request never arrives; the client sees a network error.
    Dropped,
}

/// One request travelling to the simulated server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope {
    pub op: OpId,
    pub request: GatewayRequest,
    pub verdict: Verdict,
    /// Set on the extra copy produced by duplication.
    pub duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct InTransit {
    deliver_at_round: u64,
    envelope: Envelope,
}

/// Result of a send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOutcome {
    pub verdict: Verdict,
    pub duplicated: bool,
    pub delay_rounds: u8,
}

/// Result of delivering all ready envelopes for a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverOutcome {
    pub delivered: Vec<Envelope>,
    /// Whether delivery order was reversed.
    pub reordered: bool,
}

/// Deterministic fault-injecting transport between controller and server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedNetwork {
    in_transit: Vec<InTransit>,
    fault: FaultConfig,
}

impl SimulatedNetwork {
    #[must_use]
    pub const fn new(fault: FaultConfig) -> Self {
        Self {
            in_transit: Vec::new(),
            fault,
        }
    }

    #[must_use]
    pub const fn fault_config(&self) -> FaultConfig {
        self.fault
    }

    /// Number of envelopes not yet delivered.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.in_transit.len()
    }

    /// Send `request` with fault injection. Dropped requests still come back
    /// after their delay, as a network error.
    pub fn send(
        &mut self,
        op: OpId,
        request: GatewayRequest,
        round: u64,
        rng: &mut DeterministicRng,
    ) -> SendOutcome {
        let verdict = if rng.chance(self.fault.drop_rate_percent) {
            Verdict::Dropped
        } else if rng.chance(self.fault.server_error_rate_percent) {
            Verdict::Reject { status: 503 }
        } else {
            Verdict::Apply
        };

        let delay_bound = u64::from(self.fault.max_delay_rounds).saturating_add(1);
        let delay = u8::try_from(rng.below(delay_bound)).unwrap_or(self.fault.max_delay_rounds);
        let deliver_at_round = round.saturating_add(u64::from(delay));

        let duplicated = verdict != Verdict::Dropped
            && rng.chance(self.fault.duplicate_rate_percent);
        let envelope = Envelope {
            op,
            request,
            verdict,
            duplicate: false,
        };
        if duplicated {
            self.in_transit.push(InTransit {
                deliver_at_round,
                envelope: Envelope {
                    duplicate: true,
                    ..envelope.clone()
                },
            });
        }
        self.in_transit.push(InTransit {
            deliver_at_round,
            envelope,
        });

        SendOutcome {
            verdict,
            duplicated,
            delay_rounds: delay,
        }
    }

    /// Deliver every envelope whose round has arrived, originals before
    /// their duplicates unless the batch is reversed.
    pub fn deliver_ready(&mut self, round: u64, rng: &mut DeterministicRng) -> DeliverOutcome {
        let (ready, later): (Vec<_>, Vec<_>) = self
            .in_transit
            .drain(..)
            .partition(|item| item.deliver_at_round <= round);
        self.in_transit = later;

        let mut delivered: Vec<Envelope> = ready.into_iter().map(|item| item.envelope).collect();
        delivered.sort_by_key(|envelope| (envelope.op, envelope.duplicate));

        let reordered = delivered.len() > 1 && rng.chance(self.fault.reorder_rate_percent);
        if reordered {
            delivered.reverse();
        }

        DeliverOutcome {
            delivered,
            reordered,
        }
    }
}

//! prio-sim library.
//!
//! Deterministic simulation of a user driving a [`SyncController`] while its
//! requests cross a fault-injecting network to a server with exact
//! semantics. One seed fixes every choice, so any failing run replays
//! bit-for-bit.
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for return types.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod campaign;
pub mod network;
pub mod oracle;
pub mod rng;
pub mod server;

use anyhow::{Context, Result, bail};
use prio_core::{
    Command, Dispatch, GatewayError, ItemId, ListModel, ListName, OpId, OverlapPolicy, Outcome,
    RecordingNotifier, SyncConfig, SyncController, SyncError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::network::{FaultConfig, SimulatedNetwork, Verdict};
use crate::oracle::FinalState;
use crate::rng::DeterministicRng;
use crate::server::SimulatedServer;

/// The tracked list every simulated user reorders.
pub const PRIORITIZED: &str = "prioritized";
/// The untracked list items fall back to.
pub const OTHER: &str = "other";

/// Extra rounds allowed for the final drain before giving up.
const DRAIN_LIMIT: u64 = 10_000;

/// Share of reorders that target the untracked list.
const UNTRACKED_REORDER_PERCENT: u8 = 30;

fn prioritized() -> ListName {
    ListName::from(PRIORITIZED)
}

fn other() -> ListName {
    ListName::from(OTHER)
}

fn item_id(index: usize) -> ItemId {
    ItemId::new(format!("item-{index}"))
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    /// Number of items across both lists.
    pub items: usize,
    /// How many of them start in the prioritized list.
    pub initially_prioritized: usize,
    /// Rounds with user activity, before the final drain.
    pub rounds: u64,
    /// Upper bound on user commands per round.
    pub max_actions_per_round: u8,
    /// Percentage of commands that reorder rather than toggle.
    pub reorder_percent: u8,
    pub overlap: OverlapPolicy,
    pub fault: FaultConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            items: 8,
            initially_prioritized: 3,
            rounds: 24,
            max_actions_per_round: 2,
            reorder_percent: 30,
            overlap: OverlapPolicy::Queue,
            fault: FaultConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// # Errors
    ///
    /// Returns an error if any parameter is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.items == 0 {
            bail!("items must be > 0");
        }
        if self.initially_prioritized > self.items {
            bail!(
                "initially_prioritized ({}) exceeds items ({})",
                self.initially_prioritized,
                self.items
            );
        }
        if self.rounds == 0 {
            bail!("rounds must be > 0");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Trace
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEventKind {
    Toggle {
        item: ItemId,
        op: Option<OpId>,
    },
    Reorder {
        list: ListName,
        order: Vec<ItemId>,
        op: Option<OpId>,
    },
    /// A command the controller refused (e.g. lane busy).
    Refused {
        code: String,
    },
    Send {
        op: OpId,
        verdict: Verdict,
        delay_rounds: u8,
        duplicated: bool,
    },
    /// A round's ready batch was delivered in reverse.
    BatchReversed {
        size: usize,
    },
    Deliver {
        op: OpId,
        duplicate: bool,
    },
    Settle {
        op: OpId,
        outcome: Outcome,
    },
    /// A response for an operation the controller no longer tracks.
    Stale {
        op: OpId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEvent {
    pub round: u64,
    pub kind: TraceEventKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimulationStats {
    pub commands: usize,
    pub refused: usize,
    pub sent: usize,
    pub dropped: usize,
    pub server_errors: usize,
    pub duplicates: usize,
    pub stale_responses: usize,
    pub committed: usize,
    pub rolled_back: usize,
    pub superseded: usize,
    pub released_from_queue: usize,
    /// Rollbacks that happened while other operations were still pending.
    pub rollbacks_with_pending: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationResult {
    pub seed: u64,
    pub overlap: OverlapPolicy,
    /// Rounds executed, drain included.
    pub rounds_run: u64,
    pub trace: Vec<TraceEvent>,
    pub ui: ListModel,
    pub server: ListModel,
    pub pending: usize,
    pub notified_failures: usize,
    pub stats: SimulationStats,
    /// A rollback interleaved with other pending work.
    pub interesting_state_reached: bool,
}

impl SimulationResult {
    #[must_use]
    pub const fn final_state(&self) -> FinalState<'_> {
        FinalState {
            ui: &self.ui,
            server: &self.server,
            rolled_back: self.stats.rolled_back,
            notified_failures: self.notified_failures,
            pending: self.pending,
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct Simulator {
    config: SimulationConfig,
    rng: DeterministicRng,
    network_rng: DeterministicRng,
    controller: SyncController<RecordingNotifier>,
    network: SimulatedNetwork,
    server: SimulatedServer,
    trace: Vec<TraceEvent>,
    stats: SimulationStats,
    round: u64,
}

impl Simulator {
    /// # Errors
    ///
    /// Returns an error when the config is invalid.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;

        let ids: Vec<ItemId> = (0..config.items).map(item_id).collect();
        let (head, tail) = ids.split_at(config.initially_prioritized);
        let model = ListModel::new([(prioritized(), head.to_vec()), (other(), tail.to_vec())])
            .context("seed model")?;
        let sync = SyncConfig {
            overlap: config.overlap,
            ..SyncConfig::default()
        };
        let rng = DeterministicRng::new(config.seed);

        Ok(Self {
            network_rng: rng.fork(1),
            rng,
            controller: SyncController::new(model.clone(), RecordingNotifier::new(), sync),
            network: SimulatedNetwork::new(config.fault),
            server: SimulatedServer::new(model, other()),
            trace: Vec::new(),
            stats: SimulationStats::default(),
            round: 0,
            config,
        })
    }

    /// Run every round, then drain the network with no further commands.
    ///
    /// # Errors
    ///
    /// Returns an error when the controller refuses a command it should
    /// accept, or the server cannot apply a request.
    pub fn run(&mut self) -> Result<SimulationResult> {
        for round in 0..self.config.rounds {
            self.round = round;
            let actions = self
                .rng
                .below(u64::from(self.config.max_actions_per_round).saturating_add(1));
            for _ in 0..actions {
                self.user_action()?;
            }
            self.deliver()?;
        }

        let limit = self.config.rounds.saturating_add(DRAIN_LIMIT);
        while self.network.pending_len() > 0 && self.round < limit {
            self.round += 1;
            self.deliver()?;
        }

        info!(
            seed = self.config.seed,
            rounds = self.round + 1,
            commands = self.stats.commands,
            rolled_back = self.stats.rolled_back,
            pending = self.controller.pending_len(),
            "simulation finished"
        );
        Ok(self.result())
    }

    fn record(&mut self, kind: TraceEventKind) {
        self.trace.push(TraceEvent {
            round: self.round,
            kind,
        });
    }

    fn user_action(&mut self) -> Result<()> {
        if self.rng.chance(self.config.reorder_percent) {
            let list = if self.rng.chance(UNTRACKED_REORDER_PERCENT) {
                other()
            } else {
                prioritized()
            };
            let mut order = self.controller.sorted_ids(&list)?;
            self.rng.shuffle(&mut order);
            let outcome = self.controller.reorder_list(&list, order.clone());
            self.finish_command(outcome, |op| TraceEventKind::Reorder { list, order, op })
        } else {
            let item = item_id(self.rng.index(self.config.items));
            let outcome = self.controller.toggle_membership(&item, None);
            self.finish_command(outcome, |op| TraceEventKind::Toggle { item, op })
        }
    }

    fn finish_command<F>(
        &mut self,
        outcome: Result<Command, SyncError>,
        describe: F,
    ) -> Result<()>
    where
        F: FnOnce(Option<OpId>) -> TraceEventKind,
    {
        match outcome {
            Ok(command) => {
                self.stats.commands += 1;
                self.record(describe(command.op));
                for dispatch in command.dispatches {
                    self.send(dispatch);
                }
                Ok(())
            }
            Err(err) if err.is_programming_error() => {
                Err(anyhow::Error::new(err).context("controller refused a well-formed command"))
            }
            Err(err) => {
                debug!(code = %err.code(), error = %err, "command refused");
                self.stats.refused += 1;
                self.record(TraceEventKind::Refused {
                    code: err.code().code().to_string(),
                });
                Ok(())
            }
        }
    }

    fn send(&mut self, dispatch: Dispatch) {
        let Dispatch { op, request } = dispatch;
        let outcome = self
            .network
            .send(op, request, self.round, &mut self.network_rng);
        self.stats.sent += 1;
        match outcome.verdict {
            Verdict::Dropped => self.stats.dropped += 1,
            Verdict::Reject { .. } => self.stats.server_errors += 1,
            Verdict::Apply => {}
        }
        if outcome.duplicated {
            self.stats.duplicates += 1;
        }
        self.record(TraceEventKind::Send {
            op,
            verdict: outcome.verdict,
            delay_rounds: outcome.delay_rounds,
            duplicated: outcome.duplicated,
        });
    }

    fn deliver(&mut self) -> Result<()> {
        let outcome = self.network.deliver_ready(self.round, &mut self.network_rng);
        if outcome.reordered {
            self.record(TraceEventKind::BatchReversed {
                size: outcome.delivered.len(),
            });
        }

        for envelope in outcome.delivered {
            self.record(TraceEventKind::Deliver {
                op: envelope.op,
                duplicate: envelope.duplicate,
            });
            let result = match envelope.verdict {
                Verdict::Apply => {
                    self.server.apply(&envelope.request)?;
                    Ok(())
                }
                Verdict::Reject { status } => Err(GatewayError::Server {
                    status,
                    body: "simulated outage".to_string(),
                }),
                Verdict::Dropped => Err(GatewayError::Network("request dropped".to_string())),
            };

            match self.controller.settle(envelope.op, result) {
                Ok(settlement) => {
                    match settlement.outcome {
                        Outcome::Committed => {
                            info!(op = %settlement.op, "request committed");
                            self.stats.committed += 1;
                        }
                        Outcome::RolledBack => {
                            self.stats.rolled_back += 1;
                            if !self.controller.is_idle() {
                                self.stats.rollbacks_with_pending += 1;
                            }
                        }
                        Outcome::Superseded => self.stats.superseded += 1,
                    }
                    self.record(TraceEventKind::Settle {
                        op: settlement.op,
                        outcome: settlement.outcome,
                    });
                    self.stats.released_from_queue += settlement.dispatches.len();
                    for dispatch in settlement.dispatches {
                        self.send(dispatch);
                    }
                }
                Err(SyncError::UnknownOperation(op)) => {
                    debug!(%op, "stale response ignored");
                    self.stats.stale_responses += 1;
                    self.record(TraceEventKind::Stale { op });
                }
                Err(err) => return Err(anyhow::Error::new(err).context("settle failed")),
            }
        }
        Ok(())
    }

    fn result(&self) -> SimulationResult {
        SimulationResult {
            seed: self.config.seed,
            overlap: self.config.overlap,
            rounds_run: self.round + 1,
            trace: self.trace.clone(),
            ui: self.controller.model().clone(),
            server: self.server.state().clone(),
            pending: self.controller.pending_len(),
            notified_failures: self.controller.notifier().failure_count(),
            stats: self.stats.clone(),
            interesting_state_reached: self.stats.rollbacks_with_pending > 0,
        }
    }
}

/// Veto + quorum idle decision.
///
/// A pure function from (policy, state, readings) to (classification, next
/// state, optional shutdown effect). Nothing here touches the host.
use crate::config::DecisionConfig;
use crate::probes::{SignalReading, SignalRole};
use crate::state::IdleState;
use serde::{Deserialize, Serialize};

/// How quorum signals combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Idle once `quorum` of the quorum signals agree.
    Quorum,
    /// Idle only when every quorum signal is idle.
    StrictOr,
}

/// Outcome of classifying one cycle's readings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Active {
        /// Signals that kept the host active, e.g. `sessions` or `network`.
        reasons: Vec<String>,
    },
    Idle {
        idle_votes: usize,
        quorum_size: usize,
        required: usize,
    },
}

impl Classification {
    pub fn is_idle(&self) -> bool {
        matches!(self, Classification::Idle { .. })
    }
}

/// Side effect requested by a decision. Executed by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Shutdown { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub classification: Classification,
    pub previous: IdleState,
    pub next: IdleState,
    pub effect: Option<Effect>,
}

/// Classify readings without touching state.
///
/// Any active veto wins outright. Otherwise the quorum signals vote; the
/// required count is `quorum` (capped at the set size) under `Policy::Quorum`
/// and the whole set under `Policy::StrictOr`.
pub fn classify(config: &DecisionConfig, readings: &[SignalReading]) -> Classification {
    let vetoes: Vec<String> = readings
        .iter()
        .filter(|r| r.role == SignalRole::Veto && r.active)
        .map(|r| r.kind.to_string())
        .collect();
    if !vetoes.is_empty() {
        return Classification::Active { reasons: vetoes };
    }

    let quorum: Vec<&SignalReading> = readings
        .iter()
        .filter(|r| r.role == SignalRole::Quorum)
        .collect();
    let quorum_size = quorum.len();
    let idle_votes = quorum.iter().filter(|r| !r.active).count();
    let required = match config.policy {
        Policy::Quorum => config.quorum.min(quorum_size),
        Policy::StrictOr => quorum_size,
    };

    if idle_votes >= required {
        Classification::Idle {
            idle_votes,
            quorum_size,
            required,
        }
    } else {
        Classification::Active {
            reasons: quorum
                .iter()
                .filter(|r| r.active)
                .map(|r| r.kind.to_string())
                .collect(),
        }
    }
}

/// Classify and advance the idle streak.
///
/// Active resets the streak to 0. Idle increments it, and once it reaches
/// `idle_threshold` the decision carries a shutdown effect.
pub fn decide(config: &DecisionConfig, state: IdleState, readings: &[SignalReading]) -> Decision {
    let classification = classify(config, readings);

    let (next, effect) = match &classification {
        Classification::Active { .. } => (IdleState { idle_streak: 0 }, None),
        Classification::Idle { .. } => {
            let idle_streak = state.idle_streak.saturating_add(1);
            let effect = (idle_streak >= config.idle_threshold).then(|| Effect::Shutdown {
                reason: format!(
                    "idlewatch: host idle for {idle_streak} consecutive checks (threshold {})",
                    config.idle_threshold
                ),
            });
            (IdleState { idle_streak }, effect)
        }
    };

    Decision {
        classification,
        previous: state,
        next,
        effect,
    }
}

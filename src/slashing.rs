//! Slashing: violation reports, stake penalties, jailing.
//!
//! Reports are recorded as pending events and only change stake when
//! executed. Execution burns the slashed coins by moving them from the
//! staking contract to the burn address, so stake custody stays equal to
//! the staking contract's balance. A safety interlock refuses to execute
//! when fewer than two active validators exist.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::params::{BHX_SYMBOL, BURN_ADDRESS, STAKING_CONTRACT};
use crate::stake::StakeLedger;
use crate::token::TokenLedger;

/// Strikes at which a validator is jailed.
const JAIL_STRIKES: u32 = 3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlashingError {
    #[error("unknown slashing event {0}")]
    UnknownEvent(String),
    #[error("event {0} is not pending")]
    NotPending(String),
    #[error("stake transfer failed: {0}")]
    Custody(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationCondition {
    DoubleSign,
    Downtime,
    InvalidBlock,
    MaliciousTransaction,
    ConsensusViolation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

impl Severity {
    /// Slash rate in percent of current stake.
    pub fn rate(&self) -> u64 {
        match self {
            Severity::Minor => 1,
            Severity::Major => 5,
            Severity::Critical => 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Executed,
    Skipped,
    BlockedSafety,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlashingEvent {
    pub id: String,
    pub validator: String,
    pub condition: ViolationCondition,
    pub severity: Severity,
    pub amount: u64,
    pub evidence: String,
    pub block_height: u64,
    pub status: EventStatus,
}

/// Records violations and applies penalties. Events are never deleted;
/// each moves from pending to exactly one terminal status.
#[derive(Debug, Default)]
pub struct SlashingManager {
    events: HashMap<String, SlashingEvent>,
    strikes: HashMap<String, u32>,
    next_seq: u64,
}

impl SlashingManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a violation as a pending event and return its id. The slash
    /// amount is fixed at report time from the validator's current stake.
    pub fn report_violation(
        &mut self,
        stakes: &StakeLedger,
        validator: &str,
        condition: ViolationCondition,
        evidence: impl Into<String>,
        block_height: u64,
    ) -> String {
        let strikes = self.strikes.get(validator).copied().unwrap_or(0);
        let severity = severity_for(condition, strikes);
        let stake = stakes.get(validator);
        let amount = stake * severity.rate() / 100;
        self.next_seq += 1;
        let id = format!("slash-{}", self.next_seq);
        let event = SlashingEvent {
            id: id.clone(),
            validator: validator.to_string(),
            condition,
            severity,
            amount,
            evidence: evidence.into(),
            block_height,
            status: EventStatus::Pending,
        };
        warn!(
            validator,
            ?condition,
            ?severity,
            amount,
            block_height,
            "violation reported"
        );
        self.events.insert(id.clone(), event);
        id
    }

    /// Execute a pending event: reduce stake, burn the slashed coins, count
    /// a strike, jail at three strikes. Refuses (status `blocked_safety`)
    /// when fewer than two active validators exist, so the chain can never
    /// slash away its last producer.
    pub fn execute_slashing(
        &mut self,
        event_id: &str,
        tokens: &TokenLedger,
        stakes: &StakeLedger,
    ) -> Result<EventStatus, SlashingError> {
        let event = self
            .events
            .get_mut(event_id)
            .ok_or_else(|| SlashingError::UnknownEvent(event_id.to_string()))?;
        if event.status != EventStatus::Pending {
            return Err(SlashingError::NotPending(event_id.to_string()));
        }

        if stakes.active_count() < 2 {
            event.status = EventStatus::BlockedSafety;
            warn!(event = event_id, validator = %event.validator, "slashing blocked by safety interlock");
            return Ok(EventStatus::BlockedSafety);
        }

        let current = stakes.get(&event.validator);
        if event.amount == 0 || current == 0 {
            event.status = EventStatus::Skipped;
            return Ok(EventStatus::Skipped);
        }
        let amount = event.amount.min(current);

        stakes
            .remove(&event.validator, amount)
            .map_err(|e| SlashingError::Custody(e.to_string()))?;
        if let Err(e) = tokens.transfer(BHX_SYMBOL, STAKING_CONTRACT, BURN_ADDRESS, amount) {
            // Keep stake and custody symmetric even on the failure path.
            let _ = stakes.add(&event.validator, amount);
            return Err(SlashingError::Custody(e.to_string()));
        }

        let strikes = self.strikes.entry(event.validator.clone()).or_insert(0);
        *strikes += 1;
        info!(
            validator = %event.validator,
            amount,
            strikes = *strikes,
            "slashing executed"
        );

        if *strikes >= JAIL_STRIKES {
            // Return the unslashed remainder to the validator before
            // jailing zeroes the stake, keeping custody symmetric.
            let remainder = stakes.get(&event.validator);
            if remainder > 0 {
                tokens
                    .transfer(BHX_SYMBOL, STAKING_CONTRACT, &event.validator, remainder)
                    .map_err(|e| SlashingError::Custody(e.to_string()))?;
            }
            stakes.jail(&event.validator);
            warn!(validator = %event.validator, "validator jailed after repeated violations");
        }

        event.status = EventStatus::Executed;
        Ok(EventStatus::Executed)
    }

    pub fn event(&self, id: &str) -> Option<&SlashingEvent> {
        self.events.get(id)
    }

    pub fn strikes(&self, validator: &str) -> u32 {
        self.strikes.get(validator).copied().unwrap_or(0)
    }

    pub fn events_for(&self, validator: &str) -> Vec<&SlashingEvent> {
        self.events
            .values()
            .filter(|e| e.validator == validator)
            .collect()
    }
}

/// Severity table. Double signing is always critical; most conditions
/// escalate with the validator's strike history.
fn severity_for(condition: ViolationCondition, strikes: u32) -> Severity {
    match condition {
        ViolationCondition::DoubleSign => Severity::Critical,
        ViolationCondition::ConsensusViolation => {
            if strikes >= 1 {
                Severity::Critical
            } else {
                Severity::Major
            }
        }
        ViolationCondition::InvalidBlock => {
            if strikes >= 2 {
                Severity::Critical
            } else {
                Severity::Major
            }
        }
        ViolationCondition::Downtime => {
            if strikes >= 2 {
                Severity::Major
            } else {
                Severity::Minor
            }
        }
        ViolationCondition::MaliciousTransaction => match strikes {
            0 => Severity::Minor,
            1 => Severity::Major,
            _ => Severity::Critical,
        },
    }
}

use crate::config::{ReliabilityConfig, DEFAULT_AGENT_THRESHOLD, DEFAULT_TICKET_THRESHOLD};
use crate::model::build::{BuildJob, FailureReason};
use crate::model::incident::{Incident, Severity};
use serde::{Deserialize, Serialize};

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EscalationAction {
    TRIGGER_AGENT,
    OPEN_TICKET,
    NONE,
}

/// What the policy needs to know about a faulted record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EscalationInputs {
    /// Skips straight to an agent pass regardless of count (build timeouts,
    /// critical or non-retryable incidents).
    pub urgent: bool,
    pub failure_count: u64,
    pub has_ticket: bool,
}

/// The agent and ticket rules are evaluated independently, so one decision
/// can carry both.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EscalationDecision {
    pub trigger_agent: bool,
    pub open_ticket: bool,
}

impl EscalationDecision {
    pub fn actions(&self) -> Vec<EscalationAction> {
        let mut out = Vec::new();
        if self.trigger_agent {
            out.push(EscalationAction::TRIGGER_AGENT);
        }
        if self.open_ticket {
            out.push(EscalationAction::OPEN_TICKET);
        }
        if out.is_empty() {
            out.push(EscalationAction::NONE);
        }
        out
    }
}

pub trait Escalatable {
    fn escalation_inputs(&self) -> EscalationInputs;
}

impl Escalatable for BuildJob {
    fn escalation_inputs(&self) -> EscalationInputs {
        EscalationInputs {
            urgent: self.failure_reason == Some(FailureReason::TIMEOUT),
            failure_count: u64::from(self.failure_count),
            has_ticket: self.escalation_ticket_id.is_some(),
        }
    }
}

impl Escalatable for Incident {
    fn escalation_inputs(&self) -> EscalationInputs {
        EscalationInputs {
            urgent: self.severity == Severity::Critical || !self.retryable,
            failure_count: self.repair_attempts(),
            has_ticket: self.ticket_id.is_some(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationPolicy {
    pub agent_threshold: u32,
    pub ticket_threshold: u32,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            agent_threshold: DEFAULT_AGENT_THRESHOLD,
            ticket_threshold: DEFAULT_TICKET_THRESHOLD,
        }
    }
}

impl EscalationPolicy {
    pub fn from_config(cfg: &ReliabilityConfig) -> Self {
        Self {
            agent_threshold: cfg.agent_threshold,
            ticket_threshold: cfg.ticket_threshold,
        }
    }

    pub fn decide(&self, i: &EscalationInputs) -> EscalationDecision {
        EscalationDecision {
            trigger_agent: i.urgent || i.failure_count >= u64::from(self.agent_threshold),
            open_ticket: self.ticket_due(i),
        }
    }

    pub fn decide_for<E: Escalatable>(&self, subject: &E) -> EscalationDecision {
        self.decide(&subject.escalation_inputs())
    }

    /// Threshold reached and no ticket yet. Once a ticket exists this never fires again.
    pub fn ticket_due(&self, i: &EscalationInputs) -> bool {
        !i.has_ticket && i.failure_count >= u64::from(self.ticket_threshold)
    }
}

//! Uniform result record for multi-step workflows
//!
//! Purchase, renewal, transfer, privacy purchase and auto-renew all report
//! through [`WorkflowResult`]: an ordered trail of step markers, a success
//! flag, a typed failure and balance snapshots.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::refill::RefillDecision;
use crate::traits::ActionReceipt;

/// Named steps across all workflows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    CheckBalance,
    ComputeRefill,
    RefillBalance,
    VerifyRefill,
    PerformAction,
    VerifyAction,
    FinalBalance,
    DryRun,
    ChargeCustomer,
    RenewAtRegistry,
    PersistAndNotify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Started,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMarker {
    pub step: Step,
    pub status: StepStatus,
}

/// Why a workflow stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InsufficientBalance,
    BalanceQueryFailed,
    RefillFailed,
    RegistryActionFailed,
    PaymentDeclined,
    PaymentRequiresAction,
    PaymentFailed,
    PricingUnavailable,
    StoreFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Result of one workflow invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub steps: Vec<StepMarker>,
    pub success: bool,
    pub error: Option<WorkflowFailure>,
    pub balance_before: Option<Decimal>,
    pub balance_after: Option<Decimal>,
    pub refill: Option<RefillDecision>,
    /// Human-readable outcome note, e.g. "dry run completed"
    pub message: Option<String>,
    #[serde(skip)]
    pub receipt: Option<ActionReceipt>,
    pub dry_run: bool,
}

impl WorkflowResult {
    pub fn new(dry_run: bool) -> Self {
        Self {
            steps: Vec::new(),
            success: false,
            error: None,
            balance_before: None,
            balance_after: None,
            refill: None,
            message: None,
            receipt: None,
            dry_run,
        }
    }

    pub fn start(&mut self, step: Step) {
        self.steps.push(StepMarker {
            step,
            status: StepStatus::Started,
        });
    }

    pub fn complete(&mut self, step: Step) {
        self.steps.push(StepMarker {
            step,
            status: StepStatus::Completed,
        });
    }

    /// Stop the workflow with a failure; later steps are never recorded
    pub fn fail(mut self, kind: FailureKind, message: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(WorkflowFailure {
            kind,
            message: message.into(),
        });
        self
    }

    pub fn succeed(mut self) -> Self {
        self.success = true;
        self.error = None;
        self
    }

    pub fn completed(&self, step: Step) -> bool {
        self.steps.contains(&StepMarker {
            step,
            status: StepStatus::Completed,
        })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Append another workflow's steps (e.g. the orchestrator's inside auto-renew)
    pub fn absorb(&mut self, inner: &WorkflowResult) {
        self.steps.extend(inner.steps.iter().copied());
        self.balance_before = inner.balance_before.or(self.balance_before);
        self.balance_after = inner.balance_after.or(self.balance_after);
        if inner.refill.is_some() {
            self.refill = inner.refill.clone();
        }
        if inner.receipt.is_some() {
            self.receipt = inner.receipt.clone();
        }
    }
}

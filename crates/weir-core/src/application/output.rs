use crate::domain::context::{ElementContext, ElementIntent};
use crate::domain::graph::ListenerPhase;
use crate::error::FailureKind;
use crate::types::Key;
use serde::{Deserialize, Serialize};

/// What a job-worker unit of work stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    /// A job backing a wait-state task element
    Task,
    /// A job backing one execution listener invocation
    ExecutionListener,
}

/// A unit of work handed to an external job worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Element instance the job belongs to
    pub element_instance_key: Key,
    /// Owning process instance
    pub process_instance_key: Key,
    /// Id of the element the job was created for
    pub element_id: String,
    /// Worker subscription type, already evaluated
    pub job_type: String,
    /// Remaining retries
    pub retries: u32,
    /// Task job or listener job
    pub kind: JobKind,
    /// For listener jobs: which phase and which index in the chain
    pub listener: Option<(ListenerPhase, u32)>,
}

/// One follow-up record produced while applying a command
///
/// Events record state changes that were already applied; commands request
/// work in a later processing cycle; the remaining variants are side
/// effects consumed by external collaborators (job system, incident view,
/// event subscriptions, command originators).
#[derive(Debug, Clone, PartialEq)]
pub enum FollowUpRecord {
    /// A lifecycle or flow event that was applied to runtime state
    Event {
        /// Key of the record the event concerns
        key: Key,
        /// What happened
        intent: ElementIntent,
        /// Id of the element concerned
        element_id: String,
    },
    /// A command to process in a later cycle
    Command {
        /// The full context payload for reprocessing
        context: ElementContext,
    },
    /// Hand a unit of work to a job worker
    CreateJob(JobSpec),
    /// Withdraw the pending job of a terminating element
    CancelJob {
        /// Element instance whose job is withdrawn
        element_instance_key: Key,
    },
    /// An incident was raised
    IncidentRaised {
        /// Key of the incident record
        key: Key,
        /// Element instance the incident is attached to
        element_instance_key: Key,
        /// Failure classification
        kind: FailureKind,
        /// Failure description
        message: String,
    },
    /// An incident was resolved and its command replayed
    IncidentResolved {
        /// Key of the deleted incident record
        key: Key,
    },
    /// An event subscription was opened for a wait state
    SubscriptionOpened {
        /// Element instance waiting on the subscription
        element_instance_key: Key,
        /// Id of the waiting element
        element_id: String,
    },
    /// An event subscription was closed
    SubscriptionClosed {
        /// Element instance that stopped waiting
        element_instance_key: Key,
    },
    /// A command was rejected by the transition guard
    CommandRejected {
        /// Key the command was addressed to
        key: Key,
        /// Intent of the rejected command
        intent: ElementIntent,
        /// Why it was rejected
        reason: String,
    },
}

/// The ordered log of follow-up records for one or more command applications
///
/// The surrounding engine appends these to its replicated log; tests
/// inspect them directly.
#[derive(Debug, Default)]
pub struct OutputLog {
    records: Vec<FollowUpRecord>,
}

impl OutputLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record
    pub fn push(&mut self, record: FollowUpRecord) {
        self.records.push(record);
    }

    /// Append a lifecycle event
    pub fn push_event(&mut self, key: Key, intent: ElementIntent, element_id: &str) {
        self.push(FollowUpRecord::Event {
            key,
            intent,
            element_id: element_id.to_string(),
        });
    }

    /// Append a follow-up command
    pub fn push_command(&mut self, context: ElementContext) {
        self.push(FollowUpRecord::Command { context });
    }

    /// All records so far
    pub fn records(&self) -> &[FollowUpRecord] {
        &self.records
    }

    /// Take all records, leaving the log empty
    pub fn drain(&mut self) -> Vec<FollowUpRecord> {
        std::mem::take(&mut self.records)
    }

    /// Events matching an intent, in log order
    pub fn events_with_intent(&self, intent: ElementIntent) -> Vec<(Key, String)> {
        self.records
            .iter()
            .filter_map(|record| match record {
                FollowUpRecord::Event {
                    key,
                    intent: recorded,
                    element_id,
                } if *recorded == intent => Some((*key, element_id.clone())),
                _ => None,
            })
            .collect()
    }

    /// Jobs created so far, in log order
    pub fn created_jobs(&self) -> Vec<&JobSpec> {
        self.records
            .iter()
            .filter_map(|record| match record {
                FollowUpRecord::CreateJob(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    /// Rejections recorded so far, in log order
    pub fn rejections(&self) -> Vec<(Key, ElementIntent, &str)> {
        self.records
            .iter()
            .filter_map(|record| match record {
                FollowUpRecord::CommandRejected { key, intent, reason } => {
                    Some((*key, *intent, reason.as_str()))
                }
                _ => None,
            })
            .collect()
    }
}

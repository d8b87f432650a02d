//! Materialization job payloads.

use serde::{Deserialize, Serialize};

/// A unit of asynchronous materialization work, delivered at least once.
///
/// A job carries everything needed to turn an allocated number into a
/// durable row; it is safe to execute any number of times, sequentially or
/// concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaterializeJob {
    /// Create the chat row for `(application_id, number)`.
    Chat { application_id: u64, number: u64 },
    /// Create the message row for `(chat_id, number)` and index its body.
    Message {
        chat_id: u64,
        number: u64,
        body: String,
    },
}

impl MaterializeJob {
    /// The delivery-level dedup key: while a job with this key is pending,
    /// near-duplicate enqueues are suppressed.
    pub fn dedup_key(&self) -> String {
        match self {
            Self::Chat {
                application_id,
                number,
            } => format!("materialize:chat:{application_id}:{number}"),
            Self::Message {
                chat_id, number, ..
            } => format!("materialize:message:{chat_id}:{number}"),
        }
    }

    /// The execution-level lock key, held by the worker for the duration of
    /// its create-or-noop step. Deliberately distinct from delivery dedup:
    /// it protects concurrently *executing* duplicates, which delivery
    /// dedup cannot see.
    pub fn lock_key(&self) -> String {
        format!("{}:lock", self.dedup_key())
    }

    /// The internal id of the parent this job materializes under.
    pub fn parent_id(&self) -> u64 {
        match self {
            Self::Chat { application_id, .. } => *application_id,
            Self::Message { chat_id, .. } => *chat_id,
        }
    }

    /// The allocated child number this job materializes.
    pub fn number(&self) -> u64 {
        match self {
            Self::Chat { number, .. } | Self::Message { number, .. } => *number,
        }
    }
}

/// Opaque handle to an accepted job, returned to the fire-and-forget caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle(pub u64);

/// Result of one materialization execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The row was created by this execution.
    Created { number: u64 },
    /// The row already existed (an earlier or concurrent execution created
    /// it); a no-op success.
    AlreadyExists { number: u64 },
    /// The parent does not exist; the job is dropped permanently.
    Dropped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keys_identify_parent_and_number() {
        let chat = MaterializeJob::Chat {
            application_id: 4,
            number: 9,
        };
        assert_eq!(chat.dedup_key(), "materialize:chat:4:9");
        assert_eq!(chat.lock_key(), "materialize:chat:4:9:lock");

        let message = MaterializeJob::Message {
            chat_id: 5,
            number: 3,
            body: "hi".into(),
        };
        assert_eq!(message.dedup_key(), "materialize:message:5:3");
        // The body is payload, not identity.
        let other_body = MaterializeJob::Message {
            chat_id: 5,
            number: 3,
            body: "different".into(),
        };
        assert_eq!(message.dedup_key(), other_body.dedup_key());
    }

    #[test]
    fn payloads_serialize_with_stable_field_names() {
        let job = MaterializeJob::Message {
            chat_id: 5,
            number: 3,
            body: "hi".into(),
        };
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "Message": { "chat_id": 5, "number": 3, "body": "hi" }
            })
        );
    }
}

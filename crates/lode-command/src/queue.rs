//! Bounded priority command queue with deterministic drain ordering.
//!
//! # Ordering
//!
//! [`drain_due`](CommandQueue::drain_due) removes every entry whose
//! `step` is at or before the current step and returns them sorted by
//! the composite key `(priority, step, insertion seq)`:
//!
//! - `System` commands drain before `Automation`, which drain before
//!   `Player` (the priority discriminant is the sort key).
//! - Within a priority class, earlier target steps drain first.
//! - Equal priority and step fall back to enqueue order.
//!
//! Duplicate-request rejection is the transport's responsibility, not
//! the queue's — the queue happily holds two identical commands.

use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};

use lode_core::{Command, ExecutionError, RejectCode, Step};

/// Schema version for the serialized queue block inside a save.
pub const QUEUE_SCHEMA_VERSION: u32 = 1;

/// Serialized queue (the save's `commandQueue` key).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedQueue {
    /// Serialization schema version, currently 1.
    pub schema_version: u32,
    /// Pending commands in insertion order.
    pub entries: Vec<Command>,
}

/// Errors importing a serialized queue.
#[derive(Clone, Debug, PartialEq)]
pub enum QueueImportError {
    /// The serialized block has an unsupported schema version.
    UnsupportedSchema {
        /// The version found in the save.
        version: u32,
    },
    /// More entries than the queue's configured capacity.
    CapacityExceeded {
        /// Entries in the save.
        entries: usize,
        /// Configured capacity.
        capacity: usize,
    },
    /// An entry failed validation.
    InvalidEntry {
        /// Index of the offending entry.
        index: usize,
        /// Description of the failure.
        reason: String,
    },
}

impl fmt::Display for QueueImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedSchema { version } => {
                write!(f, "unsupported command queue schema version {version}")
            }
            Self::CapacityExceeded { entries, capacity } => {
                write!(f, "{entries} saved commands exceed queue capacity {capacity}")
            }
            Self::InvalidEntry { index, reason } => {
                write!(f, "saved command {index} is invalid: {reason}")
            }
        }
    }
}

impl Error for QueueImportError {}

struct QueueEntry {
    command: Command,
    seq: u64,
}

/// Bounded, priority-ordered deferred command queue.
pub struct CommandQueue {
    entries: Vec<QueueEntry>,
    capacity: usize,
    next_seq: u64,
}

impl CommandQueue {
    /// Create a queue holding at most `capacity` commands.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "CommandQueue capacity must be at least 1");
        Self {
            entries: Vec::with_capacity(capacity.min(256)),
            capacity,
            next_seq: 0,
        }
    }

    /// Enqueue a command, rejecting with `COMMAND_REJECTED` when full.
    pub fn enqueue(&mut self, command: Command) -> Result<(), ExecutionError> {
        if self.entries.len() >= self.capacity {
            return Err(ExecutionError::with_details(
                RejectCode::CommandRejected,
                "command queue is full",
                serde_json::json!({ "capacity": self.capacity }),
            ));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(QueueEntry { command, seq });
        Ok(())
    }

    /// Remove and return every command due at `step`, in deterministic
    /// drain order. Entries targeting a later step stay queued.
    pub fn drain_due(&mut self, step: Step) -> Vec<Command> {
        let mut due: Vec<QueueEntry> = Vec::new();
        let mut remaining: Vec<QueueEntry> = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if entry.command.step() <= step {
                due.push(entry);
            } else {
                remaining.push(entry);
            }
        }
        self.entries = remaining;

        due.sort_by_key(|e| (e.command.priority(), e.command.step(), e.seq));
        due.into_iter().map(|e| e.command).collect()
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of commands this queue can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discard every queued command.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate queued commands in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.entries.iter().map(|e| &e.command)
    }

    /// Export pending commands for the save file.
    pub fn export_for_save(&self) -> SerializedQueue {
        SerializedQueue {
            schema_version: QUEUE_SCHEMA_VERSION,
            entries: self.iter().cloned().collect(),
        }
    }

    /// Replace queue contents from a save, validating each entry.
    ///
    /// `validate` runs per entry (payload schema checks); the queue is
    /// cleared first and left empty if any entry fails.
    pub fn import_from_save(
        &mut self,
        data: &SerializedQueue,
        mut validate: impl FnMut(&Command) -> Result<(), String>,
    ) -> Result<usize, QueueImportError> {
        if data.schema_version != QUEUE_SCHEMA_VERSION {
            return Err(QueueImportError::UnsupportedSchema {
                version: data.schema_version,
            });
        }
        if data.entries.len() > self.capacity {
            return Err(QueueImportError::CapacityExceeded {
                entries: data.entries.len(),
                capacity: self.capacity,
            });
        }
        self.clear();
        for (index, command) in data.entries.iter().enumerate() {
            if let Err(reason) = validate(command) {
                self.clear();
                return Err(QueueImportError::InvalidEntry { index, reason });
            }
        }
        for command in &data.entries {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.entries.push(QueueEntry {
                command: command.clone(),
                seq,
            });
        }
        Ok(self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_core::CommandPriority;
    use serde_json::Value;

    fn cmd(kind: &str, priority: CommandPriority, step: u64) -> Command {
        Command::new(kind, priority, 1_000, Step(step), Value::Null).unwrap()
    }

    // ── enqueue tests ──────────────────────────────────────────

    #[test]
    fn enqueue_rejects_when_full() {
        let mut q = CommandQueue::new(2);
        q.enqueue(cmd("A", CommandPriority::Player, 0)).unwrap();
        q.enqueue(cmd("B", CommandPriority::Player, 0)).unwrap();
        let err = q.enqueue(cmd("C", CommandPriority::Player, 0)).unwrap_err();
        assert_eq!(err.code, RejectCode::CommandRejected);
        assert_eq!(q.len(), 2);
    }

    #[test]
    #[should_panic(expected = "capacity must be at least 1")]
    fn zero_capacity_panics() {
        let _ = CommandQueue::new(0);
    }

    // ── drain tests ────────────────────────────────────────────

    #[test]
    fn drain_orders_by_priority_then_step_then_seq() {
        let mut q = CommandQueue::new(16);
        q.enqueue(cmd("p2", CommandPriority::Player, 1)).unwrap();
        q.enqueue(cmd("s", CommandPriority::System, 2)).unwrap();
        q.enqueue(cmd("a", CommandPriority::Automation, 0)).unwrap();
        q.enqueue(cmd("p1", CommandPriority::Player, 0)).unwrap();

        let drained = q.drain_due(Step(5));
        let kinds: Vec<_> = drained.iter().map(|c| c.kind()).collect();
        assert_eq!(kinds, vec!["s", "a", "p1", "p2"]);
    }

    #[test]
    fn equal_priority_drains_in_enqueue_order() {
        let mut q = CommandQueue::new(16);
        for name in ["first", "second", "third"] {
            q.enqueue(cmd(name, CommandPriority::Player, 0)).unwrap();
        }
        let drained = q.drain_due(Step(0));
        let kinds: Vec<_> = drained.iter().map(|c| c.kind()).collect();
        assert_eq!(kinds, vec!["first", "second", "third"]);
    }

    #[test]
    fn future_commands_stay_queued() {
        let mut q = CommandQueue::new(16);
        q.enqueue(cmd("now", CommandPriority::Player, 0)).unwrap();
        q.enqueue(cmd("later", CommandPriority::Player, 10)).unwrap();

        let drained = q.drain_due(Step(0));
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].kind(), "now");
        assert_eq!(q.len(), 1);

        let drained = q.drain_due(Step(10));
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].kind(), "later");
    }

    #[test]
    fn drain_boundary_step_equal_is_due() {
        let mut q = CommandQueue::new(16);
        q.enqueue(cmd("x", CommandPriority::Player, 5)).unwrap();
        assert!(q.drain_due(Step(4)).is_empty());
        assert_eq!(q.drain_due(Step(5)).len(), 1);
    }

    #[test]
    fn clear_discards_everything() {
        let mut q = CommandQueue::new(16);
        q.enqueue(cmd("x", CommandPriority::Player, 0)).unwrap();
        q.clear();
        assert!(q.is_empty());
        assert!(q.drain_due(Step(100)).is_empty());
    }

    // ── save round-trip ────────────────────────────────────────

    #[test]
    fn export_import_round_trip() {
        let mut q = CommandQueue::new(16);
        q.enqueue(cmd("a", CommandPriority::System, 3)).unwrap();
        q.enqueue(cmd("b", CommandPriority::Player, 1)).unwrap();
        let saved = q.export_for_save();
        assert_eq!(saved.schema_version, 1);

        let mut fresh = CommandQueue::new(16);
        let imported = fresh.import_from_save(&saved, |_| Ok(())).unwrap();
        assert_eq!(imported, 2);
        assert_eq!(fresh.export_for_save(), saved);
    }

    #[test]
    fn import_rejects_wrong_schema_version() {
        let mut q = CommandQueue::new(16);
        let saved = SerializedQueue {
            schema_version: 2,
            entries: vec![],
        };
        assert!(matches!(
            q.import_from_save(&saved, |_| Ok(())),
            Err(QueueImportError::UnsupportedSchema { version: 2 })
        ));
    }

    #[test]
    fn import_rejects_over_capacity() {
        let mut q = CommandQueue::new(1);
        let saved = SerializedQueue {
            schema_version: 1,
            entries: vec![
                cmd("a", CommandPriority::Player, 0),
                cmd("b", CommandPriority::Player, 0),
            ],
        };
        assert!(matches!(
            q.import_from_save(&saved, |_| Ok(())),
            Err(QueueImportError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn import_validation_failure_empties_the_queue() {
        let mut q = CommandQueue::new(16);
        q.enqueue(cmd("existing", CommandPriority::Player, 0)).unwrap();
        let saved = SerializedQueue {
            schema_version: 1,
            entries: vec![cmd("bad", CommandPriority::Player, 0)],
        };
        let err = q
            .import_from_save(&saved, |c| {
                if c.kind() == "bad" {
                    Err("unknown payload".into())
                } else {
                    Ok(())
                }
            })
            .unwrap_err();
        assert!(matches!(err, QueueImportError::InvalidEntry { index: 0, .. }));
        assert!(q.is_empty());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_priority() -> impl Strategy<Value = CommandPriority> {
            prop_oneof![
                Just(CommandPriority::System),
                Just(CommandPriority::Automation),
                Just(CommandPriority::Player),
            ]
        }

        proptest! {
            #[test]
            fn drain_is_always_sorted(
                specs in prop::collection::vec((arb_priority(), 0u64..10), 0..64)
            ) {
                let mut q = CommandQueue::new(128);
                for (priority, step) in &specs {
                    q.enqueue(cmd("x", *priority, *step)).unwrap();
                }
                let drained = q.drain_due(Step(10));
                prop_assert_eq!(drained.len(), specs.len());
                for window in drained.windows(2) {
                    let a = (window[0].priority(), window[0].step());
                    let b = (window[1].priority(), window[1].step());
                    prop_assert!(a <= b, "drain order violated: {a:?} > {b:?}");
                }
            }
        }
    }
}

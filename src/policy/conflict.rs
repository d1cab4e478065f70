//! What happens when a fingerprint is presented against a license other
//! than the one it is bound to.

use crate::protocol::models::Machine;
use std::fmt::Debug;

/// Decision for a fingerprint already bound to a different license.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    /// Rebind the machine to the presented license and client.
    Rebind,
    /// Leave the machine untouched and refuse the registration.
    Reject,
}

/// Conflict policy seam. One implementation is selected per deployment.
pub trait ConflictPolicy: Send + Sync + Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Decide what to do with `existing`, bound to another license.
    fn on_foreign_binding(&self, existing: &Machine) -> ConflictAction;
}

/// Machines follow their latest license (e.g. renewals under a new key).
#[derive(Debug, Clone, Copy, Default)]
pub struct MoveOnConflict;

impl ConflictPolicy for MoveOnConflict {
    fn name(&self) -> &'static str {
        "move"
    }

    fn on_foreign_binding(&self, _existing: &Machine) -> ConflictAction {
        ConflictAction::Rebind
    }
}

/// A fingerprint belongs to its first license for the lifetime of the record.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectOnConflict;

impl ConflictPolicy for RejectOnConflict {
    fn name(&self) -> &'static str {
        "reject"
    }

    fn on_foreign_binding(&self, _existing: &Machine) -> ConflictAction {
        ConflictAction::Reject
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::models::{MachineDescriptors, RecordStatus};
    use chrono::Utc;

    fn machine() -> Machine {
        Machine {
            id: 1,
            machine_id: "MCH0000001".into(),
            fingerprint: "F1".into(),
            hostname: Some("build-01".into()),
            status: RecordStatus::Active,
            client: 1,
            license: 1,
            descriptors: MachineDescriptors::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn move_policy_rebinds() {
        assert_eq!(MoveOnConflict.on_foreign_binding(&machine()), ConflictAction::Rebind);
        assert_eq!(MoveOnConflict.name(), "move");
    }

    #[test]
    fn reject_policy_rejects() {
        assert_eq!(RejectOnConflict.on_foreign_binding(&machine()), ConflictAction::Reject);
        assert_eq!(RejectOnConflict.name(), "reject");
    }
}

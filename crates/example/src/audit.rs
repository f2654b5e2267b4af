//! Audit governance.

use crate::Ledger;
use cadre_core::escalation::Escalation;
use cadre_core::governance::Governance;
use cadre_core::object::ObjectRef;
use cadre_core::operation::Progress;

/// Records which objects a reservation touched, committing the entry when
/// the reservation succeeds and discarding it when it escalates.
#[derive(Debug)]
pub struct AuditTrail {
    ledger: Ledger,
    governed: Vec<String>,
}

impl AuditTrail {
    /// Creates an audit writing to `ledger`.
    #[must_use]
    pub fn new(ledger: Ledger) -> Self {
        Self {
            ledger,
            governed: Vec::new(),
        }
    }
}

impl Governance for AuditTrail {
    fn govern(&mut self, object: &ObjectRef) -> Result<(), Escalation> {
        self.governed.push(object.name().to_string());
        Ok(())
    }

    fn enforce(&mut self) -> Result<Progress, Escalation> {
        self.ledger
            .record(format!("audit committed [{}]", self.governed.join(", ")));
        Ok(Progress::Complete)
    }

    fn disregard(&mut self) -> Result<Progress, Escalation> {
        self.ledger.record("audit discarded");
        Ok(Progress::Complete)
    }
}

//! Demand reported by client parties.
//!
//! Each party periodically reports the full list of work it wants to run on
//! shared nodes. A new report replaces the previous one from the same party.
//! The ledger is informational: it feeds diagnostics and capacity views, it
//! does not create reservations.

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use nodeshare_id::PartyName;
use nodeshare_proto::WorkloadItem;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Latest report of one party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartyWorkload {
    pub items: Vec<WorkloadItem>,
    pub reported_at: DateTime<Utc>,
}

/// Demand aggregated across parties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemandSummary {
    pub total: usize,
    pub by_label: BTreeMap<String, usize>,
    pub by_party: BTreeMap<PartyName, usize>,

    /// Time of the most recent report from any party.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reported_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct WorkloadLedger {
    reports: RwLock<BTreeMap<PartyName, PartyWorkload>>,
}

impl WorkloadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `party`'s demand with `items`. Returns the number accepted.
    pub fn report(&self, party: &PartyName, items: Vec<WorkloadItem>) -> usize {
        let accepted = items.len();
        debug!(party = %party, items = accepted, "Workload reported");
        self.reports
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                party.clone(),
                PartyWorkload {
                    items,
                    reported_at: Utc::now(),
                },
            );
        accepted
    }

    pub fn summary(&self) -> DemandSummary {
        let reports = self.reports.read().unwrap_or_else(|e| e.into_inner());
        let mut summary = DemandSummary::default();
        for (party, workload) in reports.iter() {
            summary.total += workload.items.len();
            summary.last_reported_at = summary.last_reported_at.max(Some(workload.reported_at));
            summary
                .by_party
                .insert(party.clone(), workload.items.len());
            for item in &workload.items {
                *summary.by_label.entry(item.label.clone()).or_default() += 1;
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeshare_id::ReservationId;

    fn party(name: &str) -> PartyName {
        PartyName::parse(name).unwrap()
    }

    fn item(id: u64, label: &str, owner: &str) -> WorkloadItem {
        WorkloadItem {
            id: ReservationId::new(id),
            label: label.to_string(),
            owner: party(owner),
        }
    }

    #[test]
    fn test_report_replaces_previous() {
        let ledger = WorkloadLedger::new();
        let jenkins1 = party("jenkins1");

        assert_eq!(
            ledger.report(&jenkins1, vec![item(1, "a", "jenkins1"), item(2, "b", "jenkins1")]),
            2
        );
        assert_eq!(ledger.report(&jenkins1, vec![item(3, "a", "jenkins1")]), 1);

        let summary = ledger.summary();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.by_label.get("b"), None);
        assert!(summary.last_reported_at.is_some());
    }

    #[test]
    fn test_summary_across_parties() {
        let ledger = WorkloadLedger::new();
        ledger.report(&party("jenkins1"), vec![item(1, "solaris11", "jenkins1")]);
        ledger.report(
            &party("jenkins2"),
            vec![item(1, "solaris11", "jenkins2"), item(2, "windows", "jenkins2")],
        );

        let summary = ledger.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_label["solaris11"], 2);
        assert_eq!(summary.by_label["windows"], 1);
        assert_eq!(summary.by_party[&party("jenkins2")], 2);
    }

    #[test]
    fn test_empty_report_clears_party() {
        let ledger = WorkloadLedger::new();
        ledger.report(&party("jenkins1"), vec![item(1, "a", "jenkins1")]);
        assert_eq!(ledger.report(&party("jenkins1"), Vec::new()), 0);
        assert_eq!(ledger.summary().total, 0);
    }
}

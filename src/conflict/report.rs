//! Aggregated conflict report

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Conflict, ConflictType, Severity};

/// All conflicts from one detection run, grouped for reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConflictDetectionReport {
    conflicts: Vec<Conflict>,
    by_type: BTreeMap<ConflictType, Vec<Conflict>>,
}

impl ConflictDetectionReport {
    pub fn new(conflicts: Vec<Conflict>) -> Self {
        let mut by_type: BTreeMap<ConflictType, Vec<Conflict>> = BTreeMap::new();
        for conflict in &conflicts {
            by_type
                .entry(conflict.conflict_type)
                .or_default()
                .push(conflict.clone());
        }
        Self { conflicts, by_type }
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn total_conflict_count(&self) -> usize {
        self.conflicts.len()
    }

    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    pub fn of_type(&self, conflict_type: ConflictType) -> &[Conflict] {
        self.by_type
            .get(&conflict_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn by_type(&self) -> &BTreeMap<ConflictType, Vec<Conflict>> {
        &self.by_type
    }

    pub fn count(&self, conflict_type: ConflictType) -> usize {
        self.of_type(conflict_type).len()
    }

    pub fn error_count(&self) -> usize {
        self.conflicts
            .iter()
            .filter(|c| c.severity() == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.conflicts
            .iter()
            .filter(|c| c.severity() == Severity::Warning)
            .count()
    }

    /// Flattened `[code] TYPE: description` lines
    pub fn issue_lines(&self) -> Vec<String> {
        self.conflicts
            .iter()
            .map(|c| format!("[{}] {}: {}", c.conflict_type.as_str(), c.conflict_type, c.description))
            .collect()
    }

    /// One line per conflict type that occurred
    pub fn summary(&self) -> String {
        if !self.has_conflicts() {
            return "No conflicts detected".to_string();
        }
        let counts: Vec<String> = ConflictType::ALL
            .iter()
            .filter(|t| self.count(**t) > 0)
            .map(|t| format!("{}: {}", t, self.count(*t)))
            .collect();
        format!(
            "{} conflict(s) detected ({})",
            self.total_conflict_count(),
            counts.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_report() {
        let report = ConflictDetectionReport::default();
        assert!(!report.has_conflicts());
        assert_eq!(report.total_conflict_count(), 0);
        assert_eq!(report.summary(), "No conflicts detected");
    }

    #[test]
    fn test_grouping_by_type() {
        let report = ConflictDetectionReport::new(vec![
            Conflict::duplicate_element("NS", "Customer", vec!["a.xml".into(), "b.xml".into()]),
            Conflict::duplicate_element("NS", "Order", vec!["a.xml".into(), "c.xml".into()]),
            Conflict::duplicate_namespace_schema("NS", vec!["a.xml".into(), "b.xml".into()]),
            Conflict::missing_reference("NS", "NS.Order.navigation.Lines", "NS.Line", None, None),
        ]);

        assert!(report.has_conflicts());
        assert_eq!(report.total_conflict_count(), 4);
        assert_eq!(report.count(ConflictType::DuplicateElement), 2);
        assert_eq!(report.count(ConflictType::AliasConflict), 0);
        assert_eq!(report.error_count(), 3);
        assert_eq!(report.warning_count(), 1);
        assert_eq!(
            report.summary(),
            "4 conflict(s) detected (DUPLICATE_ELEMENT: 2, DUPLICATE_NAMESPACE_SCHEMA: 1, MISSING_REFERENCE: 1)"
        );
        assert!(report.issue_lines()[0].starts_with("[C001] DUPLICATE_ELEMENT"));
    }
}

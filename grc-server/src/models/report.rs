//! Outcome of a bulk import

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRow {
    /// 1-indexed data row, not counting the header
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub created: usize,
    pub skipped: Vec<SkippedRow>,
}

impl ImportReport {
    pub fn skip(&mut self, row: usize, reason: impl Into<String>) {
        self.skipped.push(SkippedRow {
            row,
            reason: reason.into(),
        });
    }

    /// Fold in the rows another stage rejected, keeping row order.
    pub fn merge_skipped(&mut self, mut other: Vec<SkippedRow>) {
        self.skipped.append(&mut other);
        self.skipped.sort_by_key(|s| s.row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_rows_stay_sorted() {
        let mut report = ImportReport::default();
        report.skip(4, "duplicate");
        report.merge_skipped(vec![SkippedRow {
            row: 2,
            reason: "title is required".into(),
        }]);
        let rows: Vec<usize> = report.skipped.iter().map(|s| s.row).collect();
        assert_eq!(rows, vec![2, 4]);
    }
}

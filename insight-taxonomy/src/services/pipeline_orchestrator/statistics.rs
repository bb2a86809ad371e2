//! Folding phase reports into run statistics

use crate::models::{
    CategoryAssignmentReport, CategoryDiscoveryReport, FeatureExtractionReport, PhaseIssues,
    RunStatistics, SampleReport, SubcategoryAssignmentReport, SubcategoryDiscoveryReport,
};

impl RunStatistics {
    fn record_issues(&mut self, issues: &PhaseIssues) {
        self.error_count += issues.errors.len();
        self.warning_count += issues.warnings.len();
    }

    /// A reused sample keeps the fetch counters of the run that drew it
    pub(crate) fn record_sample(&mut self, report: &SampleReport) {
        self.sampled = report.total_included;
        if !report.reused_existing {
            self.skipped_empty = report.skipped_empty;
            self.skipped_failed = report.skipped_failed;
        }
        self.record_issues(&report.issues);
    }

    pub(crate) fn record_features(&mut self, report: &FeatureExtractionReport) {
        self.features_included = report.included + report.skipped_existing;
        self.features_excluded += report.excluded;
        self.features_failed = report.failed;
        self.record_issues(&report.issues);
    }

    pub(crate) fn record_category_discovery(&mut self, report: &CategoryDiscoveryReport) {
        self.categories = report.statistics.clone();
        self.record_issues(&report.issues);
    }

    pub(crate) fn record_category_assignment(&mut self, report: &CategoryAssignmentReport) {
        self.conversations_assigned = report.assigned;
        self.categories = report.statistics.clone();
        self.record_issues(&report.issues);
    }

    pub(crate) fn record_subcategory_discovery(&mut self, report: &SubcategoryDiscoveryReport) {
        self.subcategories = report.statistics.clone();
        self.record_issues(&report.issues);
    }

    pub(crate) fn record_subcategory_assignment(&mut self, report: &SubcategoryAssignmentReport) {
        self.subcategory_assignments = report.assigned;
        if !report.statistics.is_empty() {
            self.subcategories = report.statistics.clone();
        }
        self.record_issues(&report.issues);
    }
}

//! Exit code logic for the space-export process.
//!
//! Single responsibility: map a finished run report to the process exit outcome.

use space_export_core::mirror::RunReport;

use crate::ProcessExit;

/// Success only when nothing failed and the run was not interrupted.
pub(crate) fn determine_exit_outcome(report: &RunReport) -> ProcessExit {
    if report.is_complete() {
        ProcessExit::Success
    } else {
        ProcessExit::Partial
    }
}

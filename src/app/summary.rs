//! End-of-run summary output.

use std::collections::HashSet;

use space_export_core::mirror::{PageFailure, RunReport};
use tracing::info;

pub(crate) fn print_completion_summary(report: &RunReport) {
    info!(
        visited = report.pages_visited,
        rendered = report.pages_rendered,
        skipped = report.pages_skipped,
        failed = report.pages_failed,
        attachments = report.attachments_fetched,
        attachments_skipped = report.attachments_skipped,
        retries = report.retries,
        "Export complete"
    );

    if report.failures.is_empty() {
        return;
    }
    let unreachable = report.unreachable_subtrees();
    if unreachable > 0 {
        info!(unreachable, "Subtrees not walked; run again to pick them up");
    }
    println!("{}", failure_header(&report.failures));
    for failure in &report.failures {
        println!("  {}", failure_line(failure));
    }
}

/// A page can fail at more than one stage, so failures and pages are counted
/// separately.
fn failure_header(failures: &[PageFailure]) -> String {
    let pages = failures
        .iter()
        .map(|f| f.page_id.as_str())
        .collect::<HashSet<_>>()
        .len();
    let noun = if pages == 1 { "page" } else { "pages" };
    format!("Failures ({}) on {pages} {noun}:", failures.len())
}

fn failure_line(failure: &PageFailure) -> String {
    format!(
        "{} \"{}\" at {} [{}]: {}",
        failure.page_id,
        failure.title,
        failure.path.display(),
        failure.stage,
        failure.reason
    )
}

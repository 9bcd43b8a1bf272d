use tempfile::tempdir;
use wiki_versioner_core::ledger::{open_ledger, Ledger, SqliteLedger};

#[test]
fn records_survive_reopening() {
    let tmp = tempdir().unwrap();
    let db = tmp.path().join("state/export.db");
    let url = format!("sqlite://{}", db.display());

    {
        let ledger = open_ledger(&url).unwrap();
        ledger.mark_file_committed("Root_1/Root 1.0.md").unwrap();
        ledger.mark_version_exported("1", 1, "Root", "markdown").unwrap();
        ledger.mark_version_exported("1", 2, "Root", "markdown").unwrap();
        ledger.mark_version_committed("1", 1, "markdown").unwrap();
        ledger
            .mark_attachment_exported("1", "att-1", "diagram.png", Some(4))
            .unwrap();
    }

    let ledger = open_ledger(&url).unwrap();
    assert!(ledger.is_file_committed("Root_1/Root 1.0.md").unwrap());
    assert!(!ledger.is_file_committed("Root_1/Root 2.0.md").unwrap());
    assert_eq!(
        ledger.exported_versions("1", "markdown").unwrap().into_iter().collect::<Vec<_>>(),
        [1, 2]
    );
    assert!(ledger.exported_versions("1", "doc").unwrap().is_empty());
    assert!(ledger.is_version_committed("1", 1, "markdown").unwrap());
    assert!(!ledger.is_version_committed("1", 2, "markdown").unwrap());
    assert_eq!(ledger.exported_attachments("1").unwrap()["att-1"], Some(4));
}

#[test]
fn version_export_is_insert_if_absent() {
    let ledger = SqliteLedger::open_in_memory().unwrap();
    ledger.mark_version_exported("5", 3, "Old title", "markdown").unwrap();
    ledger.mark_version_committed("5", 3, "markdown").unwrap();
    // re-exporting must not reset the committed flag
    ledger.mark_version_exported("5", 3, "New title", "markdown").unwrap();
    assert!(ledger.is_version_committed("5", 3, "markdown").unwrap());
    assert_eq!(ledger.exported_versions("5", "markdown").unwrap().len(), 1);
}

#[test]
fn committing_unknown_records_is_silent() {
    let ledger = SqliteLedger::open_in_memory().unwrap();
    ledger.mark_version_committed("404", 1, "markdown").unwrap();
    ledger
        .mark_attachment_committed_by_filename("404", "missing.pdf")
        .unwrap();
    assert!(!ledger.is_version_committed("404", 1, "markdown").unwrap());
}

#[test]
fn colliding_sanitized_titles_mark_first_record_only() {
    let ledger = SqliteLedger::open_in_memory().unwrap();
    ledger
        .mark_attachment_exported("9", "att-1", "Plan?.pdf", Some(1))
        .unwrap();
    ledger
        .mark_attachment_exported("9", "att-2", "Plan*.pdf", Some(1))
        .unwrap();

    ledger.mark_attachment_committed_by_filename("9", "Plan.pdf").unwrap();
    assert!(ledger.is_attachment_committed("9", "att-1").unwrap());
    assert!(!ledger.is_attachment_committed("9", "att-2").unwrap());
}

#[test]
fn attachments_of_other_pages_are_not_matched() {
    let ledger = SqliteLedger::open_in_memory().unwrap();
    ledger
        .mark_attachment_exported("1", "att-1", "report.pdf", None)
        .unwrap();
    ledger
        .mark_attachment_committed_by_filename("2", "report.pdf")
        .unwrap();
    assert!(!ledger.is_attachment_committed("1", "att-1").unwrap());
}

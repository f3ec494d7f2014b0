//! Linked-content usage tests
//!
//! Covers markdown extraction, the usage-map merge with audit-observed
//! files, and linked-content lifecycle during incremental runs.

use std::collections::BTreeSet;

use mediadex::core::classify::{extract_icon_references, extract_links};
use mediadex::core::{merge_linked_entries, parse_page_usage, DiffEngine, LinkedFiles};
use mediadex::{AuditEvent, EntryStatus, IndexEntry, LinkedKind, MediaIndex, UsageMap};

fn audit(path: &str, timestamp: i64, method: &str) -> AuditEvent {
    AuditEvent {
        path: path.to_string(),
        timestamp,
        route: "preview".to_string(),
        method: method.to_string(),
        user: "author@example.com".to_string(),
    }
}

fn touched(pages: &[&str]) -> BTreeSet<String> {
    pages.iter().map(|p| p.to_string()).collect()
}

#[test]
fn pdf_link_produces_a_referenced_document_entry() {
    // Page /b markup contains [doc](/docs/file.pdf)
    let markdown = "Some intro\n\n[doc](/docs/file.pdf)\n";
    assert_eq!(extract_links(markdown, ".pdf"), vec!["/docs/file.pdf"]);

    let mut map = UsageMap::new();
    parse_page_usage("/b", markdown, &mut map);

    let mut index = MediaIndex::new();
    merge_linked_entries(&map, &LinkedFiles::new(), &touched(&["/b"]), &mut index, 1000);

    assert_eq!(index.len(), 1);
    let entry = &index.entries()[0];
    assert_eq!(entry.hash, "/docs/file.pdf");
    assert_eq!(entry.page, "/b");
    assert_eq!(entry.status, EntryStatus::Referenced);
    assert_eq!(entry.kind, "document > pdf");
}

#[test]
fn icon_shorthand_resolves_to_svg_usage() {
    let markdown = "Press :search: to find things. :note: this is prose.";
    assert_eq!(extract_icon_references(markdown), vec!["/icons/search.svg"]);

    let mut map = UsageMap::new();
    parse_page_usage("/b", markdown, &mut map);
    assert!(map.svgs.contains_key("/icons/search.svg"));
    assert!(!map.svgs.contains_key("/icons/note.svg"));
}

#[test]
fn audit_observed_file_without_usage_is_file_unused() {
    let mut observed = LinkedFiles::new();
    observed.record(&audit("/docs/brochure.pdf", 1000, "POST"));

    let mut index = MediaIndex::new();
    merge_linked_entries(&UsageMap::new(), &observed, &touched(&[]), &mut index, 2000);

    assert_eq!(index.len(), 1);
    let entry = &index.entries()[0];
    assert_eq!(entry.hash, "/docs/brochure.pdf");
    assert_eq!(entry.status, EntryStatus::FileUnused);
    assert_eq!(entry.page, "");
    assert_eq!(entry.timestamp, 1000);
}

#[test]
fn usage_across_pages_joins_the_page_list() {
    let mut map = UsageMap::new();
    parse_page_usage("/a", "[x](/docs/file.pdf)", &mut map);
    parse_page_usage("/b", "see [y](/docs/file.pdf)", &mut map);

    let mut index = MediaIndex::new();
    merge_linked_entries(
        &map,
        &LinkedFiles::new(),
        &touched(&["/a", "/b"]),
        &mut index,
        1000,
    );

    assert_eq!(index.len(), 1);
    assert_eq!(index.entries()[0].page, "/a,/b");
}

#[test]
fn deleted_linked_file_is_removed_from_the_index() {
    // Previously indexed fragment; its latest audit event is a DELETE
    let mut index = MediaIndex::new();
    index.upsert_linked(IndexEntry::linked(
        "/fragments/nav",
        &["/a".to_string()],
        LinkedKind::Fragment,
        1000,
    ));

    let mut observed = LinkedFiles::new();
    observed.record(&audit("/fragments/nav", 2000, "POST"));
    observed.record(&audit("/fragments/nav", 3000, "DELETE"));

    let mut engine = DiffEngine::new(index);
    engine.apply_linked(&UsageMap::new(), &observed, &touched(&[]), 4000);

    assert!(engine.finish().is_empty());
}

#[test]
fn repreviewed_page_refreshes_linked_page_lists() {
    // Both pages were repreviewed; /a stopped referencing the fragment,
    // /b still does
    let mut index = MediaIndex::new();
    index.upsert_linked(IndexEntry::linked(
        "/fragments/nav",
        &["/a".to_string(), "/b".to_string()],
        LinkedKind::Fragment,
        1000,
    ));

    let mut map = UsageMap::new();
    parse_page_usage("/b", "[nav](/fragments/nav)", &mut map);

    let mut engine = DiffEngine::new(index);
    engine.apply_linked(&map, &LinkedFiles::new(), &touched(&["/a", "/b"]), 4000);
    let index = engine.finish();

    assert_eq!(index.len(), 1);
    assert_eq!(index.entries()[0].page, "/b");
    assert_eq!(index.entries()[0].status, EntryStatus::Referenced);
}

#[test]
fn untouched_page_reference_survives_an_incremental_run() {
    // /fragments/nav is referenced by /a and /c; only /a was repreviewed
    // in the slice and still links it. /c's reference must survive even
    // though its markup was never refetched.
    let mut index = MediaIndex::new();
    index.upsert_linked(IndexEntry::linked(
        "/fragments/nav",
        &["/a".to_string(), "/c".to_string()],
        LinkedKind::Fragment,
        1000,
    ));

    let mut map = UsageMap::new();
    parse_page_usage("/a", "[nav](/fragments/nav)", &mut map);

    let mut engine = DiffEngine::new(index);
    engine.apply_linked(&map, &LinkedFiles::new(), &touched(&["/a"]), 4000);
    let index = engine.finish();

    assert_eq!(index.len(), 1);
    let entry = &index.entries()[0];
    assert_eq!(entry.status, EntryStatus::Referenced);
    let mut pages: Vec<&str> = entry.pages().collect();
    pages.sort_unstable();
    assert_eq!(pages, vec!["/a", "/c"]);
}

#[test]
fn touched_page_dropping_its_last_link_leaves_file_unused() {
    // /a was the only referencing page and its fresh markup no longer
    // links the document; the row flips to file-unused instead of
    // lingering as referenced
    let mut index = MediaIndex::new();
    index.upsert_linked(IndexEntry::linked(
        "/docs/file.pdf",
        &["/a".to_string()],
        LinkedKind::Pdf,
        1000,
    ));

    let mut engine = DiffEngine::new(index);
    engine.apply_linked(&UsageMap::new(), &LinkedFiles::new(), &touched(&["/a"]), 4000);
    let index = engine.finish();

    assert_eq!(index.len(), 1);
    let entry = &index.entries()[0];
    assert_eq!(entry.status, EntryStatus::FileUnused);
    assert_eq!(entry.page, "");
}

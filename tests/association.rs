//! Full-build association tests
//!
//! Covers the backward matching window, identity keying, standalone
//! uploads, and idempotence of a full correlation pass.

use mediadex::core::{Associator, PageActivity};
use mediadex::{AuditEvent, EntryStatus, MediaEvent};

fn preview(path: &str, timestamp: i64) -> AuditEvent {
    AuditEvent {
        path: path.to_string(),
        timestamp,
        route: "preview".to_string(),
        method: "POST".to_string(),
        user: "author@example.com".to_string(),
    }
}

fn upload(hash: &str, resource_path: Option<&str>, timestamp: i64) -> MediaEvent {
    MediaEvent {
        media_hash: hash.to_string(),
        resource_path: resource_path.map(str::to_string),
        original_filename: Some(format!("{hash}.png")),
        path: format!("/media_{hash}.png"),
        timestamp,
        user: "author@example.com".to_string(),
        operation: "upload".to_string(),
        content_type: "image/png".to_string(),
    }
}

fn activity(events: &[AuditEvent]) -> PageActivity {
    let mut activity = PageActivity::new();
    for event in events {
        activity.record(event);
    }
    activity.finish();
    activity
}

#[test]
fn upload_shortly_after_preview_is_referenced() {
    // Page /a previewed at t=1000; upload of H1 against /a at t=1003
    let audit = [preview("/a", 1000)];
    let activity = activity(&audit);

    let mut associator = Associator::new(&activity);
    associator.observe_chunk(vec![upload("H1", Some("/a"), 1003)]);
    let index = associator.finish();

    assert_eq!(index.len(), 1);
    let entry = &index.entries()[0];
    assert_eq!(entry.hash, "H1");
    assert_eq!(entry.page, "/a.md");
    assert_eq!(entry.status, EntryStatus::Referenced);
}

#[test]
fn window_is_inclusive_below_and_bounded_above() {
    let audit = [preview("/a", 1000)];
    let activity = activity(&audit);

    // t=1003 falls inside the 5000ms backward window
    let mut associator = Associator::new(&activity);
    associator.observe_chunk(vec![upload("H1", Some("/a"), 1003)]);
    assert_eq!(associator.finish().len(), 1);

    // t=6001 is past the window; nothing matches and the upload carries a
    // filename, so it surfaces as unused rather than vanishing
    let mut associator = Associator::new(&activity);
    associator.observe_chunk(vec![upload("H1", Some("/a"), 6001)]);
    let index = associator.finish();
    assert!(index.pages_for_hash("H1").is_empty());
    assert_eq!(index.entries()[0].status, EntryStatus::Unused);
}

#[test]
fn no_hash_with_zero_pages_is_silently_dropped() {
    let audit = [preview("/a", 1000)];
    let activity = activity(&audit);

    let mut associator = Associator::new(&activity);
    associator.observe_chunk(vec![
        upload("H1", Some("/a"), 1003),
        // standalone upload, never matched to any page, no delete logged
        upload("H2", None, 8000),
    ]);
    let index = associator.finish();

    let unused: Vec<_> = index
        .entries()
        .iter()
        .filter(|e| e.hash == "H2")
        .collect();
    assert_eq!(unused.len(), 1);
    assert_eq!(unused[0].status, EntryStatus::Unused);
    assert_eq!(unused[0].page, "");
}

#[test]
fn multiple_pages_can_reference_the_same_hash() {
    let audit = [preview("/a", 1000), preview("/b", 3000)];
    let activity = activity(&audit);

    let mut associator = Associator::new(&activity);
    associator.observe_chunk(vec![
        upload("H1", Some("/a"), 1003),
        upload("H1", Some("/b"), 3004),
    ]);
    let index = associator.finish();

    assert_eq!(index.len(), 2);
    assert_eq!(index.pages_for_hash("H1"), vec!["/a.md", "/b.md"]);
}

#[test]
fn full_pass_is_idempotent_over_unchanged_logs() {
    let audit = [
        preview("/a", 1000),
        preview("/b", 3000),
        preview("/a", 50_000),
    ];
    let media = vec![
        upload("H1", Some("/a"), 1003),
        upload("H2", Some("/b"), 3002),
        upload("H1", Some("/a"), 50_010),
        upload("H3", None, 70_000),
    ];

    let run = |media: Vec<MediaEvent>| {
        let activity = activity(&audit);
        let mut associator = Associator::new(&activity);
        // Chunk boundaries must not affect the result either
        for chunk in media.chunks(2) {
            associator.observe_chunk(chunk.to_vec());
        }
        associator.finish().into_entries()
    };

    assert_eq!(run(media.clone()), run(media));
}

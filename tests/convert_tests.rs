//! Integration tests for the conversion pipeline: discovery, `.emlx` reading,
//! envelope synthesis, and the archive round trip.

use assert_fs::prelude::*;
use assert_fs::TempDir;
use chrono::{Local, TimeZone, Utc};
use predicates::prelude::*;

use emlx2mbox::config::Config;
use emlx2mbox::convert::{self, RunOutcome};
use emlx2mbox::error::ConvertError;
use emlx2mbox::export::mbox::MboxWriter;
use emlx2mbox::model::envelope::ASCTIME_FORMAT;
use emlx2mbox::parser::emlx::{read_emlx, Framing};
use emlx2mbox::parser::mbox::read_archive;
use emlx2mbox::parser::message::{synthesize_envelope, MessageParser, MAX_MESSAGE_SIZE};

const ALICE: &str = "From: Alice Example <alice@example.com>\n\
                     Date: Thu, 04 Jan 2024 10:00:00 +0000\n\
                     Subject: With prefix\n\
                     \n\
                     From the beginning, a line that needs escaping.\n\
                     >From an already quoted line.\n\
                     bye\n";

const BOB: &str = "99999\n\
                   From: Bob <bob@example.com>\n\
                   Date: Fri, 05 Jan 2024 11:30:00 +0100\n\
                   Subject: Mismatched prefix\n\
                   \n\
                   short body\n";

const CAROL: &str = "From: carol@example.com\n\
                     Subject: No date here\n\
                     \n\
                     hi\n";

fn plist_trailer() -> &'static str {
    "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<plist version=\"1.0\"><dict/></plist>\n"
}

/// Build the three-message tree plus an attachment cache that must be skipped.
fn apple_mail_tree() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let messages = tmp.child("Inbox.mbox").child("Messages");

    messages
        .child("1.emlx")
        .write_str(&format!("{}\n{}{}", ALICE.len(), ALICE, plist_trailer()))
        .unwrap();
    messages.child("2.emlx").write_str(BOB).unwrap();
    messages.child("3.emlx").write_str(CAROL).unwrap();
    tmp.child("Inbox.mbox")
        .child("Attachments.noindex")
        .child("1")
        .child("4.emlx")
        .write_str("From: hidden@example.com\n\nnot a message\n")
        .unwrap();

    tmp
}

fn envelope_date(line: &str) -> &str {
    // "From <address> <date>": the address never contains spaces.
    line.splitn(3, ' ').nth(2).unwrap()
}

// ─── End-to-end: 3 files, one attachment cache ──────────────────────

#[test]
fn test_convert_apple_mail_tree() {
    let tree = apple_mail_tree();
    let output = tree.child("out.mbox");

    let before = Local::now().timestamp();
    let report = convert::run(tree.path(), output.path(), &Config::default(), &|_, _| {}).unwrap();
    let after = Local::now().timestamp();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.discovered, 3);
    assert_eq!(report.converted, 3);
    assert_eq!(report.failed(), 0);
    // The mismatched and the undated message both fall back to the run time.
    assert_eq!(report.fallback_dates, 2);
    output.assert(predicate::path::is_file());
    tree.child("out.mbox.lock").assert(predicate::path::missing());

    let entries = read_archive(output.path()).unwrap();
    assert_eq!(entries.len(), 3);

    // 1: length-prefixed, the plist trailer is gone and escaped lines come back verbatim.
    let alice_date = Utc
        .with_ymd_and_hms(2024, 1, 4, 10, 0, 0)
        .unwrap()
        .with_timezone(&Local);
    assert_eq!(
        entries[0].envelope,
        format!("From alice@example.com {}", alice_date.format(ASCTIME_FORMAT))
    );
    assert_eq!(entries[0].message, ALICE.as_bytes());

    // 2: the count is wrong, so the whole file (count line included) is the message.
    // The stray count line ends the header block, so everything lands in the body.
    assert!(entries[1].envelope.starts_with("From MAILER-DAEMON "));
    assert!(entries[1].message.ends_with(BOB.as_bytes()));

    // 3: no Date header, stamped with the conversion time.
    assert!(entries[2].envelope.starts_with("From carol@example.com "));
    let stamped = envelope_date(&entries[2].envelope);
    let matches_run_time = (before..=after).any(|ts| {
        Local
            .timestamp_opt(ts, 0)
            .unwrap()
            .format(ASCTIME_FORMAT)
            .to_string()
            == stamped
    });
    assert!(matches_run_time, "unexpected fallback date: {stamped}");
    assert_eq!(entries[2].message, CAROL.as_bytes());
}

#[test]
fn test_mismatched_prefix_reads_whole_file() {
    let tree = apple_mail_tree();
    let path = tree.child("Inbox.mbox/Messages/2.emlx");

    let content = read_emlx(path.path(), MAX_MESSAGE_SIZE).unwrap();
    assert_eq!(content.bytes, BOB.as_bytes());
    assert!(matches!(content.framing, Framing::Truncated { declared: 99999, .. }));

    let message = MessageParser::default().parse(&content.bytes).unwrap();
    assert!(message.headers.is_empty());
}

#[test]
fn test_valid_prefix_reads_exact_bytes() {
    let tree = apple_mail_tree();
    let content = read_emlx(tree.child("Inbox.mbox/Messages/1.emlx").path(), MAX_MESSAGE_SIZE).unwrap();
    assert_eq!(content.bytes, ALICE.as_bytes());
    assert_eq!(content.framing, Framing::LengthPrefixed(ALICE.len() as u64));

    let message = MessageParser::default().parse(&content.bytes).unwrap();
    let envelope = synthesize_envelope(&message, "MAILER-DAEMON");
    assert_eq!(envelope.address, "alice@example.com");
    assert!(!envelope.date_is_fallback);
}

// ─── Fatal and empty outcomes ───────────────────────────────────────

#[test]
fn test_missing_source_leaves_output_untouched() {
    let tmp = TempDir::new().unwrap();
    let output = tmp.child("out.mbox");

    let err = convert::run(
        tmp.child("does-not-exist").path(),
        output.path(),
        &Config::default(),
        &|_, _| {},
    )
    .unwrap_err();

    assert!(matches!(err, ConvertError::SourceNotFound(_)));
    output.assert(predicate::path::missing());
}

#[test]
fn test_empty_discovery_creates_empty_archive() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.child("empty");
    source.create_dir_all().unwrap();
    source.child("Info.plist").write_str("<plist/>").unwrap();
    let output = tmp.child("out.mbox");

    let report = convert::run(source.path(), output.path(), &Config::default(), &|_, _| {}).unwrap();

    assert_eq!(report.outcome, RunOutcome::NothingFound);
    assert_eq!(report.discovered, 0);
    assert_eq!(report.converted, 0);
    assert_eq!(report.failed(), 0);
    output.assert(predicate::path::is_file());
    output.assert("");
}

#[test]
fn test_locked_archive_is_fatal() {
    let tree = apple_mail_tree();
    let output = tree.child("out.mbox");
    let _holder = MboxWriter::open(output.path(), &Config::default().archive).unwrap();

    let err = convert::run(tree.path(), output.path(), &Config::default(), &|_, _| {}).unwrap_err();
    assert!(matches!(err, ConvertError::LockUnavailable(_)));
}

// ─── Appending across runs ──────────────────────────────────────────

#[test]
fn test_second_run_appends() {
    let tree = apple_mail_tree();
    let output = tree.child("out.mbox");
    let config = Config::default();

    convert::run(tree.path(), output.path(), &config, &|_, _| {}).unwrap();
    let report = convert::run(tree.path(), output.path(), &config, &|_, _| {}).unwrap();
    assert_eq!(report.converted, 3);

    let entries = read_archive(output.path()).unwrap();
    assert_eq!(entries.len(), 6);
    assert_eq!(entries[3].message, entries[0].message);
}

#[test]
fn test_progress_reports_every_file() {
    let tree = apple_mail_tree();
    let output = tree.child("out.mbox");
    let calls = std::cell::RefCell::new(Vec::new());

    convert::run(tree.path(), output.path(), &Config::default(), &|current, total| {
        calls.borrow_mut().push((current, total));
    })
    .unwrap();

    assert_eq!(calls.into_inner(), vec![(0, 3), (1, 3), (2, 3), (3, 3)]);
}

#[test]
fn test_custom_sentinel_address() {
    let tmp = TempDir::new().unwrap();
    tmp.child("a.emlx")
        .write_str("Subject: anonymous\n\nbody\n")
        .unwrap();
    let output = tmp.child("out.mbox");

    let mut config = Config::default();
    config.archive.sentinel_address = "unknown@localhost".to_string();
    convert::run(tmp.path(), output.path(), &config, &|_, _| {}).unwrap();

    let entries = read_archive(output.path()).unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].envelope.starts_with("From unknown@localhost "));
}

#[test]
fn test_crlf_messages_are_normalized() {
    let tmp = TempDir::new().unwrap();
    tmp.child("crlf.emlx")
        .write_str("From: a@b.com\r\nSubject: crlf\r\n\r\nFrom here\r\nend\r\n")
        .unwrap();
    let output = tmp.child("out.mbox");

    convert::run(tmp.path(), output.path(), &Config::default(), &|_, _| {}).unwrap();

    output.assert(predicate::str::contains("\n>From here\nend\n"));
    output.assert(predicate::str::contains("\r").not());

    let entries = read_archive(output.path()).unwrap();
    assert_eq!(
        entries[0].message,
        b"From: a@b.com\nSubject: crlf\n\nFrom here\nend\n".to_vec()
    );
}

#[test]
fn test_stale_lock_from_interrupted_run_is_recovered() {
    let tree = apple_mail_tree();
    let output = tree.child("out.mbox");
    // Left behind by a run that was killed: the recorded pid no longer exists.
    tree.child("out.mbox.lock").write_str("99999999\n").unwrap();

    let report = convert::run(tree.path(), output.path(), &Config::default(), &|_, _| {}).unwrap();

    assert_eq!(report.converted, 3);
    tree.child("out.mbox.lock").assert(predicate::path::missing());
    assert_eq!(read_archive(output.path()).unwrap().len(), 3);
}

#[test]
fn test_oversized_message_is_skipped() {
    let tmp = TempDir::new().unwrap();
    tmp.child("1.emlx")
        .write_str("From: small@example.com\n\nok\n")
        .unwrap();
    tmp.child("2.emlx")
        .write_str(&format!("From: big@example.com\n\n{}\n", "x".repeat(4096)))
        .unwrap();
    let output = tmp.child("out.mbox");

    let mut config = Config::default();
    config.performance.max_message_size = 1024;
    let report = convert::run(tmp.path(), output.path(), &config, &|_, _| {}).unwrap();

    assert_eq!(report.converted, 1);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.failures[0].index, 2);
    assert!(matches!(report.failures[0].error, ConvertError::Parse { .. }));
    output.assert(predicate::str::contains("big@example.com").not());
}

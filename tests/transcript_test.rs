//! Transcript store: append-only records, ordered read-back, listings.

use chrono::Utc;
use kiln::history::{Sender, TranscriptRecord, TranscriptStore};

fn record(chat_id: &str, sender: Sender, text: &str) -> TranscriptRecord {
    TranscriptRecord {
        chat_id: chat_id.to_string(),
        sender,
        text: text.to_string(),
        model: "gpt2".to_string(),
        device: "cpu".to_string(),
        timestamp: Utc::now(),
        tokens: None,
        time_s: None,
        tps: None,
    }
}

#[test]
fn records_come_back_in_append_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = TranscriptStore::new(dir.path().join("history"));

    store.append(&record("c1", Sender::User, "first")).unwrap();
    let mut reply = record("c1", Sender::Assistant, "second");
    reply.tokens = Some(12);
    reply.time_s = Some(0.8);
    reply.tps = Some(15.0);
    store.append(&reply).unwrap();
    store.append(&record("c1", Sender::User, "third")).unwrap();

    let history = store.history("c1").unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].text, "first");
    assert_eq!(history[1].text, "second");
    assert_eq!(history[1].tokens, Some(12));
    assert_eq!(history[2].text, "third");
}

#[test]
fn unknown_chat_has_empty_history() {
    let dir = tempfile::tempdir().unwrap();
    let store = TranscriptStore::new(dir.path().join("history"));
    assert!(store.history("nope").unwrap().is_empty());
}

#[test]
fn conversations_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let store = TranscriptStore::new(dir.path().join("history"));

    store.append(&record("a", Sender::User, "for a")).unwrap();
    store.append(&record("b", Sender::User, "for b")).unwrap();

    assert_eq!(store.history("a").unwrap().len(), 1);
    assert_eq!(store.history("b").unwrap().len(), 1);
    assert_eq!(store.history("a").unwrap()[0].text, "for a");
}

#[test]
fn chat_titles_use_first_user_line_truncated() {
    let dir = tempfile::tempdir().unwrap();
    let store = TranscriptStore::new(dir.path().join("history"));

    let long = "tell me everything about the residency of language models";
    store.append(&record("c1", Sender::User, long)).unwrap();
    store.append(&record("c1", Sender::Assistant, "a lot")).unwrap();

    let chats = store.list_chats().unwrap();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].chat_id, "c1");
    assert_eq!(chats[0].title.chars().count(), 33);
    assert!(chats[0].title.ends_with("..."));
    assert!(long.starts_with(chats[0].title.trim_end_matches("...")));
}

#[test]
fn listing_without_store_dir_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = TranscriptStore::new(dir.path().join("never-created"));
    assert!(store.list_chats().unwrap().is_empty());
}

#[test]
fn clear_all_removes_every_conversation() {
    let dir = tempfile::tempdir().unwrap();
    let store = TranscriptStore::new(dir.path().join("history"));

    store.append(&record("a", Sender::User, "x")).unwrap();
    store.append(&record("b", Sender::User, "y")).unwrap();

    assert_eq!(store.clear_all().unwrap(), 2);
    assert!(store.list_chats().unwrap().is_empty());
    assert!(store.history("a").unwrap().is_empty());
}

#[test]
fn clear_all_on_missing_dir_is_zero() {
    let dir = tempfile::tempdir().unwrap();
    let store = TranscriptStore::new(dir.path().join("never-created"));
    assert_eq!(store.clear_all().unwrap(), 0);
}

use super::*;

async fn keypad(storage: &Storage, id: &str) -> KeypadId {
    let keypad_id = KeypadId::new(id);
    storage
        .create_keypad(&keypad_id, None, None)
        .await
        .expect("keypad");
    keypad_id
}

fn yes_vote<'a>(poll: PollRef, keypad_id: &'a KeypadId, value: VoteValue) -> VoteUpsert<'a> {
    VoteUpsert {
        poll,
        keypad_id,
        value,
        candidate_id: None,
        serial_number: Some("SN-1"),
    }
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("votes.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn touch_marks_keypad_in_range_and_ignores_unknown_keypads() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let known = keypad(&storage, "A1").await;

    let touched = storage
        .touch_keypad(&known, 87)
        .await
        .expect("touch")
        .expect("known keypad");
    assert!(touched.in_range);
    assert_eq!(touched.battery_level, 87);

    let unknown = storage
        .touch_keypad(&KeypadId::new("Z9"), 50)
        .await
        .expect("touch");
    assert!(unknown.is_none());
    assert_eq!(storage.list_keypads().await.expect("keypads").len(), 1);
}

#[tokio::test]
async fn reset_keypads_clears_presence_for_every_keypad() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let first = keypad(&storage, "A1").await;
    let second = keypad(&storage, "A2").await;
    storage.touch_keypad(&first, 90).await.expect("touch");
    storage.touch_keypad(&second, 40).await.expect("touch");

    assert_eq!(storage.reset_keypads().await.expect("reset"), 2);
    for keypad in storage.list_keypads().await.expect("keypads") {
        assert!(!keypad.in_range);
        assert_eq!(keypad.battery_level, UNKNOWN_BATTERY_LEVEL);
    }
}

#[tokio::test]
async fn upsert_overwrites_the_vote_of_the_same_keypad() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let poll = PollRef::Motion(storage.create_motion_poll("budget").await.expect("poll"));
    let a1 = keypad(&storage, "A1").await;

    let first = storage
        .upsert_vote(yes_vote(poll, &a1, VoteValue::Yes))
        .await
        .expect("first vote");
    let second = storage
        .upsert_vote(yes_vote(poll, &a1, VoteValue::Abstain))
        .await
        .expect("second vote");

    assert_eq!(first.record_id, second.record_id);
    let votes = storage.list_votes(poll).await.expect("votes");
    assert_eq!(votes.len(), 1);
    assert_eq!(votes[0].value, VoteValue::Abstain);
    assert_eq!(votes[0].serial_number.as_deref(), Some("SN-1"));
}

#[tokio::test]
async fn votes_are_scoped_per_poll_kind_and_id() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let motion = PollRef::Motion(MotionPollId(1));
    let election = PollRef::Election(ElectionPollId(1));
    let a1 = keypad(&storage, "A1").await;

    storage
        .upsert_vote(yes_vote(motion, &a1, VoteValue::Yes))
        .await
        .expect("motion vote");
    storage
        .upsert_vote(yes_vote(election, &a1, VoteValue::No))
        .await
        .expect("election vote");

    assert_eq!(storage.delete_votes(motion).await.expect("delete"), 1);
    assert!(storage.list_votes(motion).await.expect("votes").is_empty());
    assert_eq!(storage.list_votes(election).await.expect("votes").len(), 1);
}

#[tokio::test]
async fn anonymize_keeps_values_and_frees_the_keypad_slot() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let poll = PollRef::Motion(storage.create_motion_poll("budget").await.expect("poll"));
    let a1 = keypad(&storage, "A1").await;
    let a2 = keypad(&storage, "A2").await;
    storage
        .upsert_vote(yes_vote(poll, &a1, VoteValue::Yes))
        .await
        .expect("vote");
    storage
        .upsert_vote(yes_vote(poll, &a2, VoteValue::No))
        .await
        .expect("vote");

    assert_eq!(storage.anonymize_votes(poll).await.expect("anonymize"), 2);
    assert_eq!(storage.anonymize_votes(poll).await.expect("anonymize"), 2);

    let votes = storage.list_votes(poll).await.expect("votes");
    assert_eq!(votes.len(), 2);
    assert!(votes.iter().all(|vote| vote.keypad_id.is_none()));
    assert_eq!(votes[0].value, VoteValue::Yes);
    assert_eq!(votes[1].value, VoteValue::No);
}

#[tokio::test]
async fn deleting_a_keypad_keeps_its_vote_history() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let poll = PollRef::Motion(storage.create_motion_poll("budget").await.expect("poll"));
    let a1 = keypad(&storage, "A1").await;
    storage
        .upsert_vote(yes_vote(poll, &a1, VoteValue::Yes))
        .await
        .expect("vote");

    assert!(storage.delete_keypad(&a1).await.expect("delete"));
    assert!(storage.load_keypad(&a1).await.expect("load").is_none());

    let votes = storage.list_votes(poll).await.expect("votes");
    assert_eq!(votes.len(), 1);
    assert_eq!(votes[0].keypad_id, None);
}

#[tokio::test]
async fn candidates_are_listed_in_creation_order() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let poll = storage
        .create_election_poll("board", ElectionMethod::Votes)
        .await
        .expect("poll");
    let first = storage.add_candidate(poll, None, "Ada").await.expect("c1");
    let second = storage.add_candidate(poll, None, "Grace").await.expect("c2");

    let candidates = storage.list_candidates(poll).await.expect("candidates");
    let ids: Vec<_> = candidates.iter().map(|c| c.candidate_id).collect();
    assert_eq!(ids, vec![first, second]);

    let loaded = storage
        .load_election_poll(poll)
        .await
        .expect("load")
        .expect("poll exists");
    assert_eq!(loaded.method, ElectionMethod::Votes);
}

#[tokio::test]
async fn waiting_speaker_is_added_once_and_removed_only_while_waiting() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let item = storage.create_agenda_item("Budget").await.expect("item");
    let user = storage.create_user("ada", "Ada Lovelace").await.expect("user");

    assert!(storage
        .add_waiting_speaker(item, user)
        .await
        .expect("add")
        .is_some());
    assert!(storage
        .add_waiting_speaker(item, user)
        .await
        .expect("add again")
        .is_none());
    assert_eq!(storage.list_speakers(item).await.expect("list").len(), 1);

    sqlx::query("UPDATE speakers SET begin_time = ? WHERE item_id = ?")
        .bind(Utc::now())
        .bind(item.0)
        .execute(storage.pool())
        .await
        .expect("begin speech");

    assert!(!storage
        .remove_waiting_speaker(item, user)
        .await
        .expect("remove"));
    assert_eq!(storage.list_speakers(item).await.expect("list").len(), 1);
}

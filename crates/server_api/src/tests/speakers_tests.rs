use super::*;
use crate::test_support::Fixture;
use device_gateway::testing::Script;

#[tokio::test]
async fn yes_enqueues_once_and_no_withdraws() {
    let fx = Fixture::new(Script::default()).await;
    let item_id = fx.agenda_item("Budget debate").await;
    let alice = fx.user("alice").await;
    let bob = fx.user("bob").await;

    let first = handle_speaker_request(fx.storage(), item_id, Some(alice), "Y").await;
    assert_eq!(first.expect("add"), SpeakerChange::Added);
    let again = handle_speaker_request(fx.storage(), item_id, Some(alice), "Y").await;
    assert_eq!(again.expect("add again"), SpeakerChange::AlreadyWaiting);
    handle_speaker_request(fx.storage(), item_id, Some(bob), "Y")
        .await
        .expect("bob");

    let speakers = fx.storage().list_speakers(item_id).await.expect("speakers");
    let queue: Vec<_> = speakers.iter().map(|s| (s.user_id, s.weight)).collect();
    assert_eq!(queue, vec![(alice, 1), (bob, 2)]);

    let removed = handle_speaker_request(fx.storage(), item_id, Some(alice), "N").await;
    assert_eq!(removed.expect("remove"), SpeakerChange::Removed);
    let missing = handle_speaker_request(fx.storage(), item_id, Some(alice), "N").await;
    assert_eq!(missing.expect("remove again"), SpeakerChange::NotWaiting);
}

#[tokio::test]
async fn keypads_without_owner_are_refused() {
    let fx = Fixture::new(Script::default()).await;
    let item_id = fx.agenda_item("Budget debate").await;

    let err = handle_speaker_request(fx.storage(), item_id, None, "Y")
        .await
        .expect_err("anonymous");
    assert!(matches!(err, VotingError::AnonymousNotAllowed));
}

#[tokio::test]
async fn unknown_item_and_unsupported_button_are_refused() {
    let fx = Fixture::new(Script::default()).await;
    let alice = fx.user("alice").await;
    let item_id = fx.agenda_item("Budget debate").await;

    let err = handle_speaker_request(fx.storage(), AgendaItemId(999), Some(alice), "Y")
        .await
        .expect_err("unknown item");
    assert!(matches!(err, VotingError::UnknownTarget(_)));

    let err = handle_speaker_request(fx.storage(), item_id, Some(alice), "A")
        .await
        .expect_err("abstain button");
    assert!(matches!(err, VotingError::InvalidRequest(_)));
    assert!(fx
        .storage()
        .list_speakers(item_id)
        .await
        .expect("speakers")
        .is_empty());
}

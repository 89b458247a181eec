//! Invitation and membership flows driven through the event router.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use call_controller::invitation::{ResponseStatus, StatusAction};
use call_controller::signaling::{ClientEvent, PresenceStatus, ServerEvent};
use call_controller::store::{MeetingStatus, SessionStore};
use call_test_utils::*;
use common::types::MeetingId;
use std::time::Duration;

async fn meeting_status(harness: &TestHarness, meeting_id: &MeetingId) -> MeetingStatus {
    harness
        .store
        .get_meeting_by_id(meeting_id)
        .await
        .unwrap()
        .unwrap()
        .status
}

/// Wait for the meeting actor to finish a transition it started after the
/// last event a client observed.
async fn wait_for_status(harness: &TestHarness, meeting_id: &MeetingId, expected: MeetingStatus) {
    for _ in 0..100 {
        if meeting_status(harness, meeting_id).await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("meeting {meeting_id} never reached {expected:?}");
}

fn status_update(
    meeting_id: &MeetingId,
    identity: &str,
    status: ResponseStatus,
    action: StatusAction,
) -> ServerEvent {
    ServerEvent::ParticipantStatusUpdate {
        meeting_id: meeting_id.clone(),
        identity: user(identity),
        status,
        action,
    }
}

#[tokio::test]
async fn test_accept_and_decline_resolve_invitation() {
    let h = TestHarness::builder().build().await;
    let meeting = h.create_meeting(HOST, &[ALICE, BOB]).await;
    let mut host = h.connect(HOST).await;
    let mut alice = h.connect(ALICE).await;
    let mut bob = h.connect(BOB).await;

    host.send(&h.router, join(&meeting, HOST)).await;
    assert_eq!(
        host.next_event().await,
        ServerEvent::CallJoined {
            meeting_id: meeting.clone(),
            participants: users(&[HOST]),
        }
    );

    // Empty participant list rings the stored invite list
    host.send(&h.router, initiate(&meeting, HOST, &[])).await;
    for client in [&mut alice, &mut bob] {
        assert_eq!(
            client.next_event().await,
            ServerEvent::CallInvite {
                meeting_id: meeting.clone(),
                host_id: user(HOST),
                title: None,
            }
        );
    }

    alice.send(&h.router, accept(&meeting, ALICE)).await;
    assert_eq!(
        alice.next_event().await,
        ServerEvent::CallJoined {
            meeting_id: meeting.clone(),
            participants: users(&[ALICE, HOST]),
        }
    );
    assert_eq!(
        host.drain(),
        vec![
            status_update(&meeting, ALICE, ResponseStatus::Answered, StatusAction::Accept),
            ServerEvent::CallAccepted {
                meeting_id: meeting.clone(),
                identity: user(ALICE),
            },
            ServerEvent::ParticipantJoined {
                meeting_id: meeting.clone(),
                identity: user(ALICE),
            },
        ]
    );

    bob.send(&h.router, decline(&meeting, BOB)).await;
    assert!(bob.assert_no_errors().is_empty());
    assert_eq!(
        host.drain(),
        vec![
            status_update(&meeting, BOB, ResponseStatus::Declined, StatusAction::Decline),
            ServerEvent::CallDeclined {
                meeting_id: meeting.clone(),
                identity: user(BOB),
            },
        ]
    );

    let state = h
        .controller
        .meeting(&meeting)
        .await
        .unwrap()
        .get_state()
        .await
        .unwrap();
    assert!(state.invitation.is_none(), "every invitee responded");
    assert_eq!(state.room.unwrap().participants.len(), 2);
    assert_eq!(meeting_status(&h, &meeting).await, MeetingStatus::Active);
    assert_eq!(h.services.metrics.invitations_finished(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_without_answer_ends_meeting() {
    let h = TestHarness::builder().build().await;
    let meeting = h.create_meeting(HOST, &[ALICE, BOB]).await;
    let mut host = h.connect(HOST).await;
    let mut alice = h.connect(ALICE).await;
    let mut bob = h.connect(BOB).await;

    host.send(&h.router, initiate(&meeting, HOST, &[ALICE, BOB])).await;
    assert_eq!(alice.drain_names(), vec!["call:invite"]);
    assert_eq!(bob.drain_names(), vec!["call:invite"]);

    tokio::time::advance(TEST_WINDOW + Duration::from_secs(1)).await;

    assert_eq!(
        host.next_event().await,
        status_update(&meeting, ALICE, ResponseStatus::TimedOut, StatusAction::Timeout)
    );
    assert_eq!(
        host.next_event().await,
        status_update(&meeting, BOB, ResponseStatus::TimedOut, StatusAction::Timeout)
    );
    assert_eq!(
        host.next_event().await,
        ServerEvent::CallTimeout {
            meeting_id: meeting.clone(),
            participants: users(&[ALICE, BOB]),
        }
    );
    assert_eq!(
        alice.next_event().await,
        ServerEvent::CallTimeout {
            meeting_id: meeting.clone(),
            participants: users(&[ALICE]),
        }
    );

    wait_for_status(&h, &meeting, MeetingStatus::Completed).await;
    assert_eq!(
        h.services
            .metrics
            .invitations_timed_out
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_timeout_ends_call_even_after_an_answer() {
    let h = TestHarness::builder().build().await;
    let meeting = h.create_meeting(HOST, &[ALICE, BOB]).await;
    let mut host = h.connect(HOST).await;
    let mut alice = h.connect(ALICE).await;
    let mut bob = h.connect(BOB).await;

    host.send(&h.router, initiate(&meeting, HOST, &[ALICE, BOB])).await;
    alice.send(&h.router, accept(&meeting, ALICE)).await;
    alice.drain();
    host.drain();
    assert_eq!(bob.drain_names(), vec!["call:invite"]);

    tokio::time::advance(TEST_WINDOW + Duration::from_secs(1)).await;

    assert_eq!(
        host.next_event().await,
        status_update(&meeting, BOB, ResponseStatus::TimedOut, StatusAction::Timeout)
    );
    assert_eq!(
        host.next_event().await,
        ServerEvent::CallTimeout {
            meeting_id: meeting.clone(),
            participants: users(&[BOB]),
        }
    );
    assert_eq!(bob.next_event().await.name(), "call:timeout");

    // The answered invitee was in the room and is told the call is over
    assert_eq!(
        alice.next_event().await,
        ServerEvent::CallEnded {
            meeting_id: meeting.clone(),
        }
    );
    wait_for_status(&h, &meeting, MeetingStatus::Completed).await;

    alice.send(&h.router, join(&meeting, ALICE)).await;
    assert!(matches!(
        alice.next_event().await,
        ServerEvent::Error { ref code, .. } if code == "CONFLICT"
    ));
}

#[tokio::test]
async fn test_late_accept_after_resolution_still_joins() {
    let h = TestHarness::builder().build().await;
    let meeting = h.create_meeting(HOST, &[ALICE]).await;
    let mut host = h.connect(HOST).await;
    let mut alice = h.connect(ALICE).await;

    host.send(&h.router, initiate(&meeting, HOST, &[ALICE])).await;
    alice.send(&h.router, decline(&meeting, ALICE)).await;
    host.drain();
    alice.drain();

    // Changing their mind after declining
    alice.send(&h.router, accept(&meeting, ALICE)).await;
    assert_eq!(
        alice.next_event().await,
        ServerEvent::CallJoined {
            meeting_id: meeting.clone(),
            participants: users(&[ALICE]),
        }
    );
    assert_eq!(host.drain_names(), vec!["call:accepted"]);
}

#[tokio::test]
async fn test_cancel_notifies_ringing_and_ends_meeting() {
    let h = TestHarness::builder().build().await;
    let meeting = h.create_meeting(HOST, &[ALICE, BOB]).await;
    let mut host = h.connect(HOST).await;
    let mut alice = h.connect(ALICE).await;
    let mut bob = h.connect(BOB).await;

    host.send(&h.router, initiate(&meeting, HOST, &[ALICE, BOB])).await;
    alice.send(&h.router, accept(&meeting, ALICE)).await;
    alice.drain();
    bob.drain();

    host.send(
        &h.router,
        ClientEvent::CallCancel {
            meeting_id: meeting.clone(),
            host_id: user(HOST),
        },
    )
    .await;
    host.assert_no_errors();

    assert_eq!(
        bob.drain(),
        vec![ServerEvent::CallCancelled {
            meeting_id: meeting.clone()
        }]
    );
    assert_eq!(
        alice.drain(),
        vec![ServerEvent::CallEnded {
            meeting_id: meeting.clone()
        }]
    );
    assert_eq!(meeting_status(&h, &meeting).await, MeetingStatus::Completed);

    let record = h.store.get_meeting_by_id(&meeting).await.unwrap().unwrap();
    assert!(record.present_participants().is_empty());
    assert!(record.end_time.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_invitation_never_times_out() {
    let h = TestHarness::builder().build().await;
    let meeting = h.create_meeting(HOST, &[ALICE]).await;
    let mut host = h.connect(HOST).await;
    let mut alice = h.connect(ALICE).await;

    host.send(&h.router, initiate(&meeting, HOST, &[ALICE])).await;
    tokio::time::advance(Duration::from_secs(2)).await;
    host.send(
        &h.router,
        ClientEvent::CallCancel {
            meeting_id: meeting.clone(),
            host_id: user(HOST),
        },
    )
    .await;
    assert_eq!(alice.drain_names(), vec!["call:invite", "call:cancelled"]);

    tokio::time::advance(TEST_WINDOW * 2).await;
    tokio::task::yield_now().await;

    assert!(alice.drain().is_empty());
    assert!(host.drain().is_empty(), "no call:timeout after cancel");
    let metrics = &h.services.metrics;
    assert_eq!(
        metrics
            .invitations_timed_out
            .load(std::sync::atomic::Ordering::Relaxed),
        0
    );
    assert_eq!(
        metrics
            .invitations_cancelled
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );
}

#[tokio::test]
async fn test_only_host_can_cancel_or_end() {
    let h = TestHarness::builder().build().await;
    let meeting = h.create_meeting(HOST, &[ALICE]).await;
    let mut alice = h.connect(ALICE).await;

    for event in [
        ClientEvent::CallCancel {
            meeting_id: meeting.clone(),
            host_id: user(ALICE),
        },
        ClientEvent::CallEnd {
            meeting_id: meeting.clone(),
            host_id: user(ALICE),
        },
    ] {
        alice.send(&h.router, event).await;
        assert!(matches!(
            alice.next_event().await,
            ServerEvent::Error { ref code, .. } if code == "FORBIDDEN"
        ));
    }
    assert_eq!(meeting_status(&h, &meeting).await, MeetingStatus::Active);
}

#[tokio::test]
async fn test_initiate_errors() {
    let h = TestHarness::builder().build().await;
    let meeting = h.create_meeting(HOST, &[ALICE]).await;
    let mut host = h.connect(HOST).await;

    host.send(&h.router, initiate(&MeetingId::from("missing"), HOST, &[ALICE]))
        .await;
    assert!(matches!(
        host.next_event().await,
        ServerEvent::Error { ref code, .. } if code == "NOT_FOUND"
    ));

    // Only the host in the list leaves nobody to ring
    host.send(&h.router, initiate(&meeting, HOST, &[HOST])).await;
    assert!(matches!(
        host.next_event().await,
        ServerEvent::Error { ref code, .. } if code == "INVALID_REQUEST"
    ));

    host.send(&h.router, initiate(&meeting, HOST, &[ALICE])).await;
    host.send(&h.router, initiate(&meeting, HOST, &[ALICE])).await;
    assert!(matches!(
        host.next_event().await,
        ServerEvent::Error { ref code, .. } if code == "CONFLICT"
    ));
}

#[tokio::test]
async fn test_end_meeting_rejects_later_joins() {
    let h = TestHarness::builder().build().await;
    let meeting = h.create_meeting(HOST, &[ALICE]).await;
    let mut host = h.connect(HOST).await;
    let mut alice = h.connect(ALICE).await;

    host.send(&h.router, join(&meeting, HOST)).await;
    alice.send(&h.router, join(&meeting, ALICE)).await;
    host.drain();
    alice.drain();

    let end = ClientEvent::CallEnd {
        meeting_id: meeting.clone(),
        host_id: user(HOST),
    };
    host.send(&h.router, end.clone()).await;
    assert_eq!(host.drain_names(), vec!["call:ended"]);
    assert_eq!(alice.drain_names(), vec!["call:ended"]);

    alice.send(&h.router, join(&meeting, ALICE)).await;
    assert!(matches!(
        alice.next_event().await,
        ServerEvent::Error { ref code, .. } if code == "CONFLICT"
    ));

    // Ending again is a no-op
    host.send(&h.router, end).await;
    assert!(host.assert_no_errors().is_empty());
    assert_eq!(
        h.services
            .metrics
            .meetings_ended
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );
}

#[tokio::test]
async fn test_events_after_end_spawn_no_actors() {
    let h = TestHarness::builder().build().await;
    let meeting = h.create_meeting(HOST, &[ALICE]).await;
    let mut host = h.connect(HOST).await;
    let mut alice = h.connect(ALICE).await;

    host.send(&h.router, join(&meeting, HOST)).await;
    host.send(
        &h.router,
        ClientEvent::CallEnd {
            meeting_id: meeting.clone(),
            host_id: user(HOST),
        },
    )
    .await;
    host.drain();

    for _ in 0..3 {
        alice.send(&h.router, join(&meeting, ALICE)).await;
        assert!(matches!(
            alice.next_event().await,
            ServerEvent::Error { ref code, .. } if code == "CONFLICT"
        ));
    }

    for _ in 0..100 {
        if h.services.metrics.meeting_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.services.metrics.meeting_count(), 0);
    assert_eq!(h.controller.get_status().await.unwrap().meeting_count, 0);
}

#[tokio::test]
async fn test_rejoin_announces_return_to_room() {
    let h = TestHarness::builder().build().await;
    let meeting = h.create_meeting(HOST, &[ALICE]).await;
    let mut host = h.connect(HOST).await;
    let mut alice = h.connect(ALICE).await;

    host.send(&h.router, join(&meeting, HOST)).await;
    alice.send(&h.router, join(&meeting, ALICE)).await;
    host.drain();
    alice.drain();

    alice
        .send(
            &h.router,
            ClientEvent::CallRejoin {
                meeting_id: meeting.clone(),
                identity: user(ALICE),
            },
        )
        .await;

    assert_eq!(
        alice.next_event().await,
        ServerEvent::CallJoined {
            meeting_id: meeting.clone(),
            participants: users(&[ALICE, HOST]),
        }
    );
    assert_eq!(
        host.drain(),
        vec![ServerEvent::ParticipantRejoined {
            meeting_id: meeting.clone(),
            identity: user(ALICE),
        }]
    );
}

#[tokio::test]
async fn test_user_status_follows_connections() {
    let h = TestHarness::builder().build().await;
    let mut host = h.connect(HOST).await;
    let alice = h.connect(ALICE).await;

    alice.disconnect(&h.router).await;

    assert_eq!(
        host.drain_presence(),
        vec![
            ServerEvent::UserStatus {
                identity: user(ALICE),
                status: PresenceStatus::Online,
            },
            ServerEvent::UserStatus {
                identity: user(ALICE),
                status: PresenceStatus::Offline,
            },
        ]
    );
    assert!(host.drain().is_empty());
}

#[tokio::test]
async fn test_leave_notifies_remaining_members_once() {
    let h = TestHarness::builder().build().await;
    let meeting = h.create_meeting(HOST, &[ALICE]).await;
    let mut host = h.connect(HOST).await;
    let mut alice = h.connect(ALICE).await;

    host.send(&h.router, join(&meeting, HOST)).await;
    alice.send(&h.router, join(&meeting, ALICE)).await;
    host.drain();

    let leave = ClientEvent::CallLeave {
        meeting_id: meeting.clone(),
        identity: user(ALICE),
    };
    alice.send(&h.router, leave.clone()).await;
    alice.send(&h.router, leave).await;
    alice.assert_no_errors();

    assert_eq!(
        host.drain(),
        vec![ServerEvent::ParticipantLeft {
            meeting_id: meeting.clone(),
            identity: user(ALICE),
        }]
    );
}

#[tokio::test]
async fn test_disconnect_leaves_every_room() {
    let h = TestHarness::builder().build().await;
    let first = h.create_meeting(HOST, &[ALICE]).await;
    let second = h.create_meeting(BOB, &[ALICE]).await;
    let mut host = h.connect(HOST).await;
    let mut bob = h.connect(BOB).await;
    let mut alice = h.connect(ALICE).await;

    host.send(&h.router, join(&first, HOST)).await;
    bob.send(&h.router, join(&second, BOB)).await;
    alice.send(&h.router, join(&first, ALICE)).await;
    alice.send(&h.router, join(&second, ALICE)).await;
    host.drain();
    bob.drain();

    alice.disconnect(&h.router).await;

    assert_eq!(
        host.next_event().await,
        ServerEvent::ParticipantLeft {
            meeting_id: first.clone(),
            identity: user(ALICE),
        }
    );
    assert_eq!(
        bob.next_event().await,
        ServerEvent::ParticipantLeft {
            meeting_id: second.clone(),
            identity: user(ALICE),
        }
    );
    assert!(!h.presence.is_online(&user(ALICE)).await);

    for meeting in [&first, &second] {
        let record = h.store.get_meeting_by_id(meeting).await.unwrap().unwrap();
        assert!(!record.present_participants().contains(&&user(ALICE)));
    }
}

use super::*;
use shared::domain::UserId;

fn author() -> MessageAuthor {
    MessageAuthor {
        id: UserId(1),
        display_name: "Nova".to_string(),
        avatar_url: None,
    }
}

fn message(id: i64, content: &str) -> MessagePayload {
    MessagePayload {
        id: MessageId(id),
        content: content.to_string(),
        created_at: Utc::now(),
        is_edited: false,
        user: author(),
    }
}

fn seeded(ids: &[i64]) -> ChatState {
    ids.iter().fold(ChatState::new(), |state, id| {
        reduce(
            state,
            ChatAction::Remote(MessageEvent::Posted(message(*id, &format!("msg {id}")))),
        )
    })
}

#[test]
fn confirmed_send_then_broadcast_keeps_one_copy() {
    let mut state = ChatState::new();
    let pending = PendingMessage::new("gg well played", author());
    let nonce = pending.nonce;

    assert_eq!(state.apply(ChatAction::QueuePending(pending)), Applied::Inserted);
    assert_eq!(
        state.apply(ChatAction::ConfirmSend {
            nonce,
            message: message(42, "gg well played"),
        }),
        Applied::Confirmed
    );
    assert_eq!(
        state.apply(ChatAction::Remote(MessageEvent::Posted(message(42, "gg well played")))),
        Applied::Ignored
    );

    assert_eq!(state.occurrences(MessageId(42)), 1);
    assert_eq!(state.len(), 1);
    assert_eq!(state.pending().count(), 0);
}

#[test]
fn broadcast_before_send_response_keeps_one_copy() {
    let mut state = ChatState::new();
    let pending = PendingMessage::new("gg well played", author());
    let nonce = pending.nonce;

    state.apply(ChatAction::QueuePending(pending));
    assert_eq!(
        state.apply(ChatAction::Remote(MessageEvent::Posted(message(42, "gg well played")))),
        Applied::Inserted
    );
    assert_eq!(state.occurrences(MessageId(42)), 1);

    assert_eq!(
        state.apply(ChatAction::ConfirmSend {
            nonce,
            message: message(42, "gg well played"),
        }),
        Applied::Deduplicated
    );
    assert_eq!(state.occurrences(MessageId(42)), 1);
    assert_eq!(state.len(), 1);
    assert!(state.pending().next().is_none());
}

#[test]
fn every_interleaving_of_local_and_remote_inserts_yields_one_entry() {
    let orders: [&[u8]; 4] = [b"lr", b"rl", b"llr", b"rlr"];
    for order in orders {
        let mut state = ChatState::new();
        let pending = PendingMessage::new("same", author());
        let nonce = pending.nonce;
        state.apply(ChatAction::QueuePending(pending));
        for step in order {
            let action = match step {
                b'l' => ChatAction::ConfirmSend {
                    nonce,
                    message: message(7, "same"),
                },
                _ => ChatAction::Remote(MessageEvent::Posted(message(7, "same"))),
            };
            state.apply(action);
        }
        assert_eq!(state.occurrences(MessageId(7)), 1, "order {:?}", order);
        assert_eq!(state.pending().count(), 0, "order {:?}", order);
    }
}

#[test]
fn deleting_an_absent_message_changes_nothing() {
    let mut state = seeded(&[1, 2, 3]);
    let before = state.clone();

    let applied = state.apply(ChatAction::Remote(MessageEvent::Deleted {
        message_id: MessageId(99),
    }));

    assert_eq!(applied, Applied::Ignored);
    assert_eq!(state, before);
}

#[test]
fn edit_keeps_position_and_marks_edited() {
    let mut state = seeded(&[1, 2, 3, 4]);
    let position = state.position_of(MessageId(3)).expect("present");

    let applied = state.apply(ChatAction::Remote(MessageEvent::Edited(message(
        3,
        "actually it was a draw",
    ))));

    assert_eq!(applied, Applied::Updated);
    assert_eq!(state.len(), 4);
    assert_eq!(state.position_of(MessageId(3)), Some(position));
    let edited = state.message(MessageId(3)).expect("still present");
    assert_eq!(edited.content, "actually it was a draw");
    assert!(edited.is_edited);
}

#[test]
fn edit_of_unknown_message_is_ignored() {
    let mut state = seeded(&[1]);
    assert_eq!(
        state.apply(ChatAction::Remote(MessageEvent::Edited(message(5, "x")))),
        Applied::Ignored
    );
    assert_eq!(state.len(), 1);
}

#[test]
fn deleted_ids_stay_deleted() {
    let mut state = seeded(&[1, 2]);
    assert_eq!(
        state.apply(ChatAction::Remote(MessageEvent::Deleted {
            message_id: MessageId(2),
        })),
        Applied::Removed
    );
    assert!(state.was_deleted(MessageId(2)));

    assert_eq!(
        state.apply(ChatAction::Remote(MessageEvent::Posted(message(2, "msg 2")))),
        Applied::Ignored
    );
    assert_eq!(
        state.apply(ChatAction::Remote(MessageEvent::Edited(message(2, "late edit")))),
        Applied::Ignored
    );
    assert_eq!(state.position_of(MessageId(2)), None);
    assert_eq!(state.len(), 1);
}

#[test]
fn late_send_confirmation_for_deleted_message_drops_pending() {
    let mut state = ChatState::new();
    let pending = PendingMessage::new("oops", author());
    let nonce = pending.nonce;
    state.apply(ChatAction::QueuePending(pending));
    state.apply(ChatAction::Remote(MessageEvent::Posted(message(8, "oops"))));
    state.apply(ChatAction::Remote(MessageEvent::Deleted {
        message_id: MessageId(8),
    }));

    state.apply(ChatAction::ConfirmSend {
        nonce,
        message: message(8, "oops"),
    });

    assert!(state.is_empty());
}

#[test]
fn discarding_pending_removes_only_that_entry() {
    let mut state = seeded(&[1]);
    let pending = PendingMessage::new("will fail", author());
    let nonce = pending.nonce;
    state.apply(ChatAction::QueuePending(pending));
    assert_eq!(state.len(), 2);

    assert_eq!(
        state.apply(ChatAction::DiscardPending { nonce }),
        Applied::Removed
    );
    assert_eq!(state.len(), 1);
    assert_eq!(
        state.apply(ChatAction::DiscardPending { nonce }),
        Applied::Ignored
    );
}

#[test]
fn history_is_prepended_without_duplicates() {
    let mut state = seeded(&[10, 11]);
    let applied = state.apply(ChatAction::HistoryLoaded(vec![
        message(8, "old"),
        message(9, "older"),
        message(10, "dup"),
        message(9, "dup in page"),
    ]));

    assert_eq!(applied, Applied::Inserted);
    let ids: Vec<i64> = state
        .entries()
        .iter()
        .filter_map(|entry| entry.message_id().map(|id| id.0))
        .collect();
    assert_eq!(ids, vec![8, 9, 10, 11]);
    assert_eq!(state.oldest_message_id(), Some(MessageId(8)));
}

#[test]
fn only_one_menu_is_open_at_a_time() {
    let mut state = seeded(&[1, 2]);
    let first = MenuId::message(MessageId(1));
    let second = MenuId::message(MessageId(2));

    assert_eq!(state.toggle_menu(first.clone()), Some(&first));
    assert_eq!(state.toggle_menu(second.clone()), Some(&second));
    assert_eq!(state.toggle_menu(second), None);
    assert!(state.active_menu().is_none());
}

#[test]
fn deleting_a_message_closes_its_menu() {
    let mut state = seeded(&[1]);
    state.toggle_menu(MenuId::message(MessageId(1)));
    state.apply(ChatAction::Remote(MessageEvent::Deleted {
        message_id: MessageId(1),
    }));
    assert!(state.active_menu().is_none());
}

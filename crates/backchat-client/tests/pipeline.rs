//! End-to-end behaviour of the outbound pipeline through the public API.

use std::sync::Arc;

use backchat_client::{ChatSession, EventBus, SendRequest, StoreEvent};
use backchat_net::{LoopbackChannel, SignalEvent};
use backchat_shared::protocol::{ChatPayload, ChatRecord, Envelope};
use backchat_shared::{ConversationId, ConversationKind, MessageKind, UserId};
use backchat_store::{
    Conversation, ConversationStore, Database, LocalState, MemoryStore, MessageCache,
};

fn session_with<S: LocalState>(state: S, channel: &Arc<LoopbackChannel>) -> ChatSession<S> {
    ChatSession::new(
        UserId::new("userA"),
        state,
        channel.clone(),
        EventBus::new(64),
    )
}

fn first_contact_scenario<S: LocalState>(state: S) {
    let channel = Arc::new(LoopbackChannel::new());
    let mut session = session_with(state, &channel);
    let mut events = session.events().subscribe();

    let message = session
        .send(SendRequest::individual(
            "conv1",
            "hi",
            Some(UserId::new("userB")),
            Some("bee".into()),
        ))
        .unwrap();

    // Exactly one outbound envelope, in wire shape.
    let sent = channel.sent();
    assert_eq!(sent.len(), 1);
    let json: serde_json::Value = serde_json::from_str(&sent[0].to_json().unwrap()).unwrap();
    assert_eq!(json["type"], "CHAT_MESSAGE");
    assert_eq!(json["payload"]["type"], "individual");
    assert_eq!(json["payload"]["room"], "conv1");
    assert_eq!(json["payload"]["messages"][0]["message"], "hi");
    assert_eq!(json["payload"]["messages"][0]["message_kind"], "text");
    assert_eq!(
        json["payload"]["messages"][0]["client_generated_uuid"],
        message.client_id.to_string()
    );

    // The conversation was created with the message as its preview.
    let conversations = session.state().list_conversations().unwrap();
    assert_eq!(conversations.len(), 1);
    let Conversation::Individual(conv) = &conversations[0] else {
        panic!("expected an individual conversation");
    };
    assert_eq!(conv.remote_user_id, UserId::new("userB"));
    assert_eq!(conv.remote_username.as_deref(), Some("bee"));
    assert_eq!(conv.last_message_sender, Some(UserId::new("userA")));
    assert_eq!(conv.last_message_client_id, Some(message.client_id));

    // The message log holds one pending copy.
    let log = session
        .messages(ConversationKind::Individual, &ConversationId::new("conv1"))
        .unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].client_id, message.client_id);
    assert!(!log[0].delivered);

    assert_eq!(events.try_recv().unwrap(), StoreEvent::ConversationsChanged);
    assert_eq!(
        events.try_recv().unwrap(),
        StoreEvent::MessagesChanged(
            ConversationKind::Individual,
            ConversationId::new("conv1")
        )
    );
}

#[test]
fn first_contact_in_memory() {
    first_contact_scenario(MemoryStore::new());
}

#[test]
fn first_contact_with_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_at(&dir.path().join("backchat.db")).unwrap();
    first_contact_scenario(db);
}

#[test]
fn disconnected_send_stays_pending_until_delivered() {
    let channel = Arc::new(LoopbackChannel::disconnected());
    let mut session = session_with(MemoryStore::new(), &channel);

    let message = session
        .send(SendRequest::collection("g1", "anyone?"))
        .unwrap();
    assert!(channel.sent().is_empty());
    assert!(session
        .state()
        .has_messages(ConversationKind::Collection, &ConversationId::new("g1"))
        .unwrap());

    // A collection send never creates a conversation record.
    assert!(session.state().list_conversations().unwrap().is_empty());

    channel.set_connected(true);
    session
        .apply(SignalEvent::Delivered(vec![message.client_id]))
        .unwrap();

    let log = session
        .messages(ConversationKind::Collection, &ConversationId::new("g1"))
        .unwrap();
    assert_eq!(log.len(), 1);
    assert!(log[0].delivered);
}

#[test]
fn echo_of_every_send_leaves_one_copy_each() {
    let channel = Arc::new(LoopbackChannel::new());
    let mut session = session_with(MemoryStore::new(), &channel);

    for text in ["one", "two", "three"] {
        session
            .send(SendRequest::individual("conv1", text, Some(UserId::new("userB")), None))
            .unwrap();
    }

    // Bounce everything the channel accepted straight back.
    for envelope in channel.sent() {
        let Envelope::ChatMessage(payload) = envelope else {
            panic!("unexpected envelope");
        };
        let echoed = ChatPayload {
            messages: payload
                .messages
                .into_iter()
                .map(|record| ChatRecord {
                    uuid: Some(UserId::new("userA")),
                    received: true,
                    ..record
                })
                .collect(),
            ..payload
        };
        session.apply(SignalEvent::ChatMessages(echoed)).unwrap();
    }

    let log = session
        .messages(ConversationKind::Individual, &ConversationId::new("conv1"))
        .unwrap();
    let texts: Vec<_> = log.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, ["one", "two", "three"]);
    assert!(log.iter().all(|m| m.received && !m.delivered));
    assert_eq!(session.state().list_conversations().unwrap().len(), 1);
}

#[test]
fn history_then_send_does_not_bootstrap() {
    let channel = Arc::new(LoopbackChannel::new());
    let mut session = session_with(MemoryStore::new(), &channel);
    let conv = ConversationId::new("conv9");

    let record = ChatRecord {
        uuid: Some(UserId::new("userB")),
        created_at: Some("1700000000000".into()),
        ..ChatRecord::outbound(
            backchat_shared::ClientMessageId::generate(),
            "earlier",
            MessageKind::Text,
        )
    };
    let report = session.hydrate(ConversationKind::Individual, &conv, &[record.clone()]).unwrap();
    assert_eq!(report.appended, 1);
    assert_eq!(session.hydrate(ConversationKind::Individual, &conv, &[record]).unwrap().appended, 0);

    session
        .send(SendRequest::individual("conv9", "later", Some(UserId::new("userB")), None))
        .unwrap();

    // A non-empty history means the conversation is already known remotely.
    assert!(session
        .state()
        .get_conversation(ConversationKind::Individual, &conv)
        .unwrap()
        .is_none());
    let log = session.messages(ConversationKind::Individual, &conv).unwrap();
    assert_eq!(log.len(), 2);
}

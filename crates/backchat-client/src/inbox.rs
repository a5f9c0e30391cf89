//! Inbox projection: the list of conversations a user sees, newest first.

use chrono::{DateTime, Utc};
use serde::Serialize;

use backchat_shared::{ConversationId, ConversationKind, UserId};
use backchat_store::Conversation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboxEntry {
    pub kind: ConversationKind,
    pub id: ConversationId,
    pub title: String,
    pub image: Option<String>,
    pub preview: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
    pub remote_user_id: Option<UserId>,
}

impl InboxEntry {
    fn from_conversation(conversation: Conversation) -> Option<Self> {
        match conversation {
            Conversation::Individual(c) => {
                let title = match c.remote_username {
                    Some(name) if !name.trim().is_empty() => name,
                    _ => c.remote_user_id.short().to_string(),
                };
                Some(Self {
                    kind: ConversationKind::Individual,
                    id: c.id,
                    title,
                    image: None,
                    preview: c.last_message,
                    last_activity: c.last_message_timestamp,
                    remote_user_id: Some(c.remote_user_id),
                })
            }
            // Collections still being set up have no name or image yet.
            Conversation::Collection(c) => {
                let (Some(name), Some(image)) = (non_blank(c.name), non_blank(c.image)) else {
                    return None;
                };
                Some(Self {
                    kind: ConversationKind::Collection,
                    id: c.id,
                    title: name,
                    image: Some(image),
                    preview: None,
                    last_activity: c.last_message_timestamp,
                    remote_user_id: None,
                })
            }
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Merge both conversation kinds into one list ordered by last activity,
/// newest first. Conversations without any activity come last.
pub fn build_inbox(conversations: Vec<Conversation>) -> Vec<InboxEntry> {
    let mut entries: Vec<InboxEntry> = conversations
        .into_iter()
        .filter_map(InboxEntry::from_conversation)
        .collect();

    // `None` sorts before `Some`, so reversing an ascending sort puts
    // never-active conversations at the bottom.
    entries.sort_by(|a, b| {
        a.last_activity
            .cmp(&b.last_activity)
            .then_with(|| a.id.as_str().cmp(b.id.as_str()))
    });
    entries.reverse();
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use backchat_store::{CollectionConversation, IndividualConversation};
    use chrono::TimeZone;

    fn at(secs: i64) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(secs, 0).single()
    }

    fn dm(id: &str, name: Option<&str>, ts: Option<DateTime<Utc>>) -> Conversation {
        Conversation::Individual(IndividualConversation {
            id: ConversationId::new(id),
            remote_user_id: UserId::new("0123456789abcdef"),
            remote_username: name.map(str::to_string),
            last_message: Some("hi".into()),
            last_message_sender: None,
            last_message_timestamp: ts,
            last_message_client_id: None,
        })
    }

    fn group(id: &str, name: Option<&str>, image: Option<&str>, ts: Option<DateTime<Utc>>) -> Conversation {
        Conversation::Collection(CollectionConversation {
            id: ConversationId::new(id),
            name: name.map(str::to_string),
            image: image.map(str::to_string),
            members: vec![],
            last_message_timestamp: ts,
        })
    }

    #[test]
    fn newest_first_across_kinds() {
        let inbox = build_inbox(vec![
            dm("a", Some("alice"), at(100)),
            group("g", Some("Lads"), Some("lads.png"), at(300)),
            dm("b", Some("bob"), at(200)),
            dm("c", Some("carol"), None),
        ]);

        let ids: Vec<_> = inbox.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["g", "b", "a", "c"]);
    }

    #[test]
    fn incomplete_collections_are_hidden() {
        let inbox = build_inbox(vec![
            group("g1", Some("Lads"), None, at(1)),
            group("g2", None, Some("x.png"), at(2)),
            group("g3", Some("Crew"), Some("crew.png"), at(3)),
            group("g4", Some(""), Some("x.png"), at(4)),
            group("g5", Some("Squad"), Some("  "), at(5)),
        ]);
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].title, "Crew");
    }

    #[test]
    fn individual_title_falls_back_to_short_id() {
        let inbox = build_inbox(vec![dm("a", None, at(1))]);
        assert_eq!(inbox[0].title, "01234567");
        assert_eq!(inbox[0].preview.as_deref(), Some("hi"));
    }
}

//! Proptest generators for property-based testing.

use std::collections::BTreeSet;

use proptest::prelude::*;
use uuid::Uuid;

use huddle_core::{ChatMessage, UserId};

/// Generate a valid user id.
pub fn user_id() -> impl Strategy<Value = UserId> {
    any::<u128>().prop_map(|n| UserId::from(Uuid::from_u128(n)))
}

/// Generate a reasonable timestamp.
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=1_000_000_000
}

/// Generate message content.
pub fn content() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{0,40}".prop_map(String::from)
}

/// Generate a user message from `sender`.
pub fn chat_message(sender: impl Strategy<Value = UserId>) -> impl Strategy<Value = ChatMessage> {
    (sender, any::<u128>(), timestamp(), content()).prop_map(|(sender, id, ts, content)| {
        let mut message = ChatMessage::local(&sender, "gen", content);
        message.id = Uuid::from_u128(id);
        message.timestamp = ts;
        message
    })
}

/// Generate up to `max` user messages with distinct ids.
pub fn message_log(
    sender: impl Strategy<Value = UserId>,
    max: usize,
) -> impl Strategy<Value = Vec<ChatMessage>> {
    prop::collection::vec(chat_message(sender), 0..=max).prop_map(|messages| {
        let mut seen = BTreeSet::new();
        messages.into_iter().filter(|m| seen.insert(m.id)).collect()
    })
}

/// Generate two logs sharing a common prefix, each with its own tail.
///
/// Tails may be empty, so the pair covers equal logs, supersets and
/// genuine divergence.
pub fn diverging_logs(max: usize) -> impl Strategy<Value = (Vec<ChatMessage>, Vec<ChatMessage>)> {
    message_log(user_id(), max * 3).prop_flat_map(move |pool| {
        let len = pool.len();
        (Just(pool), 0..=len, 0..=len).prop_map(|(pool, a, b)| {
            let (shared, rest) = pool.split_at(a.min(b).min(pool.len() / 3));
            let (left, right) = rest.split_at(rest.len() / 2);
            let take = |tail: &[ChatMessage], n: usize| tail.iter().take(n).cloned().collect::<Vec<_>>();
            let mut first = shared.to_vec();
            first.extend(take(left, a));
            let mut second = shared.to_vec();
            second.extend(take(right, b));
            (first, second)
        })
    })
}

//! Turn segmentation.
//!
//! A turn starts at a user message carrying text, but only right after an
//! assistant message and once every `tool_use` issued so far has been
//! answered. A `tool_use` and its
//! `tool_result` therefore always land in the same turn, even when the
//! result message also carries text (the doom-loop hint does).

use std::collections::HashSet;

use codeloop_core::message::{Message, Role};

/// Split `messages` into consecutive turns.
///
/// Concatenating the returned slices gives back `messages` exactly.
pub fn split_turns(messages: &[Message]) -> Vec<&[Message]> {
    let mut turns = Vec::new();
    let mut pending: HashSet<&str> = HashSet::new();
    let mut start = 0;

    for (i, message) in messages.iter().enumerate() {
        if i > start
            && message.role == Role::User
            && message.has_text()
            && messages[i - 1].role == Role::Assistant
            && pending.is_empty()
        {
            turns.push(&messages[start..i]);
            start = i;
        }
        match message.role {
            Role::Assistant => pending.extend(message.tool_use_ids()),
            Role::User => {
                for id in message.tool_result_ids() {
                    pending.remove(id);
                }
            }
        }
    }

    if start < messages.len() {
        turns.push(&messages[start..]);
    }
    turns
}

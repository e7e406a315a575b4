//! Conversation context builder.
//!
//! Normalizes raw conversation data into the `conversation_history` and
//! `user_details` strings every prompt-constructing stage consumes. Built
//! once at run initialization and read-only afterwards.

use thiserror::Error;

use crate::{ConversationData, TicketMessage};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("conversation has no messages and no subject")]
    EmptyConversation,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationContext {
    pub conversation_history: String,
    pub user_details: String,
}

/// Build the prompt context. Fails only when the conversation carries
/// neither messages nor a subject, since every downstream prompt would be
/// empty.
pub fn build_context(data: &ConversationData) -> Result<ConversationContext, ContextError> {
    let has_messages = !data.messages.is_empty();
    let has_subject = data.subject.as_deref().is_some_and(|subject| !subject.trim().is_empty());
    if !has_messages && !has_subject {
        return Err(ContextError::EmptyConversation);
    }

    Ok(ConversationContext {
        conversation_history: format_conversation_history(&data.messages, data.subject.as_deref()),
        user_details: format_user_details(data),
    })
}

fn format_conversation_history(messages: &[TicketMessage], subject: Option<&str>) -> String {
    let mut parts = Vec::new();

    if let Some(subject) = subject.filter(|subject| !subject.trim().is_empty()) {
        parts.push(format!("Subject: {subject}\n"));
    }

    if messages.is_empty() {
        parts.push("Conversation: No messages available".to_string());
        return parts.join("\n");
    }

    parts.push("Conversation:".to_string());
    for (index, message) in messages.iter().enumerate() {
        let role = title_case(&message.role);
        parts.push(format!("{}. {role}: {}", index + 1, message.content));

        for (attachment_index, attachment) in message.attachments.iter().enumerate() {
            let mut line = format!(
                "   Attachment {}: {} (Type: {})",
                attachment_index + 1,
                attachment.name,
                attachment.content_type
            );
            if !attachment.url.is_empty() {
                line.push_str(&format!("\n      URL: {}", attachment.url));
            }
            parts.push(line);
        }
    }

    parts.join("\n")
}

fn format_user_details(data: &ConversationData) -> String {
    let mut parts = Vec::new();

    if let Some(name) = data.user.name.as_deref().filter(|name| !name.is_empty()) {
        parts.push(format!("Name: {name}"));
    }
    if let Some(email) = data.user.email.as_deref().filter(|email| !email.is_empty()) {
        parts.push(format!("Email: {email}"));
    }
    for (key, value) in &data.user.extra {
        if !value.is_empty() {
            parts.push(format!("{}: {value}", title_case(key)));
        }
    }

    if parts.is_empty() {
        parts.push("User details: Not available".to_string());
    }
    parts.join("\n")
}

fn title_case(value: &str) -> String {
    value
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{build_context, ContextError};
    use crate::{ConversationData, TicketAttachment, TicketMessage, TicketUser};

    fn base_conversation() -> ConversationData {
        ConversationData {
            id: "conv-1".to_string(),
            subject: Some("Referral bonus".to_string()),
            messages: vec![
                TicketMessage {
                    role: "user".to_string(),
                    content: "When is my referral bonus paid out?".to_string(),
                    attachments: Vec::new(),
                },
                TicketMessage {
                    role: "assistant".to_string(),
                    content: "Let me check that for you.".to_string(),
                    attachments: Vec::new(),
                },
            ],
            user: TicketUser {
                name: Some("Dana Reyes".to_string()),
                email: Some("dana@example.com".to_string()),
                extra: BTreeMap::from([("user_id".to_string(), "u-991".to_string())]),
            },
        }
    }

    #[test]
    fn history_is_numbered_with_subject_line() {
        let context = build_context(&base_conversation()).expect("context builds");
        assert!(context.conversation_history.starts_with("Subject: Referral bonus"));
        assert!(context.conversation_history.contains("1. User: When is my referral bonus paid out?"));
        assert!(context.conversation_history.contains("2. Assistant: Let me check that for you."));
    }

    #[test]
    fn user_details_include_dynamic_fields_title_cased() {
        let context = build_context(&base_conversation()).expect("context builds");
        assert!(context.user_details.contains("Name: Dana Reyes"));
        assert!(context.user_details.contains("Email: dana@example.com"));
        assert!(context.user_details.contains("User Id: u-991"));
    }

    #[test]
    fn attachments_are_listed_under_their_message() {
        let mut conversation = base_conversation();
        conversation.messages[0].attachments.push(TicketAttachment {
            name: "offer.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            url: "https://files.example.com/offer.pdf".to_string(),
        });

        let context = build_context(&conversation).expect("context builds");
        assert!(context.conversation_history.contains("Attachment 1: offer.pdf (Type: application/pdf)"));
        assert!(context.conversation_history.contains("URL: https://files.example.com/offer.pdf"));
    }

    #[test]
    fn subject_only_conversation_still_builds() {
        let mut conversation = base_conversation();
        conversation.messages.clear();
        conversation.user = TicketUser::default();

        let context = build_context(&conversation).expect("subject is enough");
        assert!(context.conversation_history.contains("Conversation: No messages available"));
        assert_eq!(context.user_details, "User details: Not available");
    }

    #[test]
    fn empty_conversation_is_rejected() {
        let conversation = ConversationData {
            id: "conv-2".to_string(),
            subject: Some("   ".to_string()),
            messages: Vec::new(),
            user: TicketUser::default(),
        };
        assert_eq!(build_context(&conversation), Err(ContextError::EmptyConversation));
    }
}

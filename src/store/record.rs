//! Message records as handed over by the mail store

use chrono::{DateTime, Utc};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::sent::SentClassifier;
use crate::threading::container::Message;
use crate::threading::references::{normalize_message_id, parse_reference_headers};

/// Per-message faults. A record that fails is skipped; the rest of the batch continues.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("failed to parse message headers: {0}")]
    HeaderParse(#[from] mailparse::MailParseError),
    #[error("missing Message-ID header")]
    MissingMessageId,
    #[error("missing folder for message {message_id}")]
    MissingFolder { message_id: String },
    #[error("invalid Date header `{raw}` for message {message_id}: {error}")]
    InvalidDate {
        message_id: String,
        raw: String,
        error: String,
    },
}

/// One message in one folder, with its raw threading headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MessageRecord {
    /// Message-ID, with or without angle brackets
    pub message_id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub author: String,
    pub date: DateTime<Utc>,
    /// Folder the message lives in (for example `INBOX` or `Sent`)
    pub folder: String,
    /// Mailbox-local retrieval key; assigned by the store when absent
    #[serde(default)]
    pub sequence_key: Option<u64>,
    /// Raw `References` header value
    #[serde(default)]
    pub references: Option<String>,
    /// Raw `In-Reply-To` header value
    #[serde(default)]
    pub in_reply_to: Option<String>,
    /// Opaque handle to retrieve the full content
    #[serde(default)]
    pub location_ref: Option<String>,
}

impl MessageRecord {
    pub fn new(
        message_id: impl Into<String>,
        subject: impl Into<String>,
        author: impl Into<String>,
        date: DateTime<Utc>,
        folder: impl Into<String>,
    ) -> Self {
        MessageRecord {
            message_id: message_id.into(),
            subject: subject.into(),
            author: author.into(),
            date,
            folder: folder.into(),
            sequence_key: None,
            references: None,
            in_reply_to: None,
            location_ref: None,
        }
    }

    pub fn with_references(mut self, references: impl Into<String>) -> Self {
        self.references = Some(references.into());
        self
    }

    pub fn with_in_reply_to(mut self, in_reply_to: impl Into<String>) -> Self {
        self.in_reply_to = Some(in_reply_to.into());
        self
    }

    /// Normalized Message-ID, if the record has a usable one.
    pub fn normalized_id(&self) -> Option<String> {
        normalize_message_id(&self.message_id)
    }

    /// Build the threader's view of this record.
    pub fn to_message(&self, classifier: &SentClassifier) -> Result<Message, RecordError> {
        let message_id = self.normalized_id().ok_or(RecordError::MissingMessageId)?;
        if self.folder.trim().is_empty() {
            return Err(RecordError::MissingFolder { message_id });
        }

        let references =
            parse_reference_headers(self.references.as_deref(), self.in_reply_to.as_deref());
        let location_ref = self
            .location_ref
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.folder, self.sequence_key.unwrap_or(0)));
        let is_sent = classifier.is_sent(&self.author, &self.folder);

        Ok(
            Message::new(message_id, self.subject.clone(), self.author.clone(), self.date)
                .with_references(references)
                .with_location(self.sequence_key.unwrap_or(0), location_ref)
                .with_sent(is_sent),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_message() {
        let classifier = SentClassifier::new(["me@example.com"], ["Sent"]);
        let record = MessageRecord::new("<b@x>", "Re: hi", "Me <me@example.com>", Utc::now(), "INBOX")
            .with_references("<a@x>")
            .with_in_reply_to("<p@x>");

        let message = record.to_message(&classifier).unwrap();
        assert_eq!(message.id(), "b@x");
        assert_eq!(message.reference_ids(), &["a@x".to_string(), "p@x".to_string()]);
        assert!(message.is_sent());
        assert_eq!(message.location_ref(), "INBOX/0");
    }

    #[test]
    fn test_missing_fields_rejected() {
        let classifier = SentClassifier::default();
        let no_id = MessageRecord::new("<>", "s", "a@x", Utc::now(), "INBOX");
        assert!(matches!(no_id.to_message(&classifier), Err(RecordError::MissingMessageId)));

        let no_folder = MessageRecord::new("m@x", "s", "a@x", Utc::now(), " ");
        assert!(matches!(
            no_folder.to_message(&classifier),
            Err(RecordError::MissingFolder { .. })
        ));
    }
}

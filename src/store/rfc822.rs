//! Header extraction from raw RFC 5322 messages
//!
//! Only the headers threading needs are read: Message-ID, Subject, From, Date,
//! References and In-Reply-To. Bodies and MIME parts are ignored.

use chrono::{DateTime, Utc};
use mailparse::{MailHeaderMap, parse_headers};

use super::record::{MessageRecord, RecordError};
use crate::threading::references::{normalize_message_id, sanitize_text};

fn parse_date(raw: Option<String>, message_id: &str) -> Result<DateTime<Utc>, RecordError> {
    let raw = raw.unwrap_or_default();
    if raw.trim().is_empty() {
        // Undated messages still thread; they sort as the epoch
        log::debug!("message {} has no Date header", message_id);
        return Ok(DateTime::<Utc>::default());
    }

    match dateparser::parse(&raw) {
        Ok(date) => Ok(date.with_timezone(&Utc)),
        Err(source) => {
            log::warn!("message {} has invalid date `{}`: {}", message_id, raw, source);
            Err(RecordError::InvalidDate {
                message_id: message_id.to_string(),
                raw,
                error: source.to_string(),
            })
        }
    }
}

/// Build a [`MessageRecord`] from the headers of a raw message.
pub fn record_from_rfc822(
    raw: &[u8],
    folder: &str,
    sequence_key: Option<u64>,
) -> Result<MessageRecord, RecordError> {
    let (headers, _) = parse_headers(raw).map_err(|e| {
        log::debug!("failed to parse headers: {}", e);
        RecordError::HeaderParse(e)
    })?;

    let message_id = headers
        .get_first_value("Message-ID")
        .and_then(|value| normalize_message_id(&value))
        .ok_or(RecordError::MissingMessageId)?;

    let subject = headers
        .get_first_value("Subject")
        .map(|s| sanitize_text(&s))
        .unwrap_or_default();
    let author = headers
        .get_first_value("From")
        .map(|s| sanitize_text(&s))
        .unwrap_or_default();
    let date = parse_date(headers.get_first_value("Date"), &message_id)?;

    let mut record = MessageRecord::new(message_id, subject, author, date, folder);
    record.sequence_key = sequence_key;
    record.references = headers.get_first_value("References");
    record.in_reply_to = headers.get_first_value("In-Reply-To");

    log::trace!("parsed headers: {} - {}", record.message_id, record.subject);
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SentClassifier;

    #[test]
    fn test_headers_extracted() {
        let raw = concat!(
            "Message-ID: <c@example.com>\r\n",
            "Subject: Re: Plans\r\n",
            "From: Tester <tester@example.com>\r\n",
            "Date: Tue, 1 Jul 2003 10:52:37 +0200\r\n",
            "References: <a@example.com>\r\n",
            " <b@example.com>\r\n",
            "In-Reply-To: <b@example.com>\r\n",
            "\r\n",
            "Body\r\n"
        );

        let record = record_from_rfc822(raw.as_bytes(), "INBOX", Some(7)).unwrap();
        assert_eq!(record.message_id, "c@example.com");
        assert_eq!(record.subject, "Re: Plans");
        assert_eq!(record.sequence_key, Some(7));
        assert_eq!(record.date.to_rfc3339(), "2003-07-01T08:52:37+00:00");

        let message = record.to_message(&SentClassifier::default()).unwrap();
        assert_eq!(
            message.reference_ids(),
            &["a@example.com".to_string(), "b@example.com".to_string()]
        );
    }

    #[test]
    fn test_subject_and_author_trimmed() {
        let raw = "Message-ID: <e@x>\r\nSubject: Lunch plans   \r\nFrom: bob@example.com  \r\n\r\n";
        let record = record_from_rfc822(raw.as_bytes(), "INBOX", None).unwrap();
        assert_eq!(record.subject, "Lunch plans");
        assert_eq!(record.author, "bob@example.com");
    }

    #[test]
    fn test_missing_message_id() {
        let raw = "Subject: nothing\r\n\r\nBody\r\n";
        assert!(matches!(
            record_from_rfc822(raw.as_bytes(), "INBOX", None),
            Err(RecordError::MissingMessageId)
        ));
    }

    #[test]
    fn test_invalid_date() {
        let raw = "Message-ID: <d@x>\r\nDate: not-a-real-date\r\n\r\n";
        assert!(matches!(
            record_from_rfc822(raw.as_bytes(), "INBOX", None),
            Err(RecordError::InvalidDate { .. })
        ));
    }
}

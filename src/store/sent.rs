//! Sent/received classification
//!
//! A message counts as sent when its author is one of the user's configured
//! identities, or when it lives in a sent-mail folder.

use std::collections::HashSet;

/// Lower-cased address of the first mailbox in an address header value.
fn author_address(author: &str) -> String {
    if let Ok(addrs) = mailparse::addrparse(author) {
        if let Some(mailparse::MailAddr::Single(info)) = addrs.iter().next() {
            return info.addr.trim().to_lowercase();
        }
    }
    author.trim().trim_matches(&['<', '>'][..]).to_lowercase()
}

/// Last path component of a folder uri (`imap://host/Sent` -> `sent`).
fn folder_leaf(folder: &str) -> String {
    folder
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(folder)
        .trim()
        .to_lowercase()
}

#[derive(Debug, Clone, Default)]
pub struct SentClassifier {
    identities: HashSet<String>,
    sent_folders: HashSet<String>,
}

impl SentClassifier {
    pub fn new<I, F, S, T>(identities: I, sent_folders: F) -> Self
    where
        I: IntoIterator<Item = S>,
        F: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        SentClassifier {
            identities: identities
                .into_iter()
                .map(|identity| author_address(identity.as_ref()))
                .filter(|identity| !identity.is_empty())
                .collect(),
            sent_folders: sent_folders
                .into_iter()
                .map(|folder| folder_leaf(folder.as_ref()))
                .filter(|folder| !folder.is_empty())
                .collect(),
        }
    }

    pub fn is_own_identity(&self, author: &str) -> bool {
        !self.identities.is_empty() && self.identities.contains(&author_address(author))
    }

    pub fn is_sent_folder(&self, folder: &str) -> bool {
        self.sent_folders.contains(&folder_leaf(folder))
    }

    pub fn is_sent(&self, author: &str, folder: &str) -> bool {
        self.is_own_identity(author) || self.is_sent_folder(folder)
    }
}

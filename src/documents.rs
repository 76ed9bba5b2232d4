//! Documents kept next to the ledger: users, posts and comments.
//!
//! Every document is stored together with the seal of the record minted for it.

use crate::blockchain::{Payload, Record};
use serde::{Deserialize, Serialize};

/// Collection name used as the `to` field of user records.
pub const USERS_COLLECTION: &str = "users";

/// Fresh 24-character hex identifier from 12 random bytes.
pub fn new_object_id() -> String {
    hex::encode(rand::random::<[u8; 12]>())
}

/// Digest, linkage and payload of the record that sealed a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seal {
    pub digest: String,
    pub previous_digest: String,
    pub payload: Payload,
}

impl From<&Record> for Seal {
    fn from(record: &Record) -> Self {
        Seal {
            digest: record.digest.clone(),
            previous_digest: record.previous_digest.clone(),
            payload: record.payload.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub seal: Seal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub owner: String,
    pub seal: Seal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    /// Owner of the post being commented on.
    pub owner: String,
    /// Author of the comment.
    pub user_id: String,
    pub post: String,
    pub seal: Seal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    User(User),
    Post(Post),
    Comment(Comment),
}

impl Document {
    pub fn id(&self) -> &str {
        match self {
            Document::User(u) => &u.id,
            Document::Post(p) => &p.id,
            Document::Comment(c) => &c.id,
        }
    }

    pub fn seal(&self) -> &Seal {
        match self {
            Document::User(u) => &u.seal,
            Document::Post(p) => &p.seal,
            Document::Comment(c) => &c.seal,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Document::User(_) => "user",
            Document::Post(_) => "post",
            Document::Comment(_) => "comment",
        }
    }
}

fn linkage(from: &str, to: String) -> Payload {
    Payload::new().with("from", from).with("to", to).with("amount", 1)
}

pub fn user_payload(user_id: &str) -> Payload {
    linkage(user_id, USERS_COLLECTION.to_string())
}

pub fn post_payload(post_id: &str, owner_id: &str) -> Payload {
    linkage(post_id, owner_id.to_string())
}

pub fn comment_payload(comment_id: &str, post_id: &str, post_owner_id: &str, user_id: &str) -> Payload {
    linkage(comment_id, format!("{}&{}&{}", post_id, post_owner_id, user_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::PayloadValue;

    #[test]
    fn test_object_ids() {
        let a = new_object_id();
        let b = new_object_id();
        assert_eq!(a.len(), 24);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_comment_payload_joins_ids() {
        let payload = comment_payload("c1", "p1", "o1", "u1");
        assert_eq!(payload.get("from"), Some(&PayloadValue::from("c1")));
        assert_eq!(payload.get("to"), Some(&PayloadValue::from("p1&o1&u1")));
        assert_eq!(payload.get("amount"), Some(&PayloadValue::Integer(1)));
    }

    #[test]
    fn test_user_payload_targets_collection() {
        assert_eq!(
            user_payload("u1").canonical_json(),
            r#"{"amount":1,"from":"u1","to":"users"}"#
        );
    }
}

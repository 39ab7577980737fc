//! DMTP messages
//!
//! A message body is a bare field sequence: sender, receiver, signing
//! time, raw content, and optional signature / key / attachment fields.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::field::{tag, FieldSet};
use crate::time::Timestamp;

/// An application message between two identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender: String,
    pub receiver: String,
    pub timestamp: Timestamp,
    pub content: Bytes,
    pub signature: Option<Bytes>,
    pub key: Option<Bytes>,
    pub attachment: Option<Bytes>,
}

impl Message {
    pub fn new(sender: &str, receiver: &str, timestamp: Timestamp, content: Bytes) -> Self {
        Self {
            sender: sender.to_owned(),
            receiver: receiver.to_owned(),
            timestamp,
            content,
            signature: None,
            key: None,
            attachment: None,
        }
    }

    /// Decode a message from an MTP `Message` body
    pub fn decode(body: &Bytes) -> Result<Self> {
        let fields = FieldSet::parse(body);
        Ok(Self {
            sender: fields.text(tag::SENDER).ok_or(Error::MissingField("SENDER"))?,
            receiver: fields
                .text(tag::RECEIVER)
                .ok_or(Error::MissingField("RECEIVER"))?,
            timestamp: fields.timestamp(tag::TIME).ok_or(Error::MissingField("TIME"))?,
            content: fields
                .concat(tag::CONTENT)
                .ok_or(Error::MissingField("CONTENT"))?,
            signature: fields.get(tag::SIGN).cloned(),
            key: fields.get(tag::KEY).cloned(),
            attachment: fields.concat(tag::FILE),
        })
    }

    /// Encode to an MTP `Message` body
    pub fn encode(&self) -> Bytes {
        let mut fields = FieldSet::new();
        fields.push_text(tag::SENDER, &self.sender);
        fields.push_text(tag::RECEIVER, &self.receiver);
        fields.push_timestamp(tag::TIME, self.timestamp);
        // content and attachments outgrow one field; they travel chunked
        fields.push_chunked(tag::CONTENT, &self.content);
        if let Some(signature) = &self.signature {
            fields.push(tag::SIGN, signature.clone());
        }
        if let Some(key) = &self.key {
            fields.push(tag::KEY, key.clone());
        }
        if let Some(attachment) = &self.attachment {
            fields.push_chunked(tag::FILE, attachment);
        }
        fields.encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let mut msg = Message::new(
            "alice",
            "hulk",
            1_700_000_000,
            Bytes::from_static("你好 hulk!".as_bytes()),
        );
        msg.key = Some(Bytes::from_static(&[1, 2, 3]));

        let decoded = Message::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_large_content_roundtrip() {
        let content = Bytes::from((0..1000u32).map(|i| i as u8).collect::<Vec<u8>>());
        let msg = Message::new("alice", "hulk", 1_700_000_000, content.clone());

        let decoded = Message::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.content, content);
    }

    #[test]
    fn test_content_is_required() {
        let mut fields = FieldSet::new();
        fields.push_text(tag::SENDER, "alice");
        fields.push_text(tag::RECEIVER, "hulk");
        fields.push_timestamp(tag::TIME, 1);

        assert!(matches!(
            Message::decode(&fields.encode()),
            Err(Error::MissingField("CONTENT"))
        ));
    }
}

//! ChatGPT `conversations.json` export adapter.
//!
//! The export is a top-level array of conversations, each carrying a
//! `mapping` of message records keyed by opaque ids. Messages are
//! flattened into one node per message, ordered by timestamp, with the
//! message index within the conversation as the node offset. A
//! conversation that fails to deserialize yields one [`ParseError`] and
//! the stream moves on to the next conversation.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::{Adapter, NodeStream, RawSource};
use crate::error::ParseError;
use crate::models::{ContentFormat, ContentNode, NodeContent, NodeMetadata};

pub const SOURCE_TYPE: &str = "chatgpt";

#[derive(Deserialize)]
struct Conversation {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    create_time: Option<f64>,
    #[serde(default)]
    mapping: HashMap<String, MappingEntry>,
}

#[derive(Deserialize)]
struct MappingEntry {
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    author: Option<Author>,
    #[serde(default)]
    create_time: Option<f64>,
    #[serde(default)]
    content: Option<MessageContent>,
}

#[derive(Deserialize)]
struct Author {
    #[serde(default)]
    role: Option<String>,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    parts: Option<Vec<Value>>,
}

pub struct ChatGptAdapter;

impl Adapter for ChatGptAdapter {
    fn name(&self) -> &str {
        "chatgpt"
    }

    fn source_type(&self) -> &str {
        SOURCE_TYPE
    }

    fn detect(&self, input: &RawSource) -> bool {
        if input.file_name() == Some("conversations.json") {
            return true;
        }
        let head: String = input.text().chars().take(4096).collect();
        head.trim_start().starts_with('[') && head.contains("\"mapping\"")
    }

    fn parse<'a>(&'a self, input: &'a RawSource) -> NodeStream<'a> {
        let records: Vec<Value> = match serde_json::from_str(&input.text()) {
            Ok(Value::Array(items)) => items,
            Ok(_) => {
                return Box::new(std::iter::once(Err(ParseError::new(
                    "conversations.json",
                    "expected a top-level array of conversations",
                ))))
            }
            Err(e) => {
                return Box::new(std::iter::once(Err(ParseError::new(
                    "conversations.json",
                    e.to_string(),
                ))))
            }
        };

        Box::new(
            records
                .into_iter()
                .enumerate()
                .flat_map(|(i, record)| convert_conversation(i, record)),
        )
    }
}

fn convert_conversation(index: usize, record: Value) -> Vec<Result<ContentNode, ParseError>> {
    let conv: Conversation = match serde_json::from_value(record) {
        Ok(c) => c,
        Err(e) => {
            return vec![Err(ParseError::new(
                format!("conversation {}", index),
                e.to_string(),
            ))]
        }
    };

    let conv_id = conv
        .conversation_id
        .clone()
        .or_else(|| conv.id.clone())
        .unwrap_or_else(|| format!("conversation-{}", index));
    let title = conv.title.clone();

    let mut messages: Vec<(f64, String, String)> = Vec::new();
    for entry in conv.mapping.values() {
        let Some(message) = &entry.message else {
            continue;
        };
        let role = message
            .author
            .as_ref()
            .and_then(|a| a.role.clone())
            .unwrap_or_else(|| "unknown".to_string());
        if role == "system" {
            continue;
        }
        let Some(content) = &message.content else {
            continue;
        };
        if content.content_type.as_deref().unwrap_or("text") != "text" {
            continue;
        }
        let text = content
            .parts
            .as_ref()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(part_text)
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        if text.trim().is_empty() {
            continue;
        }
        let ts = message.create_time.or(conv.create_time).unwrap_or(0.0);
        messages.push((ts, role, text));
    }

    // The mapping is an unordered map; sort by timestamp with the text as
    // tiebreak so offsets stay stable across re-ingestions.
    messages.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.2.cmp(&b.2))
    });

    messages
        .into_iter()
        .enumerate()
        .map(|(offset, (ts, role, text))| {
            let mut metadata = NodeMetadata::new(timestamp(ts));
            metadata.title = title.clone();
            metadata.author = Some(role.clone());
            metadata.tags = vec!["chat".to_string(), role.clone()];
            metadata.extra = serde_json::json!({
                "role": role,
                "conversationTitle": title,
            });
            Ok(ContentNode::assemble(
                SOURCE_TYPE,
                "chatgpt",
                &conv_id,
                offset as u64,
                NodeContent {
                    text,
                    format: ContentFormat::Plain,
                },
                metadata,
            ))
        })
        .collect()
}

fn part_text(part: &Value) -> Option<String> {
    match part {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(map) => map
            .get("text")
            .and_then(|t| t.as_str())
            .map(|s| s.to_string()),
        _ => None,
    }
}

fn timestamp(secs: f64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs as i64, 0)
        .single()
        .unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH)
}

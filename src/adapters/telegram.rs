//! Telegram Desktop JSON export adapter (`result.json`).
//!
//! Handles both shapes the desktop client produces: a single-chat export
//! (`{"name": ..., "messages": [...]}`) and a full-account export
//! (`{"chats": {"list": [...]}}`). Service messages and empty texts are
//! skipped; a message that fails to deserialize yields a [`ParseError`]
//! carrying the chat and array position.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::{Adapter, NodeStream, RawSource};
use crate::error::ParseError;
use crate::models::{ContentFormat, ContentNode, NodeContent, NodeMetadata};

pub const SOURCE_TYPE: &str = "telegram";

#[derive(Deserialize)]
struct Chat {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    id: Option<i64>,
    #[serde(default, rename = "type")]
    chat_type: Option<String>,
    #[serde(default)]
    messages: Vec<Value>,
}

#[derive(Deserialize)]
struct TgMessage {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    text: Option<Value>,
}

pub struct TelegramAdapter;

impl Adapter for TelegramAdapter {
    fn name(&self) -> &str {
        "telegram"
    }

    fn source_type(&self) -> &str {
        SOURCE_TYPE
    }

    fn detect(&self, input: &RawSource) -> bool {
        if input.file_name() == Some("result.json") {
            return true;
        }
        let head: String = input.text().chars().take(4096).collect();
        let head = head.trim_start();
        head.starts_with('{') && (head.contains("\"messages\"") || head.contains("\"chats\""))
    }

    fn parse<'a>(&'a self, input: &'a RawSource) -> NodeStream<'a> {
        let root: Value = match serde_json::from_str(&input.text()) {
            Ok(v) => v,
            Err(e) => {
                return Box::new(std::iter::once(Err(ParseError::new(
                    "result.json",
                    e.to_string(),
                ))))
            }
        };

        // Full-account exports nest chats under chats.list; single-chat
        // exports are a chat object at the root.
        let chats: Vec<Value> = match root.pointer("/chats/list") {
            Some(Value::Array(list)) => list.clone(),
            _ => vec![root],
        };

        Box::new(
            chats
                .into_iter()
                .enumerate()
                .flat_map(|(i, chat)| convert_chat(i, chat)),
        )
    }
}

fn convert_chat(index: usize, value: Value) -> Vec<Result<ContentNode, ParseError>> {
    let chat: Chat = match serde_json::from_value(value) {
        Ok(c) => c,
        Err(e) => {
            return vec![Err(ParseError::new(
                format!("chat {}", index),
                e.to_string(),
            ))]
        }
    };

    let chat_id = chat
        .id
        .map(|id| id.to_string())
        .or_else(|| chat.name.clone())
        .unwrap_or_else(|| format!("chat-{}", index));
    let chat_name = chat.name.clone();
    let chat_type = chat.chat_type.clone();

    let mut out = Vec::new();
    for (offset, raw) in chat.messages.into_iter().enumerate() {
        let message: TgMessage = match serde_json::from_value(raw) {
            Ok(m) => m,
            Err(e) => {
                out.push(Err(ParseError::new(
                    format!("{}/{}", chat_id, offset),
                    e.to_string(),
                )));
                continue;
            }
        };
        if message.kind.as_deref().unwrap_or("message") != "message" {
            continue;
        }
        let text = message.text.as_ref().map(flatten_text).unwrap_or_default();
        if text.trim().is_empty() {
            continue;
        }

        let mut metadata = NodeMetadata::new(parse_date(message.date.as_deref()));
        metadata.title = chat_name.clone();
        metadata.author = message.from.clone();
        metadata.tags = vec!["chat".to_string(), "telegram".to_string()];
        metadata.extra = serde_json::json!({
            "chatType": chat_type,
            "messageId": message.id,
        });
        out.push(Ok(ContentNode::assemble(
            SOURCE_TYPE,
            "telegram",
            &chat_id,
            offset as u64,
            NodeContent {
                text,
                format: ContentFormat::Plain,
            },
            metadata,
        )));
    }
    out
}

/// Telegram renders rich text as an array of plain strings and entity
/// objects; concatenate the textual parts.
fn flatten_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .map(|part| match part {
                Value::String(s) => s.as_str(),
                Value::Object(map) => map.get("text").and_then(|t| t.as_str()).unwrap_or(""),
                _ => "",
            })
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn parse_date(date: Option<&str>) -> DateTime<Utc> {
    date.and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

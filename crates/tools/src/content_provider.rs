//! Content provider: chunked spill store for oversized content.
//!
//! A write coalesces adjacent text parts (blank line between parts), splits
//! the text into chunks of at most `max_chunk_size` bytes on UTF-8-safe,
//! preferably natural boundaries, and stores the chunk list under a
//! wrap-around id. Reads page through a store chunk by chunk via cursors.
//! The store is process-wide and bounded: ids wrap at 100 and silently
//! overwrite the oldest entry.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use mentis_core::{Tool, ToolResult};
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use tracing::warn;

const MAX_STORE_ID: usize = 100;
const DEFAULT_MAX_CHUNK_SIZE: usize = 4000;

struct ContentStore {
    entries: HashMap<String, Vec<Value>>,
    current_id: usize,
}

static STORE: Lazy<Mutex<ContentStore>> = Lazy::new(|| {
    Mutex::new(ContentStore {
        entries: HashMap::new(),
        current_id: 0,
    })
});

fn is_break_byte(byte: u8) -> bool {
    matches!(
        byte,
        b' ' | b'\n' | b'.' | b',' | b';' | b':' | b'!' | b'?'
    )
}

/// Split text into chunks of at most `max_chunk_size` bytes. Splits land on
/// UTF-8 character boundaries and prefer a whitespace/punctuation break, but
/// never before the halfway point of a chunk.
fn split_text_into_chunks(text: &str, max_chunk_size: usize) -> Vec<Value> {
    let mut chunks = Vec::new();
    if text.is_empty() || max_chunk_size == 0 {
        return chunks;
    }

    let total = text.len();
    let mut offset = 0;
    while offset < total {
        let raw_size = max_chunk_size.min(total - offset);

        // Back off to a character boundary.
        let mut chunk_size = raw_size;
        while chunk_size > 0 && !text.is_char_boundary(offset + chunk_size) {
            chunk_size -= 1;
        }
        if chunk_size == 0 {
            // max_chunk_size smaller than one codepoint; take the whole
            // character rather than loop forever.
            chunk_size = raw_size;
            while offset + chunk_size < total && !text.is_char_boundary(offset + chunk_size) {
                chunk_size += 1;
            }
        }

        // Prefer a natural break when the cut did not already shrink. The
        // break byte stays inside the chunk, keeping it within the budget.
        if offset + chunk_size < total && chunk_size == raw_size {
            let min_pos = offset + chunk_size / 2;
            let mut break_pos = offset + chunk_size - 1;
            while break_pos > min_pos && !is_break_byte(text.as_bytes()[break_pos]) {
                break_pos -= 1;
            }
            if break_pos > min_pos {
                chunk_size = break_pos + 1 - offset;
            }
        }

        chunks.push(json!({"type": "text", "text": &text[offset..offset + chunk_size]}));
        offset += chunk_size;
    }
    chunks
}

/// The spill store tool.
#[derive(Default)]
pub struct ContentProvider;

impl ContentProvider {
    pub fn new() -> Self {
        Self
    }

    /// Store a content-part list, returning `{store_id, total_items}`.
    pub fn handle_write(args: &Value) -> ToolResult {
        let max_chunk_size = args["max_chunk_size"]
            .as_u64()
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_CHUNK_SIZE);

        let Some(content) = args["content"].as_array() else {
            return ToolResult::error("`content` is required and must be an array");
        };

        let mut processed: Vec<Value> = Vec::new();
        let mut text_buffer = String::new();

        for item in content {
            let Some(kind) = item.get("type").and_then(Value::as_str) else {
                return ToolResult::error("Each content item must have a `type` field");
            };
            match kind {
                "text" => {
                    let Some(text) = item.get("text").and_then(Value::as_str) else {
                        return ToolResult::error(
                            "Text items must have a `text` field with string value",
                        );
                    };
                    if !text_buffer.is_empty() {
                        text_buffer.push_str("\n\n");
                    }
                    text_buffer.push_str(text);
                }
                "image_url" => {
                    if !text_buffer.is_empty() {
                        processed.extend(split_text_into_chunks(&text_buffer, max_chunk_size));
                        text_buffer.clear();
                    }
                    let valid = item
                        .get("image_url")
                        .and_then(|i| i.get("url"))
                        .and_then(Value::as_str)
                        .is_some();
                    if !valid {
                        return ToolResult::error(
                            "Image items must have an `image_url` field with a `url` property",
                        );
                    }
                    // Images are never split.
                    processed.push(item.clone());
                }
                other => {
                    return ToolResult::error(format!("Unsupported content type: {other}"));
                }
            }
        }
        if !text_buffer.is_empty() {
            processed.extend(split_text_into_chunks(&text_buffer, max_chunk_size));
        }

        let mut store = STORE.lock().unwrap_or_else(|e| e.into_inner());
        let store_id = format!("content_{}", store.current_id);
        if store.entries.contains_key(&store_id) {
            warn!(store_id, "Store ID already exists, it will be overwritten");
        }
        store.current_id = (store.current_id + 1) % MAX_STORE_ID;

        let total_items = processed.len();
        store.entries.insert(store_id.clone(), processed);

        let result = json!({"store_id": store_id, "total_items": total_items});
        ToolResult::new(serde_json::to_string_pretty(&result).unwrap_or_default())
    }

    /// Page through stored content by cursor.
    pub fn handle_read(args: &Value) -> ToolResult {
        let Some(cursor) = args["cursor"].as_str() else {
            return ToolResult::error("`cursor` is required for read operations");
        };

        let store = STORE.lock().unwrap_or_else(|e| e.into_inner());

        match cursor {
            "start" => {
                if store.entries.is_empty() {
                    return ToolResult::new(
                        "No content available. Use `write` operation to store content first.",
                    );
                }
                let mut stores: Vec<&String> = store.entries.keys().collect();
                stores.sort();
                let available: Vec<Value> = stores
                    .into_iter()
                    .map(|id| {
                        json!({
                            "store_id": id,
                            "total_items": store.entries[id].len(),
                        })
                    })
                    .collect();
                let result = json!({
                    "available_stores": available,
                    "next_cursor": "select_store",
                });
                ToolResult::new(serde_json::to_string_pretty(&result).unwrap_or_default())
            }
            "select_store" => {
                ToolResult::error("Please provide a store_id as cursor in format `content_X:Y`")
            }
            "end" => ToolResult::new("You have reached the end of the content."),
            _ if cursor.contains(':') => {
                let (store_id, index) = cursor.split_once(':').unwrap_or((cursor, ""));
                let Ok(index) = index.parse::<usize>() else {
                    return ToolResult::error("Invalid cursor format");
                };
                let Some(items) = store.entries.get(store_id) else {
                    return ToolResult::error(format!("Store ID `{store_id}` not found"));
                };
                if index >= items.len() {
                    return ToolResult::error("Index out of range");
                }

                let mut result = items[index].clone();
                if index + 1 < items.len() {
                    result["next_cursor"] = json!(format!("{store_id}:{}", index + 1));
                    result["remaining_items"] = json!(items.len() - index - 1);
                } else {
                    result["next_cursor"] = json!("end");
                    result["remaining_items"] = json!(0);
                }
                ToolResult::new(serde_json::to_string_pretty(&result).unwrap_or_default())
            }
            _ => ToolResult::error("Invalid cursor format"),
        }
    }
}

#[async_trait]
impl Tool for ContentProvider {
    fn name(&self) -> &str {
        "content_provider"
    }

    fn description(&self) -> &str {
        "Use this tool to save temporary content for later use. For example, you can save a \
         large code file (like HTML) and read it by chunks later."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "description": "The operation to perform: `write` to save content, `read` to retrieve content",
                    "enum": ["write", "read"]
                },
                "content": {
                    "type": "array",
                    "description": "The content to store. Required when operation is `write` (the `read` operation will return the same format). Format: [{'type': 'text', 'text': <content>}, {'type': 'image_url', 'image_url': {'url': <image_url>}}]",
                    "items": {
                        "type": "object",
                        "properties": {
                            "type": {
                                "type": "string",
                                "enum": ["text", "image_url"]
                            },
                            "text": {
                                "type": "string",
                                "description": "Text content. Required when type is `text`."
                            },
                            "image_url": {
                                "type": "object",
                                "description": "Image URL information. Required when type is `image_url`.",
                                "properties": {
                                    "url": {
                                        "type": "string",
                                        "description": "URL of the image"
                                    }
                                }
                            }
                        }
                    }
                },
                "cursor": {
                    "type": "string",
                    "description": "The cursor position for reading content. Required when operation is `read`. Use `start` for the beginning or the cursor returned from a previous read."
                },
                "max_chunk_size": {
                    "type": "integer",
                    "description": "Maximum size in characters for each text chunk. Default is 4000. Used by `write` operation.",
                    "default": 4000
                }
            },
            "required": ["operation"]
        })
    }

    async fn execute(&self, arguments: Value) -> ToolResult {
        match arguments["operation"].as_str() {
            Some("write") => Self::handle_write(&arguments),
            Some("read") => Self::handle_read(&arguments),
            Some(other) => {
                ToolResult::error(format!("Unknown operation `{other}`. Please use `write` or `read`"))
            }
            None => ToolResult::error("`operation` is required"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written_store_id(result: &ToolResult) -> (String, usize) {
        let parsed: Value = serde_json::from_str(&result.to_text()).unwrap();
        (
            parsed["store_id"].as_str().unwrap().to_string(),
            parsed["total_items"].as_u64().unwrap() as usize,
        )
    }

    #[test]
    fn long_text_splits_into_bounded_chunks() {
        let text = "x".repeat(10_000);
        let result = ContentProvider::handle_write(&json!({
            "content": [{"type": "text", "text": text}],
            "max_chunk_size": 4000,
        }));
        assert!(!result.is_error());
        let (store_id, total_items) = written_store_id(&result);
        assert_eq!(total_items, 3);

        // Page through and reassemble.
        let mut reassembled = String::new();
        let mut sizes = Vec::new();
        for index in 0..3 {
            let read = ContentProvider::handle_read(&json!({
                "cursor": format!("{store_id}:{index}"),
            }));
            let chunk: Value = serde_json::from_str(&read.to_text()).unwrap();
            let text = chunk["text"].as_str().unwrap();
            assert!(text.len() <= 4000);
            sizes.push(text.len());
            reassembled.push_str(text);
            if index < 2 {
                assert_eq!(
                    chunk["next_cursor"].as_str().unwrap(),
                    format!("{store_id}:{}", index + 1)
                );
                assert_eq!(chunk["remaining_items"].as_u64().unwrap(), (2 - index) as u64);
            } else {
                assert_eq!(chunk["next_cursor"], json!("end"));
                assert_eq!(chunk["remaining_items"], json!(0));
            }
        }
        assert_eq!(sizes, vec![4000, 4000, 2000]);
        assert_eq!(reassembled.len(), 10_000);
    }

    #[test]
    fn adjacent_text_parts_join_with_blank_line() {
        let result = ContentProvider::handle_write(&json!({
            "content": [
                {"type": "text", "text": "first"},
                {"type": "text", "text": "second"},
            ],
        }));
        let (store_id, total_items) = written_store_id(&result);
        assert_eq!(total_items, 1);

        let read = ContentProvider::handle_read(&json!({"cursor": format!("{store_id}:0")}));
        let chunk: Value = serde_json::from_str(&read.to_text()).unwrap();
        assert_eq!(chunk["text"], json!("first\n\nsecond"));
    }

    #[test]
    fn utf8_codepoints_are_never_split() {
        // 3-byte codepoints; a 10-byte budget cannot hold 4 of them.
        let text = "一二三四五六七八九十".repeat(30);
        let result = ContentProvider::handle_write(&json!({
            "content": [{"type": "text", "text": text}],
            "max_chunk_size": 10,
        }));
        let (store_id, total_items) = written_store_id(&result);
        assert!(total_items > 0);

        let mut reassembled = String::new();
        for index in 0..total_items {
            let read = ContentProvider::handle_read(&json!({
                "cursor": format!("{store_id}:{index}"),
            }));
            let chunk: Value = serde_json::from_str(&read.to_text()).unwrap();
            let chunk_text = chunk["text"].as_str().expect("chunk must be valid UTF-8");
            assert!(chunk_text.len() <= 10);
            reassembled.push_str(chunk_text);
        }
        assert_eq!(reassembled, text);
    }

    #[test]
    fn splits_prefer_natural_breaks() {
        let text = "alpha beta gamma delta epsilon zeta".repeat(10);
        let result = ContentProvider::handle_write(&json!({
            "content": [{"type": "text", "text": text}],
            "max_chunk_size": 50,
        }));
        let (store_id, total_items) = written_store_id(&result);

        // Every chunk except the last ends on a break character.
        for index in 0..total_items - 1 {
            let read = ContentProvider::handle_read(&json!({
                "cursor": format!("{store_id}:{index}"),
            }));
            let chunk: Value = serde_json::from_str(&read.to_text()).unwrap();
            let chunk_text = chunk["text"].as_str().unwrap();
            let last = chunk_text.as_bytes()[chunk_text.len() - 1];
            assert!(is_break_byte(last), "chunk ended with {:?}", last as char);
        }
    }

    #[test]
    fn images_are_interleaved_not_split() {
        let result = ContentProvider::handle_write(&json!({
            "content": [
                {"type": "text", "text": "before"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,AA"}},
                {"type": "text", "text": "after"},
            ],
        }));
        let (store_id, total_items) = written_store_id(&result);
        assert_eq!(total_items, 3);

        let read = ContentProvider::handle_read(&json!({"cursor": format!("{store_id}:1")}));
        let chunk: Value = serde_json::from_str(&read.to_text()).unwrap();
        assert_eq!(chunk["type"], json!("image_url"));
    }

    #[test]
    fn read_cursor_validation() {
        let missing = ContentProvider::handle_read(&json!({}));
        assert!(missing.is_error());

        let select = ContentProvider::handle_read(&json!({"cursor": "select_store"}));
        assert!(select.is_error());
        assert!(select.to_text().contains("content_X:Y"));

        let bogus = ContentProvider::handle_read(&json!({"cursor": "sideways"}));
        assert!(bogus.to_text().contains("Invalid cursor format"));

        let unknown = ContentProvider::handle_read(&json!({"cursor": "content_9999:0"}));
        assert!(unknown.to_text().contains("not found"));

        let end = ContentProvider::handle_read(&json!({"cursor": "end"}));
        assert!(!end.is_error());
        assert!(end.to_text().contains("end of the content"));
    }

    #[test]
    fn start_lists_available_stores() {
        let result = ContentProvider::handle_write(&json!({
            "content": [{"type": "text", "text": "listed"}],
        }));
        let (store_id, _) = written_store_id(&result);

        let read = ContentProvider::handle_read(&json!({"cursor": "start"}));
        let listing: Value = serde_json::from_str(&read.to_text()).unwrap();
        assert_eq!(listing["next_cursor"], json!("select_store"));
        let ids: Vec<&str> = listing["available_stores"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["store_id"].as_str().unwrap())
            .collect();
        assert!(ids.contains(&store_id.as_str()));
    }

    #[tokio::test]
    async fn write_rejects_bad_items() {
        let tool = ContentProvider::new();
        let no_content = tool.execute(json!({"operation": "write"})).await;
        assert!(no_content.is_error());

        let untyped = tool
            .execute(json!({"operation": "write", "content": [{"text": "x"}]}))
            .await;
        assert!(untyped.is_error());

        let bad_kind = tool
            .execute(json!({"operation": "write", "content": [{"type": "audio"}]}))
            .await;
        assert!(bad_kind.to_text().contains("Unsupported content type"));

        let bad_op = tool.execute(json!({"operation": "zap"})).await;
        assert!(bad_op.to_text().contains("Unknown operation"));
    }
}

//! Notion block payloads built from the small markdown subset the pipeline
//! produces (headings, lists, quotes, code fences, paragraphs).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

/// Notion rejects rich text items longer than this many characters.
pub const RICH_TEXT_LIMIT: usize = 2000;

/// Notion accepts at most this many children per create/append request.
pub const MAX_CHILDREN_PER_REQUEST: usize = 100;

static NUMBERED_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+[.)]\s+").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Heading1,
    Heading2,
    Heading3,
    Bulleted,
    Numbered,
    Quote,
    Code,
    Paragraph,
}

impl BlockKind {
    fn api_name(self) -> &'static str {
        match self {
            BlockKind::Heading1 => "heading_1",
            BlockKind::Heading2 => "heading_2",
            BlockKind::Heading3 => "heading_3",
            BlockKind::Bulleted => "bulleted_list_item",
            BlockKind::Numbered => "numbered_list_item",
            BlockKind::Quote => "quote",
            BlockKind::Code => "code",
            BlockKind::Paragraph => "paragraph",
        }
    }

    /// Consecutive lines of these kinds are merged into one block.
    fn merges_lines(self) -> bool {
        matches!(self, BlockKind::Paragraph | BlockKind::Quote)
    }
}

fn classify(line: &str) -> (BlockKind, &str) {
    if let Some(rest) = line.strip_prefix("### ") {
        (BlockKind::Heading3, rest)
    } else if let Some(rest) = line.strip_prefix("## ") {
        (BlockKind::Heading2, rest)
    } else if let Some(rest) = line.strip_prefix("# ") {
        (BlockKind::Heading1, rest)
    } else if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        (BlockKind::Bulleted, rest)
    } else if let Some(rest) = line.strip_prefix("> ") {
        (BlockKind::Quote, rest)
    } else if let Some(m) = NUMBERED_ITEM.find(line) {
        (BlockKind::Numbered, &line[m.end()..])
    } else {
        (BlockKind::Paragraph, line)
    }
}

/// Split `text` into rich text items of at most `RICH_TEXT_LIMIT` characters,
/// never cutting inside a UTF-8 character.
pub fn rich_text(text: &str) -> Vec<Value> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    chars
        .chunks(RICH_TEXT_LIMIT)
        .map(|chunk| {
            let content: String = chunk.iter().collect();
            json!({ "type": "text", "text": { "content": content } })
        })
        .collect()
}

fn block(kind: BlockKind, text: &str) -> Value {
    let name = kind.api_name();
    let mut inner = json!({ "rich_text": rich_text(text) });
    if kind == BlockKind::Code {
        inner["language"] = json!("plain text");
    }
    json!({ "object": "block", "type": name, name: inner })
}

fn flush(current: &mut Option<(BlockKind, Vec<&str>)>, blocks: &mut Vec<Value>) {
    if let Some((kind, lines)) = current.take() {
        blocks.push(block(kind, &lines.join("\n")));
    }
}

/// Convert markdown into Notion block objects. Blank lines end the current
/// block; list items and headings are one block per line. Everything between
/// a pair of ``` fences, blank lines included, becomes a single code block.
pub fn markdown_to_blocks(markdown: &str) -> Vec<Value> {
    let mut blocks = Vec::new();
    let mut current: Option<(BlockKind, Vec<&str>)> = None;
    let mut fence: Option<Vec<&str>> = None;

    for line in markdown.lines() {
        let is_fence = line.trim_start().starts_with("```");
        if fence.is_some() {
            if is_fence {
                if let Some(code) = fence.take() {
                    blocks.push(block(BlockKind::Code, &code.join("\n")));
                }
            } else if let Some(code) = fence.as_mut() {
                code.push(line);
            }
            continue;
        }
        if is_fence {
            flush(&mut current, &mut blocks);
            fence = Some(Vec::new());
            continue;
        }
        if line.trim().is_empty() {
            flush(&mut current, &mut blocks);
            continue;
        }
        let (kind, text) = classify(line);
        let continues = matches!(&current, Some((k, _)) if *k == kind && kind.merges_lines());
        if continues {
            if let Some((_, lines)) = current.as_mut() {
                lines.push(text);
            }
        } else {
            flush(&mut current, &mut blocks);
            current = Some((kind, vec![text]));
        }
    }
    flush(&mut current, &mut blocks);
    // An unterminated fence keeps what it collected.
    if let Some(code) = fence {
        blocks.push(block(BlockKind::Code, &code.join("\n")));
    }
    blocks
}

#[derive(Deserialize)]
pub(crate) struct CreatePageResponse {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(block: &Value) -> String {
        let kind = block["type"].as_str().unwrap();
        block[kind]["rich_text"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["text"]["content"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn converts_page_body_sections() {
        let md = "## Summary\n\nKey points here.\nSecond line.\n\n## Full transcription\n\nhello world";
        let blocks = markdown_to_blocks(md);
        let kinds: Vec<&str> = blocks.iter().map(|b| b["type"].as_str().unwrap()).collect();
        assert_eq!(
            kinds,
            vec!["heading_2", "paragraph", "heading_2", "paragraph"]
        );
        assert_eq!(content(&blocks[1]), "Key points here.\nSecond line.");
        assert_eq!(content(&blocks[3]), "hello world");
        assert_eq!(blocks[0]["object"], "block");
    }

    #[test]
    fn list_items_become_separate_blocks() {
        let md = "- one\n* two\n1. first\n12) twelfth\n> quoted\n> more";
        let blocks = markdown_to_blocks(md);
        let kinds: Vec<&str> = blocks.iter().map(|b| b["type"].as_str().unwrap()).collect();
        assert_eq!(
            kinds,
            vec![
                "bulleted_list_item",
                "bulleted_list_item",
                "numbered_list_item",
                "numbered_list_item",
                "quote"
            ]
        );
        assert_eq!(content(&blocks[3]), "twelfth");
        assert_eq!(content(&blocks[4]), "quoted\nmore");
    }

    #[test]
    fn long_text_is_chunked_on_char_boundaries() {
        let text = "я".repeat(RICH_TEXT_LIMIT + 10);
        let items = rich_text(&text);
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0]["text"]["content"].as_str().unwrap().chars().count(),
            RICH_TEXT_LIMIT
        );
        assert_eq!(
            items[1]["text"]["content"].as_str().unwrap().chars().count(),
            10
        );
        assert!(rich_text("").is_empty());
    }

    #[test]
    fn fenced_lines_stay_inside_one_code_block() {
        let md = "intro\n```rust\n- not a bullet\n\n# not a heading\n```\n- real bullet";
        let blocks = markdown_to_blocks(md);
        let kinds: Vec<&str> = blocks.iter().map(|b| b["type"].as_str().unwrap()).collect();
        assert_eq!(kinds, vec!["paragraph", "code", "bulleted_list_item"]);
        assert_eq!(content(&blocks[1]), "- not a bullet\n\n# not a heading");
        assert_eq!(blocks[1]["code"]["language"], "plain text");
        assert_eq!(content(&blocks[2]), "real bullet");
    }

    #[test]
    fn unterminated_fence_keeps_its_lines() {
        let blocks = markdown_to_blocks("```\nlet x = 1;");
        assert_eq!(blocks.len(), 1);
        assert_eq!(content(&blocks[0]), "let x = 1;");
    }
}

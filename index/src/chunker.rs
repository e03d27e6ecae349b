//! Structural chunker (C9): splits a file into addressable chunks along
//! language-aware boundaries, falling back to a fixed-size sliding window
//! when no parser/regex dispatch applies.
//!
//! Go is parsed with `tree-sitter` into top-level declarations; Python,
//! JS/TS, and Java use anchored regexes matching top-level declaration
//! keywords; anything else gets a heuristic regex pass and, failing that,
//! the sliding window.

use std::sync::LazyLock;

use regex::Regex;

use crate::chunk::Chunk;

const WINDOW_SIZE: usize = 50;
const WINDOW_OVERLAP: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    Go,
    Python,
    JavaScriptLike,
    Java,
    Unknown,
}

fn detect_language(file_path: &str) -> Language {
    let ext = file_path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "go" => Language::Go,
        "py" => Language::Python,
        "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" => Language::JavaScriptLike,
        "java" => Language::Java,
        _ => Language::Unknown,
    }
}

static PYTHON_DECL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(?:async\s+def|def|class)\s").expect("valid regex"));

static JS_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:export\s+)?(?:default\s+)?(?:async\s+)?(?:function|class)\b")
        .expect("valid regex")
});

static JAVA_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:public|private|protected|static|final|abstract)[\w\s<>\[\],]*\b(?:class|interface|enum)\s")
        .expect("valid regex")
});

static HEURISTIC_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:function|def|class|fn|func|struct|impl|trait|module)\b").expect("valid regex")
});

/// Split `content` (the file at `file_path`) into chunks. Never returns a
/// chunk whose content is whitespace-only.
#[must_use]
pub fn chunk_file(file_path: &str, content: &str) -> Vec<Chunk> {
    let chunks = match detect_language(file_path) {
        Language::Go => chunk_go(file_path, content).unwrap_or_else(|| chunk_sliding_window(file_path, content)),
        Language::Python => chunk_anchored(file_path, content, &PYTHON_DECL),
        Language::JavaScriptLike => chunk_anchored(file_path, content, &JS_DECL),
        Language::Java => chunk_anchored(file_path, content, &JAVA_DECL),
        Language::Unknown => {
            let heuristic = chunk_anchored(file_path, content, &HEURISTIC_DECL);
            if heuristic.is_empty() {
                chunk_sliding_window(file_path, content)
            } else {
                heuristic
            }
        }
    };
    chunks.into_iter().filter(|c| !c.is_whitespace_only()).collect()
}

fn chunk_go(file_path: &str, content: &str) -> Option<Vec<Chunk>> {
    let mut parser = tree_sitter::Parser::new();
    parser.set_language(&tree_sitter_go::LANGUAGE.into()).ok()?;
    let tree = parser.parse(content, None)?;
    let root = tree.root_node();
    if root.has_error() {
        return None;
    }

    let lines: Vec<&str> = content.lines().collect();
    let mut chunks = Vec::new();
    let mut cursor = root.walk();
    for node in root.children(&mut cursor) {
        if !is_top_level_declaration(node.kind()) {
            continue;
        }
        let line_start = node.start_position().row as u32 + 1;
        let line_end = node.end_position().row as u32 + 1;
        let text = slice_lines(&lines, line_start, line_end);
        chunks.push(Chunk::new(file_path, line_start, line_end, text));
    }
    Some(chunks)
}

fn is_top_level_declaration(kind: &str) -> bool {
    matches!(
        kind,
        "function_declaration" | "method_declaration" | "type_declaration" | "const_declaration" | "var_declaration"
    )
}

fn chunk_anchored(file_path: &str, content: &str, decl: &Regex) -> Vec<Chunk> {
    let lines: Vec<&str> = content.lines().collect();
    let mut byte_to_line = Vec::with_capacity(content.len());
    for (line_idx, line) in lines.iter().enumerate() {
        byte_to_line.resize(byte_to_line.len() + line.len() + 1, line_idx);
    }

    let mut starts: Vec<u32> = decl
        .find_iter(content)
        .map(|m| byte_to_line.get(m.start()).copied().unwrap_or(0) as u32 + 1)
        .collect();
    starts.dedup();

    if starts.is_empty() {
        return Vec::new();
    }

    let total_lines = lines.len() as u32;
    let mut chunks = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).map_or(total_lines, |next| next - 1);
        let text = slice_lines(&lines, start, end);
        chunks.push(Chunk::new(file_path, start, end, text));
    }
    chunks
}

fn chunk_sliding_window(file_path: &str, content: &str) -> Vec<Chunk> {
    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len();
    if total == 0 {
        return Vec::new();
    }

    let stride = WINDOW_SIZE - WINDOW_OVERLAP;
    let mut chunks = Vec::new();
    let mut start0 = 0usize;
    loop {
        let end0 = (start0 + WINDOW_SIZE).min(total);
        let line_start = start0 as u32 + 1;
        let line_end = end0 as u32;
        let text = slice_lines(&lines, line_start, line_end);
        chunks.push(Chunk::new(file_path, line_start, line_end, text));
        if end0 >= total {
            break;
        }
        start0 += stride;
    }
    chunks
}

fn slice_lines(lines: &[&str], line_start: u32, line_end: u32) -> String {
    let start = line_start.saturating_sub(1) as usize;
    let end = (line_end as usize).min(lines.len());
    if start >= end {
        return String::new();
    }
    lines[start..end].join("\n")
}

//! Section-path bookkeeping shared by every normalizer.

use crate::error::InputError;
use crate::types::{infer_title, BlockKind, ContentBlock, DocumentFormat, NormalizedDocument};
use regex::Regex;
use std::sync::LazyLock;

/// Deepest heading level any normalizer reports
pub const MAX_DEPTH: u32 = 6;

static NUMBERED_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+\.(\d+\.?)*|\d+(\.\d+)+|[A-Z]\.)\s+\S.{0,80}$").unwrap()
});
static CHAPTER_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(chapter|section)\s+(\d+|[ivxlc]+)\b").unwrap());
static CJK_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^第[一二三四五六七八九十百零\d]+[章节部分篇]").unwrap());

/// Text-pattern heading test used where no structural markers exist.
/// Only ever yields a single level.
pub fn looks_like_heading(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() || text.chars().count() >= 120 {
        return false;
    }
    // a numbered sentence is a list item, not a heading
    if text.ends_with(['.', '。', ';', '；', ',', '，']) {
        return false;
    }
    NUMBERED_HEADING.is_match(text) || CHAPTER_HEADING.is_match(text) || CJK_HEADING.is_match(text)
}

/// Tracks open headings and stamps each block with its section path
#[derive(Debug, Default)]
pub struct OutlineBuilder {
    open: Vec<(u32, String)>,
    blocks: Vec<ContentBlock>,
}

impl OutlineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn path(&self) -> Vec<String> {
        self.open.iter().map(|(_, title)| title.clone()).collect()
    }

    /// A level-N heading closes every open heading of level >= N
    pub fn heading(&mut self, text: &str, level: u32) -> Option<&mut ContentBlock> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let level = level.clamp(1, MAX_DEPTH);
        self.open.retain(|(open_level, _)| *open_level < level);
        let block = ContentBlock::heading(text, level, self.path(), self.blocks.len());
        self.open.push((level, block.text.clone()));
        self.blocks.push(block);
        self.blocks.last_mut()
    }

    pub fn paragraph(&mut self, text: &str) -> Option<&mut ContentBlock> {
        self.push(BlockKind::Paragraph, text)
    }

    pub fn table_cell(&mut self, text: &str) -> Option<&mut ContentBlock> {
        self.push(BlockKind::TableCell, text)
    }

    fn push(&mut self, kind: BlockKind, text: &str) -> Option<&mut ContentBlock> {
        if text.trim().is_empty() {
            return None;
        }
        let block = ContentBlock::new(kind, text, self.path(), self.blocks.len());
        self.blocks.push(block);
        self.blocks.last_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Assemble the document, failing when nothing was extracted
    pub fn finish(
        self,
        format: DocumentFormat,
        metadata_title: Option<&str>,
        fallback_title: &str,
        page_count: Option<u32>,
    ) -> Result<NormalizedDocument, InputError> {
        if self.blocks.is_empty() {
            return Err(InputError::EmptyDocument);
        }
        let title = infer_title(metadata_title, &self.blocks, fallback_title);
        Ok(NormalizedDocument {
            title,
            format,
            blocks: self.blocks,
            page_count,
        })
    }
}

/// Assigns heading levels from font sizes as headings are met in reading order.
/// Smaller than the previous heading goes one deeper, a close match stays at the
/// same level, and a larger size steps back up to the level that size was first seen at.
#[derive(Debug, Clone)]
pub struct FontHierarchy {
    current_level: u32,
    previous_size: Option<f32>,
    level_sizes: Vec<f32>,
    tolerance: f32,
}

impl Default for FontHierarchy {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl FontHierarchy {
    pub fn new(tolerance: f32) -> Self {
        Self {
            current_level: 1,
            previous_size: None,
            level_sizes: Vec::new(),
            tolerance,
        }
    }

    pub fn level_for(&mut self, size: f32) -> u32 {
        let level = match self.previous_size {
            None => {
                self.level_sizes = vec![size];
                1
            }
            Some(prev) if (size - prev).abs() < self.tolerance => self.current_level,
            Some(prev) if size < prev => (self.current_level + 1).min(MAX_DEPTH),
            Some(_) => self.level_for_larger(size),
        };

        while self.level_sizes.len() < level as usize {
            self.level_sizes.push(0.0);
        }
        self.level_sizes[level as usize - 1] = size;
        self.level_sizes.truncate(level as usize);
        self.current_level = level;
        self.previous_size = Some(size);
        level
    }

    fn level_for_larger(&self, size: f32) -> u32 {
        if let Some(idx) = self
            .level_sizes
            .iter()
            .position(|s| (size - s).abs() < self.tolerance)
        {
            return idx as u32 + 1;
        }
        self.level_sizes
            .iter()
            .position(|s| size > *s)
            .map_or(1, |idx| idx as u32 + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_closes_deeper_and_equal_levels() {
        let mut outline = OutlineBuilder::new();
        outline.heading("Accounts", 1);
        outline.heading("Login", 2);
        outline.paragraph("User enters a password");
        outline.heading("Logout", 2);
        outline.paragraph("Session ends");
        outline.heading("Billing", 1);
        outline.table_cell("Invoice");

        let doc = outline.finish(DocumentFormat::Docx, None, "file", None).unwrap();
        let paths: Vec<Vec<String>> = doc.blocks.iter().map(|b| b.section_path.clone()).collect();
        assert_eq!(paths[0], Vec::<String>::new());
        assert_eq!(paths[1], vec!["Accounts"]);
        assert_eq!(paths[2], vec!["Accounts", "Login"]);
        assert_eq!(paths[4], vec!["Accounts", "Logout"]);
        assert_eq!(paths[6], vec!["Billing"]);
        assert_eq!(doc.title, "Accounts");
        assert_eq!(doc.blocks[6].order_index, 6);
    }

    #[test]
    fn empty_outline_is_an_empty_document() {
        let mut outline = OutlineBuilder::new();
        outline.paragraph("   ");
        let err = outline.finish(DocumentFormat::Pdf, None, "f", Some(1)).unwrap_err();
        assert!(matches!(err, InputError::EmptyDocument));
    }

    #[test]
    fn font_hierarchy_steps_down_and_back_up() {
        let mut h = FontHierarchy::default();
        assert_eq!(h.level_for(20.0), 1);
        assert_eq!(h.level_for(16.0), 2);
        assert_eq!(h.level_for(14.0), 3);
        assert_eq!(h.level_for(16.0), 2);
        assert_eq!(h.level_for(20.2), 1);
        assert_eq!(h.level_for(24.0), 1);
    }

    #[test]
    fn heading_patterns() {
        assert!(looks_like_heading("1. Introduction"));
        assert!(looks_like_heading("2.3 User Management"));
        assert!(looks_like_heading("Chapter 4 Reporting"));
        assert!(looks_like_heading("第三章 用户管理"));
        assert!(looks_like_heading("B. Appendix"));
        assert!(!looks_like_heading("1. The user shall log in with a password."));
        assert!(!looks_like_heading("Plain sentence about things"));
    }
}

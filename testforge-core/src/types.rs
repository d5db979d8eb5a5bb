use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ===== NORMALIZED INPUT =====
// Produced once by a Normalizer, consumed by the Prompter.

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Heading,
    Paragraph,
    TableCell,
}

/// One normalized unit of source text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentBlock {
    pub kind: BlockKind,
    pub text: String,
    /// Titles of the ancestor headings, outermost first.
    /// For a heading block this does not include the heading itself.
    pub section_path: Vec<String>,
    pub order_index: usize,
    /// Heading level (1 = top level). Only set for headings.
    pub level: Option<u32>,
    /// 1-indexed page for fixed-layout formats (PDF)
    pub page: Option<u32>,
}

impl ContentBlock {
    pub fn new(kind: BlockKind, text: &str, section_path: Vec<String>, order_index: usize) -> Self {
        Self {
            kind,
            text: text.trim().to_string(),
            section_path,
            order_index,
            level: None,
            page: None,
        }
    }

    pub fn heading(text: &str, level: u32, section_path: Vec<String>, order_index: usize) -> Self {
        let mut block = Self::new(BlockKind::Heading, text, section_path, order_index);
        block.level = Some(level);
        block
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn is_heading(&self) -> bool {
        self.kind == BlockKind::Heading
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Docx,
    Doc,
    Pdf,
}

impl DocumentFormat {
    /// Map a file extension (without the dot, any case) to a supported format
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "docx" => Some(Self::Docx),
            "doc" => Some(Self::Doc),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Docx => "docx",
            Self::Doc => "doc",
            Self::Pdf => "pdf",
        }
    }
}

/// Complete output of document normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedDocument {
    pub title: String,
    pub format: DocumentFormat,
    pub blocks: Vec<ContentBlock>,
    /// Only known for paginated formats
    pub page_count: Option<u32>,
}

impl NormalizedDocument {
    pub fn heading_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_heading()).count()
    }
}

/// Pick a document title: explicit metadata, then the first heading,
/// then the first non-empty block, then the fallback (usually the file stem).
pub fn infer_title(metadata_title: Option<&str>, blocks: &[ContentBlock], fallback: &str) -> String {
    metadata_title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| {
            blocks
                .iter()
                .find(|b| b.is_heading())
                .or_else(|| blocks.first())
                .map(|b| b.text.clone())
        })
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

// ===== EXTRACTION REQUEST =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ModelBackend {
    #[serde(alias = "gpt", alias = "provider_a")]
    OpenAi,
    #[serde(alias = "claude", alias = "provider_b")]
    Anthropic,
}

impl ModelBackend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }
}

impl std::str::FromStr for ModelBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "gpt" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            other => Err(format!("unknown model backend '{other}' (expected openai or anthropic)")),
        }
    }
}

/// Everything the Prompter and AI adapter need for one extraction call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub document_title: String,
    pub content_blocks: Vec<ContentBlock>,
    pub enable_defect_detection: bool,
    pub enable_question_generation: bool,
    pub model_backend: ModelBackend,
    /// Upper bound on the rendered outline length, in chars
    pub max_content_chars: usize,
}

// ===== TEST CASE TREE =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Functional,
    Performance,
    Security,
    Boundary,
}

impl Category {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Functional => "Functional",
            Self::Performance => "Performance",
            Self::Security => "Security",
            Self::Boundary => "Boundary",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioKind {
    Normal,
    Exception,
    Boundary,
}

impl ScenarioKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Exception => "Exception",
            Self::Boundary => "Boundary",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    Green,
    Yellow,
    Red,
}

impl ConfidenceTier {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Red => "red",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Root,
    Module,
    Category,
    Scenario,
    Case,
}

/// Free-text details the model attaches to a single case
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CaseDetails {
    pub description: Option<String>,
    pub preconditions: Option<String>,
    pub steps: Vec<String>,
    pub expected_result: Option<String>,
    pub confidence_reason: Option<String>,
    pub missing_info: Vec<String>,
    /// True when the model gave no usable confidence value
    pub score_missing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCaseNode {
    pub kind: NodeKind,
    pub title: String,
    /// Set on category, scenario and case nodes
    pub category: Option<Category>,
    /// Set on scenario and case nodes
    pub scenario_kind: Option<ScenarioKind>,
    /// 0.0..=1.0. For group nodes this is the lowest score among descendant cases.
    pub confidence_score: f64,
    pub details: Option<CaseDetails>,
    pub children: Vec<TestCaseNode>,
}

impl TestCaseNode {
    pub fn root(title: &str) -> Self {
        Self::group(NodeKind::Root, title, None, None)
    }

    pub fn group(
        kind: NodeKind,
        title: &str,
        category: Option<Category>,
        scenario_kind: Option<ScenarioKind>,
    ) -> Self {
        Self {
            kind,
            title: title.to_string(),
            category,
            scenario_kind,
            confidence_score: 0.0,
            details: None,
            children: Vec::new(),
        }
    }

    pub fn case(
        title: &str,
        category: Category,
        scenario_kind: ScenarioKind,
        confidence_score: f64,
        details: CaseDetails,
    ) -> Self {
        Self {
            kind: NodeKind::Case,
            title: title.to_string(),
            category: Some(category),
            scenario_kind: Some(scenario_kind),
            confidence_score,
            details: Some(details),
            children: Vec::new(),
        }
    }

    /// Tier is always derived, never stored
    pub fn confidence_tier(&self) -> ConfidenceTier {
        crate::classifier::classify(self.confidence_score)
    }

    /// All case nodes under (and including) this node, depth-first
    pub fn cases(&self) -> Vec<&TestCaseNode> {
        let mut out = Vec::new();
        self.collect_cases(&mut out);
        out
    }

    fn collect_cases<'a>(&'a self, out: &mut Vec<&'a TestCaseNode>) {
        if self.kind == NodeKind::Case {
            out.push(self);
        }
        for child in &self.children {
            child.collect_cases(out);
        }
    }

    pub fn case_count(&self) -> usize {
        self.cases().len()
    }

    /// Recompute group scores bottom-up as the minimum of descendant case scores.
    /// Returns the subtree minimum, or None when the subtree holds no cases.
    pub fn propagate_scores(&mut self) -> Option<f64> {
        if self.kind == NodeKind::Case {
            return Some(self.confidence_score);
        }
        let min = self
            .children
            .iter_mut()
            .filter_map(|c| c.propagate_scores())
            .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.min(s))));
        self.confidence_score = min.unwrap_or(0.0);
        min
    }
}

// ===== QUESTIONS & DEFECTS =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn label(&self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }
}

/// Severity shares the three-level scale with question priority
pub type Severity = Priority;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionItem {
    pub text: String,
    pub priority: Priority,
    pub related_section: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DefectKind {
    Ambiguous,
    Contradictory,
    Missing,
}

impl DefectKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ambiguous => "Ambiguous",
            Self::Contradictory => "Contradictory",
            Self::Missing => "Missing",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DefectItem {
    pub kind: DefectKind,
    pub severity: Severity,
    pub description: String,
    pub related_section: Option<String>,
    pub suggestion: Option<String>,
}

// ===== RESULT =====

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Statistics {
    pub total_cases: usize,
    pub green_cases: usize,
    pub yellow_cases: usize,
    pub red_cases: usize,
    pub green_percentage: f64,
    pub yellow_percentage: f64,
    pub red_percentage: f64,
    pub questions_count: usize,
    pub defects_count: usize,
    pub modules_count: usize,
}

/// Aggregate handed to the caller. The pipeline keeps no reference to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationResult {
    pub test_tree: TestCaseNode,
    pub questions: Vec<QuestionItem>,
    pub defects: Vec<DefectItem>,
    pub statistics: Statistics,
}

// ===== ARCHIVE =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchiveManifestEntry {
    pub path: String,
    pub media_type: String,
}

impl ArchiveManifestEntry {
    pub fn new(path: &str, media_type: &str) -> Self {
        Self {
            path: path.to_string(),
            media_type: media_type.to_string(),
        }
    }
}

/// Where a generation run should put its archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub document_path: PathBuf,
    /// Explicit archive path; when None a timestamped name under the configured output dir is used
    pub output_path: Option<PathBuf>,
    pub enable_defect_detection: bool,
    pub enable_question_generation: bool,
}

impl GenerationRequest {
    pub fn new(document_path: impl Into<PathBuf>) -> Self {
        Self {
            document_path: document_path.into(),
            output_path: None,
            enable_defect_detection: true,
            enable_question_generation: true,
        }
    }

    pub fn with_output(mut self, output_path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(output_path.into());
        self
    }

    pub fn with_flags(mut self, defects: bool, questions: bool) -> Self {
        self.enable_defect_detection = defects;
        self.enable_question_generation = questions;
        self
    }
}

//! Rendering of the mind-map internal documents (XMind 8 layout).

use super::{ArchiveMeta, COMMENTS_PATH, CONTENT_PATH, META_PATH, STYLES_PATH};
use crate::error::ArchiveError;
use crate::types::{
    CaseDetails, ConfidenceTier, DefectItem, GenerationResult, NodeKind, Priority, QuestionItem, TestCaseNode,
};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::borrow::Cow;

const CONTENT_NS: &str = "urn:xmind:xmap:xmlns:content:2.0";
const STYLES_NS: &str = "urn:xmind:xmap:xmlns:style:2.0";
const COMMENTS_NS: &str = "urn:xmind:xmap:xmlns:comments:2.0";
const META_NS: &str = "urn:xmind:xmap:xmlns:meta:2.0";
const FO_NS: &str = "http://www.w3.org/1999/XSL/Format";
const SVG_NS: &str = "http://www.w3.org/2000/svg";

pub const GREEN_FILL: &str = "#28A745";
pub const YELLOW_FILL: &str = "#FFC107";
pub const RED_FILL: &str = "#DC3545";

/// Fixed style id per confidence tier
pub fn style_id(tier: ConfidenceTier) -> &'static str {
    match tier {
        ConfidenceTier::Green => "tier-green",
        ConfidenceTier::Yellow => "tier-yellow",
        ConfidenceTier::Red => "tier-red",
    }
}

fn fill(tier: ConfidenceTier) -> &'static str {
    match tier {
        ConfidenceTier::Green => GREEN_FILL,
        ConfidenceTier::Yellow => YELLOW_FILL,
        ConfidenceTier::Red => RED_FILL,
    }
}

/// Drop characters XML 1.0 cannot carry at all, even escaped
fn xml_safe(text: &str) -> Cow<'_, str> {
    let allowed = |c: char| {
        !matches!(
            c,
            '\u{0}'..='\u{8}' | '\u{B}' | '\u{C}' | '\u{E}'..='\u{1F}' | '\u{FFFE}' | '\u{FFFF}'
        )
    };
    if text.chars().all(allowed) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.chars().filter(|&c| allowed(c)).collect())
    }
}

/// Thin wrapper over the quick-xml writer for element-at-a-time output
struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    fn new() -> Result<Self, ArchiveError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("no"))))?;
        Ok(Self { writer })
    }

    fn open(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), ArchiveError> {
        let mut start = BytesStart::new(name);
        for &(key, value) in attrs {
            start.push_attribute((key, &*xml_safe(value)));
        }
        self.writer.write_event(Event::Start(start))?;
        Ok(())
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), ArchiveError> {
        let mut start = BytesStart::new(name);
        for &(key, value) in attrs {
            start.push_attribute((key, &*xml_safe(value)));
        }
        self.writer.write_event(Event::Empty(start))?;
        Ok(())
    }

    fn close(&mut self, name: &str) -> Result<(), ArchiveError> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    fn text_element(&mut self, name: &str, text: &str) -> Result<(), ArchiveError> {
        self.open(name, &[])?;
        self.writer.write_event(Event::Text(BytesText::new(&xml_safe(text))))?;
        self.close(name)
    }

    fn finish(self) -> Vec<u8> {
        self.writer.into_inner()
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A topic waiting to be written, with the comment attached to it (if any)
struct Topic {
    id: String,
    title: String,
    style: Option<&'static str>,
    notes: Option<String>,
    labels: Vec<String>,
    comment: Option<String>,
    children: Vec<Topic>,
}

impl Topic {
    fn new(title: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            title: title.into(),
            style: None,
            notes: None,
            labels: Vec::new(),
            comment: None,
            children: Vec::new(),
        }
    }
}

fn case_notes(details: &CaseDetails) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(d) = &details.description {
        parts.push(format!("Description: {d}"));
    }
    if let Some(p) = &details.preconditions {
        parts.push(format!("Preconditions: {p}"));
    }
    if !details.steps.is_empty() {
        let steps: Vec<String> = details
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| format!("  {}. {s}", i + 1))
            .collect();
        parts.push(format!("Steps:\n{}", steps.join("\n")));
    }
    if let Some(e) = &details.expected_result {
        parts.push(format!("Expected result: {e}"));
    }
    if let Some(r) = &details.confidence_reason {
        parts.push(format!("Confidence reason: {r}"));
    }
    if !details.missing_info.is_empty() {
        parts.push(format!("Needs clarification:\n  ? {}", details.missing_info.join("\n  ? ")));
    }
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

fn case_comment(details: &CaseDetails) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(r) = &details.confidence_reason {
        parts.push(r.clone());
    }
    if !details.missing_info.is_empty() {
        parts.push(format!("Missing: {}", details.missing_info.join("; ")));
    }
    (!parts.is_empty()).then(|| parts.join("\n"))
}

fn confidence_label(node: &TestCaseNode) -> String {
    let tier = node.confidence_tier().name();
    match &node.details {
        Some(d) if d.score_missing => format!("Confidence missing ({tier})"),
        _ => format!("Confidence {:.2} ({tier})", node.confidence_score),
    }
}

fn tree_topic(node: &TestCaseNode) -> Topic {
    let mut topic = Topic::new(node.title.clone());
    topic.style = Some(style_id(node.confidence_tier()));

    match node.kind {
        NodeKind::Case => {
            topic.labels.push(confidence_label(node));
            if let Some(details) = &node.details {
                topic.notes = case_notes(details);
                topic.comment = case_comment(details);
            }
        }
        _ => {
            topic.notes = node.details.as_ref().and_then(|d| d.description.clone());
        }
    }
    topic.children = node.children.iter().map(tree_topic).collect();
    topic
}

fn questions_topic(questions: &[QuestionItem]) -> Topic {
    let mut branch = Topic::new("Questions");
    for priority in [Priority::High, Priority::Medium, Priority::Low] {
        let items: Vec<&QuestionItem> = questions.iter().filter(|q| q.priority == priority).collect();
        if items.is_empty() {
            continue;
        }
        let mut group = Topic::new(format!("{} priority", priority.label()));
        for q in items {
            let mut topic = Topic::new(q.text.clone());
            let mut notes = Vec::new();
            if let Some(s) = &q.related_section {
                notes.push(format!("Section: {s}"));
            }
            if let Some(r) = &q.reason {
                notes.push(format!("Reason: {r}"));
            }
            topic.notes = (!notes.is_empty()).then(|| notes.join("\n"));
            group.children.push(topic);
        }
        branch.children.push(group);
    }
    branch
}

fn defects_topic(defects: &[DefectItem]) -> Topic {
    let mut branch = Topic::new("Defects");
    for severity in [Priority::High, Priority::Medium, Priority::Low] {
        let items: Vec<&DefectItem> = defects.iter().filter(|d| d.severity == severity).collect();
        if items.is_empty() {
            continue;
        }
        let mut group = Topic::new(format!("{} severity", severity.label()));
        for d in items {
            let mut topic = Topic::new(format!("[{}] {}", d.kind.label(), d.description));
            let mut notes = Vec::new();
            if let Some(s) = &d.related_section {
                notes.push(format!("Section: {s}"));
            }
            if let Some(s) = &d.suggestion {
                notes.push(format!("Suggestion: {s}"));
            }
            topic.notes = (!notes.is_empty()).then(|| notes.join("\n"));
            group.children.push(topic);
        }
        branch.children.push(group);
    }
    branch
}

fn write_topic(out: &mut XmlOut, topic: &Topic, root: bool) -> Result<(), ArchiveError> {
    let mut attrs: Vec<(&str, &str)> = vec![("id", topic.id.as_str())];
    if root {
        attrs.push(("structure-class", "org.xmind.ui.logic.right"));
    }
    if let Some(style) = topic.style {
        attrs.push(("style-id", style));
    }
    out.open("topic", &attrs)?;
    out.text_element("title", &topic.title)?;

    if let Some(notes) = &topic.notes {
        out.open("notes", &[])?;
        out.text_element("plain", notes)?;
        out.close("notes")?;
    }
    if !topic.labels.is_empty() {
        out.open("labels", &[])?;
        for label in &topic.labels {
            out.text_element("label", label)?;
        }
        out.close("labels")?;
    }
    if !topic.children.is_empty() {
        out.open("children", &[])?;
        out.open("topics", &[("type", "attached")])?;
        for child in &topic.children {
            write_topic(out, child, false)?;
        }
        out.close("topics")?;
        out.close("children")?;
    }
    out.close("topic")
}

fn collect_comments<'a>(topic: &'a Topic, out: &mut Vec<(&'a str, &'a str)>) {
    if let Some(comment) = &topic.comment {
        out.push((topic.id.as_str(), comment.as_str()));
    }
    for child in &topic.children {
        collect_comments(child, out);
    }
}

/// Rendered bodies of the four mandatory documents
pub struct RenderedDocuments {
    pub content: Vec<u8>,
    pub styles: Vec<u8>,
    pub comments: Vec<u8>,
    pub meta: Vec<u8>,
}

impl RenderedDocuments {
    pub fn into_entries(self) -> Vec<(&'static str, Vec<u8>)> {
        vec![
            (CONTENT_PATH, self.content),
            (STYLES_PATH, self.styles),
            (COMMENTS_PATH, self.comments),
            (META_PATH, self.meta),
        ]
    }
}

pub fn render_all(result: &GenerationResult, meta: &ArchiveMeta) -> Result<RenderedDocuments, ArchiveError> {
    let mut root = Topic::new(format!("{} - Test Cases", result.test_tree.title));
    root.children = result.test_tree.children.iter().map(tree_topic).collect();
    if !result.questions.is_empty() {
        root.children.push(questions_topic(&result.questions));
    }
    if !result.defects.is_empty() {
        root.children.push(defects_topic(&result.defects));
    }

    let mut comments = Vec::new();
    collect_comments(&root, &mut comments);

    Ok(RenderedDocuments {
        content: render_content(&root, meta)?,
        styles: render_styles()?,
        comments: render_comments(&comments, meta)?,
        meta: render_meta(meta)?,
    })
}

fn render_content(root: &Topic, meta: &ArchiveMeta) -> Result<Vec<u8>, ArchiveError> {
    let timestamp = meta.created.timestamp_millis().to_string();
    let sheet_id = new_id();

    let mut out = XmlOut::new()?;
    out.open(
        "xmap-content",
        &[
            ("xmlns", CONTENT_NS),
            ("xmlns:fo", FO_NS),
            ("xmlns:svg", SVG_NS),
            ("xmlns:xhtml", "http://www.w3.org/1999/xhtml"),
            ("xmlns:xlink", "http://www.w3.org/1999/xlink"),
            ("version", "2.0"),
        ],
    )?;
    out.open("sheet", &[("id", sheet_id.as_str()), ("timestamp", timestamp.as_str())])?;
    write_topic(&mut out, root, true)?;
    out.text_element("title", "Test Cases")?;
    out.close("sheet")?;
    out.close("xmap-content")?;
    Ok(out.finish())
}

pub fn render_styles() -> Result<Vec<u8>, ArchiveError> {
    let mut out = XmlOut::new()?;
    out.open(
        "xmap-styles",
        &[("xmlns", STYLES_NS), ("xmlns:fo", FO_NS), ("xmlns:svg", SVG_NS), ("version", "2.0")],
    )?;
    out.open("styles", &[])?;
    for tier in [ConfidenceTier::Green, ConfidenceTier::Yellow, ConfidenceTier::Red] {
        out.open("style", &[("id", style_id(tier)), ("name", tier.name()), ("type", "topic")])?;
        out.empty(
            "topic-properties",
            &[("svg:fill", fill(tier)), ("fo:color", "#FFFFFF"), ("line-color", fill(tier))],
        )?;
        out.close("style")?;
    }
    out.close("styles")?;
    out.close("xmap-styles")?;
    Ok(out.finish())
}

fn render_comments(comments: &[(&str, &str)], meta: &ArchiveMeta) -> Result<Vec<u8>, ArchiveError> {
    let time = meta.created.timestamp_millis().to_string();
    let mut out = XmlOut::new()?;
    out.open("comments", &[("xmlns", COMMENTS_NS), ("version", "2.0")])?;
    for &(object_id, text) in comments {
        out.open(
            "comment",
            &[("object-id", object_id), ("author", meta.author.as_str()), ("time", time.as_str())],
        )?;
        out.text_element("content", text)?;
        out.close("comment")?;
    }
    out.close("comments")?;
    Ok(out.finish())
}

pub fn render_meta(meta: &ArchiveMeta) -> Result<Vec<u8>, ArchiveError> {
    let created = meta.created.format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let mut out = XmlOut::new()?;
    out.open("meta", &[("xmlns", META_NS), ("version", "2.0")])?;
    out.open("Author", &[])?;
    out.text_element("Name", &meta.author)?;
    out.close("Author")?;
    out.open("Create", &[])?;
    out.text_element("Time", &created)?;
    out.close("Create")?;
    out.open("Creator", &[])?;
    out.text_element("Name", &meta.generator_name)?;
    out.text_element("Version", &meta.generator_version)?;
    out.close("Creator")?;
    out.close("meta")?;
    Ok(out.finish())
}

/// Canonical body used when repair finds a mandatory document missing
pub fn default_document(path: &str, meta: &ArchiveMeta) -> Result<Option<Vec<u8>>, ArchiveError> {
    let body = match path {
        CONTENT_PATH => {
            let mut root = Topic::new("Test Cases");
            root.id = "root".to_string();
            render_content(&root, meta)?
        }
        STYLES_PATH => render_styles()?,
        COMMENTS_PATH => render_comments(&[], meta)?,
        META_PATH => render_meta(meta)?,
        _ => return Ok(None),
    };
    Ok(Some(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, ScenarioKind, Statistics};

    fn meta() -> ArchiveMeta {
        ArchiveMeta {
            author: "QA <team>".to_string(),
            generator_name: "testforge".to_string(),
            generator_version: "0.3.0".to_string(),
            created: chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    fn result() -> GenerationResult {
        let mut root = TestCaseNode::root("Payroll");
        let mut module = TestCaseNode::group(NodeKind::Module, "Salaries", None, None);
        module.children.push(TestCaseNode::case(
            "Pay on the 25th",
            Category::Functional,
            ScenarioKind::Normal,
            0.3,
            CaseDetails {
                confidence_reason: Some("no holiday rule".into()),
                missing_info: vec!["weekend handling".into()],
                steps: vec!["run payroll".into()],
                ..CaseDetails::default()
            },
        ));
        root.children.push(module);
        root.propagate_scores();
        GenerationResult {
            test_tree: root,
            questions: vec![QuestionItem {
                text: "What if the 25th is a Sunday?".into(),
                priority: Priority::High,
                related_section: None,
                reason: None,
            }],
            defects: Vec::new(),
            statistics: Statistics::default(),
        }
    }

    #[test]
    fn content_has_branches_styles_and_escaping() {
        let docs = render_all(&result(), &meta()).unwrap();
        let content = String::from_utf8(docs.content).unwrap();
        assert!(content.contains("<title>Payroll - Test Cases</title>"));
        assert!(content.contains("style-id=\"tier-red\""));
        assert!(content.contains("<title>Questions</title>"));
        assert!(content.contains("<title>High priority</title>"));
        assert!(!content.contains("<title>Defects</title>"));
        assert!(content.contains("Confidence 0.30 (red)"));

        let comments = String::from_utf8(docs.comments).unwrap();
        assert!(comments.contains("no holiday rule"));
        assert!(comments.contains("Missing: weekend handling"));
        assert!(comments.contains("author=\"QA &lt;team&gt;\""));
    }

    #[test]
    fn control_characters_never_reach_the_xml() {
        let mut result = result();
        result.test_tree.title = "Pay\u{1}roll\u{1b}".to_string();
        result.questions[0].text = "Sunday\u{0}?\tReally".to_string();

        let docs = render_all(&result, &meta()).unwrap();
        let content = String::from_utf8(docs.content).unwrap();
        assert!(content.contains("<title>Payroll - Test Cases</title>"));
        assert!(content.contains("Sunday?\tReally"));
        assert!(!content.chars().any(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r')));
        assert!(matches!(xml_safe("plain text"), Cow::Borrowed("plain text")));
    }

    #[test]
    fn styles_define_three_tier_fills() {
        let styles = String::from_utf8(render_styles().unwrap()).unwrap();
        for color in [GREEN_FILL, YELLOW_FILL, RED_FILL] {
            assert!(styles.contains(color), "{color}");
        }
    }

    #[test]
    fn meta_records_generator() {
        let xml = String::from_utf8(render_meta(&meta()).unwrap()).unwrap();
        assert!(xml.contains("<Time>2023-11-14T22:13:20Z</Time>"));
        assert!(xml.contains("<Version>0.3.0</Version>"));
    }

    #[test]
    fn defaults_exist_for_mandatory_documents_only() {
        assert!(default_document(META_PATH, &meta()).unwrap().is_some());
        assert!(default_document(CONTENT_PATH, &meta()).unwrap().is_some());
        assert!(default_document("Thumbnails/thumbnail.png", &meta()).unwrap().is_none());
    }
}

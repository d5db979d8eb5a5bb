//! Builds the instruction payload for one extraction call.
//!
//! The payload is a pure function of the [`ExtractionRequest`]: no clock, no
//! randomness, no hash-map iteration order. Two identical requests always
//! produce byte-identical payloads.

use crate::types::{BlockKind, ContentBlock, ExtractionRequest};
use std::fmt::Write;

/// Appended when the outline is cut short
pub const TRUNCATION_MARKER: &str = "[... document truncated ...]";

const TASK_FRAMING: &str = "\
You are analysing a software requirements document to derive test cases.
Extract a hierarchical set of test cases: functional module -> test type -> scenario -> test case.
Cover normal, exception and boundary scenarios for every requirement you can test.
Score every test case with a numeric confidence between 0.0 and 1.0 that reflects how clearly the
requirement specifies the expected behaviour:
- 0.70 to 1.00: requirement is explicit and has concrete acceptance criteria
- 0.40 to 0.69: requirement is described but details are incomplete
- below 0.40: requirement is vague or key information is missing
Never omit the confidence field.";

const CASE_SCHEMA: &str = r#"{
  "modules": [
    {
      "module_name": "module name",
      "description": "what the module does",
      "test_types": [
        {
          "type_name": "functional | performance | security | boundary",
          "scenarios": [
            {
              "scenario_name": "normal | exception | boundary",
              "test_cases": [
                {
                  "title": "case title",
                  "description": "what is being verified",
                  "preconditions": "required state before the test",
                  "test_steps": ["step 1", "step 2"],
                  "expected_result": "observable outcome",
                  "confidence": 0.85,
                  "confidence_reason": "why the score was given",
                  "missing_info": ["information the requirement lacks"]
                }
              ]
            }
          ]
        }
      ]
    }
  ]"#;

const DEFECT_SCHEMA: &str = r#"  "defects": [
    {
      "type": "ambiguous | contradictory | missing",
      "severity": "high | medium | low",
      "description": "what is wrong with the requirement",
      "location": "section where the problem is",
      "suggestion": "how to fix the requirement"
    }
  ]"#;

const QUESTION_SCHEMA: &str = r#"  "questions": [
    {
      "question": "what needs clarification",
      "priority": "high | medium | low",
      "location": "section the question refers to",
      "reason": "why testing depends on the answer"
    }
  ]"#;

const DEFECT_INSTRUCTIONS: &str = "\
Also review the requirements for defects and list them under \"defects\":
- ambiguous: wording open to more than one interpretation
- contradictory: statements that conflict with each other
- missing: absent acceptance criteria, limits, error handling or other required detail
Severity is high when the defect blocks testing, medium when a test can proceed on an assumption,
low otherwise.";

const QUESTION_INSTRUCTIONS: &str = "\
Also list the questions a tester would need a product owner to answer under \"questions\".
Priority is high for blocking questions, medium when a reasonable assumption exists, low for
refinements that do not affect basic testing.";

const OUTPUT_RULES: &str = "\
Output rules:
1. Respond with the JSON object only, no explanation and no markdown fences.
2. The JSON must be valid: double quotes, no trailing commas, no comments.";

/// Compose the full instruction payload for `request`
pub fn build_payload(request: &ExtractionRequest) -> String {
    let mut payload = String::with_capacity(4096);

    payload.push_str(TASK_FRAMING);
    payload.push_str("\n\n");

    let _ = writeln!(payload, "Document: {}", request.document_title);
    payload.push_str(&module_guidance(&request.content_blocks));
    payload.push('\n');

    payload.push_str("Requirements outline:\n<<<\n");
    payload.push_str(&render_outline(&request.content_blocks, request.max_content_chars));
    payload.push_str("\n>>>\n\n");

    if request.enable_defect_detection {
        payload.push_str(DEFECT_INSTRUCTIONS);
        payload.push_str("\n\n");
    }
    if request.enable_question_generation {
        payload.push_str(QUESTION_INSTRUCTIONS);
        payload.push_str("\n\n");
    }

    payload.push_str("Respond with JSON in exactly this shape:\n");
    payload.push_str(CASE_SCHEMA);
    if request.enable_defect_detection {
        payload.push_str(",\n");
        payload.push_str(DEFECT_SCHEMA);
    }
    if request.enable_question_generation {
        payload.push_str(",\n");
        payload.push_str(QUESTION_SCHEMA);
    }
    payload.push_str("\n}\n\n");
    payload.push_str(OUTPUT_RULES);
    payload.push('\n');
    payload
}

/// How the model should group cases into modules
fn module_guidance(blocks: &[ContentBlock]) -> String {
    let top_level: Vec<&str> = blocks
        .iter()
        .filter(|b| b.is_heading() && b.section_path.is_empty())
        .map(|b| b.text.as_str())
        .collect();

    if top_level.is_empty() {
        return "The document has no section headings. Put every test case in a single module \
                and leave its \"module_name\" empty.\n"
            .to_string();
    }

    let mut out = String::from("Use one module per top-level section:\n");
    for name in top_level {
        let _ = writeln!(out, "- {name}");
    }
    out
}

/// Flatten blocks into a textual outline, preserving section paths
pub fn render_outline(blocks: &[ContentBlock], max_chars: usize) -> String {
    let mut out = String::new();
    let mut last_path: Option<&[String]> = None;

    for block in blocks {
        let path = block.section_path.as_slice();
        if !block.is_heading() && last_path != Some(path) && !path.is_empty() {
            let _ = writeln!(out, "[Section: {}]", path.join(" > "));
        }
        last_path = Some(path);

        match block.kind {
            BlockKind::Heading => {
                let depth = block.level.unwrap_or(1).clamp(1, 6) as usize;
                let _ = writeln!(out, "{} {}", "#".repeat(depth), block.text);
                // the heading opens its own section
                last_path = None;
            }
            BlockKind::Paragraph => {
                let _ = writeln!(out, "{}", block.text);
            }
            BlockKind::TableCell => {
                let _ = writeln!(out, "| {}", block.text);
            }
        }
    }

    truncate(out.trim_end(), max_chars)
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((cut, _)) => {
            let kept = &text[..cut];
            // prefer to cut at a line end
            let kept = kept.rfind('\n').map_or(kept, |nl| &kept[..nl]);
            format!("{kept}\n{TRUNCATION_MARKER}")
        }
    }
}

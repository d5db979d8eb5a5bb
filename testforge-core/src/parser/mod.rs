//! Model output -> test case tree, questions and defects.
//!
//! The tree always has the shape root -> module -> category -> scenario -> case.
//! Unknown labels fall back to sensible defaults with a warning; a reply with
//! no recognisable structure is an error, never an empty tree.

pub mod cleanup;

use crate::classifier::ConfidenceClassifier;
use crate::error::ExtractionError;
use crate::types::{
    CaseDetails, Category, DefectItem, DefectKind, NodeKind, Priority, QuestionItem, ScenarioKind,
    TestCaseNode,
};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Title given to the module collecting cases without a module name
pub const UNNAMED_MODULE: &str = "Unnamed module";

#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub document_title: String,
    pub enable_defect_detection: bool,
    pub enable_question_generation: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOutput {
    pub tree: TestCaseNode,
    pub questions: Vec<QuestionItem>,
    pub defects: Vec<DefectItem>,
}

/// Parse raw model text into the result structures
pub fn parse_model_output(raw: &str, options: &ParseOptions) -> Result<ParsedOutput, ExtractionError> {
    let value = cleanup::parse_lenient(raw)?;
    let root = value
        .as_object()
        .ok_or_else(|| ExtractionError::malformed("top-level JSON value is not an object"))?;

    let tree = build_tree(root, &options.document_title)?;

    let defects = if options.enable_defect_detection {
        parse_defects(root.get("defects"))
    } else {
        Vec::new()
    };
    let questions = if options.enable_question_generation {
        parse_questions(root.get("questions"))
    } else {
        Vec::new()
    };

    debug!(
        cases = tree.case_count(),
        modules = tree.children.len(),
        defects = defects.len(),
        questions = questions.len(),
        "parsed model output"
    );
    Ok(ParsedOutput {
        tree,
        questions,
        defects,
    })
}

// ===== FIELD ACCESS =====

fn text_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(value_to_text)
        .filter(|s| !s.is_empty())
}

/// Strings as-is, numbers stringified, arrays joined line by line
fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let lines: Vec<String> = items.iter().filter_map(value_to_text).filter(|s| !s.is_empty()).collect();
            (!lines.is_empty()).then(|| lines.join("\n"))
        }
        _ => None,
    }
}

fn list_field(obj: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    match keys.iter().find_map(|k| obj.get(*k)) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(value_to_text)
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn array_field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> &'a [Value] {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

// ===== LABELS =====

pub fn parse_category(label: &str) -> Option<Category> {
    let l = label.to_lowercase();
    if l.contains("perform") || l.contains("stress") || l.contains("性能") || l.contains("压力") {
        Some(Category::Performance)
    } else if l.contains("secur") || l.contains("安全") || l.contains("权限") {
        Some(Category::Security)
    } else if l.contains("bound") || l.contains("edge") || l.contains("边界") {
        Some(Category::Boundary)
    } else if l.contains("function") || l.contains("功能") {
        Some(Category::Functional)
    } else {
        None
    }
}

pub fn parse_scenario(label: &str) -> Option<ScenarioKind> {
    let l = label.to_lowercase();
    // "abnormal" contains "normal", so exceptions are checked first
    if l.contains("exception") || l.contains("abnormal") || l.contains("error") || l.contains("negative")
        || l.contains("fail") || l.contains("invalid") || l.contains("异常") || l.contains("错误")
    {
        Some(ScenarioKind::Exception)
    } else if l.contains("bound") || l.contains("edge") || l.contains("limit") || l.contains("边界") || l.contains("极限") {
        Some(ScenarioKind::Boundary)
    } else if l.contains("normal") || l.contains("positive") || l.contains("happy") || l.contains("正常") {
        Some(ScenarioKind::Normal)
    } else {
        None
    }
}

pub fn parse_priority(label: &str) -> Option<Priority> {
    match label.trim().to_lowercase().as_str() {
        "high" | "critical" | "blocker" | "高" => Some(Priority::High),
        "medium" | "mid" | "normal" | "中" => Some(Priority::Medium),
        "low" | "minor" | "低" => Some(Priority::Low),
        _ => None,
    }
}

pub fn parse_defect_kind(label: &str) -> Option<DefectKind> {
    let l = label.to_lowercase();
    if l.contains("ambig") || l.contains("vague") || l.contains("unclear") || l.contains("模糊") {
        Some(DefectKind::Ambiguous)
    } else if l.contains("contradict") || l.contains("conflict") || l.contains("inconsist") || l.contains("矛盾") {
        Some(DefectKind::Contradictory)
    } else if l.contains("missing") || l.contains("incomplete") || l.contains("omi") || l.contains("缺失") {
        Some(DefectKind::Missing)
    } else {
        None
    }
}

fn category_or_default(label: Option<&str>) -> Category {
    match label {
        None => Category::Functional,
        Some(l) => parse_category(l).unwrap_or_else(|| {
            warn!(label = l, "unknown test type, filing under functional");
            Category::Functional
        }),
    }
}

fn scenario_or_default(label: Option<&str>) -> ScenarioKind {
    match label {
        None => ScenarioKind::Normal,
        Some(l) => parse_scenario(l).unwrap_or_else(|| {
            warn!(label = l, "unknown scenario, filing under normal");
            ScenarioKind::Normal
        }),
    }
}

// ===== TREE =====

/// Cases of one module, grouped in first-seen order
struct ModuleBuilder {
    title: String,
    description: Option<String>,
    groups: Vec<(Category, Vec<(ScenarioKind, Vec<TestCaseNode>)>)>,
}

impl ModuleBuilder {
    fn new(title: String) -> Self {
        Self {
            title,
            description: None,
            groups: Vec::new(),
        }
    }

    fn add(&mut self, case: TestCaseNode) {
        let category = case.category.unwrap_or(Category::Functional);
        let scenario = case.scenario_kind.unwrap_or(ScenarioKind::Normal);

        let idx = match self.groups.iter().position(|(c, _)| *c == category) {
            Some(idx) => idx,
            None => {
                self.groups.push((category, Vec::new()));
                self.groups.len() - 1
            }
        };
        let scenarios = &mut self.groups[idx].1;
        match scenarios.iter_mut().find(|(s, _)| *s == scenario) {
            Some((_, cases)) => cases.push(case),
            None => scenarios.push((scenario, vec![case])),
        }
    }

    fn into_node(self) -> TestCaseNode {
        let mut module = TestCaseNode::group(NodeKind::Module, &self.title, None, None);
        if let Some(description) = self.description {
            module.details = Some(CaseDetails {
                description: Some(description),
                ..CaseDetails::default()
            });
        }
        for (category, scenarios) in self.groups {
            let mut category_node = TestCaseNode::group(NodeKind::Category, category.label(), Some(category), None);
            for (scenario, cases) in scenarios {
                let mut scenario_node =
                    TestCaseNode::group(NodeKind::Scenario, scenario.label(), Some(category), Some(scenario));
                scenario_node.children = cases;
                category_node.children.push(scenario_node);
            }
            module.children.push(category_node);
        }
        module
    }

    fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

fn build_tree(root: &Map<String, Value>, document_title: &str) -> Result<TestCaseNode, ExtractionError> {
    let modules = match root.get("modules") {
        Some(Value::Array(modules)) => modules,
        Some(_) => return Err(ExtractionError::malformed("\"modules\" is not an array")),
        None => return Err(ExtractionError::malformed("missing \"modules\" field")),
    };

    let mut builders: Vec<ModuleBuilder> = Vec::new();
    let mut case_counter = 0usize;

    for module in modules {
        let Some(module) = module.as_object() else {
            warn!("skipping non-object module entry");
            continue;
        };
        let name = text_field(module, &["module_name", "name", "module"])
            .unwrap_or_else(|| UNNAMED_MODULE.to_string());

        let idx = match builders.iter().position(|b| b.title == name) {
            Some(idx) => idx,
            None => {
                builders.push(ModuleBuilder::new(name));
                builders.len() - 1
            }
        };
        let builder = &mut builders[idx];
        if builder.description.is_none() {
            builder.description = text_field(module, &["description"]);
        }

        for test_type in array_field(module, &["test_types", "types"]) {
            let Some(test_type) = test_type.as_object() else { continue };
            let category_label = text_field(test_type, &["type_name", "name", "type", "category"]);
            let category = category_or_default(category_label.as_deref());

            for scenario in array_field(test_type, &["scenarios"]) {
                let Some(scenario) = scenario.as_object() else { continue };
                let scenario_label = text_field(scenario, &["scenario_name", "name", "scenario"]);
                let kind = scenario_or_default(scenario_label.as_deref());
                for case in array_field(scenario, &["test_cases", "cases"]) {
                    if let Some(node) = parse_case(case, Some(category), Some(kind), &mut case_counter) {
                        builder.add(node);
                    }
                }
            }
            for case in array_field(test_type, &["test_cases", "cases"]) {
                if let Some(node) = parse_case(case, Some(category), None, &mut case_counter) {
                    builder.add(node);
                }
            }
        }

        for case in array_field(module, &["test_cases", "cases"]) {
            if let Some(node) = parse_case(case, None, None, &mut case_counter) {
                builder.add(node);
            }
        }
    }

    let mut tree = TestCaseNode::root(document_title);
    tree.children = builders
        .into_iter()
        .filter(|b| !b.is_empty())
        .map(ModuleBuilder::into_node)
        .collect();

    if tree.case_count() == 0 {
        return Err(ExtractionError::malformed("model output contains no test cases"));
    }
    tree.propagate_scores();
    Ok(tree)
}

/// One leaf. Category/scenario come from the enclosing groups when known,
/// else from the case's own fields.
fn parse_case(
    value: &Value,
    category: Option<Category>,
    scenario: Option<ScenarioKind>,
    counter: &mut usize,
) -> Option<TestCaseNode> {
    let case = value.as_object()?;
    *counter += 1;

    let title = text_field(case, &["title", "name", "case_title", "case_name"])
        .unwrap_or_else(|| format!("Untitled case {counter}"));
    let category = category.unwrap_or_else(|| {
        category_or_default(text_field(case, &["category", "type", "test_type", "type_name"]).as_deref())
    });
    let scenario = scenario.unwrap_or_else(|| {
        scenario_or_default(text_field(case, &["scenario", "scenario_kind", "scenario_name"]).as_deref())
    });

    let reading = ConfidenceClassifier::read(case.get("confidence").or_else(|| case.get("confidence_score")));
    if reading.is_missing() {
        warn!(case = %title, "case has no usable confidence, scoring 0.0 (red)");
    }

    let details = CaseDetails {
        description: text_field(case, &["description"]),
        preconditions: text_field(case, &["preconditions", "precondition"]),
        steps: list_field(case, &["test_steps", "steps"]),
        expected_result: text_field(case, &["expected_result", "expected", "expected_results"]),
        confidence_reason: text_field(case, &["confidence_reason", "reason"]),
        missing_info: list_field(case, &["missing_info"]),
        score_missing: reading.is_missing(),
    };
    Some(TestCaseNode::case(&title, category, scenario, reading.score(), details))
}

// ===== QUESTIONS & DEFECTS =====

fn items(value: Option<&Value>, what: &str) -> Vec<Map<String, Value>> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_object().cloned()).collect(),
        Some(_) => {
            warn!(field = what, "expected an array, ignoring");
            Vec::new()
        }
    }
}

fn priority_or_default(obj: &Map<String, Value>, keys: &[&str]) -> Priority {
    text_field(obj, keys)
        .and_then(|p| parse_priority(&p))
        .unwrap_or(Priority::Medium)
}

fn parse_defects(value: Option<&Value>) -> Vec<DefectItem> {
    items(value, "defects")
        .iter()
        .filter_map(|obj| {
            let description = text_field(obj, &["description", "text", "issue"])?;
            let kind = match text_field(obj, &["type", "defect_type", "kind"]) {
                Some(label) => parse_defect_kind(&label).unwrap_or_else(|| {
                    warn!(label = %label, "unknown defect type, filing as ambiguous");
                    DefectKind::Ambiguous
                }),
                None => DefectKind::Ambiguous,
            };
            Some(DefectItem {
                kind,
                severity: priority_or_default(obj, &["severity", "priority"]),
                description,
                related_section: text_field(obj, &["location", "related_section", "section"]),
                suggestion: text_field(obj, &["suggestion"]),
            })
        })
        .collect()
}

fn parse_questions(value: Option<&Value>) -> Vec<QuestionItem> {
    items(value, "questions")
        .iter()
        .filter_map(|obj| {
            Some(QuestionItem {
                text: text_field(obj, &["question", "text"])?,
                priority: priority_or_default(obj, &["priority"]),
                related_section: text_field(obj, &["location", "related_section", "section"]),
                reason: text_field(obj, &["reason"]),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConfidenceTier;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn options() -> ParseOptions {
        ParseOptions {
            document_title: "Doc".to_string(),
            enable_defect_detection: true,
            enable_question_generation: true,
        }
    }

    fn case(title: &str, confidence: Value) -> Value {
        json!({ "title": title, "test_steps": ["open", "submit"], "expected_result": "ok", "confidence": confidence })
    }

    #[test]
    fn nested_structure_builds_four_levels() {
        let raw = json!({
            "modules": [{
                "module_name": "Login",
                "description": "Authentication",
                "test_types": [{
                    "type_name": "functional",
                    "scenarios": [
                        { "scenario_name": "normal", "test_cases": [case("valid password", json!(0.9))] },
                        { "scenario_name": "exception", "test_cases": [case("wrong password", json!(0.5))] }
                    ]
                }, {
                    "type_name": "security",
                    "scenarios": [{ "scenario_name": "boundary", "test_cases": [case("lockout after 5", json!("low"))] }]
                }]
            }]
        })
        .to_string();

        let out = parse_model_output(&raw, &options()).unwrap();
        let module = &out.tree.children[0];
        assert_eq!(module.title, "Login");
        assert_eq!(module.children.len(), 2);
        assert_eq!(module.children[0].category, Some(Category::Functional));
        assert_eq!(module.children[0].children[1].scenario_kind, Some(ScenarioKind::Exception));
        assert_eq!(module.children[1].children[0].children[0].confidence_score, 0.20);
        // groups carry their weakest case
        assert_eq!(module.confidence_score, 0.20);
        assert_eq!(module.children[0].confidence_tier(), ConfidenceTier::Yellow);

        let first = &module.children[0].children[0].children[0];
        let details = first.details.as_ref().unwrap();
        assert_eq!(details.steps, vec!["open", "submit"]);
        assert_eq!(details.expected_result.as_deref(), Some("ok"));
    }

    #[test]
    fn missing_confidence_is_red_zero_and_siblings_keep_theirs() {
        let raw = json!({
            "modules": [{
                "module_name": "Cart",
                "test_types": [{ "type_name": "functional", "scenarios": [{
                    "scenario_name": "normal",
                    "test_cases": [
                        case("add item", json!(0.8)),
                        { "title": "remove item", "expected_result": "gone" },
                        case("empty cart", json!(0.45))
                    ]
                }]}]
            }]
        })
        .to_string();

        let out = parse_model_output(&raw, &options()).unwrap();
        let cases = out.tree.cases();
        let tiers: Vec<(f64, ConfidenceTier)> =
            cases.iter().map(|c| (c.confidence_score, c.confidence_tier())).collect();
        assert_eq!(
            tiers,
            vec![
                (0.8, ConfidenceTier::Green),
                (0.0, ConfidenceTier::Red),
                (0.45, ConfidenceTier::Yellow)
            ]
        );
        assert!(cases[1].details.as_ref().unwrap().score_missing);
    }

    #[test]
    fn unnamed_modules_merge() {
        let raw = json!({
            "modules": [
                { "module_name": "", "test_cases": [case("a", json!(0.9))] },
                { "test_cases": [{ "title": "b", "category": "performance", "scenario": "边界", "confidence": 0.7 }] }
            ]
        })
        .to_string();
        let out = parse_model_output(&raw, &options()).unwrap();
        assert_eq!(out.tree.children.len(), 1);
        assert_eq!(out.tree.children[0].title, UNNAMED_MODULE);
        assert_eq!(out.tree.case_count(), 2);
        let perf = &out.tree.children[0].children[1];
        assert_eq!(perf.category, Some(Category::Performance));
        assert_eq!(perf.children[0].scenario_kind, Some(ScenarioKind::Boundary));
    }

    #[test]
    fn disabled_features_drop_items() {
        let raw = json!({
            "modules": [{ "module_name": "M", "test_cases": [case("a", json!(0.9))] }],
            "defects": [{ "type": "矛盾", "severity": "high", "description": "limits disagree", "location": "2.1" }],
            "questions": [{ "question": "What is the max?", "priority": "low" }]
        })
        .to_string();

        let out = parse_model_output(&raw, &options()).unwrap();
        assert_eq!(out.defects.len(), 1);
        assert_eq!(out.defects[0].kind, DefectKind::Contradictory);
        assert_eq!(out.defects[0].related_section.as_deref(), Some("2.1"));
        assert_eq!(out.questions[0].priority, Priority::Low);

        let off = ParseOptions {
            enable_defect_detection: false,
            enable_question_generation: false,
            ..options()
        };
        let out = parse_model_output(&raw, &off).unwrap();
        assert!(out.defects.is_empty());
        assert!(out.questions.is_empty());
    }

    #[test]
    fn structural_failures_are_malformed() {
        for raw in [
            "no json here",
            "{\"questions\": []}",
            "{\"modules\": {}}",
            "{\"modules\": [{\"module_name\": \"Empty\", \"test_types\": []}]}",
            "[1, 2, 3]",
        ] {
            let err = parse_model_output(raw, &options()).unwrap_err();
            assert!(matches!(err, ExtractionError::MalformedModelOutput { .. }), "{raw}");
        }
    }

    #[test]
    fn labels_map_in_both_languages() {
        assert_eq!(parse_category("功能测试"), Some(Category::Functional));
        assert_eq!(parse_category("Performance Testing"), Some(Category::Performance));
        assert_eq!(parse_category("usability"), None);
        assert_eq!(parse_scenario("abnormal flow"), Some(ScenarioKind::Exception));
        assert_eq!(parse_scenario("正常场景"), Some(ScenarioKind::Normal));
        assert_eq!(parse_priority("高"), Some(Priority::High));
        assert_eq!(parse_defect_kind("Missing acceptance criteria"), Some(DefectKind::Missing));
    }
}

use crate::types::*;

/// Percentages are rounded to one decimal place
fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64 * 1000.0).round() / 10.0
}

/// Computes summary statistics over a parsed result
pub struct ResultAnalytics;

impl ResultAnalytics {
    /// Counts per tier over leaf cases only; questions and defects as given,
    /// so a disabled feature reports zero rather than being left out.
    pub fn compute(tree: &TestCaseNode, questions: &[QuestionItem], defects: &[DefectItem]) -> Statistics {
        let cases = tree.cases();
        let total = cases.len();
        let count = |tier: ConfidenceTier| cases.iter().filter(|c| c.confidence_tier() == tier).count();

        let green = count(ConfidenceTier::Green);
        let yellow = count(ConfidenceTier::Yellow);
        let red = count(ConfidenceTier::Red);

        Statistics {
            total_cases: total,
            green_cases: green,
            yellow_cases: yellow,
            red_cases: red,
            green_percentage: percentage(green, total),
            yellow_percentage: percentage(yellow, total),
            red_percentage: percentage(red, total),
            questions_count: questions.len(),
            defects_count: defects.len(),
            modules_count: tree
                .children
                .iter()
                .filter(|c| c.kind == NodeKind::Module)
                .count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_counted_over_cases() {
        let mut root = TestCaseNode::root("doc");
        let mut module = TestCaseNode::group(NodeKind::Module, "M", None, None);
        for score in [0.9, 0.7, 0.4, 0.1] {
            module.children.push(TestCaseNode::case(
                "c",
                Category::Functional,
                ScenarioKind::Normal,
                score,
                CaseDetails::default(),
            ));
        }
        root.children.push(module);
        root.propagate_scores();

        let stats = ResultAnalytics::compute(&root, &[], &[]);
        assert_eq!(stats.total_cases, 4);
        assert_eq!((stats.green_cases, stats.yellow_cases, stats.red_cases), (2, 1, 1));
        assert_eq!(stats.green_percentage, 50.0);
        assert_eq!(stats.red_percentage, 25.0);
        assert_eq!(stats.modules_count, 1);
        assert_eq!(stats.defects_count, 0);
        assert_eq!(stats.questions_count, 0);
    }

    #[test]
    fn empty_tree_has_zero_percentages() {
        let stats = ResultAnalytics::compute(&TestCaseNode::root("doc"), &[], &[]);
        assert_eq!(stats.green_percentage, 0.0);
        assert_eq!(stats.total_cases, 0);
    }
}

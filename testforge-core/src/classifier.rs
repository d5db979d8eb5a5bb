use crate::types::ConfidenceTier;
use serde_json::Value;

/// Lower bound (inclusive) of the green tier
pub const GREEN_THRESHOLD: f64 = 0.70;
/// Lower bound (inclusive) of the yellow tier
pub const YELLOW_THRESHOLD: f64 = 0.40;

/// Bucket a confidence score. NaN falls through to red.
pub fn classify(score: f64) -> ConfidenceTier {
    if score >= GREEN_THRESHOLD {
        ConfidenceTier::Green
    } else if score >= YELLOW_THRESHOLD {
        ConfidenceTier::Yellow
    } else {
        ConfidenceTier::Red
    }
}

/// Outcome of reading a model-supplied confidence value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfidenceReading {
    Score(f64),
    /// Absent, null or unparsable. Callers record 0.0 and flag the case.
    Missing,
}

impl ConfidenceReading {
    pub fn score(&self) -> f64 {
        match self {
            Self::Score(s) => *s,
            Self::Missing => 0.0,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

/// Interprets the confidence encodings models actually emit
pub struct ConfidenceClassifier;

impl ConfidenceClassifier {
    pub fn read(value: Option<&Value>) -> ConfidenceReading {
        match value {
            Some(Value::Number(n)) => n.as_f64().map_or(ConfidenceReading::Missing, Self::normalize),
            Some(Value::String(s)) => Self::read_str(s),
            _ => ConfidenceReading::Missing,
        }
    }

    fn read_str(raw: &str) -> ConfidenceReading {
        let s = raw.trim().to_lowercase();
        match s.as_str() {
            "high" | "高" => return ConfidenceReading::Score(0.90),
            "medium" | "mid" | "中" => return ConfidenceReading::Score(0.55),
            "low" | "低" => return ConfidenceReading::Score(0.20),
            _ => {}
        }
        let (number, percent) = match s.strip_suffix('%') {
            Some(rest) => (rest.trim(), true),
            None => (s.as_str(), false),
        };
        match number.parse::<f64>() {
            Ok(n) if percent => Self::normalize_fraction(n / 100.0),
            Ok(n) => Self::normalize(n),
            Err(_) => ConfidenceReading::Missing,
        }
    }

    /// Values in (1, 100] are read as percentages
    fn normalize(n: f64) -> ConfidenceReading {
        if n > 1.0 && n <= 100.0 {
            Self::normalize_fraction(n / 100.0)
        } else {
            Self::normalize_fraction(n)
        }
    }

    fn normalize_fraction(n: f64) -> ConfidenceReading {
        if n.is_finite() && (0.0..=1.0).contains(&n) {
            ConfidenceReading::Score(n)
        } else {
            ConfidenceReading::Missing
        }
    }
}

//! Top-emotion extraction from a prosody response.
//!
//! The streaming API answers with
//! `{"prosody": {"predictions": [{"emotions": [{"name": "Calmness", "score": 0.41}, ...]}]}}`,
//! one prediction per analysed speech segment. Scores are averaged across
//! segments before ranking.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmotionScore {
    pub name: String,
    pub score: f64,
}

/// Highest `count` emotions of `model` in `response`, sorted descending,
/// scores rounded to 4 decimals. Anything malformed yields an empty list.
pub fn top_emotions(response: &Value, model: &str, count: usize) -> Vec<EmotionScore> {
    let predictions = match response
        .get(model)
        .and_then(|m| m.get("predictions"))
        .and_then(Value::as_array)
    {
        Some(predictions) => predictions,
        None => return Vec::new(),
    };

    let mut totals: HashMap<&str, (f64, usize)> = HashMap::new();
    for prediction in predictions {
        let emotions = match prediction.get("emotions").and_then(Value::as_array) {
            Some(emotions) => emotions,
            None => continue,
        };
        for emotion in emotions {
            let name = emotion.get("name").and_then(Value::as_str);
            let score = emotion.get("score").and_then(Value::as_f64);
            if let (Some(name), Some(score)) = (name, score) {
                let entry = totals.entry(name).or_insert((0.0, 0));
                entry.0 += score;
                entry.1 += 1;
            }
        }
    }

    let mut ranked: Vec<EmotionScore> = totals
        .into_iter()
        .map(|(name, (sum, n))| EmotionScore {
            name: name.to_string(),
            score: ((sum / n as f64) * 10_000.0).round() / 10_000.0,
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
    ranked.truncate(count);
    ranked
}

/// `"Calmness 0.4100, Interest 0.3000"` style line for logs.
pub fn format_top(scores: &[EmotionScore]) -> String {
    scores
        .iter()
        .map(|s| format!("{} {:.4}", s.name, s.score))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_top_emotions_averages_segments() {
        let response = json!({
            "prosody": {
                "predictions": [
                    {"emotions": [
                        {"name": "Calmness", "score": 0.6},
                        {"name": "Anger", "score": 0.1},
                        {"name": "Joy", "score": 0.3}
                    ]},
                    {"emotions": [
                        {"name": "Calmness", "score": 0.2},
                        {"name": "Anger", "score": 0.5},
                        {"name": "Joy", "score": 0.3}
                    ]}
                ]
            }
        });

        let top = top_emotions(&response, "prosody", 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].name, "Calmness");
        assert!((top[0].score - 0.4).abs() < 1e-9);
        // Anger and Joy tie at 0.3; ties break alphabetically
        assert_eq!(top[1].name, "Anger");
    }

    #[test]
    fn test_top_emotions_on_error_payload() {
        let response = json!({"error": "Audio too long"});
        assert!(top_emotions(&response, "prosody", 3).is_empty());
    }

    #[test]
    fn test_format_top() {
        let scores = vec![EmotionScore { name: "Calmness".into(), score: 0.41 }];
        assert_eq!(format_top(&scores), "Calmness 0.4100");
    }
}

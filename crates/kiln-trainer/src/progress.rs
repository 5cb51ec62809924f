//! Progress extraction from training process output.
//!
//! The training script prints one JSON object per progress tick; every other
//! line is free-form log text.

use kiln_core::events::TrainingProgress;

/// Try to interpret one stdout line as a structured progress tick. A line
/// counts as progress when it is a JSON object carrying at least one known
/// progress field; bare `{}` or unrelated JSON stays a log line.
#[must_use]
pub fn parse_line(line: &str) -> Option<TrainingProgress> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let progress: TrainingProgress = serde_json::from_str(trimmed).ok()?;
    let informative = progress.progress.is_some()
        || progress.epoch.is_some()
        || progress.loss.is_some()
        || progress.accuracy.is_some();
    informative.then_some(progress)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_tick_parses() {
        let line = r#"{"step": "training", "progress": 0.45, "message": "epoch 2/3", "timestamp": 1712."#;
        assert!(parse_line(line).is_none(), "truncated JSON is a log line");

        let line =
            r#"{"step": "training", "progress": 0.45, "message": "epoch 2/3", "timestamp": 1712}"#;
        let progress = parse_line(line).unwrap();
        assert_eq!(progress.progress, Some(0.45));
        assert_eq!(progress.message.as_deref(), Some("epoch 2/3"));
    }

    #[test]
    fn loss_and_epoch_fields_parse() {
        let progress = parse_line(r#"{"epoch": 2, "loss": 0.31, "learning_rate": 0.0002}"#).unwrap();
        assert_eq!(progress.epoch, Some(2));
        assert_eq!(progress.loss, Some(0.31));
    }

    #[test]
    fn plain_text_is_not_progress() {
        assert!(parse_line("loading tokenizer...").is_none());
        assert!(parse_line("").is_none());
    }

    #[test]
    fn uninformative_json_is_not_progress() {
        assert!(parse_line("{}").is_none());
        assert!(parse_line(r#"{"message": "hello"}"#).is_none());
    }
}

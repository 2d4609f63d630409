//! Terminal rendering for task results and settings.

use colored::Colorize;
use task_core::{TaskOutput, TaskResult, VocabularyEntry};

pub fn header(title: &str) {
    println!("{}", title.bold().underline());
}

pub fn section(title: &str) {
    println!("{}", title.bold());
}

pub fn hint(msg: &str) {
    println!("{} {}", "hint:".cyan().bold(), msg.dimmed());
}

/// One `name: value` line of the settings listing.
pub fn field(name: &str, value: &str) {
    println!("  {:<14} {}", format!("{name}:"), value.cyan());
}

pub fn missing_field(name: &str) {
    println!("  {:<14} {}", format!("{name}:"), "(not set)".dimmed());
}

/// Prints the output of a successful task followed by where it came from.
pub fn task_output(result: &TaskResult, data: &TaskOutput) {
    match data {
        TaskOutput::Translation {
            text,
            target_language
        } => {
            section(&format!("Translation ({target_language}):"));
            println!("  {text}");
        }
        TaskOutput::Language {
            language,
            confidence
        } => {
            section("Detected language:");
            println!(
                "  {} {}",
                language.cyan().bold(),
                confidence_label(*confidence).dimmed()
            );
        }
        TaskOutput::Summary { text } => {
            section("Summary:");
            println!("  {text}");
        }
        TaskOutput::Rewrite { text } => {
            section("Rewrite:");
            println!("  {text}");
        }
        TaskOutput::Vocabulary { words } => {
            section("Vocabulary:");
            for entry in words {
                println!("  {}", vocabulary_line(entry));
            }
        }
    }

    if let Some(note) = provenance(result) {
        hint(&note);
    }
}

pub fn confidence_label(confidence: f32) -> String {
    format!("({:.0}% confidence)", confidence.clamp(0.0, 1.0) * 100.0)
}

fn vocabulary_line(entry: &VocabularyEntry) -> String {
    let line = format!(
        "{:<20} {:<13} x{}",
        entry.word,
        entry.difficulty.to_string(),
        entry.occurrences
    );
    match &entry.definition {
        Some(definition) => format!("{line}  {definition}"),
        None => line
    }
}

/// Cache hits carry no backend, so they are reported as such.
pub fn provenance(result: &TaskResult) -> Option<String> {
    match (result.is_cached(), result.backend()) {
        (true, _) => Some("served from cache".to_string()),
        (false, Some(backend)) => Some(format!("answered by {backend}")),
        (false, None) => None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use task_core::{BackendKind, Difficulty, TaskError};

    fn summary() -> TaskOutput {
        TaskOutput::Summary {
            text: "Short.".to_string()
        }
    }

    #[test]
    fn test_provenance_names_backend() {
        let result = TaskResult::success(summary(), BackendKind::Heuristic);
        assert_eq!(provenance(&result).as_deref(), Some("answered by heuristic"));
    }

    #[test]
    fn test_provenance_for_cache_hit() {
        let result = TaskResult::from_cache(summary());
        assert_eq!(provenance(&result).as_deref(), Some("served from cache"));
    }

    #[test]
    fn test_failure_has_no_provenance() {
        let result = TaskResult::failure(TaskError::unavailable("offline"));
        assert_eq!(provenance(&result), None);
    }

    #[test]
    fn test_confidence_label_is_clamped_percentage() {
        assert_eq!(confidence_label(0.874), "(87% confidence)");
        assert_eq!(confidence_label(1.7), "(100% confidence)");
    }

    #[test]
    fn test_vocabulary_line_appends_definition() {
        let entry = VocabularyEntry {
            word: "perro".to_string(),
            occurrences: 2,
            difficulty: Difficulty::Basic,
            definition: Some("dog".to_string())
        };
        let line = vocabulary_line(&entry);

        assert!(line.starts_with("perro"));
        assert!(line.contains("basic"));
        assert!(line.ends_with("x2  dog"));
    }
}

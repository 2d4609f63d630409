//! Prompt construction and model output parsing shared by the model-backed
//! backends.

use serde::Deserialize;
use task_core::{
    Difficulty, RewriteTone, TaskError, TaskOutput, TaskPayload, TaskRequest, VocabularyEntry
};

/// Instruction pair sent to a language model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String
}

pub fn language_name(code: &str) -> &str {
    match code {
        "en" => "English",
        "fr" => "French",
        "es" => "Spanish",
        "de" => "German",
        "it" => "Italian",
        "pt" => "Portuguese",
        "nl" => "Dutch",
        "ru" => "Russian",
        "ja" => "Japanese",
        "ko" => "Korean",
        "zh" => "Chinese",
        other => other
    }
}

pub fn build(request: &TaskRequest) -> Prompt {
    let source = request
        .source_language
        .as_deref()
        .map_or("the detected language", language_name);

    let system = match &request.payload {
        TaskPayload::Translate { .. } => {
            let target = language_name(request.target_language.as_deref().unwrap_or("en"));
            format!(
                "You translate text from {source} into {target}. \
                 When context is given, use it only to choose the right sense of the text. \
                 Reply with the translation and nothing else."
            )
        }
        TaskPayload::DetectLanguage { .. } => "Identify the language of the text. \
             Reply with JSON only: {\"language\": \"<ISO 639-1 code>\", \"confidence\": <0.0-1.0>}."
            .to_string(),
        TaskPayload::Summarize { max_sentences, .. } => format!(
            "Summarize the text in at most {max_sentences} sentences, in the language of the text. \
             Reply with the summary only."
        ),
        TaskPayload::Rewrite { tone, .. } => {
            let style = match tone {
                RewriteTone::Simpler => "simpler, using common words and short sentences",
                RewriteTone::Formal => "more formal",
                RewriteTone::Casual => "more casual and conversational",
                RewriteTone::Shorter => "shorter while keeping its meaning"
            };
            format!(
                "Rewrite the text to be {style}. Keep the language of the text. \
                 Reply with the rewritten text only."
            )
        }
        TaskPayload::AnalyzeVocabulary { max_words, .. } => format!(
            "List up to {max_words} words from the text that are most useful for a language learner. \
             Reply with JSON only: {{\"words\": [{{\"word\": \"...\", \"occurrences\": 1, \
             \"difficulty\": \"basic|intermediate|advanced\", \"definition\": \"...\"}}]}}."
        )
    };

    let user = match request.context.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(context) => format!("Context: {context}\n\nText: {}", request.text()),
        None => request.text().to_string()
    };

    Prompt { system, user }
}

#[derive(Deserialize)]
struct LanguageReply {
    language: String,
    #[serde(default = "default_confidence")]
    confidence: f32
}

fn default_confidence() -> f32 {
    0.5
}

#[derive(Deserialize)]
struct VocabularyReply {
    words: Vec<VocabularyItem>
}

#[derive(Deserialize)]
struct VocabularyItem {
    word: String,
    #[serde(default = "default_occurrences")]
    occurrences: u32,
    #[serde(default)]
    difficulty: Option<Difficulty>,
    #[serde(default)]
    definition: Option<String>
}

fn default_occurrences() -> u32 {
    1
}

/// Turns raw model text into the output for `request`'s task type.
pub fn parse_output(request: &TaskRequest, raw: &str) -> Result<TaskOutput, TaskError> {
    let text = strip_fences(raw);
    if text.is_empty() {
        return Err(TaskError::processing_failed("model returned an empty response"));
    }

    match &request.payload {
        TaskPayload::Translate { .. } => Ok(TaskOutput::Translation {
            text: strip_quotes(text).to_string(),
            target_language: request
                .target_language
                .clone()
                .unwrap_or_else(|| "en".to_string())
        }),
        TaskPayload::DetectLanguage { .. } => parse_language(text),
        TaskPayload::Summarize { .. } => Ok(TaskOutput::Summary {
            text: text.to_string()
        }),
        TaskPayload::Rewrite { .. } => Ok(TaskOutput::Rewrite {
            text: strip_quotes(text).to_string()
        }),
        TaskPayload::AnalyzeVocabulary { max_words, .. } => parse_vocabulary(text, *max_words)
    }
}

fn parse_language(text: &str) -> Result<TaskOutput, TaskError> {
    let reply = match extract_json(text) {
        Some(json) => serde_json::from_str::<LanguageReply>(json).map_err(|e| {
            TaskError::processing_failed(format!("unreadable language reply: {e}"))
        })?,
        None => LanguageReply {
            language: text.to_string(),
            confidence: default_confidence()
        }
    };

    let language = reply.language.trim().to_ascii_lowercase();
    let plausible = (2..=3).contains(&language.len()) && language.chars().all(|c| c.is_ascii_alphabetic());
    if !plausible {
        return Err(TaskError::processing_failed(format!(
            "model returned an invalid language code: {language:?}"
        )));
    }

    Ok(TaskOutput::Language {
        language,
        confidence: reply.confidence.clamp(0.0, 1.0)
    })
}

fn parse_vocabulary(text: &str, max_words: usize) -> Result<TaskOutput, TaskError> {
    let json = extract_json(text)
        .ok_or_else(|| TaskError::processing_failed("vocabulary reply contained no JSON object"))?;
    let reply: VocabularyReply = serde_json::from_str(json)
        .map_err(|e| TaskError::processing_failed(format!("unreadable vocabulary reply: {e}")))?;

    let words = reply
        .words
        .into_iter()
        .filter(|item| !item.word.trim().is_empty())
        .take(max_words)
        .map(|item| VocabularyEntry {
            difficulty: item
                .difficulty
                .unwrap_or_else(|| crate::backend::heuristic::difficulty_of(&item.word)),
            word: item.word.trim().to_string(),
            occurrences: item.occurrences.max(1),
            definition: item.definition.filter(|d| !d.trim().is_empty())
        })
        .collect();

    Ok(TaskOutput::Vocabulary { words })
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_suffix("```").unwrap_or(body);
    // Drop the info string ("json", "text") on the opening fence line.
    match body.split_once('\n') {
        Some((info, rest)) if !info.trim().contains(' ') => rest.trim(),
        _ => body.trim()
    }
}

fn strip_quotes(text: &str) -> &str {
    ['"', '\u{201c}', '\u{00ab}']
        .iter()
        .zip(['"', '\u{201d}', '\u{00bb}'])
        .find_map(|(open, close)| text.strip_prefix(*open)?.strip_suffix(close))
        .map_or(text, str::trim)
}

fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use task_core::TaskType;

    #[test]
    fn test_translate_prompt_includes_context_and_languages() {
        let request = TaskRequest::translate("bank", "es")
            .with_source("en")
            .with_context("we sat on the river bank");
        let prompt = build(&request);

        assert!(prompt.system.contains("from English into Spanish"));
        assert!(prompt.user.contains("Context: we sat on the river bank"));
        assert!(prompt.user.ends_with("Text: bank"));
    }

    #[test]
    fn test_prompt_without_context_is_plain_text() {
        let request = TaskRequest::new(TaskPayload::Summarize {
            text: "One. Two. Three.".to_string(),
            max_sentences: 2
        });
        let prompt = build(&request);

        assert_eq!(prompt.user, "One. Two. Three.");
        assert!(prompt.system.contains("at most 2 sentences"));
    }

    #[test]
    fn test_parse_translation_strips_quotes_and_fences() {
        let request = TaskRequest::translate("bank", "es");
        let output = parse_output(&request, "```\n\"orilla\"\n```").unwrap();

        assert_eq!(
            output,
            TaskOutput::Translation {
                text: "orilla".to_string(),
                target_language: "es".to_string()
            }
        );
    }

    #[test]
    fn test_parse_language_json_and_bare_code() {
        let request = TaskRequest::detect_language("Bonjour le monde");

        let output = parse_output(
            &request,
            "```json\n{\"language\": \"FR\", \"confidence\": 0.97}\n```"
        )
        .unwrap();
        assert_eq!(
            output,
            TaskOutput::Language {
                language: "fr".to_string(),
                confidence: 0.97
            }
        );

        let output = parse_output(&request, "fr").unwrap();
        assert!(matches!(output, TaskOutput::Language { ref language, .. } if language == "fr"));

        assert!(parse_output(&request, "I think it is French").is_err());
    }

    #[test]
    fn test_parse_vocabulary_truncates_and_defaults() {
        let request = TaskRequest::new(TaskPayload::AnalyzeVocabulary {
            text: "irrelevant".to_string(),
            max_words: 1
        });
        let raw = r#"Here you go: {"words": [{"word": "ubiquitous"}, {"word": "cat", "difficulty": "basic"}]}"#;

        let TaskOutput::Vocabulary { words } = parse_output(&request, raw).unwrap() else {
            panic!("expected vocabulary output");
        };
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].word, "ubiquitous");
        assert_eq!(words[0].occurrences, 1);
        assert_eq!(words[0].difficulty, Difficulty::Advanced);
    }

    #[test]
    fn test_empty_response_is_processing_failure() {
        let request = TaskRequest::new(TaskPayload::for_type(TaskType::Rewrite, "hi"));
        let err = parse_output(&request, "   ").unwrap_err();
        assert_eq!(err.kind, task_core::TaskErrorKind::ProcessingFailed);
    }
}

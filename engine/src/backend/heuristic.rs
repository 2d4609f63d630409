//! Rule-based last resort. Deterministic, offline, and never `unavailable`.
//!
//! Its failures are marked non-retryable: the same input always fails the
//! same way.

use super::TaskBackend;
use crate::context::ContextHandle;
use async_trait::async_trait;
use std::collections::HashMap;
use task_core::{
    BackendKind, Difficulty, RewriteTone, TaskError, TaskOutput, TaskPayload, TaskRequest,
    TaskType, VocabularyEntry
};

const LEXICONS: &[(&str, &[&str])] = &[
    ("en", &[
        "the", "and", "is", "are", "of", "to", "in", "that", "it", "you", "was", "for", "on",
        "with", "this", "have", "be", "not", "hello", "world", "what", "my", "we", "they"
    ]),
    ("fr", &[
        "le", "la", "les", "et", "est", "un", "une", "des", "du", "je", "tu", "il", "elle",
        "nous", "vous", "qui", "dans", "pour", "pas", "sur", "avec", "ce", "cette", "bonjour",
        "merci", "monde", "oui", "au", "aux", "sont", "mais", "très"
    ]),
    ("es", &[
        "el", "los", "las", "y", "es", "una", "que", "en", "por", "para", "con", "no", "del",
        "al", "hola", "gracias", "mundo", "está", "son", "pero", "muy", "yo", "tú", "como"
    ]),
    ("de", &[
        "der", "die", "das", "und", "ist", "nicht", "ein", "eine", "zu", "mit", "den", "dem",
        "ich", "du", "sie", "wir", "hallo", "danke", "welt", "auf", "für", "von", "auch", "sind"
    ]),
    ("it", &[
        "il", "lo", "gli", "è", "di", "che", "per", "non", "della", "ciao", "grazie", "mondo",
        "sono", "ma", "io", "molto", "questo", "anche", "nel", "alla"
    ]),
    ("pt", &[
        "o", "os", "as", "um", "uma", "do", "da", "em", "não", "olá", "obrigado", "obrigada",
        "são", "mas", "eu", "você", "muito", "isso", "também", "na", "no"
    ])
];

const DIACRITICS: &[(&str, &[char])] = &[
    ("fr", &['è', 'ê', 'à', 'ç', 'ù', 'œ', 'î', 'ô']),
    ("es", &['ñ', '¿', '¡', 'á', 'í', 'ó', 'ú']),
    ("de", &['ä', 'ö', 'ü', 'ß']),
    ("it", &['ì', 'ò']),
    ("pt", &['ã', 'õ', 'â'])
];

const SIMPLER_WORDS: &[(&str, &str)] = &[
    ("utilize", "use"),
    ("approximately", "about"),
    ("commence", "start"),
    ("terminate", "end"),
    ("purchase", "buy"),
    ("assist", "help"),
    ("demonstrate", "show"),
    ("additional", "more"),
    ("sufficient", "enough"),
    ("numerous", "many"),
    ("obtain", "get"),
    ("require", "need"),
    ("subsequently", "later"),
    ("individuals", "people")
];

const CONTRACTIONS: &[(&str, &str)] = &[
    ("don't", "do not"),
    ("doesn't", "does not"),
    ("didn't", "did not"),
    ("can't", "cannot"),
    ("won't", "will not"),
    ("isn't", "is not"),
    ("aren't", "are not"),
    ("it's", "it is"),
    ("i'm", "i am"),
    ("you're", "you are"),
    ("we're", "we are"),
    ("they're", "they are"),
    ("gonna", "going to"),
    ("wanna", "want to")
];

const FILLERS: &[&str] = &["really", "very", "basically", "actually", "just", "quite", "literally"];

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicBackend;

impl HeuristicBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TaskBackend for HeuristicBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Heuristic
    }

    fn supports(&self, task_type: TaskType) -> bool {
        task_type != TaskType::Translate
    }

    async fn call(
        &self,
        request: &TaskRequest,
        _context: Option<&ContextHandle>
    ) -> Result<TaskOutput, TaskError> {
        match &request.payload {
            TaskPayload::Translate { .. } => {
                Err(TaskError::processing_failed("heuristic backend cannot translate").fatal())
            }
            TaskPayload::DetectLanguage { text } => detect_language(text),
            TaskPayload::Summarize { text, max_sentences } => Ok(TaskOutput::Summary {
                text: summarize(text, *max_sentences)
            }),
            TaskPayload::Rewrite { text, tone } => Ok(TaskOutput::Rewrite {
                text: rewrite(text, *tone)
            }),
            TaskPayload::AnalyzeVocabulary { text, max_words } => Ok(TaskOutput::Vocabulary {
                words: analyze_vocabulary(text, *max_words)
            })
        }
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphabetic())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn is_stopword(word: &str) -> bool {
    LEXICONS.iter().any(|(_, words)| words.contains(&word))
}

pub(crate) fn difficulty_of(word: &str) -> Difficulty {
    match word.chars().count() {
        0..=5 => Difficulty::Basic,
        6..=8 => Difficulty::Intermediate,
        _ => Difficulty::Advanced
    }
}

fn detect_language(text: &str) -> Result<TaskOutput, TaskError> {
    let words: Vec<String> = tokens(text).collect();
    let lowered = text.to_lowercase();

    let mut scores: Vec<(&str, f32)> = LEXICONS
        .iter()
        .map(|(language, lexicon)| {
            let hits = words.iter().filter(|w| lexicon.contains(&w.as_str())).count() as f32;
            let marks = DIACRITICS
                .iter()
                .find(|(l, _)| l == language)
                .map_or(0, |(_, chars)| lowered.chars().filter(|c| chars.contains(c)).count())
                as f32;
            (*language, hits + 0.5 * marks)
        })
        .collect();
    scores.sort_by(|a, b| b.1.total_cmp(&a.1));

    let (language, best) = scores[0];
    let second = scores.get(1).map_or(0.0, |s| s.1);
    if best <= 0.0 {
        return Err(TaskError::processing_failed("not enough signal to identify the language").fatal());
    }

    let coverage = (best / words.len().max(1) as f32).min(1.0);
    let margin = (best - second) / best;
    let confidence = (0.5 * coverage + 0.5 * margin).clamp(0.05, 0.99);

    Ok(TaskOutput::Language {
        language: language.to_string(),
        confidence
    })
}

fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars.peek().is_none_or(|(_, next)| next.is_whitespace());
            if at_boundary {
                let end = i + c.len_utf8();
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    out.push(sentence);
                }
                start = end;
            }
        }
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        out.push(rest);
    }
    out
}

fn summarize(text: &str, max_sentences: usize) -> String {
    let all = sentences(text);
    let keep = max_sentences.max(1);
    if all.len() <= keep {
        return all.join(" ");
    }

    let mut frequency: HashMap<String, usize> = HashMap::new();
    for word in tokens(text).filter(|w| !is_stopword(w)) {
        *frequency.entry(word).or_insert(0) += 1;
    }

    let mut ranked: Vec<(usize, f32)> = all
        .iter()
        .enumerate()
        .map(|(index, sentence)| {
            let words: Vec<String> = tokens(sentence).collect();
            let total: usize = words.iter().filter_map(|w| frequency.get(w)).sum();
            (index, total as f32 / words.len().max(1) as f32)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut chosen: Vec<usize> = ranked.into_iter().take(keep).map(|(i, _)| i).collect();
    chosen.sort_unstable();
    chosen.into_iter().map(|i| all[i]).collect::<Vec<_>>().join(" ")
}

/// Replaces `word` (case-insensitively) keeping a leading capital.
fn replace_word(word: &str, table: &[(&str, &str)]) -> Option<String> {
    let lower = word.to_lowercase();
    let (_, replacement) = table.iter().find(|(from, _)| *from == lower)?;
    Some(match_case(word, replacement))
}

fn match_case(original: &str, replacement: &str) -> String {
    let capitalized = original.chars().next().is_some_and(char::is_uppercase);
    if capitalized {
        capitalize(replacement)
    } else {
        replacement.to_string()
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new()
    }
}

/// Splits trailing punctuation off a whitespace-delimited word.
fn split_punctuation(word: &str) -> (&str, &str) {
    let end = word
        .char_indices()
        .rev()
        .take_while(|(_, c)| !c.is_alphanumeric() && *c != '\'')
        .last()
        .map_or(word.len(), |(i, _)| i);
    word.split_at(end)
}

fn rewrite(text: &str, tone: RewriteTone) -> String {
    let source = strip_parentheticals(text, tone);
    let words: Vec<&str> = source.split_whitespace().collect();
    let mut out: Vec<String> = Vec::with_capacity(words.len());
    let mut i = 0;

    while i < words.len() {
        let (core, punct) = split_punctuation(words[i]);
        let lower = core.to_lowercase();

        let replaced = match tone {
            RewriteTone::Simpler => replace_word(core, SIMPLER_WORDS),
            RewriteTone::Formal => replace_word(core, CONTRACTIONS),
            RewriteTone::Casual => {
                let next = words.get(i + 1).map(|w| split_punctuation(w));
                let pair = next.map(|(next_core, _)| format!("{lower} {}", next_core.to_lowercase()));
                let contracted = pair.as_deref().and_then(|pair| {
                    CONTRACTIONS
                        .iter()
                        .find(|(_, long)| *long == pair)
                        .map(|(short, _)| (*short, next.map_or("", |(_, p)| p)))
                });
                if let Some((short, next_punct)) = contracted {
                    out.push(format!("{}{next_punct}", match_case(core, short)));
                    i += 2;
                    continue;
                }
                None
            }
            RewriteTone::Shorter => {
                if FILLERS.contains(&lower.as_str()) {
                    if let Some(last) = out.last_mut() {
                        last.push_str(punct);
                    }
                    i += 1;
                    continue;
                }
                None
            }
        };

        out.push(format!("{}{punct}", replaced.as_deref().unwrap_or(core)));
        i += 1;
    }

    sentences(&out.join(" "))
        .into_iter()
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_parentheticals(text: &str, tone: RewriteTone) -> String {
    if tone != RewriteTone::Shorter {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

fn analyze_vocabulary(text: &str, max_words: usize) -> Vec<VocabularyEntry> {
    let mut counts: HashMap<String, u32> = HashMap::new();
    for word in tokens(text).filter(|w| w.chars().count() >= 3 && !is_stopword(w)) {
        *counts.entry(word).or_insert(0) += 1;
    }

    let mut entries: Vec<VocabularyEntry> = counts
        .into_iter()
        .map(|(word, occurrences)| VocabularyEntry {
            difficulty: difficulty_of(&word),
            word,
            occurrences,
            definition: None
        })
        .collect();

    let rank = |d: Difficulty| match d {
        Difficulty::Advanced => 0,
        Difficulty::Intermediate => 1,
        Difficulty::Basic => 2
    };
    entries.sort_by(|a, b| {
        rank(a.difficulty)
            .cmp(&rank(b.difficulty))
            .then(b.occurrences.cmp(&a.occurrences))
            .then(a.word.cmp(&b.word))
    });
    entries.truncate(max_words);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn language_of(text: &str) -> (String, f32) {
        match detect_language(text).unwrap() {
            TaskOutput::Language {
                language,
                confidence
            } => (language, confidence),
            other => panic!("unexpected output {other:?}")
        }
    }

    #[test]
    fn test_detects_common_languages() {
        let (language, confidence) = language_of("Bonjour le monde");
        assert_eq!(language, "fr");
        assert!(confidence > 0.8, "confidence {confidence}");

        assert_eq!(language_of("The cat is on the table").0, "en");
        assert_eq!(language_of("Hola, ¿cómo está el mundo?").0, "es");
        assert_eq!(language_of("Ich bin müde und das ist gut").0, "de");
        assert_eq!(language_of("Ciao, grazie molto per questo").0, "it");
        assert_eq!(language_of("Olá, você está muito bem também").0, "pt");
    }

    #[test]
    fn test_no_signal_is_fatal() {
        let err = detect_language("xyzzy qwrtp").unwrap_err();
        assert!(!err.retryable);
    }

    #[test]
    fn test_summary_keeps_top_sentences_in_order() {
        let text = "Rust makes memory safety practical. Lunch was fine. \
                    Rust ownership rules give memory safety without a collector. It rained.";
        let summary = summarize(text, 2);
        assert_eq!(
            summary,
            "Rust makes memory safety practical. Rust ownership rules give memory safety without a collector."
        );
    }

    #[test]
    fn test_short_text_summary_is_unchanged() {
        assert_eq!(summarize("Only one sentence here.", 3), "Only one sentence here.");
    }

    #[test]
    fn test_rewrite_tones() {
        assert_eq!(
            rewrite("we will utilize additional tools.", RewriteTone::Simpler),
            "We will use more tools."
        );
        assert_eq!(
            rewrite("I don't think it's ready.", RewriteTone::Formal),
            "I do not think it is ready."
        );
        assert_eq!(
            rewrite("I do not know. It is fine.", RewriteTone::Casual),
            "I don't know. It's fine."
        );
        assert_eq!(
            rewrite("This is really (honestly) just very good.", RewriteTone::Shorter),
            "This is good."
        );
    }

    #[test]
    fn test_vocabulary_ranks_hard_words_first() {
        let words = analyze_vocabulary(
            "The extraordinary cat met another extraordinary cat near the garden",
            3
        );
        assert_eq!(words.len(), 3);
        assert_eq!(words[0].word, "extraordinary");
        assert_eq!(words[0].occurrences, 2);
        assert_eq!(words[0].difficulty, Difficulty::Advanced);
        assert!(words.iter().all(|w| w.word != "the"));
    }

    #[tokio::test]
    async fn test_translate_is_unsupported() {
        let backend = HeuristicBackend::new();
        assert!(!backend.supports(TaskType::Translate));
        let err = backend
            .call(&TaskRequest::translate("hi", "fr"), None)
            .await
            .unwrap_err();
        assert!(!err.retryable);
    }
}

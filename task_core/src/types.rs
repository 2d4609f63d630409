use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_SUMMARY_SENTENCES: usize = 3;
pub const DEFAULT_VOCABULARY_WORDS: usize = 10;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumString, Display
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskType {
    Translate,
    DetectLanguage,
    Summarize,
    Rewrite,
    AnalyzeVocabulary
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::Translate,
        TaskType::DetectLanguage,
        TaskType::Summarize,
        TaskType::Rewrite,
        TaskType::AnalyzeVocabulary
    ];
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RewriteTone {
    #[default]
    Simpler,
    Formal,
    Casual,
    Shorter
}

fn default_summary_sentences() -> usize {
    DEFAULT_SUMMARY_SENTENCES
}

fn default_vocabulary_words() -> usize {
    DEFAULT_VOCABULARY_WORDS
}

/// Per-task payload. The variant is the task type, so a request can never
/// carry a payload that disagrees with its type.
///
/// Serialized adjacently tagged: `{"taskType": "translate", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(
    tag = "taskType",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum TaskPayload {
    Translate {
        text: String
    },
    DetectLanguage {
        text: String
    },
    Summarize {
        text: String,
        #[serde(default = "default_summary_sentences")]
        max_sentences: usize
    },
    Rewrite {
        text: String,
        #[serde(default)]
        tone: RewriteTone
    },
    AnalyzeVocabulary {
        text: String,
        #[serde(default = "default_vocabulary_words")]
        max_words: usize
    }
}

impl TaskPayload {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskPayload::Translate { .. } => TaskType::Translate,
            TaskPayload::DetectLanguage { .. } => TaskType::DetectLanguage,
            TaskPayload::Summarize { .. } => TaskType::Summarize,
            TaskPayload::Rewrite { .. } => TaskType::Rewrite,
            TaskPayload::AnalyzeVocabulary { .. } => TaskType::AnalyzeVocabulary
        }
    }

    pub fn text(&self) -> &str {
        match self {
            TaskPayload::Translate { text }
            | TaskPayload::DetectLanguage { text }
            | TaskPayload::Summarize { text, .. }
            | TaskPayload::Rewrite { text, .. }
            | TaskPayload::AnalyzeVocabulary { text, .. } => text
        }
    }

    /// Builds the default payload for `task_type` around `text`.
    pub fn for_type(task_type: TaskType, text: impl Into<String>) -> Self {
        let text = text.into();
        match task_type {
            TaskType::Translate => TaskPayload::Translate { text },
            TaskType::DetectLanguage => TaskPayload::DetectLanguage { text },
            TaskType::Summarize => TaskPayload::Summarize {
                text,
                max_sentences: DEFAULT_SUMMARY_SENTENCES
            },
            TaskType::Rewrite => TaskPayload::Rewrite {
                text,
                tone: RewriteTone::default()
            },
            TaskType::AnalyzeVocabulary => TaskPayload::AnalyzeVocabulary {
                text,
                max_words: DEFAULT_VOCABULARY_WORDS
            }
        }
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// A unit of language-processing work submitted to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    #[serde(flatten)]
    pub payload: TaskPayload,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_language: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,

    /// Surrounding text used to disambiguate the payload (e.g. the sentence a
    /// word was picked from).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64
}

impl TaskRequest {
    pub fn new(payload: TaskPayload) -> Self {
        Self {
            payload,
            source_language: None,
            target_language: None,
            context: None,
            timeout_ms: DEFAULT_TIMEOUT_MS
        }
    }

    pub fn translate(text: impl Into<String>, target_language: impl Into<String>) -> Self {
        Self::new(TaskPayload::Translate { text: text.into() }).with_target(target_language)
    }

    pub fn detect_language(text: impl Into<String>) -> Self {
        Self::new(TaskPayload::DetectLanguage { text: text.into() })
    }

    pub fn with_source(mut self, language: impl Into<String>) -> Self {
        self.source_language = Some(language.into());
        self
    }

    pub fn with_target(mut self, language: impl Into<String>) -> Self {
        self.target_language = Some(language.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn task_type(&self) -> TaskType {
        self.payload.task_type()
    }

    pub fn text(&self) -> &str {
        self.payload.text()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Difficulty {
    Basic,
    Intermediate,
    Advanced
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VocabularyEntry {
    pub word: String,
    pub occurrences: u32,
    pub difficulty: Difficulty,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>
}

/// Successful output of a task, one variant per task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TaskOutput {
    Translation {
        text: String,
        target_language: String
    },
    Language {
        language: String,
        confidence: f32
    },
    Summary {
        text: String
    },
    Rewrite {
        text: String
    },
    Vocabulary {
        words: Vec<VocabularyEntry>
    }
}

impl TaskOutput {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskOutput::Translation { .. } => TaskType::Translate,
            TaskOutput::Language { .. } => TaskType::DetectLanguage,
            TaskOutput::Summary { .. } => TaskType::Summarize,
            TaskOutput::Rewrite { .. } => TaskType::Rewrite,
            TaskOutput::Vocabulary { .. } => TaskType::AnalyzeVocabulary
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumString, Display
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BackendKind {
    OnDevice,
    Cloud,
    Heuristic
}

impl BackendKind {
    /// Fixed fallback priority.
    pub const CHAIN: [BackendKind; 3] = [BackendKind::OnDevice, BackendKind::Cloud, BackendKind::Heuristic];
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumString, Display
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskErrorKind {
    Unavailable,
    RateLimited,
    Timeout,
    InvalidInput,
    ProcessingFailed
}

impl TaskErrorKind {
    pub const ALL: [TaskErrorKind; 5] = [
        TaskErrorKind::Unavailable,
        TaskErrorKind::RateLimited,
        TaskErrorKind::Timeout,
        TaskErrorKind::InvalidInput,
        TaskErrorKind::ProcessingFailed
    ];

    /// Whether an error of this kind is worth retrying when the backend did
    /// not say otherwise.
    pub fn retryable_by_default(self) -> bool {
        !matches!(self, TaskErrorKind::InvalidInput)
    }
}

/// Why one backend did not produce a result for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendFailure {
    pub backend: BackendKind,
    pub kind: TaskErrorKind,
    pub message: String,
    pub attempts: u32,
    /// The backend was never called (missing prerequisite or unsupported task).
    #[serde(default)]
    pub skipped: bool
}

/// Normalized task failure shared by every backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{kind}: {message}")]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<BackendFailure>
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.retryable_by_default(),
            failures: Vec::new()
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Unavailable, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::RateLimited, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Timeout, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::InvalidInput, message)
    }

    pub fn processing_failed(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::ProcessingFailed, message)
    }

    /// Marks the error as not worth retrying.
    pub fn fatal(mut self) -> Self {
        self.retryable = false;
        self
    }

    pub fn with_failures(mut self, failures: Vec<BackendFailure>) -> Self {
        self.failures = failures;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// The single answer produced for a request.
///
/// Fields are private so `error` is present exactly when `success` is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<TaskOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<TaskError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    backend: Option<BackendKind>,
    #[serde(default)]
    cached: bool
}

impl TaskResult {
    pub fn success(data: TaskOutput, backend: BackendKind) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            backend: Some(backend),
            cached: false
        }
    }

    pub fn from_cache(data: TaskOutput) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            backend: None,
            cached: true
        }
    }

    pub fn failure(error: TaskError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            backend: None,
            cached: false
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn data(&self) -> Option<&TaskOutput> {
        self.data.as_ref()
    }

    pub fn error(&self) -> Option<&TaskError> {
        self.error.as_ref()
    }

    /// Backend that produced the data; `None` for cache hits and failures.
    pub fn backend(&self) -> Option<BackendKind> {
        self.backend
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    pub fn into_result(self) -> Result<TaskOutput, TaskError> {
        match (self.data, self.error) {
            (Some(data), None) => Ok(data),
            (_, Some(error)) => Err(error),
            (None, None) => Err(TaskError::processing_failed("result carried neither data nor error").fatal())
        }
    }
}

/// Inbound message: a task plus the id the caller uses to correlate replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub request_id: String,
    #[serde(flatten)]
    pub task: TaskRequest
}

/// Outbound message answering exactly one [`RequestEnvelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub request_id: String,
    #[serde(flatten)]
    pub result: TaskResult
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguagePreferences {
    /// Language the user reads natively; default translation target.
    pub native_language: String,
    /// Language the user is learning.
    pub learning_language: Option<String>
}

impl Default for LanguagePreferences {
    fn default() -> Self {
        Self {
            native_language: "en".to_string(),
            learning_language: None
        }
    }
}

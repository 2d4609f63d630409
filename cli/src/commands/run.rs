use anyhow::Result;
use clap::{Args, ValueEnum};
use config::Config;
use engine::Engine;
use task_core::{
    RequestEnvelope, RewriteTone, TaskPayload, TaskRequest, TaskResult, TaskType
};
use tracing::debug;
use uuid::Uuid;

use crate::{output, ux_error};

#[derive(Args)]
pub struct RunArgs {
    #[arg(value_enum, help = "Task to run")]
    pub task: TaskChoice,

    #[arg(help = "Text to process")]
    pub text: String,

    #[arg(long, help = "Source language code (omit or 'auto' to detect)")]
    pub from: Option<String>,

    #[arg(long, help = "Target language code (defaults to the native language)")]
    pub to: Option<String>,

    #[arg(long, help = "Surrounding text that disambiguates the input")]
    pub context: Option<String>,

    #[arg(long, value_enum, default_value = "simpler", help = "Tone for rewrite")]
    pub tone: ToneChoice,

    #[arg(long, default_value_t = 3, help = "Sentences kept by summarize")]
    pub max_sentences: usize,

    #[arg(long, default_value_t = 10, help = "Words returned by vocabulary")]
    pub max_words: usize,

    #[arg(long, help = "Deadline for the whole task in milliseconds")]
    pub timeout_ms: Option<u64>,

    #[arg(long, help = "Output the full result as JSON")]
    pub json: bool
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TaskChoice {
    Translate,
    Detect,
    Summarize,
    Rewrite,
    Vocabulary
}

impl From<TaskChoice> for TaskType {
    fn from(choice: TaskChoice) -> Self {
        match choice {
            TaskChoice::Translate => TaskType::Translate,
            TaskChoice::Detect => TaskType::DetectLanguage,
            TaskChoice::Summarize => TaskType::Summarize,
            TaskChoice::Rewrite => TaskType::Rewrite,
            TaskChoice::Vocabulary => TaskType::AnalyzeVocabulary
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ToneChoice {
    Simpler,
    Formal,
    Casual,
    Shorter
}

impl From<ToneChoice> for RewriteTone {
    fn from(choice: ToneChoice) -> Self {
        match choice {
            ToneChoice::Simpler => RewriteTone::Simpler,
            ToneChoice::Formal => RewriteTone::Formal,
            ToneChoice::Casual => RewriteTone::Casual,
            ToneChoice::Shorter => RewriteTone::Shorter
        }
    }
}

pub fn build_request(args: &RunArgs, default_timeout_ms: u64) -> TaskRequest {
    let text = args.text.clone();
    let payload = match args.task {
        TaskChoice::Summarize => TaskPayload::Summarize {
            text,
            max_sentences: args.max_sentences
        },
        TaskChoice::Rewrite => TaskPayload::Rewrite {
            text,
            tone: args.tone.into()
        },
        TaskChoice::Vocabulary => TaskPayload::AnalyzeVocabulary {
            text,
            max_words: args.max_words
        },
        other => TaskPayload::for_type(other.into(), text)
    };

    TaskRequest {
        payload,
        source_language: args.from.clone(),
        target_language: args.to.clone(),
        context: args.context.clone(),
        timeout_ms: args.timeout_ms.unwrap_or(default_timeout_ms)
    }
}

pub async fn run(args: RunArgs, config: Config) -> Result<()> {
    let request = build_request(&args, config.engine.default_timeout_ms);
    let engine = Engine::builder(config).build()?;

    let request_id = Uuid::new_v4().to_string();
    debug!(request_id = %request_id, task_type = %request.task_type(), "Running task");
    let response = engine
        .handle(RequestEnvelope {
            request_id,
            task: request
        })
        .await;
    engine.shutdown().await;
    let result = response.result;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return if result.is_success() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("Task failed"))
        };
    }

    render(&result)
}

fn render(result: &TaskResult) -> Result<()> {
    let Some(data) = result.data() else {
        if let Some(error) = result.error() {
            ux_error::task_failed(error).display();
        }
        return Err(anyhow::anyhow!("Task failed"));
    };

    output::task_output(result, data);
    Ok(())
}

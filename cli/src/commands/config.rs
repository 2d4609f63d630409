use anyhow::Result;
use clap::Args;
use config::Config;

use crate::output;

#[derive(Args)]
pub struct ConfigArgs {
    #[arg(long, help = "Output as JSON")]
    pub json: bool,

    #[arg(long, help = "Show the cloud API key instead of masking it")]
    pub show_secrets: bool
}

pub fn run(args: ConfigArgs, config: &Config) -> Result<()> {
    let mut shown = config.clone();
    if !args.show_secrets {
        shown.cloud.api_key = shown.cloud.api_key.as_deref().map(mask);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&shown)?);
        return Ok(());
    }

    output::header("Glossa Configuration");
    println!();

    output::section("Engine:");
    output::field("max_concurrent", &shown.engine.max_concurrent_tasks.to_string());
    output::field("timeout_ms", &shown.engine.default_timeout_ms.to_string());
    output::field("ready_timeout", &shown.engine.context_ready_timeout_ms.to_string());

    println!();
    output::section("Retry:");
    output::field("max_attempts", &shown.retry.max_attempts.to_string());
    output::field("base_delay_ms", &shown.retry.base_delay_ms.to_string());
    output::field("max_delay_ms", &shown.retry.max_delay_ms.to_string());
    output::field("jitter", &shown.retry.jitter.to_string());

    println!();
    output::section("Cache:");
    output::field("enabled", &shown.cache.enabled.to_string());
    output::field("ttl_secs", &shown.cache.ttl_secs.to_string());
    output::field("max_bytes", &shown.cache.max_bytes.to_string());

    println!();
    output::section("Backends:");
    output::field("on_device", &format!("{} ({})", shown.on_device.model, shown.on_device.endpoint));
    output::field("on_device_on", &shown.on_device.enabled.to_string());
    output::field("cloud", &format!("{} ({})", shown.cloud.model, shown.cloud.endpoint));
    match &shown.cloud.api_key {
        Some(key) => output::field("cloud_key", key),
        None => output::missing_field("cloud_key")
    }

    println!();
    output::section("Languages:");
    output::field("native", &shown.languages.native_language);
    if let Some(learning) = &shown.languages.learning_language {
        output::field("learning", learning);
    }

    if shown.cloud.api_key.is_none() {
        println!();
        output::hint("Set GLOSSA_CLOUD_API_KEY to enable the cloud backend");
    }

    Ok(())
}

fn mask(key: &str) -> String {
    let visible: String = key.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    format!("****{visible}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_keeps_last_four() {
        assert_eq!(mask("sk-1234567890"), "****7890");
        assert_eq!(mask("ab"), "****ab");
    }
}

use anyhow::Context;
use clap::Parser;
use portshift::utils::{logger, validation::Validate};
use portshift::{CliConfig, PortshiftError, Remediator, ReportFormat, SystemRunner};
use std::sync::Arc;

fn fail(stage: &str, e: PortshiftError) -> ! {
    tracing::error!("❌ {}: {}", stage, e);
    tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 {}", e.recovery_suggestion());
    std::process::exit(e.exit_code());
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    // 初始化日誌
    logger::init_cli_logger(cli.verbose);

    tracing::info!("Starting portshift");
    tracing::debug!("CLI config: {:?}", cli);

    // 載入並驗證配置
    let config = cli
        .load()
        .unwrap_or_else(|e| fail("Failed to load configuration", e));
    if let Err(e) = config.validate() {
        fail("Configuration validation failed", e);
    }
    tracing::debug!("Effective configuration: {:?}", config);

    let remediator = Remediator::new(config, Arc::new(SystemRunner::new()))
        .unwrap_or_else(|e| fail("Invalid rewrite rules", e));

    let result = if cli.dry_run {
        tracing::info!("🔍 DRY RUN MODE - nothing will be stopped or written");
        remediator.plan().await
    } else {
        remediator.run().await
    };

    let report = result.unwrap_or_else(|e| fail("Remediation aborted", e));

    // 報告輸出到 stdout，日誌在 stderr
    match cli.format {
        ReportFormat::Text => print!("{}", report.render_text()),
        ReportFormat::Json => println!(
            "{}",
            report.to_json().context("failed to serialize the report")?
        ),
    }

    Ok(())
}

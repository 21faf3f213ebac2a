//! Scout 控制台客户端
//!
//! 启动: cargo run --bin scout
//! 逐行读取 stdin 作为问题，打印答案；`exit` / `quit` 退出。

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use scout::config::{load_config, AppConfig};
use scout::core::Orchestrator;
use scout::llm::{LlmClient, MockLlm, OpenAiLlm};

/// 根据配置选择 LLM 后端；没有 API Key 时退回 Mock
fn create_llm(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let has_key =
        std::env::var("SCOUT_API_KEY").is_ok() || std::env::var("OPENAI_API_KEY").is_ok();
    if cfg.llm.provider == "mock" || !has_key {
        tracing::warn!("no API key set or provider=mock, using Mock LLM");
        Arc::new(MockLlm::default())
    } else {
        tracing::info!(model = %cfg.llm.model, "using OpenAI-compatible LLM");
        Arc::new(OpenAiLlm::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, None))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    scout::observability::init();

    let cfg = load_config(None)?;
    let llm = create_llm(&cfg);
    let orchestrator = Orchestrator::new(cfg, llm);

    let mut stdout = tokio::io::stdout();
    stdout.write_all("scout> ".as_bytes()).await?;
    stdout.flush().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let question = line.trim();
        if question.is_empty() {
            stdout.write_all("scout> ".as_bytes()).await?;
            stdout.flush().await?;
            continue;
        }
        if question == "exit" || question == "quit" {
            break;
        }

        let report = orchestrator.process_task(question, None).await;
        let line = if report.success {
            format!("{}\n", report.answer)
        } else {
            format!("[失败] {} ({})\n", report.answer, report.errors.join("; "))
        };
        stdout.write_all(line.as_bytes()).await?;
        stdout.write_all("scout> ".as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}

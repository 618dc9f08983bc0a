//! Bespoke - 助手会话命令行
//!
//! 入口：初始化日志、加载配置、构建并引导会话，然后逐行读取 stdin。
//! `exit` 退出；`analyze: <text>` / `image: <url>` 走实时通道；`code: <src>` 在沙箱执行；
//! 其余输入发给远端助手。Ctrl+C 拆除会话。
//!
//! 用法：`bespoke [--mock] [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bespoke::api::MockAssistantApi;
use bespoke::config::{load_config, AppConfig};
use bespoke::{AssistantOrchestrator, SessionBuilder, TurnOutcome};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bespoke::observability::init();

    let mut use_mock = false;
    let mut config_path: Option<PathBuf> = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--mock" => use_mock = true,
            other => config_path = Some(PathBuf::from(other)),
        }
    }

    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let mut builder = SessionBuilder::new(cfg);
    if use_mock {
        tracing::warn!("Using mock assistant API");
        builder = builder.with_api(Arc::new(MockAssistantApi::new()));
    }
    let session = Arc::new(builder.build().context("Failed to build session")?);

    let identity = session
        .bootstrap()
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))
        .context("Failed to start assistant session")?;
    println!(
        "Session ready (assistant {}, thread {}). Type `exit` to quit.",
        identity.assistant.id, identity.thread.id
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else { break };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") {
            break;
        }

        let reply = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            reply = dispatch(&session, input) => reply,
        };
        println!("{}", reply);
    }

    session.shutdown().await;
    Ok(())
}

async fn dispatch(session: &AssistantOrchestrator, input: &str) -> String {
    #[cfg(feature = "realtime")]
    {
        if let Some(text) = input.strip_prefix("analyze:") {
            return match session.analyze_text(text.trim()).await {
                Ok(v) => format!("Text analysis: {}", v),
                Err(e) => e.user_message(),
            };
        }
        if let Some(url) = input.strip_prefix("image:") {
            return match session.recognize_image(url.trim()).await {
                Ok(v) => format!("Image recognition: {}", v),
                Err(e) => e.user_message(),
            };
        }
    }

    match session.handle_input(input).await {
        Ok(TurnOutcome::Code(output)) => output,
        Ok(TurnOutcome::Reply { response, sentiment, .. }) => match sentiment {
            Some(s) => format!("{}\n(sentiment: {})", response, s),
            None => response,
        },
        Err(e) => e.user_message(),
    }
}

//! cmdpool demo: 標準入力の各行をシェルスクリプトとしてプールで実行する
//!
//! ```text
//! printf 'sleep 1; echo a\necho b\nexit 3\n' | CMDPOOL_WORKERS=2 CMDPOOL_TIMEOUT_MS=5000 cmdpool-cli
//! ```
//!
//! One JSON object per finished line goes to stdout, followed by the final
//! pool stats. Logs go to stderr (`RUST_LOG` controls the level).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use cmdpool_core::impls::Shell;
use cmdpool_core::{CommandPool, CommandResult, ExecContext, PoolConfig};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[derive(Debug, Serialize)]
struct LineReport {
    line: usize,
    script: String,
    ok: bool,
    output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl LineReport {
    fn new(line: usize, script: String, result: CommandResult) -> Self {
        match result {
            Ok(output) => Self {
                line,
                script,
                ok: true,
                output: String::from_utf8_lossy(&output).into_owned(),
                error: None,
            },
            Err(err) => Self {
                line,
                script,
                ok: false,
                output: err.output().unwrap_or_default().to_string(),
                error: Some(err.to_string()),
            },
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{s}"),
        Err(e) => tracing::error!(error = %e, "failed to encode report"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = PoolConfig::from_env().context("reading pool configuration")?;
    info!(?config, "configuration loaded");

    let root = ExecContext::background();
    let pool = CommandPool::<Shell>::from_config(&root, &config)?;

    // Ctrl-C でプール全体をキャンセル
    {
        let root = root.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted, cancelling running commands");
                root.cancel();
            }
        });
    }

    let any_failed = Arc::new(AtomicBool::new(false));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0;
    while let Some(script) = lines.next_line().await.context("reading stdin")? {
        line_no += 1;
        if script.trim().is_empty() {
            continue;
        }

        let line = line_no;
        let any_failed = Arc::clone(&any_failed);
        pool.start(Shell::new(), script.clone(), move |result| {
            if result.is_err() {
                any_failed.store(true, Ordering::Relaxed);
            }
            print_json(&LineReport::new(line, script, result));
        });
    }

    pool.wait().await;
    pool.close().await;
    print_json(&pool.stats());

    if any_failed.load(Ordering::Relaxed) {
        std::process::exit(1);
    }
    Ok(())
}

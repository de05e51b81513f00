//! fibo-scan：从检查点续扫区块并记录每笔交易
//!
//! 用法：`fibo-scan [config.json]`，未给出配置文件时从 `FIBO_*` 环境变量读取。

use fibo_sdk::domain::chain_types::{Block, Transaction};
use fibo_sdk::{CallContext, ChainSdk, SdkConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn log_transaction(tx: &Transaction, block: &Block) -> anyhow::Result<()> {
    tracing::info!(
        block = block.number(),
        tx_hash = ?tx.hash,
        from = ?tx.from,
        to = ?tx.to,
        value = %tx.value,
        "交易"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => SdkConfig::from_json_file(path)?,
        None => SdkConfig::from_env()?,
    };

    // 初始化日志追踪
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let start_height = config.scan.start_height;
    let poll_interval = config.scan.poll_interval();
    let sdk = ChainSdk::connect(config).await?;

    let (ctx, cancel) = CallContext::with_cancel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("收到退出信号");
            cancel.cancel();
        }
    });

    tracing::info!(start_height, "开始扫块");
    sdk.start_scan(&ctx, start_height, poll_interval, log_transaction)
        .await?;
    sdk.close();
    tracing::info!("扫块已停止");
    Ok(())
}

//! 扫块服务
//!
//! 每个 tick：
//! 1. 取连接，查询最新区块号 `highest`
//! 2. 恢复高度 `resume = max(检查点, start_height)`
//! 3. `resume >= highest` 时跳过（没有新区块或链回滚）
//! 4. 依次处理 `[resume + 1, highest)`，不处理最新的一个区块
//! 5. 回调失败的交易写入失败记录，继续处理下一笔
//! 6. 每处理完一个区块写一次检查点
//!
//! 区块获取失败只终止本轮 tick，下一轮从检查点继续。

use crate::domain::chain_types::{Block, Transaction};
use crate::domain::context::CallContext;
use crate::domain::errors::{Result, SdkError};
use crate::domain::tx_types::FailedTxRecord;
use crate::infrastructure::chain_client::{ChainClient, Dialer};
use crate::infrastructure::checkpoint_store::CheckpointStore;
use crate::infrastructure::pool::ConnectionPool;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// 交易回调
///
/// 按区块内顺序对每笔交易调用一次；返回错误不会中断扫块。
#[async_trait]
pub trait TxHandler: Send + Sync {
    async fn handle(&self, tx: &Transaction, block: &Block) -> anyhow::Result<()>;
}

#[async_trait]
impl<F> TxHandler for F
where
    F: Fn(&Transaction, &Block) -> anyhow::Result<()> + Send + Sync,
{
    async fn handle(&self, tx: &Transaction, block: &Block) -> anyhow::Result<()> {
        (self)(tx, block)
    }
}

/// 单个 tick 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// 没有可处理的新区块
    Skipped { resume: u64, highest: u64 },
    /// 处理了 `[from, to]` 区间（含两端）
    Scanned { from: u64, to: u64, failed_txs: usize },
}

/// 区块扫描器
pub struct BlockScanner<D: Dialer, S: CheckpointStore, H: TxHandler> {
    pool: ConnectionPool<D>,
    store: Arc<S>,
    handler: H,
    start_height: u64,
    block_delay: Duration,
    /// tick 互斥，避免两个 tick 交错处理区块
    tick_lock: tokio::sync::Mutex<()>,
}

impl<D: Dialer, S: CheckpointStore, H: TxHandler> BlockScanner<D, S, H> {
    /// `start_height` 必须 >= 1
    pub fn new(
        pool: ConnectionPool<D>,
        store: Arc<S>,
        handler: H,
        start_height: u64,
        block_delay: Duration,
    ) -> Result<Self> {
        if start_height < 1 {
            return Err(SdkError::InvalidStartHeight);
        }
        Ok(Self {
            pool,
            store,
            handler,
            start_height,
            block_delay,
            tick_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// 按固定间隔循环执行 tick，直到上下文取消
    ///
    /// 单个 tick 失败只记录日志，不退出循环。
    pub async fn run(&self, ctx: &CallContext, poll_interval: Duration) {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(start_height = self.start_height, "开始扫块");
        loop {
            tokio::select! {
                biased;
                _ = ctx.done() => break,
                _ = interval.tick() => {}
            }

            if let Err(e) = self.tick(ctx).await {
                tracing::warn!(error = %e, "本轮扫块失败，下一轮重试");
            }
        }
        tracing::info!("扫块已停止");
    }

    /// 执行一次扫块
    pub async fn tick(&self, ctx: &CallContext) -> Result<TickOutcome> {
        let _guard = self.tick_lock.lock().await;

        let conn = self.pool.acquire().await?;
        let highest = conn.block_number().await?;
        let checkpoint = self.store.read_height().await?;
        let resume = checkpoint.max(self.start_height);

        if resume >= highest {
            tracing::debug!(resume, highest, "没有新区块");
            return Ok(TickOutcome::Skipped { resume, highest });
        }

        let from = resume + 1;
        let mut last = resume;
        let mut failed_txs = 0;

        for height in from..highest {
            if ctx.is_done() {
                break;
            }

            let block = conn
                .block_by_number(height)
                .await?
                .ok_or(SdkError::BlockNotFound(height))?;

            failed_txs += self.process_block(&block).await;

            self.store.write_height(height).await?;
            last = height;
            tracing::info!(
                block_number = height,
                tx_count = block.transactions.len(),
                "区块处理完成"
            );

            if !self.block_delay.is_zero() && height + 1 < highest {
                tokio::select! {
                    biased;
                    _ = ctx.done() => break,
                    _ = tokio::time::sleep(self.block_delay) => {}
                }
            }
        }

        if last < from {
            return Ok(TickOutcome::Skipped { resume, highest });
        }
        Ok(TickOutcome::Scanned {
            from,
            to: last,
            failed_txs,
        })
    }

    /// 处理区块内的全部交易，返回回调失败的笔数
    async fn process_block(&self, block: &Block) -> usize {
        let mut failed = 0;
        for tx in &block.transactions {
            let Err(e) = self.handler.handle(tx, block).await else {
                continue;
            };
            failed += 1;
            tracing::warn!(
                block_number = block.number(),
                tx_hash = ?tx.hash,
                error = %e,
                "交易回调失败"
            );

            let record = FailedTxRecord::new(tx, block, format!("{:#}", e));
            if let Err(e) = self.store.append_failed_tx(&record).await {
                tracing::error!(tx_hash = ?tx.hash, error = %e, "写入失败交易记录失败");
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::checkpoint_store::MemoryCheckpointStore;
    use crate::infrastructure::mock_chain::{MockChainClient, MockDialer};
    use ethereum_types::{Address, H256, U256};
    use std::sync::Mutex;

    /// 记录调用顺序，对指定交易返回错误
    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<(u64, H256)>>,
        fail_on: Vec<H256>,
    }

    #[async_trait]
    impl TxHandler for RecordingHandler {
        async fn handle(&self, tx: &Transaction, block: &Block) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push((block.number(), tx.hash));
            if self.fail_on.contains(&tx.hash) {
                anyhow::bail!("handler rejected {:?}", tx.hash);
            }
            Ok(())
        }
    }

    fn tx(hash: u64) -> Transaction {
        MockChainClient::make_transaction(
            hash,
            Address::from_low_u64_be(1),
            Address::from_low_u64_be(2),
            U256::from(hash),
        )
    }

    /// 区块 1..=head，每个区块一笔交易（哈希 = 区块号 * 10）
    fn chain_with_blocks(head: u64) -> MockDialer {
        let chain = MockChainClient::new();
        for n in 1..=head {
            chain.add_block(MockChainClient::make_block(n, vec![tx(n * 10)]));
        }
        MockDialer::new(chain)
    }

    fn scanner<H: TxHandler>(
        dialer: &MockDialer,
        store: MemoryCheckpointStore,
        handler: H,
        start: u64,
    ) -> BlockScanner<MockDialer, MemoryCheckpointStore, H> {
        BlockScanner::new(
            ConnectionPool::new(dialer.clone(), 1),
            Arc::new(store),
            handler,
            start,
            Duration::ZERO,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_lags_chain_tip_by_one_block() {
        let dialer = chain_with_blocks(105);
        let scanner = scanner(&dialer, MemoryCheckpointStore::new(), RecordingHandler::default(), 100);

        let outcome = scanner.tick(&CallContext::background()).await.unwrap();
        assert_eq!(outcome, TickOutcome::Scanned { from: 101, to: 104, failed_txs: 0 });
        assert_eq!(dialer.chain().block_queries(), vec![101, 102, 103, 104]);
        assert_eq!(scanner.store().height(), 104);
        assert_eq!(scanner.store().writes(), vec![101, 102, 103, 104]);
    }

    #[tokio::test]
    async fn test_skip_when_no_new_blocks() {
        let dialer = chain_with_blocks(105);
        let scanner = scanner(&dialer, MemoryCheckpointStore::with_height(105), RecordingHandler::default(), 1);

        let outcome = scanner.tick(&CallContext::background()).await.unwrap();
        assert_eq!(outcome, TickOutcome::Skipped { resume: 105, highest: 105 });
        assert!(dialer.chain().block_queries().is_empty());

        // 检查点高于链高度（回滚）同样跳过
        dialer.chain().set_head(90);
        let outcome = scanner.tick(&CallContext::background()).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Skipped { .. }));
        assert_eq!(scanner.store().height(), 105);
    }

    #[tokio::test]
    async fn test_checkpoint_overrides_lower_start() {
        let dialer = chain_with_blocks(112);
        let scanner = scanner(&dialer, MemoryCheckpointStore::with_height(110), RecordingHandler::default(), 100);

        let outcome = scanner.tick(&CallContext::background()).await.unwrap();
        assert_eq!(outcome, TickOutcome::Scanned { from: 111, to: 111, failed_txs: 0 });
    }

    #[tokio::test]
    async fn test_handler_failure_is_isolated() {
        let chain = MockChainClient::new();
        chain.add_block(MockChainClient::make_block(1, vec![]));
        chain.add_block(MockChainClient::make_block(2, vec![tx(1), tx(2), tx(3)]));
        chain.add_block(MockChainClient::make_block(3, vec![]));
        let dialer = MockDialer::new(chain);

        let handler = RecordingHandler {
            fail_on: vec![H256::from_low_u64_be(2)],
            ..Default::default()
        };
        let scanner = scanner(&dialer, MemoryCheckpointStore::with_height(1), handler, 1);

        let outcome = scanner.tick(&CallContext::background()).await.unwrap();
        assert_eq!(outcome, TickOutcome::Scanned { from: 2, to: 2, failed_txs: 1 });

        let seen: Vec<H256> = scanner.handler.seen.lock().unwrap().iter().map(|(_, h)| *h).collect();
        assert_eq!(
            seen,
            vec![H256::from_low_u64_be(1), H256::from_low_u64_be(2), H256::from_low_u64_be(3)]
        );

        let failed = scanner.store().failed_txs();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].hash, H256::from_low_u64_be(2));
        assert_eq!(failed[0].block_height, 2);
        assert_eq!(scanner.store().height(), 2);
    }

    #[tokio::test]
    async fn test_block_fetch_error_aborts_tick_and_resumes() {
        let dialer = chain_with_blocks(106);
        dialer.chain().fail_block(103);
        let scanner = scanner(&dialer, MemoryCheckpointStore::new(), RecordingHandler::default(), 100);

        assert!(scanner.tick(&CallContext::background()).await.is_err());
        assert_eq!(scanner.store().height(), 102);

        dialer.chain().heal_block(103);
        let outcome = scanner.tick(&CallContext::background()).await.unwrap();
        assert_eq!(outcome, TickOutcome::Scanned { from: 103, to: 105, failed_txs: 0 });

        let writes = scanner.store().writes();
        assert!(writes.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(writes, vec![101, 102, 103, 104, 105]);
    }

    #[tokio::test]
    async fn test_missing_block_aborts_tick() {
        let chain = MockChainClient::new();
        chain.add_block(MockChainClient::make_block(2, vec![]));
        chain.set_head(4);
        let dialer = MockDialer::new(chain);
        let scanner = scanner(&dialer, MemoryCheckpointStore::new(), RecordingHandler::default(), 1);

        let err = scanner.tick(&CallContext::background()).await.unwrap_err();
        assert!(matches!(err, SdkError::BlockNotFound(3)));
        assert_eq!(scanner.store().height(), 2);
    }

    #[tokio::test]
    async fn test_closure_handler() {
        let dialer = chain_with_blocks(3);
        let handler = |tx: &Transaction, _block: &Block| -> anyhow::Result<()> {
            anyhow::ensure!(tx.value < U256::from(20), "too large");
            Ok(())
        };
        let scanner = scanner(&dialer, MemoryCheckpointStore::new(), handler, 1);

        let outcome = scanner.tick(&CallContext::background()).await.unwrap();
        assert_eq!(outcome, TickOutcome::Scanned { from: 2, to: 2, failed_txs: 1 });
    }

    #[test]
    fn test_start_height_must_be_positive() {
        let dialer = chain_with_blocks(1);
        let result = BlockScanner::new(
            ConnectionPool::new(dialer, 1),
            Arc::new(MemoryCheckpointStore::new()),
            RecordingHandler::default(),
            0,
            Duration::ZERO,
        );
        assert!(matches!(result, Err(SdkError::InvalidStartHeight)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_follows_chain_until_cancelled() {
        let dialer = chain_with_blocks(5);
        let scanner = Arc::new(scanner(&dialer, MemoryCheckpointStore::new(), RecordingHandler::default(), 1));
        let (ctx, handle) = CallContext::with_cancel();

        let task = tokio::spawn({
            let scanner = Arc::clone(&scanner);
            async move { scanner.run(&ctx, Duration::from_secs(1)).await }
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(scanner.store().height(), 4);

        // 链上出现新区块后下一轮继续
        for n in 6..=8 {
            dialer.chain().add_block(MockChainClient::make_block(n, vec![tx(n * 10)]));
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(scanner.store().height(), 7);

        handle.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("取消后扫块循环应退出")
            .unwrap();
    }
}

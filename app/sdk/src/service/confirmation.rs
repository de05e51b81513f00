//! 交易确认等待
//!
//! 状态机：`Submitted -> {Confirmed, Reverted, Exhausted, TimedOut}`
//!
//! 每个轮询间隔查询一次收据。查询出错或尚未打包都计入重试次数，
//! 达到上限后返回 `Unconfirmed`（不是错误，交易之后仍可能被打包）。
//! 上下文到期或取消时在当前等待点立即返回 `ReceiptReadTimeout`。

use crate::config::ConfirmationConfig;
use crate::domain::context::CallContext;
use crate::domain::errors::{Result, SdkError};
use crate::infrastructure::chain_client::ChainClient;
use ethereum_types::H256;
use std::time::Duration;

/// 同步发送的确认结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// 收据成功且带区块号
    Confirmed { block_number: u64 },
    /// 重试次数用完仍未确认
    Unconfirmed { attempts: u32 },
}

impl TransferStatus {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, TransferStatus::Confirmed { .. })
    }
}

/// 同步发送的返回值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReceipt {
    pub hash: H256,
    pub status: TransferStatus,
}

/// 收据轮询器
#[derive(Debug, Clone)]
pub struct ConfirmationWaiter {
    poll_interval: Duration,
    max_retries: u32,
}

impl ConfirmationWaiter {
    pub fn new(config: &ConfirmationConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_retries: config.max_retries,
        }
    }

    /// 等待交易进入终态
    ///
    /// - 成功收据 -> `Ok(Confirmed)`
    /// - 回滚收据 -> `Err(TransactionFailed)`
    /// - 重试用完 -> `Ok(Unconfirmed)`
    /// - 上下文完成 -> `Err(ReceiptReadTimeout)`
    pub async fn wait<C>(&self, ctx: &CallContext, client: &C, hash: H256) -> Result<TransferStatus>
    where
        C: ChainClient + ?Sized,
    {
        let mut attempts: u32 = 0;

        loop {
            if attempts >= self.max_retries {
                tracing::warn!(tx_hash = ?hash, attempts, "等待交易确认超过重试次数");
                return Ok(TransferStatus::Unconfirmed { attempts });
            }

            tokio::select! {
                biased;
                _ = ctx.done() => return Err(SdkError::ReceiptReadTimeout(hash)),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let result = tokio::select! {
                biased;
                _ = ctx.done() => return Err(SdkError::ReceiptReadTimeout(hash)),
                result = client.transaction_receipt(hash) => result,
            };

            match result {
                Ok(Some(receipt)) if receipt.is_failed() => {
                    tracing::warn!(tx_hash = ?hash, "交易执行失败");
                    return Err(SdkError::TransactionFailed(hash));
                }
                Ok(Some(receipt)) if receipt.is_success() && receipt.block_number.is_some() => {
                    let block_number = receipt.block_number.map(|n| n.as_u64()).unwrap_or_default();
                    tracing::info!(tx_hash = ?hash, block_number, "交易已确认");
                    return Ok(TransferStatus::Confirmed { block_number });
                }
                Ok(_) => {
                    tracing::debug!(tx_hash = ?hash, attempts, "交易尚未确认");
                }
                Err(e) => {
                    tracing::debug!(tx_hash = ?hash, attempts, error = %e, "查询收据失败");
                }
            }
            attempts += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock_chain::{MockChainClient, ReceiptStep};

    fn waiter(max_retries: u32) -> ConfirmationWaiter {
        ConfirmationWaiter::new(&ConfirmationConfig {
            poll_interval_ms: 1000,
            max_retries,
        })
    }

    fn hash() -> H256 {
        H256::from_low_u64_be(0x77)
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_after_pending_polls() {
        let chain = MockChainClient::new();
        chain.script_receipts(hash(), vec![ReceiptStep::NotFound, ReceiptStep::Error]);
        chain.set_receipt(MockChainClient::success_receipt(hash(), 42));

        let status = waiter(24)
            .wait(&CallContext::background(), &chain, hash())
            .await
            .unwrap();
        assert_eq!(status, TransferStatus::Confirmed { block_number: 42 });
        assert_eq!(chain.receipt_queries(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverted() {
        let chain = MockChainClient::new();
        chain.set_receipt(MockChainClient::failed_receipt(hash(), 42));

        let err = waiter(24)
            .wait(&CallContext::background(), &chain, hash())
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::TransactionFailed(h) if h == hash()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_exact_retry_ceiling() {
        let chain = MockChainClient::new();

        let status = waiter(5)
            .wait(&CallContext::background(), &chain, hash())
            .await
            .unwrap();
        assert_eq!(status, TransferStatus::Unconfirmed { attempts: 5 });
        assert_eq!(chain.receipt_queries(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_without_block_number_keeps_polling() {
        let chain = MockChainClient::new();
        let mut receipt = MockChainClient::success_receipt(hash(), 0);
        receipt.block_number = None;
        chain.set_receipt(receipt);

        let status = waiter(3)
            .wait(&CallContext::background(), &chain, hash())
            .await
            .unwrap();
        assert_eq!(status, TransferStatus::Unconfirmed { attempts: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_times_out() {
        let chain = MockChainClient::new();
        let ctx = CallContext::with_timeout(Duration::from_millis(3500));

        let err = waiter(24).wait(&ctx, &chain, hash()).await.unwrap_err();
        assert!(matches!(err, SdkError::ReceiptReadTimeout(_)));
        assert_eq!(chain.receipt_queries(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_observed_within_one_interval() {
        let chain = MockChainClient::new();
        let (ctx, handle) = CallContext::with_cancel();

        let waiting = tokio::spawn({
            let chain = chain.clone();
            async move { waiter(24).wait(&ctx, &chain, hash()).await }
        });
        tokio::time::sleep(Duration::from_millis(1500)).await;
        handle.cancel();

        let started = tokio::time::Instant::now();
        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, SdkError::ReceiptReadTimeout(_)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_done_context_never_polls() {
        let chain = MockChainClient::new();
        chain.set_receipt(MockChainClient::success_receipt(hash(), 1));
        let ctx = CallContext::with_timeout(Duration::ZERO);

        let err = waiter(24).wait(&ctx, &chain, hash()).await.unwrap_err();
        assert!(matches!(err, SdkError::ReceiptReadTimeout(_)));
        assert_eq!(chain.receipt_queries(), 0);
    }

    #[test]
    fn test_status_helpers() {
        assert!(TransferStatus::Confirmed { block_number: 1 }.is_confirmed());
        assert!(!TransferStatus::Unconfirmed { attempts: 24 }.is_confirmed());
    }
}

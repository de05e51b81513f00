//! 调用上下文：截止时间 + 取消信号
//!
//! 确认等待和扫块循环都在每次迭代时检查上下文，取消在一个轮询间隔内生效。

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// 调用方传入的上下文
///
/// 克隆后的上下文共享同一个取消信号。
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// 取消句柄，`cancel()` 之后所有关联的上下文都进入完成状态
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // 没有接收者时发送会失败，这种情况无需处理
        let _ = self.tx.send(true);
    }
}

impl CallContext {
    /// 无截止时间、不可取消
    pub fn background() -> Self {
        Self::default()
    }

    /// 从现在起 `timeout` 之后到期
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: None,
        }
    }

    /// 创建可取消的上下文
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                deadline: None,
                cancel: Some(rx),
            },
            CancelHandle { tx },
        )
    }

    /// 在当前上下文基础上附加截止时间（取较早者）
    pub fn timeout(mut self, timeout: Duration) -> Self {
        let at = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < at => existing,
            _ => at,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 非阻塞检查是否已到期或已取消
    pub fn is_done(&self) -> bool {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return true;
            }
        }
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// 等待上下文完成；既无截止时间又不可取消时永不返回
    pub async fn done(&self) {
        let cancelled = async {
            match self.cancel.clone() {
                Some(mut rx) => loop {
                    if *rx.borrow_and_update() {
                        return;
                    }
                    if rx.changed().await.is_err() {
                        // 句柄被丢弃且从未取消
                        std::future::pending::<()>().await;
                    }
                },
                None => std::future::pending::<()>().await,
            }
        };

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = cancelled => {}
                }
            }
            None => cancelled.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_never_done() {
        let ctx = CallContext::background();
        assert!(!ctx.is_done());
        let res = tokio::time::timeout(Duration::from_millis(20), ctx.done()).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let (ctx, handle) = CallContext::with_cancel();
        let waiter = ctx.clone();
        let task = tokio::spawn(async move { waiter.done().await });

        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("取消后应立即返回")
            .unwrap();
        assert!(ctx.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let ctx = CallContext::with_timeout(Duration::from_secs(5));
        assert!(!ctx.is_done());
        ctx.done().await;
        assert!(ctx.is_done());
    }

    #[tokio::test]
    async fn test_dropped_handle_does_not_cancel() {
        let (ctx, handle) = CallContext::with_cancel();
        drop(handle);
        let res = tokio::time::timeout(Duration::from_millis(20), ctx.done()).await;
        assert!(res.is_err());
        assert!(!ctx.is_done());
    }

    #[test]
    fn test_timeout_keeps_earlier_deadline() {
        let ctx = CallContext::with_timeout(Duration::from_secs(1)).timeout(Duration::from_secs(60));
        let deadline = ctx.deadline().unwrap();
        assert!(deadline <= Instant::now() + Duration::from_secs(1));
    }
}

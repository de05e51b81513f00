//! 有界节点连接池
//!
//! - 空闲连接缓冲区容量固定（配置为 0 时取默认值 3）
//! - `acquire` 优先复用空闲连接，缓冲区为空时新建连接，从不阻塞等待
//! - 归还时缓冲区已满或连接池已关闭则直接销毁连接
//! - 归还与关闭由 `lifecycle` 锁串行化，关闭之后不会再有连接进入缓冲区
//! - `acquire` 的快速路径只碰空闲队列自身的锁，不与归还/关闭争用 `lifecycle`
//!
//! `acquire` 返回 [`PooledConnection`]，离开作用域时自动归还（RAII 租约）。

use crate::domain::errors::{Result, SdkError};
use crate::infrastructure::chain_client::{ChainClient, Dialer};
use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// 连接池默认容量
pub const DEFAULT_POOL_SIZE: usize = 3;

/// 与租约共享的缓冲区
struct Slots<C> {
    capacity: usize,
    idle: Mutex<VecDeque<C>>,
    /// 串行化归还与关闭
    lifecycle: Mutex<()>,
    closed: AtomicBool,
}

// 持锁期间不会 panic，中毒状态下的数据仍然一致
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl<C: ChainClient> Slots<C> {
    /// 快速路径：只锁空闲队列
    fn take(&self) -> Option<C> {
        lock(&self.idle).pop_front()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 归还连接；返回是否进入了缓冲区
    fn put(&self, conn: C) -> bool {
        let rejected = {
            let _lifecycle = lock(&self.lifecycle);
            let mut idle = lock(&self.idle);
            if self.is_closed() || idle.len() >= self.capacity {
                Some(conn)
            } else {
                idle.push_back(conn);
                None
            }
        };

        match rejected {
            Some(conn) => {
                conn.close();
                false
            }
            None => true,
        }
    }
}

/// 节点连接池
pub struct ConnectionPool<D: Dialer> {
    dialer: Arc<D>,
    slots: Arc<Slots<D::Conn>>,
}

impl<D: Dialer> Clone for ConnectionPool<D> {
    fn clone(&self) -> Self {
        Self {
            dialer: Arc::clone(&self.dialer),
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<D: Dialer> ConnectionPool<D> {
    /// 创建连接池；`size` 为 0 时使用默认容量
    pub fn new(dialer: D, size: usize) -> Self {
        let capacity = if size == 0 { DEFAULT_POOL_SIZE } else { size };
        Self {
            dialer: Arc::new(dialer),
            slots: Arc::new(Slots {
                capacity,
                idle: Mutex::new(VecDeque::with_capacity(capacity)),
                lifecycle: Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// 预先建立连接填满缓冲区，拨号失败的跳过；返回成功建立的连接数
    pub async fn prewarm(&self) -> usize {
        let mut warmed = 0;
        for _ in 0..self.slots.capacity {
            match self.dialer.dial().await {
                Ok(conn) => {
                    if !self.slots.put(conn) {
                        break;
                    }
                    warmed += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "预建连接失败，跳过");
                }
            }
        }
        tracing::debug!(warmed, capacity = self.slots.capacity, "连接池预热完成");
        warmed
    }

    /// 获取连接：复用空闲连接，否则新建
    ///
    /// 已关闭的连接池返回 `PoolClosed`；新建失败返回拨号错误。
    pub async fn acquire(&self) -> Result<PooledConnection<D::Conn>> {
        if let Some(conn) = self.slots.take() {
            return Ok(PooledConnection::new(conn, Arc::clone(&self.slots)));
        }
        if self.slots.is_closed() {
            return Err(SdkError::PoolClosed);
        }

        let conn = self.dialer.dial().await?;
        tracing::trace!("连接池为空，新建连接");
        Ok(PooledConnection::new(conn, Arc::clone(&self.slots)))
    }

    /// 归还一个不经租约持有的连接
    pub fn release(&self, conn: D::Conn) {
        self.slots.put(conn);
    }

    /// 关闭连接池并销毁所有空闲连接；重复调用无副作用
    pub fn close(&self) {
        let drained: Vec<D::Conn> = {
            let _lifecycle = lock(&self.slots.lifecycle);
            if self.slots.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            lock(&self.slots.idle).drain(..).collect()
        };

        let count = drained.len();
        for conn in drained {
            conn.close();
        }
        tracing::debug!(destroyed = count, "连接池已关闭");
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    /// 当前空闲连接数
    pub fn idle_len(&self) -> usize {
        lock(&self.slots.idle).len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity
    }
}

/// 连接租约，Drop 时归还给连接池
pub struct PooledConnection<C: ChainClient> {
    conn: Option<C>,
    slots: Arc<Slots<C>>,
}

impl<C: ChainClient> PooledConnection<C> {
    fn new(conn: C, slots: Arc<Slots<C>>) -> Self {
        Self {
            conn: Some(conn),
            slots,
        }
    }

    /// 直接销毁连接而不归还（例如连接已损坏）
    pub fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            conn.close();
        }
    }
}

impl<C: ChainClient> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        // conn 只在 discard / drop 中取出，之后租约不再可用
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => unreachable!("租约已被消费"),
        }
    }
}

impl<C: ChainClient> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.slots.put(conn);
        }
    }
}

//! 扫块检查点存储
//!
//! 两类持久化数据：
//! - 最后处理完成的区块高度（覆盖写）
//! - 业务回调失败的交易记录（只追加）

use crate::domain::errors::{Result, SdkError};
use crate::domain::tx_types::FailedTxRecord;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tokio::io::AsyncWriteExt;

/// 检查点文件名
pub const LATEST_NUMBER_FILE: &str = "latestNumber.info";
/// 失败交易日志文件名
pub const FAILED_TX_FILE: &str = "errtx.info";

/// 检查点存储端口
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// 最后处理完成的区块高度；从未写入时返回 0
    async fn read_height(&self) -> Result<u64>;

    async fn write_height(&self, height: u64) -> Result<()>;

    async fn append_failed_tx(&self, record: &FailedTxRecord) -> Result<()>;
}

/// 基于文件的检查点存储
///
/// 高度写入先写临时文件、fsync，再 rename 覆盖，进程崩溃时不会留下半截内容。
/// 失败交易按 JSON Lines 追加。
#[derive(Debug)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    /// 单写者锁
    write_lock: tokio::sync::Mutex<()>,
}

impl FileCheckpointStore {
    /// 打开（必要时创建）检查点目录
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn height_path(&self) -> PathBuf {
        self.dir.join(LATEST_NUMBER_FILE)
    }

    pub fn failed_tx_path(&self) -> PathBuf {
        self.dir.join(FAILED_TX_FILE)
    }

    /// 读取全部失败交易记录
    pub async fn read_failed_txs(&self) -> Result<Vec<FailedTxRecord>> {
        let content = match tokio::fs::read_to_string(self.failed_tx_path()).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| SdkError::CheckpointCorrupt(e.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn read_height(&self) -> Result<u64> {
        let content = match tokio::fs::read_to_string(self.height_path()).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(0);
        }
        trimmed
            .parse()
            .map_err(|_| SdkError::CheckpointCorrupt(format!("{:?}", trimmed)))
    }

    async fn write_height(&self, height: u64) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let path = self.height_path();
        let tmp = path.with_extension("info.tmp");
        {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(height.to_string().as_bytes()).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&tmp, &path).await?;

        tracing::trace!(height, "检查点已写入");
        Ok(())
    }

    async fn append_failed_tx(&self, record: &FailedTxRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| SdkError::CheckpointCorrupt(e.to_string()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.failed_tx_path())
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    height: u64,
    writes: Vec<u64>,
    failed: Vec<FailedTxRecord>,
}

/// 内存检查点存储（测试用）
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    state: Mutex<MemoryState>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以给定高度初始化
    pub fn with_height(height: u64) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                height,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn height(&self) -> u64 {
        self.state().height
    }

    /// 按写入顺序记录的全部高度
    pub fn writes(&self) -> Vec<u64> {
        self.state().writes.clone()
    }

    pub fn failed_txs(&self) -> Vec<FailedTxRecord> {
        self.state().failed.clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn read_height(&self) -> Result<u64> {
        Ok(self.state().height)
    }

    async fn write_height(&self, height: u64) -> Result<()> {
        let mut state = self.state();
        state.height = height;
        state.writes.push(height);
        Ok(())
    }

    async fn append_failed_tx(&self, record: &FailedTxRecord) -> Result<()> {
        self.state().failed.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chain_types::{Block, Transaction};
    use ethereum_types::{H256, U64};

    fn record(hash: u64, height: u64) -> FailedTxRecord {
        let tx = Transaction {
            hash: H256::from_low_u64_be(hash),
            ..Default::default()
        };
        let block = Block {
            number: U64::from(height),
            ..Default::default()
        };
        FailedTxRecord::new(&tx, &block, "handler failed")
    }

    #[tokio::test]
    async fn test_file_store_missing_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path().join("nested")).await.unwrap();
        assert_eq!(store.read_height().await.unwrap(), 0);
        assert!(store.read_failed_txs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_overwrites_height() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path()).await.unwrap();

        store.write_height(104).await.unwrap();
        store.write_height(110).await.unwrap();
        assert_eq!(store.read_height().await.unwrap(), 110);

        let raw = std::fs::read_to_string(store.height_path()).unwrap();
        assert_eq!(raw, "110");
        assert!(!store.height_path().with_extension("info.tmp").exists());

        // 重新打开后仍可读取
        let reopened = FileCheckpointStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.read_height().await.unwrap(), 110);
    }

    #[tokio::test]
    async fn test_file_store_corrupt_height() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path()).await.unwrap();
        std::fs::write(store.height_path(), "not-a-number").unwrap();
        assert!(matches!(
            store.read_height().await,
            Err(SdkError::CheckpointCorrupt(_))
        ));

        std::fs::write(store.height_path(), " \n").unwrap();
        assert_eq!(store.read_height().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_file_store_appends_failed_txs() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path()).await.unwrap();

        store.append_failed_tx(&record(1, 10)).await.unwrap();
        store.append_failed_tx(&record(2, 11)).await.unwrap();

        let records = store.read_failed_txs().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].hash, H256::from_low_u64_be(1));
        assert_eq!(records[1].block_height, 11);
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryCheckpointStore::with_height(7);
        assert_eq!(store.read_height().await.unwrap(), 7);
        store.write_height(8).await.unwrap();
        store.append_failed_tx(&record(3, 8)).await.unwrap();
        assert_eq!(store.writes(), vec![8]);
        assert_eq!(store.failed_txs().len(), 1);
    }
}

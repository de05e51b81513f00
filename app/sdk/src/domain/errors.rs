//! SDK 错误类型定义（领域层）
//!
//! 错误按处理方式分为五类：
//! - 连接池：`PoolClosed`、`DialFailed`，直接返回给调用方，不自动重试
//! - 输入校验：在任何网络调用之前快速失败
//! - 经济前置条件：查询余额 / gas 之后、提交之前失败
//! - 提交与确认：节点返回的提交错误、回滚、等待超时
//! - 扫块：单个 tick 的失败只记录日志，下一个 tick 重试

use ethereum_types::{H256, U256};
use thiserror::Error;

/// JSON-RPC 调用错误（基础设施层使用）
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP 请求失败: {0}")]
    Transport(String),
    #[error("HTTP 错误: {0}")]
    HttpStatus(u16),
    #[error("RPC 错误 [{code}]: {message}")]
    Rpc { code: i64, message: String },
    #[error("解析响应失败: {0}")]
    Decode(String),
    #[error("响应中缺少 result 字段")]
    MissingResult,
    #[error("请求超时")]
    Timeout,
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// SDK 对外错误类型
#[derive(Debug, Error)]
pub enum SdkError {
    // 连接池
    #[error("连接池已关闭")]
    PoolClosed,
    #[error("连接节点失败: {0}")]
    DialFailed(String),

    // 输入校验
    #[error("不是合法0x地址: {0}")]
    InvalidAddress(String),
    #[error("金额有误: {0}")]
    InvalidAmount(String),
    #[error("合约地址不能为空")]
    ContractAddressRequired,
    #[error("交易序号不能为空")]
    NonceRequired,
    #[error("交易序号太小: 指定 {given}, 节点 pending nonce {pending}")]
    NonceTooSmall { given: u64, pending: u64 },
    #[error("错误的私钥")]
    InvalidPrivateKey,
    #[error("起始区块号不能小于 1")]
    InvalidStartHeight,

    // 经济前置条件
    #[error("交易费不足: 余额 {balance}, gas 费用 {gas_cost}")]
    InsufficientGas { balance: U256, gas_cost: U256 },
    #[error("余额小于交易费+转账数量: 余额 {balance}, gas 费用 {gas_cost}, 转账数量 {amount}")]
    InsufficientGasPlusAmount {
        balance: U256,
        gas_cost: U256,
        amount: U256,
    },
    #[error("代币余额不足: 余额 {balance}, 转账数量 {amount}")]
    InsufficientTokenBalance { balance: U256, amount: U256 },

    // 提交与确认
    #[error("交易提交失败: {0}")]
    Submit(RpcError),
    #[error("交易失败: {0:?}")]
    TransactionFailed(H256),
    #[error("读取交易信息超时: {0:?}")]
    ReceiptReadTimeout(H256),

    // 扫块
    #[error("区块不存在: {0}")]
    BlockNotFound(u64),

    // 其它
    #[error("RPC 调用失败: {0}")]
    Rpc(#[from] RpcError),
    #[error("交易解码失败: {0}")]
    Decode(String),
    #[error("ABI 编解码失败: {0}")]
    Abi(String),
    #[error("签名失败: {0}")]
    Signing(String),
    #[error("检查点数据损坏: {0}")]
    CheckpointCorrupt(String),
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("配置错误: {0}")]
    Config(String),
}

/// SDK 结果类型
pub type Result<T> = std::result::Result<T, SdkError>;

impl SdkError {
    /// 是否为节点侧的临时问题（调用方可以重试）
    ///
    /// 输入错误、余额不足、交易回滚等需要调用方修正，返回 false。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DialFailed(_)
                | Self::Rpc(_)
                | Self::ReceiptReadTimeout(_)
                | Self::BlockNotFound(_)
                | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SdkError::DialFailed("refused".into()).is_retryable());
        assert!(SdkError::Rpc(RpcError::Timeout).is_retryable());
        assert!(SdkError::ReceiptReadTimeout(H256::zero()).is_retryable());

        assert!(!SdkError::InvalidAddress("0x12".into()).is_retryable());
        assert!(!SdkError::NonceTooSmall { given: 1, pending: 2 }.is_retryable());
        assert!(!SdkError::TransactionFailed(H256::zero()).is_retryable());
        assert!(!SdkError::Submit(RpcError::Timeout).is_retryable());
    }

    #[test]
    fn test_error_message_carries_amounts() {
        let err = SdkError::InsufficientGas {
            balance: U256::from(10),
            gas_cost: U256::from(30),
        };
        let msg = err.to_string();
        assert!(msg.contains("10"));
        assert!(msg.contains("30"));
    }
}

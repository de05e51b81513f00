//! Fibo Chain SDK
//!
//! 面向 EVM 兼容链的客户端库：连接池、余额/代币查询、原生币与 ERC-20 转账、
//! 原始交易提交、交易确认等待，以及带检查点的扫块器。

pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod service;

pub use config::{Network, SdkConfig};
pub use domain::context::{CallContext, CancelHandle};
pub use domain::errors::{Result, RpcError, SdkError};
pub use infrastructure::signer::{generate_key, GeneratedKey};
pub use service::confirmation::{TransferReceipt, TransferStatus};
pub use service::scanner::{BlockScanner, TickOutcome, TxHandler};
pub use service::sdk::ChainSdk;

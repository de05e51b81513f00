//! SDK 配置
//!
//! 加载顺序：内置默认值 -> JSON 配置文件 / `FIBO_*` 环境变量。
//! 所有字段都有默认值，配置文件只需写需要覆盖的部分。

use crate::domain::errors::{Result, SdkError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// 主网节点
pub const MAIN_NET_ENDPOINT: &str = "https://node.fibochain.org";
/// 测试网节点
pub const TEST_NET_ENDPOINT: &str = "https://test.fibochain.org";
/// 链 ID（主网、测试网相同）
pub const CHAIN_ID: u64 = 12306;
/// 原生币符号
pub const NATIVE_SYMBOL: &str = "FIBO";
/// 原生币精度
pub const NATIVE_DECIMALS: u8 = 18;
/// 原生币转账固定 gas 上限
pub const NATIVE_GAS_LIMIT: u64 = 30000;
/// EIP-155 v 值 (chain_id * 2 + 36) 不溢出 u64 的最大链 ID
pub const MAX_CHAIN_ID: u64 = (u64::MAX - 36) / 2;

/// 预置网络
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    MainNet,
    TestNet,
}

impl Network {
    pub fn endpoint(&self) -> &'static str {
        match self {
            Network::MainNet => MAIN_NET_ENDPOINT,
            Network::TestNet => TEST_NET_ENDPOINT,
        }
    }

    pub fn chain_id(&self) -> u64 {
        CHAIN_ID
    }
}

impl FromStr for Network {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "main" | "mainnet" => Ok(Network::MainNet),
            "test" | "testnet" => Ok(Network::TestNet),
            other => Err(SdkError::Config(format!("未知网络: {}", other))),
        }
    }
}

/// 交易确认等待参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// 收据轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 最大轮询次数，用完后返回未确认
    pub max_retries: u32,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_retries: 24,
        }
    }
}

impl ConfirmationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// 扫块参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// 起始区块号（首次扫块从 start_height + 1 开始）
    pub start_height: u64,
    /// tick 间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 相邻两个区块之间的等待（毫秒），用于限制节点请求频率
    pub block_delay_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            start_height: 1,
            poll_interval_ms: 1000,
            block_delay_ms: 1000,
        }
    }
}

impl ScanConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn block_delay(&self) -> Duration {
        Duration::from_millis(self.block_delay_ms)
    }
}

/// SDK 配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// 节点 JSON-RPC 地址
    pub endpoint: String,
    /// 连接池容量，0 表示默认值 3
    pub pool_size: usize,
    /// 签名使用的链 ID
    pub chain_id: u64,
    /// 拨号超时（毫秒）
    pub dial_timeout_ms: u64,
    pub native_decimals: u8,
    pub native_gas_limit: u64,
    pub confirmation: ConfirmationConfig,
    pub scan: ScanConfig,
    /// 检查点文件目录
    pub checkpoint_dir: PathBuf,
    /// 默认日志级别（RUST_LOG 未设置时使用）
    pub log_level: String,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self::for_network(Network::MainNet)
    }
}

impl SdkConfig {
    pub fn for_network(network: Network) -> Self {
        Self {
            endpoint: network.endpoint().to_string(),
            pool_size: 0,
            chain_id: network.chain_id(),
            dial_timeout_ms: 10_000,
            native_decimals: NATIVE_DECIMALS,
            native_gas_limit: NATIVE_GAS_LIMIT,
            confirmation: ConfirmationConfig::default(),
            scan: ScanConfig::default(),
            checkpoint_dir: PathBuf::from("."),
            log_level: "info".to_string(),
        }
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    /// 从 JSON 文件加载
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SdkError::Config(format!("读取 {} 失败: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| SdkError::Config(format!("解析 {} 失败: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 从 `FIBO_*` 环境变量加载
    ///
    /// - `FIBO_NETWORK`: main / test，决定默认节点地址
    /// - `FIBO_ENDPOINT`、`FIBO_POOL_SIZE`、`FIBO_CHAIN_ID`、`FIBO_CHECKPOINT_DIR`
    /// - `FIBO_START_HEIGHT`、`FIBO_LOG_LEVEL`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let network = match get("FIBO_NETWORK") {
            Some(raw) => raw.parse()?,
            None => Network::MainNet,
        };
        let mut config = Self::for_network(network);

        if let Some(endpoint) = get("FIBO_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Some(raw) = get("FIBO_POOL_SIZE") {
            config.pool_size = parse_number("FIBO_POOL_SIZE", &raw)?;
        }
        if let Some(raw) = get("FIBO_CHAIN_ID") {
            config.chain_id = parse_number("FIBO_CHAIN_ID", &raw)?;
        }
        if let Some(raw) = get("FIBO_START_HEIGHT") {
            config.scan.start_height = parse_number("FIBO_START_HEIGHT", &raw)?;
        }
        if let Some(dir) = get("FIBO_CHECKPOINT_DIR") {
            config.checkpoint_dir = PathBuf::from(dir);
        }
        if let Some(level) = get("FIBO_LOG_LEVEL") {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        let url = self
            .endpoint
            .parse::<reqwest::Url>()
            .map_err(|e| SdkError::Config(format!("endpoint 不是合法 URL `{}`: {}", self.endpoint, e)))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(SdkError::Config(format!(
                    "endpoint 只支持 http(s)，实际为 `{}`",
                    other
                )))
            }
        }
        if self.native_decimals > 77 {
            return Err(SdkError::Config(format!(
                "native_decimals 超出范围: {}",
                self.native_decimals
            )));
        }
        if self.chain_id == 0 || self.chain_id > MAX_CHAIN_ID {
            return Err(SdkError::Config(format!("chain_id 超出范围: {}", self.chain_id)));
        }
        if self.native_gas_limit == 0 {
            return Err(SdkError::Config("native_gas_limit 不能为 0".to_string()));
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| SdkError::Config(format!("{} 不是合法数字: {}", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SdkConfig::default();
        assert_eq!(config.endpoint, MAIN_NET_ENDPOINT);
        assert_eq!(config.chain_id, 12306);
        assert_eq!(config.pool_size, 0);
        assert_eq!(config.dial_timeout(), Duration::from_secs(10));
        assert_eq!(config.confirmation.max_retries, 24);
        assert_eq!(config.confirmation.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.native_gas_limit, 30000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_env() {
        let config = SdkConfig::from_lookup(lookup(&[
            ("FIBO_NETWORK", "test"),
            ("FIBO_POOL_SIZE", "5"),
            ("FIBO_START_HEIGHT", "100"),
            ("FIBO_LOG_LEVEL", "debug"),
        ]))
        .unwrap();
        assert_eq!(config.endpoint, TEST_NET_ENDPOINT);
        assert_eq!(config.pool_size, 5);
        assert_eq!(config.scan.start_height, 100);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_from_env_rejects_bad_values() {
        assert!(matches!(
            SdkConfig::from_lookup(lookup(&[("FIBO_POOL_SIZE", "three")])),
            Err(SdkError::Config(_))
        ));
        assert!(matches!(
            SdkConfig::from_lookup(lookup(&[("FIBO_NETWORK", "moon")])),
            Err(SdkError::Config(_))
        ));
        assert!(matches!(
            SdkConfig::from_lookup(lookup(&[("FIBO_ENDPOINT", "ftp://node")])),
            Err(SdkError::Config(_))
        ));
        let too_large = (MAX_CHAIN_ID + 1).to_string();
        assert!(matches!(
            SdkConfig::from_lookup(lookup(&[("FIBO_CHAIN_ID", too_large.as_str())])),
            Err(SdkError::Config(_))
        ));
        assert!(matches!(
            SdkConfig::from_lookup(lookup(&[("FIBO_CHAIN_ID", "0")])),
            Err(SdkError::Config(_))
        ));
        let max = MAX_CHAIN_ID.to_string();
        assert!(SdkConfig::from_lookup(lookup(&[("FIBO_CHAIN_ID", max.as_str())])).is_ok());
    }

    #[test]
    fn test_from_json_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fibo.json");
        std::fs::write(
            &path,
            r#"{"endpoint": "http://127.0.0.1:8545", "confirmation": {"max_retries": 3}}"#,
        )
        .unwrap();

        let config = SdkConfig::from_json_file(&path).unwrap();
        assert_eq!(config.endpoint, "http://127.0.0.1:8545");
        assert_eq!(config.confirmation.max_retries, 3);
        assert_eq!(config.confirmation.poll_interval_ms, 1000);
        assert_eq!(config.chain_id, CHAIN_ID);
    }

    #[test]
    fn test_network_parse() {
        assert_eq!("MainNet".parse::<Network>().unwrap(), Network::MainNet);
        assert_eq!("testnet".parse::<Network>().unwrap(), Network::TestNet);
    }
}

//! 十进制金额与最小单位之间的换算
//!
//! 链原生币和代币的人类可读金额都按 `value * 10^decimals` 换算为整数，
//! 小数位超过精度的部分向零截断。

use crate::domain::errors::{Result, SdkError};
use ethereum_types::U256;
use std::fmt;
use std::str::FromStr;

/// 已校验语法的十进制金额（尚未绑定精度）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecimalAmount {
    integer: String,
    fraction: String,
}

impl FromStr for DecimalAmount {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || SdkError::InvalidAmount(s.to_string());

        let (integer, fraction) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        if integer.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        if !integer.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let integer = integer.trim_start_matches('0');
        let fraction = fraction.trim_end_matches('0');
        Ok(Self {
            integer: integer.to_string(),
            fraction: fraction.to_string(),
        })
    }
}

impl DecimalAmount {
    pub fn is_zero(&self) -> bool {
        self.integer.is_empty() && self.fraction.is_empty()
    }

    /// 按给定精度换算为最小单位
    pub fn to_base_units(&self, decimals: u8) -> Result<U256> {
        let decimals = decimals as usize;
        let mut digits = String::with_capacity(self.integer.len() + decimals);
        digits.push_str(&self.integer);
        if self.fraction.len() >= decimals {
            digits.push_str(&self.fraction[..decimals]);
        } else {
            digits.push_str(&self.fraction);
            digits.extend(std::iter::repeat('0').take(decimals - self.fraction.len()));
        }

        let digits = digits.trim_start_matches('0');
        if digits.is_empty() {
            return Ok(U256::zero());
        }
        U256::from_dec_str(digits).map_err(|_| SdkError::InvalidAmount(self.to_string()))
    }
}

impl fmt::Display for DecimalAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let integer = if self.integer.is_empty() { "0" } else { &self.integer };
        if self.fraction.is_empty() {
            write!(f, "{}", integer)
        } else {
            write!(f, "{}.{}", integer, self.fraction)
        }
    }
}

/// 十进制字符串 -> 最小单位
pub fn parse_units(amount: &str, decimals: u8) -> Result<U256> {
    amount.parse::<DecimalAmount>()?.to_base_units(decimals)
}

/// 最小单位 -> 十进制字符串（去掉末尾多余的 0）
pub fn format_units(value: U256, decimals: u8) -> String {
    let decimals = decimals as usize;
    let raw = value.to_string();
    if decimals == 0 {
        return raw;
    }

    let padded = if raw.len() <= decimals {
        format!("{}{}", "0".repeat(decimals + 1 - raw.len()), raw)
    } else {
        raw
    };
    let (integer, fraction) = padded.split_at(padded.len() - decimals);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        integer.to_string()
    } else {
        format!("{}.{}", integer, fraction)
    }
}

/// 带精度的金额（余额查询结果）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAmount {
    /// 最小单位数值
    pub raw: U256,
    /// 精度（小数位数）
    pub decimals: u8,
}

impl TokenAmount {
    pub fn new(raw: U256, decimals: u8) -> Self {
        Self { raw, decimals }
    }

    /// 近似浮点值，仅用于展示
    pub fn as_f64(&self) -> f64 {
        self.to_string().parse().unwrap_or(f64::MAX)
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_units(self.raw, self.decimals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEI: u128 = 1_000_000_000_000_000_000;

    #[test]
    fn test_parse_units_whole_and_fraction() {
        assert_eq!(parse_units("1", 18).unwrap(), U256::from(WEI));
        assert_eq!(parse_units("0.5", 18).unwrap(), U256::from(WEI / 2));
        assert_eq!(parse_units("12.000001", 6).unwrap(), U256::from(12_000_001u64));
        assert_eq!(parse_units(".25", 2).unwrap(), U256::from(25u64));
        assert_eq!(parse_units("7.", 0).unwrap(), U256::from(7u64));
        assert_eq!(parse_units("0", 18).unwrap(), U256::zero());
    }

    #[test]
    fn test_parse_units_truncates_excess_precision() {
        assert_eq!(parse_units("1.239", 2).unwrap(), U256::from(123u64));
        assert_eq!(parse_units("0.009", 2).unwrap(), U256::zero());
    }

    #[test]
    fn test_parse_units_rejects_invalid() {
        for bad in ["", ".", "-1", "1.2.3", "abc", "1e18", "+5", "1,5"] {
            assert!(
                matches!(parse_units(bad, 18), Err(SdkError::InvalidAmount(_))),
                "{bad:?} 应该被拒绝"
            );
        }
    }

    #[test]
    fn test_parse_units_overflow() {
        let huge = "9".repeat(80);
        assert!(matches!(parse_units(&huge, 18), Err(SdkError::InvalidAmount(_))));
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(U256::from(WEI), 18), "1");
        assert_eq!(format_units(U256::from(1_500_000u64), 6), "1.5");
        assert_eq!(format_units(U256::from(5u64), 3), "0.005");
        assert_eq!(format_units(U256::zero(), 18), "0");
        assert_eq!(format_units(U256::from(42u64), 0), "42");
    }

    #[test]
    fn test_token_amount_display() {
        let amount = TokenAmount::new(U256::from(123_450_000u64), 8);
        assert_eq!(amount.to_string(), "1.2345");
        assert!((amount.as_f64() - 1.2345).abs() < 1e-12);
    }

    #[test]
    fn test_decimal_amount_normalizes() {
        let amount: DecimalAmount = "000120.5000".parse().unwrap();
        assert_eq!(amount.to_string(), "120.5");
        assert!(!amount.is_zero());
        assert!("0.000".parse::<DecimalAmount>().unwrap().is_zero());
    }
}

//! 数值的可读格式

use serde::{Deserialize, Serialize};

const BYTE_UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
const BIT_RATE_UNITS: [&str; 5] = ["bps", "Kbps", "Mbps", "Gbps", "Tbps"];

fn scale(value: u64, base: f64, units: &[&str]) -> String {
    let mut v = value as f64;
    let mut unit = 0;
    while v >= base && unit < units.len() - 1 {
        v /= base;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", value, units[0])
    } else {
        format!("{:.2} {}", v, units[unit])
    }
}

/// 字节数，1024 进制
pub fn format_bytes(bytes: u64) -> String {
    scale(bytes, 1024.0, &BYTE_UNITS)
}

/// 比特率，1000 进制
pub fn format_bps(bps: u64) -> String {
    scale(bps, 1000.0, &BIT_RATE_UNITS)
}

/// 秒数格式化为 `1d 02:03:04`
pub fn format_duration(secs: u64) -> String {
    let days = secs / 86_400;
    let rest = secs % 86_400;
    let clock = format!("{:02}:{:02}:{:02}", rest / 3600, (rest % 3600) / 60, rest % 60);
    if days > 0 { format!("{}d {}", days, clock) } else { clock }
}

/// 带可读文本的数值
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: u64,
    pub formatted: String,
}

impl Quantity {
    pub fn bytes(value: u64) -> Self {
        Self { value, formatted: format_bytes(value) }
    }

    pub fn bps(value: u64) -> Self {
        Self { value, formatted: format_bps(value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1_073_741_824), "1.00 GB");
    }

    #[test]
    fn test_format_bps() {
        assert_eq!(format_bps(999), "999 bps");
        assert_eq!(format_bps(4000), "4.00 Kbps");
        assert_eq!(format_bps(12_500_000), "12.50 Mbps");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(59), "00:00:59");
        assert_eq!(format_duration(93_784), "1d 02:03:04");
    }
}

//! 设备查询与结果解析
//!
//! 每个 fetch 函数对应一次子查询，返回强类型结果。可选子指标单独失败时取零值，
//! 不影响设备整体状态。

use super::format::Quantity;
use super::rate::RateEngine;
use super::types::{
    BandwidthSummary, InterfaceBandwidth, InterfaceSummary, QueueCount, QueueEntry, QueueSummary,
    ResourceMetrics, SessionCounts,
};
use crate::protocol::{DeviceSession, ProtocolError, QueryFilter, Row};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

const TRACKED_TYPES: [&str; 5] = ["ether", "vlan", "bridge", "pppoe-out", "pppoe-in"];
const TRACKED_PREFIXES: [&str; 5] = ["ether", "sfp", "vlan", "bridge", "pppoe"];
const TUNNEL_TYPES: [&str; 17] = [
    "gre-tunnel",
    "gre6-tunnel",
    "ipip-tunnel",
    "ipipv6-tunnel",
    "eoip-tunnel",
    "eoipv6-tunnel",
    "6to4-tunnel",
    "vxlan",
    "wg",
    "l2tp-in",
    "l2tp-out",
    "pptp-in",
    "pptp-out",
    "sstp-in",
    "sstp-out",
    "ovpn-in",
    "ovpn-out",
];

// 1w2d3h4m5s / 2d03:04:05
static UPTIME_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(\d+)w)?(?:(\d+)d)?(?:(\d+):(\d+):(\d+)|(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?)$",
    )
    .ok()
});

fn field<'a>(row: &'a Row, key: &str) -> &'a str {
    row.get(key).map(String::as_str).unwrap_or("")
}

fn field_u64(row: &Row, key: &str) -> u64 {
    field(row, key).trim().parse().unwrap_or(0)
}

fn field_f64(row: &Row, key: &str) -> f64 {
    field(row, key).trim().parse().unwrap_or(0.0)
}

fn field_bool(row: &Row, key: &str) -> bool {
    matches!(field(row, key), "true" | "yes")
}

/// 解析运行时长为秒
pub fn parse_uptime(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let caps = UPTIME_RE.as_ref()?.captures(raw)?;
    let num = |i: usize| -> u64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0)
    };

    let hours = num(3).saturating_add(num(6));
    let minutes = num(4).saturating_add(num(7));
    Some(
        num(1)
            .saturating_mul(604_800)
            .saturating_add(num(2).saturating_mul(86_400))
            .saturating_add(hours.saturating_mul(3600))
            .saturating_add(minutes.saturating_mul(60))
            .saturating_add(num(5))
            .saturating_add(num(8)),
    )
}

/// 解析速率限制，支持 k / M / G 后缀
pub fn parse_rate(raw: &str) -> u64 {
    let raw = raw.trim();
    let (number, multiplier) = match raw.chars().last() {
        Some('k') | Some('K') => (&raw[..raw.len() - 1], 1e3),
        Some('M') => (&raw[..raw.len() - 1], 1e6),
        Some('G') => (&raw[..raw.len() - 1], 1e9),
        _ => (raw, 1.0),
    };
    number
        .parse::<f64>()
        .map(|v| (v * multiplier).round() as u64)
        .unwrap_or(0)
}

/// 解析 `上行/下行` 形式的字段
pub fn parse_pair(raw: &str, parse: fn(&str) -> u64) -> (u64, u64) {
    match raw.split_once('/') {
        Some((up, down)) => (parse(up), parse(down)),
        None => (parse(raw), 0),
    }
}

fn parse_count(raw: &str) -> u64 {
    raw.trim().parse().unwrap_or(0)
}

/// 接口是否纳入带宽统计
pub fn is_tracked_interface(name: &str, interface_type: &str) -> bool {
    if TUNNEL_TYPES.contains(&interface_type) {
        return false;
    }
    TRACKED_TYPES.contains(&interface_type)
        || TRACKED_PREFIXES.iter().any(|p| name.starts_with(p))
}

async fn query_optional(
    session: &dyn DeviceSession,
    path: &str,
    filters: &[QueryFilter],
) -> Result<Vec<Row>, ProtocolError> {
    match session.query(path, filters).await {
        Ok(rows) => Ok(rows),
        // 传输层错误说明会话已不可用，交给调用方驱逐
        Err(e) if e.is_transport() => Err(e),
        Err(e) => {
            debug!("可选查询 {} 失败，使用默认值: {}", path, e);
            Ok(Vec::new())
        }
    }
}

/// 系统资源（必需），身份与温度电压为可选
pub async fn fetch_resource(session: &dyn DeviceSession) -> Result<ResourceMetrics, ProtocolError> {
    let rows = session.query("/system/resource/print", &[]).await?;
    let row = rows
        .first()
        .ok_or_else(|| ProtocolError::Decode("/system/resource 无返回".to_string()))?;

    let mut resource = parse_resource(row);

    let identity = query_optional(session, "/system/identity/print", &[]).await?;
    if let Some(row) = identity.first() {
        resource.identity = field(row, "name").to_string();
    }

    let health = query_optional(session, "/system/health/print", &[]).await?;
    let (temperature, voltage) = parse_health(&health);
    resource.temperature = temperature;
    resource.voltage = voltage;

    Ok(resource)
}

pub fn parse_resource(row: &Row) -> ResourceMetrics {
    let mut resource = ResourceMetrics {
        board_name: field(row, "board-name").to_string(),
        architecture: field(row, "architecture-name").to_string(),
        version: field(row, "version").to_string(),
        cpu_load: field_u64(row, "cpu-load").min(100) as u8,
        ..Default::default()
    };
    resource.set_uptime(parse_uptime(field(row, "uptime")).unwrap_or(0));
    resource.set_memory(field_u64(row, "total-memory"), field_u64(row, "free-memory"));
    resource.set_disk(field_u64(row, "total-hdd-space"), field_u64(row, "free-hdd-space"));
    resource
}

/// 兼容两种格式：v7 每项一行 (name/value)，v6 单行多列
pub fn parse_health(rows: &[Row]) -> (f64, f64) {
    let mut temperature = 0.0;
    let mut voltage = 0.0;

    for row in rows {
        match row.get("name").map(String::as_str) {
            Some("temperature") | Some("cpu-temperature") if temperature == 0.0 => {
                temperature = field_f64(row, "value");
            }
            Some("voltage") => voltage = field_f64(row, "value"),
            Some(_) => {}
            None => {
                if row.contains_key("temperature") {
                    temperature = field_f64(row, "temperature");
                }
                if row.contains_key("voltage") {
                    voltage = field_f64(row, "voltage");
                }
            }
        }
    }

    (temperature, voltage)
}

/// 活跃会话数：PPP 必需，Hotspot 可选
pub async fn fetch_session_counts(
    session: &dyn DeviceSession,
) -> Result<SessionCounts, ProtocolError> {
    let ppp = session
        .query("/ppp/active/print", &[QueryFilter::proplist(&[".id"])])
        .await?;
    let hotspot = query_optional(
        session,
        "/ip/hotspot/active/print",
        &[QueryFilter::proplist(&[".id"])],
    )
    .await?;

    Ok(SessionCounts::new(ppp.len() as u32, hotspot.len() as u32))
}

/// 概览用的轻量队列计数
pub async fn fetch_queue_count(session: &dyn DeviceSession) -> Result<QueueCount, ProtocolError> {
    let rows = session
        .query("/queue/simple/print", &[QueryFilter::proplist(&[".id", "disabled"])])
        .await?;

    Ok(QueueCount {
        total: rows.len(),
        enabled: rows.iter().filter(|r| !field_bool(r, "disabled")).count(),
    })
}

/// 完整队列列表
pub async fn fetch_queue_summary(
    session: &dyn DeviceSession,
    display_limit: usize,
) -> Result<QueueSummary, ProtocolError> {
    let rows = session.query("/queue/simple/print", &[]).await?;
    Ok(summarize_queues(&rows, display_limit))
}

/// 合计基于全部队列，列表截断到 `display_limit`
pub fn summarize_queues(rows: &[Row], display_limit: usize) -> QueueSummary {
    let mut enabled = 0;
    let (mut max_up, mut max_down) = (0u64, 0u64);
    let (mut bytes_up, mut bytes_down) = (0u64, 0u64);
    let mut queues = Vec::with_capacity(rows.len().min(display_limit));

    for row in rows {
        let disabled = field_bool(row, "disabled");
        let (limit_up, limit_down) = parse_pair(field(row, "max-limit"), parse_rate);
        let (up, down) = parse_pair(field(row, "bytes"), parse_count);

        if !disabled {
            enabled += 1;
        }
        max_up = max_up.saturating_add(limit_up);
        max_down = max_down.saturating_add(limit_down);
        bytes_up = bytes_up.saturating_add(up);
        bytes_down = bytes_down.saturating_add(down);

        if queues.len() < display_limit {
            queues.push(QueueEntry {
                name: field(row, "name").to_string(),
                target: field(row, "target").to_string(),
                disabled,
                max_upload: Quantity::bps(limit_up),
                max_download: Quantity::bps(limit_down),
                upload_bytes: Quantity::bytes(up),
                download_bytes: Quantity::bytes(down),
            });
        }
    }

    QueueSummary {
        total: rows.len(),
        enabled,
        total_max_upload: Quantity::bps(max_up),
        total_max_download: Quantity::bps(max_down),
        total_upload_bytes: Quantity::bytes(bytes_up),
        total_download_bytes: Quantity::bytes(bytes_down),
        truncated: rows.len() > display_limit,
        queues,
    }
}

/// 接口列表（含计数器）
pub async fn fetch_interfaces(session: &dyn DeviceSession) -> Result<Vec<Row>, ProtocolError> {
    session
        .query(
            "/interface/print",
            &[QueryFilter::proplist(&[
                "name", "type", "rx-byte", "tx-byte", "running", "disabled",
            ])],
        )
        .await
}

/// 接口数量统计（详情页的可选子指标）
pub async fn fetch_interface_summary(
    session: &dyn DeviceSession,
) -> Result<InterfaceSummary, ProtocolError> {
    let rows = session
        .query(
            "/interface/print",
            &[QueryFilter::proplist(&["name", "running", "disabled"])],
        )
        .await?;
    Ok(summarize_interfaces(&rows))
}

pub fn summarize_interfaces(rows: &[Row]) -> InterfaceSummary {
    InterfaceSummary {
        total: rows.len(),
        running: rows.iter().filter(|r| field_bool(r, "running")).count(),
        disabled: rows.iter().filter(|r| field_bool(r, "disabled")).count(),
    }
}

/// 计算各接口速率，按 rx+tx 降序取前 `top_n`
pub async fn compute_bandwidth(
    device_id: &str,
    rows: &[Row],
    rates: &RateEngine,
    top_n: usize,
) -> BandwidthSummary {
    let mut entries = Vec::new();
    let (mut total_rx, mut total_tx) = (0u64, 0u64);

    for row in rows {
        let name = field(row, "name");
        let interface_type = field(row, "type");
        if !is_tracked_interface(name, interface_type) {
            continue;
        }

        let rx_bytes = field_u64(row, "rx-byte");
        let tx_bytes = field_u64(row, "tx-byte");
        let rate = rates.compute_rate(device_id, name, rx_bytes, tx_bytes).await;

        total_rx = total_rx.saturating_add(rate.rx_bps);
        total_tx = total_tx.saturating_add(rate.tx_bps);

        entries.push((
            rate.total(),
            InterfaceBandwidth {
                name: name.to_string(),
                interface_type: interface_type.to_string(),
                running: field_bool(row, "running"),
                rx_rate: Quantity::bps(rate.rx_bps),
                tx_rate: Quantity::bps(rate.tx_bps),
                rx_bytes: Quantity::bytes(rx_bytes),
                tx_bytes: Quantity::bytes(tx_bytes),
            },
        ));
    }

    let interface_count = entries.len();
    entries.sort_by(|a, b| b.0.cmp(&a.0));

    BandwidthSummary {
        interface_count,
        total_rx: Quantity::bps(total_rx),
        total_tx: Quantity::bps(total_tx),
        interfaces: entries.into_iter().take(top_n).map(|(_, e)| e).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mock::row;
    use std::time::Duration;

    #[test]
    fn test_parse_uptime_formats() {
        assert_eq!(parse_uptime("5s"), Some(5));
        assert_eq!(parse_uptime("3h4m5s"), Some(3 * 3600 + 4 * 60 + 5));
        assert_eq!(parse_uptime("1w2d3h4m5s"), Some(604_800 + 2 * 86_400 + 3 * 3600 + 245));
        assert_eq!(parse_uptime("2d03:04:05"), Some(2 * 86_400 + 3 * 3600 + 245));
        assert_eq!(parse_uptime(""), None);
        assert_eq!(parse_uptime("garbage"), None);
        assert_eq!(parse_uptime("99999999999999999w"), Some(u64::MAX));
    }

    #[tokio::test]
    async fn test_optional_query_keeps_transport_errors() {
        use crate::config::DeviceConfig;
        use crate::protocol::mock::MockClient;
        use crate::protocol::DeviceClient;

        let client = MockClient::routeros();
        client.fail_query("r1", "/system/identity/print");
        client.timeout_query("r1", "/ip/hotspot/active/print");
        let session = client
            .connect(&DeviceConfig::new("r1", "10.0.0.1"), Duration::from_secs(1))
            .await
            .unwrap();

        // 设备拒绝的可选查询取默认值
        let resource = fetch_resource(session.as_ref()).await.unwrap();
        assert_eq!(resource.identity, "");
        assert_eq!(resource.temperature, 45.0);

        // 超时不能被当成空结果
        let sessions = fetch_session_counts(session.as_ref()).await;
        assert!(matches!(sessions, Err(ProtocolError::Timeout)));
    }

    #[test]
    fn test_parse_rate_suffixes() {
        assert_eq!(parse_rate("0"), 0);
        assert_eq!(parse_rate("512k"), 512_000);
        assert_eq!(parse_rate("1.5M"), 1_500_000);
        assert_eq!(parse_rate("1G"), 1_000_000_000);
        assert_eq!(parse_pair("10M/20M", parse_rate), (10_000_000, 20_000_000));
    }

    #[test]
    fn test_interface_filter() {
        assert!(is_tracked_interface("ether1", "ether"));
        assert!(is_tracked_interface("sfp-sfpplus1", "ether"));
        assert!(is_tracked_interface("vlan100", "vlan"));
        assert!(is_tracked_interface("lan", "bridge"));
        assert!(is_tracked_interface("pppoe-out1", "pppoe-out"));
        assert!(!is_tracked_interface("ether-gre", "gre-tunnel"));
        assert!(!is_tracked_interface("wg0", "wg"));
        assert!(!is_tracked_interface("lo", "loopback"));
    }

    #[test]
    fn test_health_both_formats() {
        let v7 = vec![
            row(&[("name", "voltage"), ("value", "24.1")]),
            row(&[("name", "temperature"), ("value", "45")]),
        ];
        assert_eq!(parse_health(&v7), (45.0, 24.1));

        let v6 = vec![row(&[("temperature", "38"), ("voltage", "12.2")])];
        assert_eq!(parse_health(&v6), (38.0, 12.2));

        assert_eq!(parse_health(&[]), (0.0, 0.0));
    }

    #[test]
    fn test_queue_totals_before_truncation() {
        let rows: Vec<Row> = (0..25)
            .map(|i| {
                row(&[
                    ("name", format!("q{}", i).as_str()),
                    ("max-limit", "1M/2M"),
                    ("bytes", "10/20"),
                    ("disabled", if i % 5 == 0 { "true" } else { "false" }),
                ])
            })
            .collect();

        let summary = summarize_queues(&rows, 20);

        assert_eq!(summary.total, 25);
        assert_eq!(summary.enabled, 20);
        assert_eq!(summary.queues.len(), 20);
        assert!(summary.truncated);
        assert_eq!(summary.total_max_upload.value, 25_000_000);
        assert_eq!(summary.total_max_download.value, 50_000_000);
        assert_eq!(summary.total_download_bytes.value, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bandwidth_sorted_and_capped() {
        let rates = RateEngine::default();
        let iface = |name: &str, kind: &str, rx: u64| {
            row(&[
                ("name", name),
                ("type", kind),
                ("rx-byte", rx.to_string().as_str()),
                ("tx-byte", "0"),
                ("running", "true"),
            ])
        };

        let first = vec![
            iface("ether1", "ether", 0),
            iface("ether2", "ether", 0),
            iface("vlan10", "vlan", 0),
            iface("gre1", "gre-tunnel", 0),
        ];
        let seeded = compute_bandwidth("r1", &first, &rates, 2).await;
        assert_eq!(seeded.interface_count, 3);
        assert_eq!(seeded.total_rx.value, 0);

        tokio::time::advance(Duration::from_secs(2)).await;
        let second = vec![
            iface("ether1", "ether", 1000),
            iface("ether2", "ether", 5000),
            iface("vlan10", "vlan", 3000),
            iface("gre1", "gre-tunnel", 99_999),
        ];
        let summary = compute_bandwidth("r1", &second, &rates, 2).await;

        let names: Vec<&str> = summary.interfaces.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["ether2", "vlan10"]);
        assert_eq!(summary.interface_count, 3);
        assert_eq!(summary.total_rx.value, (1000 + 5000 + 3000) * 8 / 2);
    }
}

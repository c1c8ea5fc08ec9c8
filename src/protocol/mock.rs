//! 测试用的脚本化设备客户端

use super::{DeviceClient, DeviceSession, ProtocolError, QueryFilter, Row};
use crate::config::DeviceConfig;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct MockState {
    connects: AtomicUsize,
    closes: AtomicUsize,
    queries: Mutex<HashMap<String, usize>>,
    rows: Mutex<HashMap<String, Vec<Row>>>,
    fail_connect: Mutex<HashSet<String>>,
    fail_query: Mutex<HashSet<(String, String)>>,
    timeout_query: Mutex<HashSet<(String, String)>>,
    delays: Mutex<HashMap<String, Duration>>,
    fail_close: Mutex<bool>,
}

/// 记录调用次数、可注入失败的客户端
#[derive(Clone, Default)]
pub struct MockClient {
    state: Arc<MockState>,
}

pub fn row(pairs: &[(&str, &str)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一台健康设备的常见查询结果
    pub fn routeros() -> Self {
        let client = Self::new();
        client.set_rows(
            "/system/resource/print",
            vec![row(&[
                ("uptime", "1d2h3m4s"),
                ("version", "7.12 (stable)"),
                ("cpu-load", "12"),
                ("free-memory", "536870912"),
                ("total-memory", "1073741824"),
                ("free-hdd-space", "104857600"),
                ("total-hdd-space", "134217728"),
                ("board-name", "RB4011iGS+"),
                ("architecture-name", "arm"),
            ])],
        );
        client.set_rows(
            "/system/health/print",
            vec![
                row(&[("name", "temperature"), ("value", "45")]),
                row(&[("name", "voltage"), ("value", "24.1")]),
            ],
        );
        client.set_rows("/system/identity/print", vec![row(&[("name", "core-router")])]);
        client.set_rows(
            "/ppp/active/print",
            vec![row(&[("name", "user1")]), row(&[("name", "user2")])],
        );
        client.set_rows("/ip/hotspot/active/print", vec![row(&[("user", "guest")])]);
        client.set_rows(
            "/queue/simple/print",
            vec![
                row(&[
                    ("name", "office"),
                    ("target", "192.168.1.0/24"),
                    ("max-limit", "10000000/20000000"),
                    ("bytes", "1000/2000"),
                    ("disabled", "false"),
                ]),
                row(&[
                    ("name", "guest"),
                    ("target", "192.168.2.0/24"),
                    ("max-limit", "5M/10M"),
                    ("bytes", "300/400"),
                    ("disabled", "true"),
                ]),
            ],
        );
        client.set_rows(
            "/interface/print",
            vec![
                row(&[
                    ("name", "ether1"),
                    ("type", "ether"),
                    ("rx-byte", "1000"),
                    ("tx-byte", "2000"),
                    ("running", "true"),
                    ("disabled", "false"),
                ]),
                row(&[
                    ("name", "gre-to-dc"),
                    ("type", "gre-tunnel"),
                    ("rx-byte", "50"),
                    ("tx-byte", "50"),
                    ("running", "true"),
                    ("disabled", "false"),
                ]),
            ],
        );
        client
    }

    pub fn set_rows(&self, path: &str, rows: Vec<Row>) {
        self.state.rows.lock().unwrap().insert(path.to_string(), rows);
    }

    pub fn fail_connect(&self, device_id: &str) {
        self.state.fail_connect.lock().unwrap().insert(device_id.to_string());
    }

    pub fn fail_query(&self, device_id: &str, path: &str) {
        self.state
            .fail_query
            .lock()
            .unwrap()
            .insert((device_id.to_string(), path.to_string()));
    }

    /// 查询返回超时（传输层错误）
    pub fn timeout_query(&self, device_id: &str, path: &str) {
        self.state
            .timeout_query
            .lock()
            .unwrap()
            .insert((device_id.to_string(), path.to_string()));
    }

    pub fn delay_device(&self, device_id: &str, delay: Duration) {
        self.state.delays.lock().unwrap().insert(device_id.to_string(), delay);
    }

    pub fn fail_close(&self) {
        *self.state.fail_close.lock().unwrap() = true;
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn query_count(&self, path: &str) -> usize {
        self.state.queries.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl DeviceClient for MockClient {
    async fn connect(
        &self,
        device: &DeviceConfig,
        _timeout: Duration,
    ) -> Result<Arc<dyn DeviceSession>, ProtocolError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        if self.state.fail_connect.lock().unwrap().contains(&device.id) {
            return Err(ProtocolError::Connect(format!(
                "{}:{}: connection refused",
                device.host, device.port
            )));
        }

        Ok(Arc::new(MockSession {
            device_id: device.id.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockSession {
    device_id: String,
    state: Arc<MockState>,
}

#[async_trait]
impl DeviceSession for MockSession {
    async fn query(&self, path: &str, _filters: &[QueryFilter]) -> Result<Vec<Row>, ProtocolError> {
        *self
            .state
            .queries
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_insert(0) += 1;

        let delay = self.state.delays.lock().unwrap().get(&self.device_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let key = (self.device_id.clone(), path.to_string());
        if self.state.fail_query.lock().unwrap().contains(&key) {
            return Err(ProtocolError::Trap(format!("no such command: {}", path)));
        }

        if self.state.timeout_query.lock().unwrap().contains(&key) {
            return Err(ProtocolError::Timeout);
        }

        Ok(self
            .state
            .rows
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_default())
    }

    async fn close(&self) -> Result<(), ProtocolError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        if *self.state.fail_close.lock().unwrap() {
            return Err(ProtocolError::Closed);
        }
        Ok(())
    }
}

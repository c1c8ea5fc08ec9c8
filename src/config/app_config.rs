use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// 设备配置，启动时加载一次，之后只读
#[derive(Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// 设备唯一标识
    pub id: String,

    /// 显示名称
    #[serde(default)]
    pub name: String,

    /// 设备地址
    pub host: String,

    /// API 端口
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// 登录用户名
    pub username: String,

    /// 登录密码
    #[serde(default, skip_serializing)]
    pub password: String,
}

fn default_api_port() -> u16 {
    8728
}

impl DeviceConfig {
    pub fn new(id: &str, host: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            host: host.to_string(),
            port: default_api_port(),
            username: "admin".to_string(),
            password: String::new(),
        }
    }

    /// 显示名称为空时回退到 id
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }
}

// 密码不进日志
impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// HTTP 服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub log_dir: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            log_dir: "logs".to_string(),
        }
    }
}

/// 连接池配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// 会话空闲复用窗口（秒）
    pub idle_window_secs: u64,

    /// 强制过期时间（秒）
    pub hard_expiry_secs: u64,

    /// 清理周期（秒），缓存清理共用
    pub sweep_interval_secs: u64,

    /// 连接 / 查询超时（秒）
    pub connect_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            idle_window_secs: 120,
            hard_expiry_secs: 300, // 5 分钟
            sweep_interval_secs: 60,
            connect_timeout_secs: 15,
        }
    }
}

impl PoolSettings {
    pub fn idle_window(&self) -> Duration {
        Duration::from_secs(self.idle_window_secs)
    }

    pub fn hard_expiry(&self) -> Duration {
        Duration::from_secs(self.hard_expiry_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// 响应缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// 硬上限（秒），超过即不再返回
    pub hard_ceiling_secs: u64,

    /// 未列出类别的默认 TTL（毫秒）
    pub default_ttl_ms: u64,

    /// 按类别覆盖 TTL（毫秒），键为类别名
    pub ttl_ms: HashMap<String, u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            hard_ceiling_secs: 30,
            default_ttl_ms: 5000,
            ttl_ms: HashMap::new(),
        }
    }
}

/// 速率计算配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateSettings {
    /// 两次采样的最小间隔（毫秒）
    pub min_sample_interval_ms: u64,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            min_sample_interval_ms: 2000,
        }
    }
}

impl RateSettings {
    pub fn min_sample_interval(&self) -> Duration {
        Duration::from_millis(self.min_sample_interval_ms)
    }
}

/// 聚合器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorSettings {
    /// 详情中展示的队列条数
    pub queue_display_limit: usize,

    /// 带宽排行保留的接口数
    pub bandwidth_top_n: usize,

    /// 每台设备保留的带宽历史点数
    pub history_capacity: usize,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            queue_display_limit: 20,
            bandwidth_top_n: 20,
            history_capacity: 60,
        }
    }
}

/// 完整的采集器配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub pool: PoolSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub rate: RateSettings,

    #[serde(default)]
    pub aggregator: AggregatorSettings,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl AppConfig {
    /// 从 TOML 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Self::from_toml_str(&content)
    }

    /// 从 TOML 字符串解析并校验
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// 从文件加载，并使用环境变量覆盖
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;

        if let Ok(bind) = std::env::var("FLEETMON_BIND") {
            config.server.bind = bind;
        }

        if let Ok(log_dir) = std::env::var("FLEETMON_LOG_DIR") {
            config.server.log_dir = log_dir;
        }

        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.id.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "设备 id 不能为空 (host: {})",
                    device.host
                )));
            }
            if !seen.insert(device.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "设备 id 重复: {}",
                    device.id
                )));
            }
        }

        if self.rate.min_sample_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "min_sample_interval_ms 必须大于 0".to_string(),
            ));
        }

        if self.pool.sweep_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "sweep_interval_secs 必须大于 0".to_string(),
            ));
        }

        if self.pool.connect_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_secs 必须大于 0".to_string(),
            ));
        }

        if self.pool.hard_expiry_secs < self.pool.idle_window_secs {
            return Err(ConfigError::ValidationError(format!(
                "hard_expiry_secs ({}) 不能小于 idle_window_secs ({})",
                self.pool.hard_expiry_secs, self.pool.idle_window_secs
            )));
        }

        Ok(())
    }
}

/// 配置错误
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO 错误: {0}")]
    IoError(String),

    #[error("解析错误: {0}")]
    ParseError(String),

    #[error("验证错误: {0}")]
    ValidationError(String),
}

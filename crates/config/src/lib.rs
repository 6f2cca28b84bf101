//! 客户端配置
//!
//! 加载顺序：内置默认值 -> 可选配置文件（`CHAT_CONFIG_FILE`）-> 环境变量（`CHAT_*`，
//! 嵌套字段用 `__` 分隔，例如 `CHAT_SESSION__TYPING_EXPIRY_MS=1500`）。

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 默认聊天服务器地址
pub const DEFAULT_ENDPOINT: &str = "https://chatapp-rnaocy3wq-amits-projects-9a022097.vercel.app";

/// 全局客户端配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ClientConfig {
    /// 服务器配置
    #[validate(nested)]
    pub server: ServerConfig,
    /// 会话配置
    #[serde(default)]
    #[validate(nested)]
    pub session: SessionConfig,
    /// 重连配置
    #[serde(default)]
    #[validate(nested)]
    pub reconnect: ReconnectConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(url)]
    pub endpoint: String,
    /// 握手超时（毫秒）
    #[validate(range(min = 100))]
    pub handshake_timeout_ms: u64,
}

/// 会话配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SessionConfig {
    /// 输入提示显示时长（毫秒）
    #[validate(range(min = 1))]
    pub typing_expiry_ms: u64,
    /// 每个事件名缓存的未处理事件上限
    pub early_event_buffer: usize,
    /// 离开时等待连接关闭的最长时间（毫秒）
    pub shutdown_timeout_ms: u64,
}

/// 重连配置，`max_attempts = 0` 表示不重连
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReconnectConfig {
    #[validate(range(max = 100))]
    pub max_attempts: u32,
    #[validate(range(min = 1))]
    pub base_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            handshake_timeout_ms: 10_000,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            typing_expiry_ms: 2000,
            early_event_buffer: 64,
            shutdown_timeout_ms: 1000,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            base_delay_ms: 500,
        }
    }
}

impl ClientConfig {
    /// 按默认值 -> `CHAT_CONFIG_FILE` -> `CHAT_*` 环境变量的优先级加载
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var("CHAT_CONFIG_FILE").ok();
        Self::load_from(file.as_deref())
    }

    /// 从指定配置文件（可选）加载，环境变量仍然优先
    pub fn load_from(path: Option<&str>) -> Result<Self, ConfigError> {
        Self::figment(path).extract_validated()
    }

    fn figment(path: Option<&str>) -> Figment {
        let mut fig = Figment::new().merge(Serialized::defaults(ClientConfig::default()));
        if let Some(path) = path {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig.merge(Env::prefixed("CHAT_").ignore(&["config_file"]).split("__"))
    }

    /// 从 YAML 字符串解析，未提供的字段使用默认值
    pub fn from_yaml(s: &str) -> Result<Self, ConfigError> {
        Figment::new()
            .merge(Serialized::defaults(ClientConfig::default()))
            .merge(Yaml::string(s))
            .extract_validated()
    }

    /// 验证配置有效性
    pub fn validate_config(&self) -> Result<(), ConfigError> {
        self.validate()?;
        let scheme = self.server.endpoint.split("://").next().unwrap_or_default();
        if !matches!(scheme, "http" | "https" | "ws" | "wss") {
            return Err(ConfigError::InvalidEndpoint(self.server.endpoint.clone()));
        }
        Ok(())
    }
}

trait ExtractValidated {
    fn extract_validated(self) -> Result<ClientConfig, ConfigError>;
}

impl ExtractValidated for Figment {
    fn extract_validated(self) -> Result<ClientConfig, ConfigError> {
        let cfg: ClientConfig = self.extract().map_err(Box::new)?;
        cfg.validate_config()?;
        Ok(cfg)
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
    #[error("unsupported endpoint scheme: {0}")]
    InvalidEndpoint(String),
}

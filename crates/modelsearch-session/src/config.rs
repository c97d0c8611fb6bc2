//! 客户端配置。
//!
//! ```toml
//! endpoint = "127.0.0.1:45042"
//!
//! [connection]
//! dial_timeout_ms = 3000
//! max_frame_bytes = 8388608
//! ```

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use modelsearch_transport::ConnectionConfig;

use crate::error::ConfigError;

/// 会话建立所需的全部参数。
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// 计算服务地址，交给拨号器解释。
    pub endpoint: String,
    /// 拨号与分帧参数。
    #[serde(default)]
    pub connection: ConnectionConfig,
}

impl ClientConfig {
    /// 以默认连接参数构造。
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connection: ConnectionConfig::default(),
        }
    }

    /// 从 TOML 文本解析并校验。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载并校验。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// 校验字段取值。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "endpoint",
                detail: "must not be empty".into(),
            });
        }
        if self.connection.dial_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "connection.dial_timeout_ms",
                detail: "must be greater than zero".into(),
            });
        }
        if self.connection.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "connection.max_frame_bytes",
                detail: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

//! 容器设置

use serde::Deserialize;

use crate::constants::{ENV_ACTIVATE_CONFIG_DEFAULTS, ENV_VALIDATE_ON_BUILD};

/// 注入容器的行为设置
///
/// 可以由调用方从任意来源反序列化得到，也可以从环境变量读取
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InjectionConfig {
    /// 构建时对整个依赖图做环检测
    pub validate_on_build: bool,

    /// 构建时为 activate-by-default 的配置驱动服务登记 `@default` 子树
    pub activate_config_defaults: bool,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            validate_on_build: true,
            activate_config_defaults: true,
        }
    }
}

impl InjectionConfig {
    /// 从环境变量读取，未设置的字段使用默认值
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            validate_on_build: env_flag(ENV_VALIDATE_ON_BUILD)
                .unwrap_or(defaults.validate_on_build),
            activate_config_defaults: env_flag(ENV_ACTIVATE_CONFIG_DEFAULTS)
                .unwrap_or(defaults.activate_config_defaults),
        }
    }

    pub fn with_validate_on_build(mut self, validate: bool) -> Self {
        self.validate_on_build = validate;
        self
    }

    pub fn with_activate_config_defaults(mut self, activate: bool) -> Self {
        self.activate_config_defaults = activate;
        self
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().and_then(|value| parse_flag(&value))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        other => {
            tracing::warn!("Ignoring unrecognized boolean setting '{}'", other);
            None
        }
    }
}

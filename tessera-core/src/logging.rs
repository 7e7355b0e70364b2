//! 日志初始化
//!
//! 容器内部只通过 `tracing` 宏输出日志，是否安装订阅者由应用决定；
//! 这里提供一个基于 `tracing-subscriber` 的默认安装方式。

use std::fmt;
use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;
use tracing_subscriber::{fmt as subscriber_fmt, EnvFilter};

/// 环境变量：日志级别
pub const ENV_LOG_LEVEL: &str = "TESSERA_LOG";

/// 环境变量：日志格式
pub const ENV_LOG_FORMAT: &str = "TESSERA_LOG_FORMAT";

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => anyhow::bail!("invalid log level '{}'", other),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 日志格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// 单行紧凑输出
    Compact,
    /// 默认的完整输出
    Full,
    /// 每条事件一个 JSON 对象
    Json,
    /// 多行输出，适合本地调试
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "full" => Ok(LogFormat::Full),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => anyhow::bail!("invalid log format '{}'", other),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,

    pub format: LogFormat,

    /// 是否输出模块路径
    pub show_target: bool,

    /// 是否输出线程 ID（排查并发构造时有用）
    pub show_thread_ids: bool,

    /// `EnvFilter` 指令，例如 `"tessera_core=debug,warn"`；设置后覆盖 `level`
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            show_target: false,
            show_thread_ids: false,
            filter: None,
        }
    }
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn show_target(mut self, show: bool) -> Self {
        self.show_target = show;
        self
    }

    pub fn show_thread_ids(mut self, show: bool) -> Self {
        self.show_thread_ids = show;
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// 从环境变量读取：`RUST_LOG` 作为过滤器，`TESSERA_LOG` / `TESSERA_LOG_FORMAT` 设置级别和格式
    ///
    /// 无法识别的值被忽略
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(filter) = std::env::var(EnvFilter::DEFAULT_ENV) {
            config.filter = Some(filter);
        }
        if let Some(level) = std::env::var(ENV_LOG_LEVEL)
            .ok()
            .and_then(|value| value.parse().ok())
        {
            config.level = level;
        }
        if let Some(format) = std::env::var(ENV_LOG_FORMAT)
            .ok()
            .and_then(|value| value.parse().ok())
        {
            config.format = format;
        }

        config
    }

    /// 生效的过滤器
    pub fn env_filter(&self) -> anyhow::Result<EnvFilter> {
        match &self.filter {
            Some(directives) => EnvFilter::try_new(directives)
                .with_context(|| format!("invalid log filter '{}'", directives)),
            None => Ok(EnvFilter::new(self.level.as_str())),
        }
    }

    /// 安装全局订阅者；已经安装过时返回错误
    pub fn init(self) -> anyhow::Result<()> {
        let filter = self.env_filter()?;
        let builder = subscriber_fmt()
            .with_env_filter(filter)
            .with_target(self.show_target)
            .with_thread_ids(self.show_thread_ids);

        let installed = match self.format {
            LogFormat::Compact => builder.compact().try_init(),
            LogFormat::Full => builder.try_init(),
            LogFormat::Json => builder.json().try_init(),
            LogFormat::Pretty => builder.pretty().try_init(),
        };
        installed.map_err(|err| anyhow::anyhow!("failed to install log subscriber: {}", err))
    }
}

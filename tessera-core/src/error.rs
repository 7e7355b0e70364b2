//! 容器错误类型
//!
//! 结构性错误（未满足、歧义、循环、重复注册、已冻结）直接返回给触发解析的调用方，
//! 从不自动重试；激活失败会让实例进入 FAILED 终态，之后对同一标识的请求返回同一个错误。

use std::fmt;
use std::sync::Arc;

/// 容器结果类型
pub type ContainerResult<T> = std::result::Result<T, ContainerError>;

/// 统一的错误处理类型（用户回调使用）
pub use anyhow::Result;

/// 生命周期中出错的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationPhase {
    /// 构造函数
    Construct,
    /// 字段/方法注入
    Inject,
    /// @PostConstruct 回调
    PostConstruct,
}

impl fmt::Display for ActivationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationPhase::Construct => write!(f, "construct"),
            ActivationPhase::Inject => write!(f, "inject"),
            ActivationPhase::PostConstruct => write!(f, "post-construct"),
        }
    }
}

/// 容器错误
///
/// 需要 `Clone`：FAILED 状态的实例会把同一个错误交给之后的每一个调用方。
#[derive(Debug, Clone, thiserror::Error)]
pub enum ContainerError {
    #[error("Service descriptor '{0}' is already registered")]
    DuplicateDescriptor(String),

    #[error("Descriptor store is frozen, cannot register '{0}'")]
    StoreFrozen(String),

    #[error("Unsatisfied dependency: {requester} requires {dependency}, but no service matches")]
    UnsatisfiedDependency { requester: String, dependency: String },

    #[error("Ambiguous dependency: {requester} requires {dependency}, candidates: [{}]", .candidates.join(", "))]
    AmbiguousDependency {
        requester: String,
        dependency: String,
        candidates: Vec<String>,
    },

    #[error("Dependency cycle detected: {}", .cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("Service instance '{0}' has been destroyed")]
    InstanceDestroyed(String),

    #[error("Activation of '{service}' failed during {phase}: {cause:#}")]
    ActivationFailure {
        service: String,
        phase: ActivationPhase,
        cause: Arc<anyhow::Error>,
    },

    #[error("Interceptor chain of '{method}' failed: {cause:#}")]
    InterceptionFailure {
        method: String,
        cause: Arc<anyhow::Error>,
    },

    #[error("Method '{method}' failed: {cause:#}")]
    MethodFailure {
        method: String,
        cause: Arc<anyhow::Error>,
    },

    #[error("Service '{service}' is not of type {expected}")]
    TypeMismatch {
        service: String,
        expected: &'static str,
    },
}

impl ContainerError {
    pub(crate) fn activation(
        service: impl Into<String>,
        phase: ActivationPhase,
        cause: anyhow::Error,
    ) -> Self {
        ContainerError::ActivationFailure {
            service: service.into(),
            phase,
            cause: Arc::new(cause),
        }
    }

    /// 为拦截链逃逸出的错误构造 `InterceptionFailure`
    pub fn interception(method: impl Into<String>, cause: anyhow::Error) -> Self {
        ContainerError::InterceptionFailure {
            method: method.into(),
            cause: Arc::new(cause),
        }
    }

    /// 真实方法抛出、原样穿过拦截链的错误
    pub fn method(method: impl Into<String>, cause: anyhow::Error) -> Self {
        ContainerError::MethodFailure {
            method: method.into(),
            cause: Arc::new(cause),
        }
    }

    /// 用户回调抛出的原始错误（ActivationFailure / InterceptionFailure / MethodFailure）
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            ContainerError::ActivationFailure { cause, .. }
            | ContainerError::InterceptionFailure { cause, .. }
            | ContainerError::MethodFailure { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }

    /// 是否为结构性（解析期）错误
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ContainerError::DuplicateDescriptor(_)
                | ContainerError::StoreFrozen(_)
                | ContainerError::UnsatisfiedDependency { .. }
                | ContainerError::AmbiguousDependency { .. }
                | ContainerError::DependencyCycle { .. }
        )
    }
}

/// 结构化的错误信息
///
/// 用于在关闭报告中记录 pre-destroy 回调的失败
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    /// 错误消息
    pub message: String,

    /// 错误源链（cause chain）
    pub source_chain: Vec<String>,
}

impl ErrorInfo {
    /// 从 anyhow 错误创建 ErrorInfo
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        Self {
            message: error.to_string(),
            source_chain: error.chain().skip(1).map(|e| e.to_string()).collect(),
        }
    }

    /// 获取完整的错误描述（包含源链）
    pub fn full_description(&self) -> String {
        if self.source_chain.is_empty() {
            self.message.clone()
        } else {
            format!(
                "{}\nCaused by:\n  {}",
                self.message,
                self.source_chain.join("\n  ")
            )
        }
    }
}

/// 允许生命周期回调返回 `()` 或 `Result<()>`
pub trait IntoResult {
    fn into_result(self) -> Result<()>;
}

impl IntoResult for () {
    fn into_result(self) -> Result<()> {
        Ok(())
    }
}

impl IntoResult for Result<()> {
    fn into_result(self) -> Result<()> {
        self
    }
}

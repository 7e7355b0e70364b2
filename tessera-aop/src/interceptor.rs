//! 拦截器（Interceptor）定义
//!
//! 拦截器挂在注解标记（marker）上，例如 `"Repeat"`；描述符在方法上声明标记，
//! 调用时标记展开为拦截器组成拦截链。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::chain::Proceed;
use crate::invocation::{Arguments, InvocationContext, Value};

/// 拦截器 Trait
///
/// 拦截器可以：原样或修改参数后调用 `proceed`；多次调用 `proceed`；
/// 不调用 `proceed` 而直接返回值或错误；捕获并替换下游的错误。
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &str;

    fn intercept(
        &self,
        invocation: &InvocationContext,
        args: Arguments,
        proceed: &Proceed<'_>,
    ) -> anyhow::Result<Value>;
}

impl fmt::Debug for dyn Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor").field("name", &self.name()).finish()
    }
}

/// 拦截器注册器
///
/// 用于 inventory 自动收集拦截器
pub struct InterceptorRegistration {
    /// 绑定的注解标记
    pub marker: &'static str,

    /// 创建拦截器实例的函数
    pub creator: fn() -> Arc<dyn Interceptor>,
}

impl InterceptorRegistration {
    pub const fn new(marker: &'static str, creator: fn() -> Arc<dyn Interceptor>) -> Self {
        Self { marker, creator }
    }

    pub fn create_instance(&self) -> Arc<dyn Interceptor> {
        (self.creator)()
    }
}

inventory::collect!(InterceptorRegistration);

/// 所有通过 inventory 提交的拦截器注册器
pub fn interceptor_registrations() -> impl Iterator<Item = &'static InterceptorRegistration> {
    inventory::iter::<InterceptorRegistration>()
}

/// 以容器服务形式提供的拦截器
///
/// 服务声明 `INTERCEPTOR_CONTRACT` 契约和 `@Named(marker)` 限定符，构造函数返回 `InterceptorService`
pub struct InterceptorService(pub Arc<dyn Interceptor>);

impl InterceptorService {
    pub fn new<I: Interceptor + 'static>(interceptor: I) -> Self {
        Self(Arc::new(interceptor))
    }
}

// ============================================================================
// 内置拦截器
// ============================================================================

/// 日志拦截器 - 记录方法进入和退出
#[derive(Debug, Default)]
pub struct LoggingInterceptor;

impl Interceptor for LoggingInterceptor {
    fn name(&self) -> &str {
        "LoggingInterceptor"
    }

    fn intercept(
        &self,
        invocation: &InvocationContext,
        args: Arguments,
        proceed: &Proceed<'_>,
    ) -> anyhow::Result<Value> {
        tracing::debug!("→ Entering: {} {:?}", invocation, args);
        let result = proceed.proceed(args);
        match &result {
            Ok(_) => tracing::debug!("← Exiting: {}", invocation),
            Err(err) => tracing::debug!("← Exiting: {} with error: {:#}", invocation, err),
        }
        result
    }
}

/// 耗时拦截器 - 超过阈值时告警
#[derive(Debug)]
pub struct TimingInterceptor {
    threshold: Duration,
}

impl TimingInterceptor {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }
}

impl Default for TimingInterceptor {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl Interceptor for TimingInterceptor {
    fn name(&self) -> &str {
        "TimingInterceptor"
    }

    fn intercept(
        &self,
        invocation: &InvocationContext,
        args: Arguments,
        proceed: &Proceed<'_>,
    ) -> anyhow::Result<Value> {
        let started = std::time::Instant::now();
        let result = proceed.proceed(args);
        let elapsed = started.elapsed();
        if elapsed > self.threshold {
            tracing::warn!(
                "Slow method detected: {} took {:?} (threshold: {:?})",
                invocation,
                elapsed,
                self.threshold
            );
        }
        result
    }
}

/// 重复拦截器 - 把下游链执行 `times` 次
///
/// 前面几次的失败被记录并忽略，最后一次的结果返回给调用方
#[derive(Debug)]
pub struct RepeatInterceptor {
    times: usize,
}

impl RepeatInterceptor {
    pub fn new(times: usize) -> Self {
        Self {
            times: times.max(1),
        }
    }
}

impl Default for RepeatInterceptor {
    fn default() -> Self {
        Self::new(2)
    }
}

impl Interceptor for RepeatInterceptor {
    fn name(&self) -> &str {
        "RepeatInterceptor"
    }

    fn intercept(
        &self,
        invocation: &InvocationContext,
        args: Arguments,
        proceed: &Proceed<'_>,
    ) -> anyhow::Result<Value> {
        for attempt in 1..self.times {
            if let Err(err) = proceed.proceed(args.clone()) {
                tracing::warn!(
                    "{} failed on run {}/{}: {:#}",
                    invocation,
                    attempt,
                    self.times,
                    err
                );
            }
        }
        proceed.proceed(args)
    }
}

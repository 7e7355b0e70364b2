//! Tessera AOP - 方法拦截支持
//!
//! 提供：
//! - 挂在注解标记上的拦截器（`Interceptor`）
//! - 续体式的拦截链执行（`Proceed`），支持修改参数、重复执行、强制返回和替换错误
//! - 拦截器注册表：显式注册、inventory 自动加载，以及容器中的拦截器服务
//! - 按 (服务, 方法) 缓存的拦截链

pub mod chain;
pub mod interception;
pub mod interceptor;
pub mod invocation;
pub mod registry;

// 重新导出核心类型
pub use chain::{execute, Proceed, Target};
pub use interception::{Chain, Intercepted, Interception};
pub use interceptor::{
    Interceptor, InterceptorRegistration, InterceptorService, LoggingInterceptor,
    RepeatInterceptor, TimingInterceptor,
};
pub use invocation::{Arguments, InvocationContext, Value};
pub use registry::{get_global_registry, InterceptorRegistry};

// 导出 inventory 供拦截器注册使用
pub use inventory;

/// 预导入模块
pub mod prelude {
    pub use crate::chain::Proceed;
    pub use crate::interception::{Intercepted, Interception};
    pub use crate::interceptor::{Interceptor, InterceptorRegistration, InterceptorService};
    pub use crate::invocation::{Arguments, InvocationContext, Value};
    pub use crate::registry::{get_global_registry, InterceptorRegistry};
}

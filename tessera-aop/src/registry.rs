//! 拦截器注册表
//!
//! 注解标记 -> 拦截器

use crate::interceptor::{interceptor_registrations, Interceptor};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;

/// 全局拦截器注册表
///
/// 首次使用时初始化，加载所有通过 inventory 注册的拦截器
static GLOBAL_INTERCEPTOR_REGISTRY: Lazy<Arc<InterceptorRegistry>> = Lazy::new(|| {
    let mut registry = InterceptorRegistry::new();
    registry.auto_load_interceptors();
    Arc::new(registry)
});

/// 获取全局拦截器注册表
pub fn get_global_registry() -> &'static Arc<InterceptorRegistry> {
    &GLOBAL_INTERCEPTOR_REGISTRY
}

/// 拦截器注册表
///
/// 同一个标记可以绑定多个拦截器，按注册顺序排在链上
#[derive(Default)]
pub struct InterceptorRegistry {
    interceptors: HashMap<String, Vec<Arc<dyn Interceptor>>>,
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 把拦截器绑定到标记
    pub fn register(&mut self, marker: impl Into<String>, interceptor: Arc<dyn Interceptor>) {
        let marker = marker.into();
        tracing::debug!("Registering interceptor {} for @{}", interceptor.name(), marker);
        self.interceptors.entry(marker).or_default().push(interceptor);
    }

    /// 链式注册
    pub fn with(mut self, marker: impl Into<String>, interceptor: Arc<dyn Interceptor>) -> Self {
        self.register(marker, interceptor);
        self
    }

    /// 标记绑定的拦截器；未绑定时返回空列表
    pub fn lookup(&self, marker: &str) -> &[Arc<dyn Interceptor>] {
        self.interceptors
            .get(marker)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn contains(&self, marker: &str) -> bool {
        self.interceptors.contains_key(marker)
    }

    /// 注册的拦截器总数
    pub fn len(&self) -> usize {
        self.interceptors.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// 从 inventory 自动加载所有注册的拦截器
    pub fn auto_load_interceptors(&mut self) {
        let registrations: Vec<_> = interceptor_registrations().collect();
        tracing::info!(
            "Auto-loading {} interceptor(s) from registry",
            registrations.len()
        );

        for registration in registrations {
            let interceptor = registration.create_instance();
            tracing::debug!(
                "  ├─ Loading interceptor: {} for @{}",
                interceptor.name(),
                registration.marker
            );
            self.register(registration.marker, interceptor);
        }
    }
}

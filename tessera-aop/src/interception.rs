//! 拦截调用入口
//!
//! `Interception` 把容器中的实例、描述符上的拦截绑定和拦截器注册表连在一起：
//! 每个 (服务, 方法) 的拦截链只解析一次并缓存，之后每次调用都复用。

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tessera_core::{
    ContainerError, ContainerResult, InjectionContext, InstanceKey, Lookup, Qualifier,
    INTERCEPTOR_CONTRACT,
};

use crate::chain::execute;
use crate::interceptor::{Interceptor, InterceptorService};
use crate::invocation::{Arguments, InvocationContext, Value};
use crate::registry::{get_global_registry, InterceptorRegistry};

/// 错误的身份：堆上错误对象的地址加完整消息
fn fingerprint(err: &anyhow::Error) -> (usize, String) {
    let object = &**err as *const (dyn std::error::Error + Send + Sync) as *const () as usize;
    (object, format!("{:#}", err))
}

/// 已解析的拦截链
pub type Chain = Arc<[Arc<dyn Interceptor>]>;

/// 拦截调用入口
pub struct Interception {
    context: InjectionContext,
    registry: Arc<InterceptorRegistry>,
    chains: RwLock<HashMap<(String, String), Chain>>,
}

impl Interception {
    /// 使用全局拦截器注册表
    pub fn new(context: InjectionContext) -> Self {
        Self::with_registry(context, Arc::clone(get_global_registry()))
    }

    pub fn with_registry(context: InjectionContext, registry: Arc<InterceptorRegistry>) -> Self {
        Self {
            context,
            registry,
            chains: RwLock::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &InjectionContext {
        &self.context
    }

    /// 方法的拦截链（外层在前）
    ///
    /// 每个标记先在注册表中查找，找不到时再查找容器中 `@Named(marker)` 的拦截器服务；
    /// 两处都没有时返回 `UnsatisfiedDependency`
    pub fn chain(&self, service: &str, method: &str) -> ContainerResult<Chain> {
        let cache_key = (service.to_string(), method.to_string());
        if let Some(chain) = self.chains.read().get(&cache_key) {
            return Ok(Arc::clone(chain));
        }

        let signature = format!("{}::{}", service, method);
        let descriptor =
            self.context
                .descriptor(service)
                .ok_or_else(|| ContainerError::UnsatisfiedDependency {
                    requester: signature.clone(),
                    dependency: service.to_string(),
                })?;

        let mut links: Vec<Arc<dyn Interceptor>> = Vec::new();
        for binding in descriptor.interceptors_for(method) {
            let registered = self.registry.lookup(&binding.marker);
            if !registered.is_empty() {
                links.extend(registered.iter().cloned());
                continue;
            }

            let services = self.context.get_all::<InterceptorService>(
                Lookup::of(INTERCEPTOR_CONTRACT).qualified(Qualifier::named(&binding.marker)),
            )?;
            if services.is_empty() {
                return Err(ContainerError::UnsatisfiedDependency {
                    requester: signature,
                    dependency: format!("@{}", binding.marker),
                });
            }
            links.extend(services.iter().map(|service| Arc::clone(&service.0)));
        }

        tracing::debug!(
            "Resolved interceptor chain for {}: [{}]",
            signature,
            links
                .iter()
                .map(|link| link.name())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let chain: Chain = links.into();
        let mut chains = self.chains.write();
        Ok(Arc::clone(chains.entry(cache_key).or_insert(chain)))
    }

    /// 通过拦截链调用实例上的方法
    ///
    /// `body` 是真实方法：拿到目标实例和（可能已被拦截器替换的）参数。
    /// 真实方法的错误原样穿过拦截链（包括没有拦截器的方法）时返回 `MethodFailure`；
    /// 拦截器自己抛出或改写过的错误返回 `InterceptionFailure`。两者都把原始错误保存在 `cause` 中。
    pub fn invoke<T, R, F>(
        &self,
        key: &InstanceKey,
        method: &str,
        args: Arguments,
        body: F,
    ) -> ContainerResult<R>
    where
        T: Any + Send + Sync,
        R: Any + Send,
        F: Fn(&T, &Arguments) -> anyhow::Result<R>,
    {
        self.context.ensure_usable(key)?;
        let instance = self.context.get_by_key(key)?;
        let target = Arc::clone(&instance)
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeMismatch {
                service: key.to_string(),
                expected: std::any::type_name::<T>(),
            })?;
        let chain = self.chain(&key.service, method)?;

        let invocation = InvocationContext::new(key.to_string(), method, instance);
        tracing::trace!("Invoking {} through {} interceptor(s)", invocation, chain.len());

        let raised = RefCell::new(None);
        let real = |args: &Arguments| -> anyhow::Result<Value> {
            body(&target, args)
                .map(|value| Box::new(value) as Value)
                .map_err(|err| {
                    *raised.borrow_mut() = Some(fingerprint(&err));
                    err
                })
        };
        let value = execute(&chain, &invocation, args, &real).map_err(|err| {
            if raised.borrow().as_ref() == Some(&fingerprint(&err)) {
                ContainerError::method(invocation.signature(), err)
            } else {
                ContainerError::interception(invocation.signature(), err)
            }
        })?;

        value.downcast::<R>().map(|value| *value).map_err(|_| {
            ContainerError::interception(
                invocation.signature(),
                anyhow::anyhow!(
                    "interceptor chain returned a value that is not {}",
                    std::any::type_name::<R>()
                ),
            )
        })
    }

    /// 类型化的调用句柄
    pub fn bind<T: Any + Send + Sync>(&self, key: InstanceKey) -> Intercepted<'_, T> {
        Intercepted {
            interception: self,
            key,
            _target: std::marker::PhantomData,
        }
    }
}

/// 绑定到某个实例标识的调用句柄
pub struct Intercepted<'a, T> {
    interception: &'a Interception,
    key: InstanceKey,
    _target: std::marker::PhantomData<fn(&T)>,
}

impl<T: Any + Send + Sync> Intercepted<'_, T> {
    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    pub fn call<R, F>(&self, method: &str, args: Arguments, body: F) -> ContainerResult<R>
    where
        R: Any + Send,
        F: Fn(&T, &Arguments) -> anyhow::Result<R>,
    {
        self.interception.invoke(&self.key, method, args, body)
    }
}

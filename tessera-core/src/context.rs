//! 注入上下文 - 应用代码获取服务的唯一入口
//!
//! `InjectionContextBuilder` 收集描述符并冻结仓库，`InjectionContext` 提供与依赖基数一一对应的查询、
//! 运行级别启动/关闭以及配置事件的入口。

use std::any::Any;
use std::collections::HashSet;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config_driven::{ConfigActivations, ConfigActivator, ConfigEvent};
use crate::descriptor::{
    Cardinality, DependencySpec, DescriptorRegistration, Instance, Qualifier, ServiceDescriptor,
};
use crate::error::{ContainerError, ContainerResult};
use crate::lifecycle::{InstanceKey, LifecycleManager, LifecycleState, ShutdownReport};
use crate::provider::ServiceProvider;
use crate::resolver::{Candidate, DependencyResolver, Resolved};
use crate::runlevel::{destroy_in_order, RunLevelScheduler};
use crate::settings::InjectionConfig;
use crate::store::DescriptorStore;
use crate::Scope;

/// 公共查询的请求方名称（出现在错误信息里）
const QUERY_REQUESTER: &str = "InjectionContext";

/// 上下文内部状态，由 `InjectionContext` 和 `ServiceProvider` 共享
pub(crate) struct ContextInner {
    pub(crate) store: DescriptorStore,
    pub(crate) lifecycle: LifecycleManager,
    pub(crate) activations: ConfigActivations,
    pub(crate) scheduler: RunLevelScheduler,
    pub(crate) settings: InjectionConfig,
    /// 已确认构造期依赖无环的描述符
    pub(crate) acyclic: RwLock<HashSet<String>>,
    handle: Weak<ContextInner>,
}

impl ContextInner {
    pub(crate) fn handle(&self) -> Weak<ContextInner> {
        Weak::clone(&self.handle)
    }
}

/// 查询条件：类型过滤（服务标识或契约）+ 限定符过滤
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub target: String,
    pub qualifiers: Vec<Qualifier>,
}

impl Lookup {
    pub fn of(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            qualifiers: Vec::new(),
        }
    }

    pub fn qualified(mut self, qualifier: Qualifier) -> Self {
        self.qualifiers.push(qualifier);
        self
    }

    fn spec(&self, cardinality: Cardinality) -> DependencySpec {
        DependencySpec {
            target: self.target.clone(),
            qualifiers: self.qualifiers.clone(),
            cardinality,
        }
    }
}

impl From<&str> for Lookup {
    fn from(target: &str) -> Self {
        Lookup::of(target)
    }
}

impl From<String> for Lookup {
    fn from(target: String) -> Self {
        Lookup::of(target)
    }
}

/// 注入上下文
#[derive(Clone)]
pub struct InjectionContext {
    inner: Arc<ContextInner>,
}

impl InjectionContext {
    pub fn builder() -> InjectionContextBuilder {
        InjectionContextBuilder::new()
    }

    /// 上下文构建后仓库已冻结，总是返回 `StoreFrozen`
    pub fn register(&self, descriptor: ServiceDescriptor) -> ContainerResult<()> {
        self.inner.store.register(descriptor)
    }

    /// 恰好一个匹配的服务
    pub fn get<T: Any + Send + Sync>(&self, lookup: impl Into<Lookup>) -> ContainerResult<Arc<T>> {
        let lookup = lookup.into();
        self.query(&lookup, Cardinality::Single)?
            .into_single()
            .map_err(|err| retarget(err, &lookup))
    }

    /// 恰好一个匹配的服务（类型擦除）
    pub fn get_instance(&self, lookup: impl Into<Lookup>) -> ContainerResult<Instance> {
        self.query(&lookup.into(), Cardinality::Single)?
            .into_instance()
    }

    /// 零个或一个匹配的服务
    pub fn get_optional<T: Any + Send + Sync>(
        &self,
        lookup: impl Into<Lookup>,
    ) -> ContainerResult<Option<Arc<T>>> {
        let lookup = lookup.into();
        self.query(&lookup, Cardinality::Optional)?
            .into_optional()
            .map_err(|err| retarget(err, &lookup))
    }

    /// 所有匹配的服务（声明顺序）
    pub fn get_all<T: Any + Send + Sync>(
        &self,
        lookup: impl Into<Lookup>,
    ) -> ContainerResult<Vec<Arc<T>>> {
        let lookup = lookup.into();
        self.query(&lookup, Cardinality::List)?
            .into_list()
            .map_err(|err| retarget(err, &lookup))
    }

    /// 恰好一个匹配服务的延迟访问器
    pub fn get_provider(&self, lookup: impl Into<Lookup>) -> ContainerResult<ServiceProvider> {
        self.query(&lookup.into(), Cardinality::Provider)?
            .into_provider()
    }

    /// 每个匹配服务一个延迟访问器
    pub fn get_providers(
        &self,
        lookup: impl Into<Lookup>,
    ) -> ContainerResult<Vec<ServiceProvider>> {
        self.query(&lookup.into(), Cardinality::ListOfProviders)?
            .into_providers()
    }

    /// 按实例标识获取实例；配置驱动服务需要带上配置子树
    pub fn get_by_key(&self, key: &InstanceKey) -> ContainerResult<Instance> {
        if self.is_shut_down() {
            return Err(ContainerError::InstanceDestroyed(key.to_string()));
        }
        let unsatisfied = || ContainerError::UnsatisfiedDependency {
            requester: QUERY_REQUESTER.to_string(),
            dependency: key.to_string(),
        };
        let descriptor = self.inner.store.get(&key.service).ok_or_else(unsatisfied)?;

        let candidate = match (&key.subtree, descriptor.is_config_driven()) {
            (None, false) => Candidate::service(descriptor),
            (Some(subtree), true) => {
                let entry = self
                    .inner
                    .activations
                    .entries(&key.service)
                    .into_iter()
                    .find(|entry| &entry.subtree == subtree)
                    .ok_or_else(|| ContainerError::InstanceDestroyed(key.to_string()))?;
                Candidate::configured(descriptor, entry)
            }
            _ => return Err(unsatisfied()),
        };
        DependencyResolver::new(&self.inner).activate(&candidate)
    }

    fn query(
        &self,
        lookup: &Lookup,
        cardinality: Cardinality,
    ) -> ContainerResult<Resolved> {
        if self.is_shut_down() {
            return Err(ContainerError::InstanceDestroyed(lookup.target.clone()));
        }
        DependencyResolver::new(&self.inner).resolve(QUERY_REQUESTER, &lookup.spec(cardinality))
    }

    /// 按运行级别升序急切激活服务，返回激活的实例标识
    ///
    /// 只执行一次；之后的调用返回空列表
    pub fn startup(&self) -> ContainerResult<Vec<String>> {
        if self.is_shut_down() {
            return Err(ContainerError::InstanceDestroyed(QUERY_REQUESTER.to_string()));
        }

        let descriptors = self.inner.store.descriptors();
        let resolver = DependencyResolver::new(&self.inner);
        let activated = self.inner.scheduler.startup(&descriptors, |descriptor| {
            let candidates: Vec<Candidate> = if descriptor.is_config_driven() {
                self.inner
                    .activations
                    .entries(&descriptor.name)
                    .into_iter()
                    .map(|entry| Candidate::configured(Arc::clone(descriptor), entry))
                    .collect()
            } else {
                vec![Candidate::service(Arc::clone(descriptor))]
            };

            candidates
                .into_iter()
                .map(|candidate| -> ContainerResult<String> {
                    resolver.activate(&candidate)?;
                    Ok(candidate.label())
                })
                .collect()
        })?;

        tracing::info!("Startup complete: {} service(s) activated", activated.len());
        Ok(activated)
    }

    /// 关闭容器：销毁所有实例，之后的查询返回 `InstanceDestroyed`
    ///
    /// 幂等，第二次调用返回空报告
    pub fn shutdown(&self) -> ShutdownReport {
        // 与配置事件互斥，关闭之后到达的事件会被忽略
        let _serial = self.inner.activations.serialize();
        self.inner.scheduler.shutdown(&self.inner.lifecycle)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.scheduler.is_stopped()
    }

    /// 关闭自定义作用域：销毁该作用域下的所有实例，之后的请求会创建新实例
    pub fn close_scope(&self, tag: &str) -> ShutdownReport {
        let slots = self.inner.lifecycle.detach(
            |slot| matches!(&slot.descriptor.scope, Scope::Custom(scope) if scope == tag),
        );
        tracing::debug!("Closing scope '{}' ({} instance(s))", tag, slots.len());
        destroy_in_order(&self.inner.lifecycle, slots)
    }

    /// 处理一个配置事件
    pub fn apply_config(&self, event: ConfigEvent) -> ContainerResult<()> {
        ConfigActivator::new(&self.inner).apply(event)
    }

    /// 按到达顺序消费配置事件，直到发送端全部关闭
    ///
    /// 需要多线程 tokio 运行时：事件处理可能执行用户的构造和销毁回调
    pub async fn watch_config(self, mut events: UnboundedReceiver<ConfigEvent>) {
        tracing::debug!("Watching configuration events");
        while let Some(event) = events.recv().await {
            let result = tokio::task::block_in_place(|| self.apply_config(event));
            if let Err(err) = result {
                tracing::error!("Failed to apply configuration event: {}", err);
            }
        }
        tracing::debug!("Configuration event feed closed");
    }

    /// 对整个依赖图做构造期环检测
    pub fn validate_dependencies(&self) -> ContainerResult<()> {
        DependencyResolver::new(&self.inner).validate_all()
    }

    /// 实例的生命周期状态；从未实例化过的标识返回 `None`
    pub fn lifecycle_state(&self, key: &InstanceKey) -> Option<LifecycleState> {
        self.inner.lifecycle.state(key)
    }

    /// 确认实例仍可使用（未被销毁、配置子树仍然存在）
    pub fn ensure_usable(&self, key: &InstanceKey) -> ContainerResult<()> {
        let destroyed = || ContainerError::InstanceDestroyed(key.to_string());

        if self.is_shut_down() {
            return Err(destroyed());
        }
        match self.inner.lifecycle.state(key) {
            Some(LifecycleState::PreDestroy) | Some(LifecycleState::Destroyed) => {
                return Err(destroyed())
            }
            Some(_) => {}
            None => {
                if let Some(subtree) = &key.subtree {
                    if !self.config_subtrees(&key.service).contains(subtree) {
                        return Err(destroyed());
                    }
                }
            }
        }
        Ok(())
    }

    pub fn descriptor(&self, name: &str) -> Option<Arc<ServiceDescriptor>> {
        self.inner.store.get(name)
    }

    pub fn descriptors(&self) -> Arc<[Arc<ServiceDescriptor>]> {
        self.inner.store.descriptors()
    }

    /// 配置驱动服务当前激活的配置子树
    pub fn config_subtrees(&self, service: &str) -> Vec<String> {
        self.inner.activations.subtrees(service)
    }

    pub fn settings(&self) -> &InjectionConfig {
        &self.inner.settings
    }
}

/// 把通用的类型不匹配错误改写为具体的服务标识
fn retarget(err: ContainerError, lookup: &Lookup) -> ContainerError {
    match err {
        ContainerError::TypeMismatch { expected, .. } => ContainerError::TypeMismatch {
            service: lookup.target.clone(),
            expected,
        },
        other => other,
    }
}

/// 注入上下文构建器
#[derive(Default)]
pub struct InjectionContextBuilder {
    store: DescriptorStore,
    settings: InjectionConfig,
}

impl InjectionContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置容器行为
    pub fn config(mut self, settings: InjectionConfig) -> Self {
        self.settings = settings;
        self
    }

    /// 注册描述符
    pub fn register(self, descriptor: ServiceDescriptor) -> ContainerResult<Self> {
        self.store.register(descriptor)?;
        Ok(self)
    }

    /// 注册所有通过 inventory 提交的描述符
    pub fn scan_descriptors(self) -> ContainerResult<Self> {
        let mut count = 0;
        for registration in inventory::iter::<DescriptorRegistration> {
            tracing::debug!("Found descriptor registration '{}'", registration.name);
            self.store.register((registration.create)())?;
            count += 1;
        }
        tracing::info!("Scanned {} descriptor registration(s)", count);
        Ok(self)
    }

    /// 冻结仓库并创建上下文
    pub fn build(self) -> ContainerResult<InjectionContext> {
        self.store.freeze();
        let inner = Arc::new_cyclic(|handle| ContextInner {
            store: self.store,
            lifecycle: LifecycleManager::new(),
            activations: ConfigActivations::new(),
            scheduler: RunLevelScheduler::new(),
            settings: self.settings,
            acyclic: RwLock::new(HashSet::new()),
            handle: Weak::clone(handle),
        });

        if inner.settings.activate_config_defaults {
            ConfigActivator::new(&inner).register_defaults();
        }
        if inner.settings.validate_on_build {
            DependencyResolver::new(&inner).validate_all()?;
        }

        tracing::info!(
            "Injection context built with {} service descriptor(s)",
            inner.store.len()
        );
        Ok(InjectionContext { inner })
    }
}

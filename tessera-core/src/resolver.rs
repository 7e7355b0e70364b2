//! 依赖解析器
//!
//! 把依赖声明解析为零个、一个或多个具体候选，按基数规则校验后交给生命周期管理器实例化。
//! 被依赖方总是先于依赖方完成激活；构造期（非 Provider）边上的环在激活前被拒绝。

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::config_driven::ConfigEntry;
use crate::context::ContextInner;
use crate::descriptor::{Cardinality, DependencySpec, Instance, ServiceDescriptor};
use crate::error::{ContainerError, ContainerResult};
use crate::lifecycle::InstanceKey;
use crate::provider::ServiceProvider;
use crate::utils::dependency::find_cycle;
use crate::Scope;

/// 解析结果，与依赖基数一一对应
#[derive(Clone)]
pub enum Resolved {
    Single(Instance),
    Optional(Option<Instance>),
    List(Vec<Instance>),
    Provider(ServiceProvider),
    Providers(Vec<ServiceProvider>),
}

impl Resolved {
    fn kind(&self) -> &'static str {
        match self {
            Resolved::Single(_) => "single",
            Resolved::Optional(_) => "optional",
            Resolved::List(_) => "list",
            Resolved::Provider(_) => "provider",
            Resolved::Providers(_) => "list-of-providers",
        }
    }

    fn mismatch<T>(&self) -> ContainerError {
        ContainerError::TypeMismatch {
            service: format!("<{} dependency>", self.kind()),
            expected: std::any::type_name::<T>(),
        }
    }

    /// 单个实例（类型擦除）
    pub fn into_instance(self) -> ContainerResult<Instance> {
        match self {
            Resolved::Single(instance) => Ok(instance),
            other => Err(other.mismatch::<Instance>()),
        }
    }

    pub fn into_single<T: Any + Send + Sync>(self) -> ContainerResult<Arc<T>> {
        match self {
            Resolved::Single(instance) => downcast(instance, "single dependency"),
            other => Err(other.mismatch::<Arc<T>>()),
        }
    }

    pub fn into_optional<T: Any + Send + Sync>(self) -> ContainerResult<Option<Arc<T>>> {
        match self {
            Resolved::Optional(instance) => instance
                .map(|i| downcast(i, "optional dependency"))
                .transpose(),
            other => Err(other.mismatch::<Option<Arc<T>>>()),
        }
    }

    pub fn into_list<T: Any + Send + Sync>(self) -> ContainerResult<Vec<Arc<T>>> {
        match self {
            Resolved::List(instances) => instances
                .into_iter()
                .map(|i| downcast(i, "list dependency"))
                .collect(),
            other => Err(other.mismatch::<Vec<Arc<T>>>()),
        }
    }

    pub fn into_provider(self) -> ContainerResult<ServiceProvider> {
        match self {
            Resolved::Provider(provider) => Ok(provider),
            other => Err(other.mismatch::<ServiceProvider>()),
        }
    }

    pub fn into_providers(self) -> ContainerResult<Vec<ServiceProvider>> {
        match self {
            Resolved::Providers(providers) => Ok(providers),
            other => Err(other.mismatch::<Vec<ServiceProvider>>()),
        }
    }
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::Single(_) => write!(f, "Single(..)"),
            Resolved::Optional(instance) => write!(f, "Optional(present: {})", instance.is_some()),
            Resolved::List(instances) => write!(f, "List(len: {})", instances.len()),
            Resolved::Provider(provider) => write!(f, "Provider({:?})", provider),
            Resolved::Providers(providers) => write!(f, "Providers({:?})", providers),
        }
    }
}

pub(crate) fn downcast<T: Any + Send + Sync>(
    instance: Instance,
    service: &str,
) -> ContainerResult<Arc<T>> {
    instance
        .downcast::<T>()
        .map_err(|_| ContainerError::TypeMismatch {
            service: service.to_string(),
            expected: std::any::type_name::<T>(),
        })
}

/// 构造函数收到的已解析参数（按声明顺序依次取出）
#[derive(Default)]
pub struct ResolvedArgs {
    values: VecDeque<Resolved>,
}

impl ResolvedArgs {
    pub(crate) fn new(values: Vec<Resolved>) -> Self {
        Self {
            values: values.into(),
        }
    }

    /// 取出下一个参数
    pub fn next(&mut self) -> anyhow::Result<Resolved> {
        self.values
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("constructor requested more arguments than declared"))
    }

    pub fn single<T: Any + Send + Sync>(&mut self) -> anyhow::Result<Arc<T>> {
        Ok(self.next()?.into_single()?)
    }

    pub fn optional<T: Any + Send + Sync>(&mut self) -> anyhow::Result<Option<Arc<T>>> {
        Ok(self.next()?.into_optional()?)
    }

    pub fn list<T: Any + Send + Sync>(&mut self) -> anyhow::Result<Vec<Arc<T>>> {
        Ok(self.next()?.into_list()?)
    }

    pub fn provider(&mut self) -> anyhow::Result<ServiceProvider> {
        Ok(self.next()?.into_provider()?)
    }

    pub fn providers(&mut self) -> anyhow::Result<Vec<ServiceProvider>> {
        Ok(self.next()?.into_providers()?)
    }

    /// 剩余未取出的参数个数
    pub fn remaining(&self) -> usize {
        self.values.len()
    }
}

/// 一个可实例化的候选：普通描述符，或配置驱动描述符的某个配置子树
#[derive(Clone)]
pub(crate) struct Candidate {
    pub(crate) descriptor: Arc<ServiceDescriptor>,
    pub(crate) config: Option<ConfigEntry>,
}

impl Candidate {
    pub(crate) fn service(descriptor: Arc<ServiceDescriptor>) -> Self {
        Self {
            descriptor,
            config: None,
        }
    }

    pub(crate) fn configured(descriptor: Arc<ServiceDescriptor>, entry: ConfigEntry) -> Self {
        Self {
            descriptor,
            config: Some(entry),
        }
    }

    pub(crate) fn key(&self) -> InstanceKey {
        InstanceKey {
            service: self.descriptor.name.clone(),
            subtree: self.config.as_ref().map(|e| e.subtree.clone()),
        }
    }

    pub(crate) fn label(&self) -> String {
        self.key().to_string()
    }
}

/// 依赖解析器
pub(crate) struct DependencyResolver<'a> {
    inner: &'a ContextInner,
}

impl<'a> DependencyResolver<'a> {
    pub(crate) fn new(inner: &'a ContextInner) -> Self {
        Self { inner }
    }

    /// 满足依赖的全部候选（声明顺序；配置驱动描述符按配置子树出现的顺序展开）
    pub(crate) fn candidates(&self, spec: &DependencySpec) -> Vec<Candidate> {
        self.inner
            .store
            .lookup(&spec.target, &spec.qualifiers)
            .into_iter()
            .flat_map(|descriptor| {
                if descriptor.is_config_driven() {
                    self.inner
                        .activations
                        .entries(&descriptor.name)
                        .into_iter()
                        .map(|entry| Candidate::configured(Arc::clone(&descriptor), entry))
                        .collect()
                } else {
                    vec![Candidate::service(descriptor)]
                }
            })
            .collect()
    }

    /// 按基数规则解析一个依赖
    pub(crate) fn resolve(
        &self,
        requester: &str,
        spec: &DependencySpec,
    ) -> ContainerResult<Resolved> {
        let candidates = self.candidates(spec);
        tracing::trace!(
            "Resolving {} for '{}': {} candidate(s)",
            spec,
            requester,
            candidates.len()
        );

        match spec.cardinality {
            Cardinality::Single => {
                let candidate = self.exactly_one(requester, spec, candidates)?;
                Ok(Resolved::Single(self.activate(&candidate)?))
            }
            Cardinality::Optional => {
                if candidates.len() > 1 {
                    return Err(ambiguous(requester, spec, &candidates));
                }
                match candidates.first() {
                    Some(candidate) => Ok(Resolved::Optional(Some(self.activate(candidate)?))),
                    None => Ok(Resolved::Optional(None)),
                }
            }
            Cardinality::List => candidates
                .iter()
                .map(|candidate| self.activate(candidate))
                .collect::<ContainerResult<Vec<_>>>()
                .map(Resolved::List),
            Cardinality::Provider => {
                let candidate = self.exactly_one(requester, spec, candidates)?;
                Ok(Resolved::Provider(self.provider(candidate)))
            }
            Cardinality::ListOfProviders => Ok(Resolved::Providers(
                candidates
                    .into_iter()
                    .map(|candidate| self.provider(candidate))
                    .collect(),
            )),
        }
    }

    /// 为某个候选解析它自己的依赖；配置驱动实例对绑定 Bean 类型的依赖直接拿到所属子树的 Bean
    fn resolve_for(
        &self,
        requester: &Candidate,
        spec: &DependencySpec,
    ) -> ContainerResult<Resolved> {
        if requester.descriptor.is_config_bean_dependency(spec) {
            if let Some(entry) = &requester.config {
                return Ok(Resolved::Single(Arc::clone(&entry.bean)));
            }
        }
        self.resolve(&requester.label(), spec)
    }

    /// 激活候选（先校验构造期依赖无环）
    ///
    /// 配置驱动候选总是按子树当前的登记项激活：子树已移除时返回 `InstanceDestroyed`，
    /// 子树已更新时使用新的配置 Bean。
    pub(crate) fn activate(&self, candidate: &Candidate) -> ContainerResult<Instance> {
        self.ensure_acyclic(&candidate.descriptor)?;
        let Some(config) = &candidate.config else {
            return self
                .inner
                .lifecycle
                .activate(&candidate.descriptor, candidate.key(), |spec| {
                    self.resolve_for(candidate, spec)
                });
        };

        let descriptor = &candidate.descriptor;
        let key = candidate.key();
        // 槽位在登记项的读锁内取得，与配置事件的替换/移除互斥
        let (current, slot) = self
            .inner
            .activations
            .with_entry(&descriptor.name, &config.subtree, |entry| {
                let current = Candidate::configured(Arc::clone(descriptor), entry.clone());
                let slot = (descriptor.scope != Scope::Prototype)
                    .then(|| self.inner.lifecycle.slot(descriptor, key.clone()));
                (current, slot)
            })
            .ok_or_else(|| ContainerError::InstanceDestroyed(key.to_string()))?;

        let resolve = |spec: &DependencySpec| self.resolve_for(&current, spec);
        match slot {
            Some(slot) => self.inner.lifecycle.activate_slot(&*slot?, resolve),
            None => self.inner.lifecycle.activate(descriptor, key, resolve),
        }
    }

    /// 构造期依赖图的环检测，结果按描述符缓存
    pub(crate) fn ensure_acyclic(&self, descriptor: &ServiceDescriptor) -> ContainerResult<()> {
        if self.inner.acyclic.read().contains(&descriptor.name) {
            return Ok(());
        }

        if let Some(cycle) = find_cycle(&descriptor.name, |node| self.eager_successors(node)) {
            tracing::error!(
                "Dependency cycle detected while resolving '{}': {}",
                descriptor.name,
                cycle.join(" -> ")
            );
            return Err(ContainerError::DependencyCycle { cycle });
        }

        self.inner.acyclic.write().insert(descriptor.name.clone());
        Ok(())
    }

    /// 整个依赖图的环检测
    pub(crate) fn validate_all(&self) -> ContainerResult<()> {
        let descriptors = self.inner.store.descriptors();
        for descriptor in descriptors.iter() {
            self.ensure_acyclic(descriptor)?;
        }
        tracing::info!(
            "Dependency validation passed for {} service(s)",
            descriptors.len()
        );
        Ok(())
    }

    fn eager_successors(&self, node: &str) -> Vec<String> {
        let Some(descriptor) = self.inner.store.get(node) else {
            return Vec::new();
        };
        descriptor
            .dependencies()
            .filter(|spec| spec.cardinality.is_eager())
            .filter(|spec| !descriptor.is_config_bean_dependency(spec))
            .flat_map(|spec| self.inner.store.lookup(&spec.target, &spec.qualifiers))
            .map(|target| target.name.clone())
            .collect()
    }

    fn exactly_one(
        &self,
        requester: &str,
        spec: &DependencySpec,
        mut candidates: Vec<Candidate>,
    ) -> ContainerResult<Candidate> {
        match candidates.len() {
            0 => Err(ContainerError::UnsatisfiedDependency {
                requester: requester.to_string(),
                dependency: spec.to_string(),
            }),
            1 => Ok(candidates.remove(0)),
            _ => Err(ambiguous(requester, spec, &candidates)),
        }
    }

    fn provider(&self, candidate: Candidate) -> ServiceProvider {
        ServiceProvider::new(self.inner.handle(), candidate)
    }
}

fn ambiguous(requester: &str, spec: &DependencySpec, candidates: &[Candidate]) -> ContainerError {
    ContainerError::AmbiguousDependency {
        requester: requester.to_string(),
        dependency: spec.to_string(),
        candidates: candidates.iter().map(Candidate::label).collect(),
    }
}

//! 生命周期管理
//!
//! 每个（描述符, 配置子树）对应一个实例槽位，状态机：
//! `Uncreated -> Constructing -> Injected -> Active -> PreDestroy -> Destroyed`，
//! 构造、注入或 post-construct 出错时进入终态 `Failed`。
//!
//! 槽位表只在查找/插入槽位时加锁，构造在槽位自己的锁之外进行，
//! 因此不同标识可以并行构造，同一标识只构造一次（single-flight）。

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::descriptor::{DependencySpec, Instance, ServiceDescriptor};
use crate::error::{ActivationPhase, ContainerError, ContainerResult, ErrorInfo};
use crate::resolver::{Resolved, ResolvedArgs};
use crate::Scope;

/// 实例的生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uncreated,
    Constructing,
    Injected,
    Active,
    PreDestroy,
    Destroyed,
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uncreated => "UNCREATED",
            LifecycleState::Constructing => "CONSTRUCTING",
            LifecycleState::Injected => "INJECTED",
            LifecycleState::Active => "ACTIVE",
            LifecycleState::PreDestroy => "PRE_DESTROY",
            LifecycleState::Destroyed => "DESTROYED",
            LifecycleState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// 实例标识：服务标识 + 可选的配置子树
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    pub service: String,
    pub subtree: Option<String>,
}

impl InstanceKey {
    pub fn service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            subtree: None,
        }
    }

    pub fn configured(service: impl Into<String>, subtree: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            subtree: Some(subtree.into()),
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subtree {
            Some(subtree) => write!(f, "{}[{}]", self.service, subtree),
            None => write!(f, "{}", self.service),
        }
    }
}

enum SlotState {
    Uncreated,
    Constructing { owner: ThreadId },
    Injected { owner: ThreadId },
    Active { instance: Instance, sequence: u64 },
    PreDestroy,
    Destroyed,
    Failed(ContainerError),
}

impl SlotState {
    fn public(&self) -> LifecycleState {
        match self {
            SlotState::Uncreated => LifecycleState::Uncreated,
            SlotState::Constructing { .. } => LifecycleState::Constructing,
            SlotState::Injected { .. } => LifecycleState::Injected,
            SlotState::Active { .. } => LifecycleState::Active,
            SlotState::PreDestroy => LifecycleState::PreDestroy,
            SlotState::Destroyed => LifecycleState::Destroyed,
            SlotState::Failed(_) => LifecycleState::Failed,
        }
    }

    fn in_flight_owner(&self) -> Option<ThreadId> {
        match self {
            SlotState::Constructing { owner } | SlotState::Injected { owner } => Some(*owner),
            _ => None,
        }
    }
}

/// 单个实例槽位
pub(crate) struct InstanceSlot {
    pub(crate) key: InstanceKey,
    pub(crate) descriptor: Arc<ServiceDescriptor>,
    state: Mutex<SlotState>,
    changed: Condvar,
}

impl InstanceSlot {
    fn new(key: InstanceKey, descriptor: Arc<ServiceDescriptor>) -> Self {
        Self {
            key,
            descriptor,
            state: Mutex::new(SlotState::Uncreated),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn state(&self) -> LifecycleState {
        self.state.lock().public()
    }

    /// 激活顺序号（仅 Active 状态有）
    pub(crate) fn sequence(&self) -> Option<u64> {
        match &*self.state.lock() {
            SlotState::Active { sequence, .. } => Some(*sequence),
            _ => None,
        }
    }

    fn transition(&self, next: SlotState) {
        let mut state = self.state.lock();
        *state = next;
        self.changed.notify_all();
    }
}

/// 用户回调 panic 时把槽位置为 `Failed` 并唤醒等待者
struct UnwindGuard<'a> {
    slot: &'a InstanceSlot,
    armed: bool,
}

impl<'a> UnwindGuard<'a> {
    fn new(slot: &'a InstanceSlot) -> Self {
        Self { slot, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for UnwindGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let phase = match &*self.slot.state.lock() {
            SlotState::Injected { .. } => ActivationPhase::PostConstruct,
            _ => ActivationPhase::Construct,
        };
        let err = ContainerError::activation(
            self.slot.key.to_string(),
            phase,
            anyhow::anyhow!("'{}' panicked during {}", self.slot.key, phase),
        );
        tracing::error!("{}", err);
        self.slot.transition(SlotState::Failed(err));
    }
}

/// 构造失败的两种结局
enum Unbuilt {
    /// 依赖解析失败，什么都没构造，槽位回到 Uncreated
    Unresolved(ContainerError),
    /// 进入构造函数之后失败，槽位进入 Failed
    Failed(ContainerError),
}

/// 单个实例销毁失败的记录
#[derive(Debug, Clone)]
pub struct DestroyFailure {
    pub service: String,
    pub error: ErrorInfo,
}

/// 关闭报告
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    /// 按销毁顺序排列的实例标识
    pub destroyed: Vec<String>,

    /// pre-destroy 回调的失败（不会阻止销毁）
    pub failures: Vec<DestroyFailure>,
}

impl ShutdownReport {
    pub(crate) fn record(&mut self, key: &InstanceKey, outcome: Option<Result<(), ErrorInfo>>) {
        match outcome {
            Some(Ok(())) => self.destroyed.push(key.to_string()),
            Some(Err(error)) => {
                self.destroyed.push(key.to_string());
                self.failures.push(DestroyFailure {
                    service: key.to_string(),
                    error,
                });
            }
            None => {}
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// 生命周期管理器 - 拥有所有实例
#[derive(Default)]
pub(crate) struct LifecycleManager {
    slots: RwLock<HashMap<InstanceKey, Arc<InstanceSlot>>>,
    sequence: AtomicU64,
    closed: AtomicBool,
}

impl LifecycleManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 激活实例（已激活则直接返回）
    ///
    /// `resolve` 负责解析描述符的每个依赖；全部依赖在构造函数运行之前解析完毕。
    pub(crate) fn activate<F>(
        &self,
        descriptor: &Arc<ServiceDescriptor>,
        key: InstanceKey,
        resolve: F,
    ) -> ContainerResult<Instance>
    where
        F: Fn(&DependencySpec) -> ContainerResult<Resolved>,
    {
        if descriptor.scope == Scope::Prototype {
            if self.is_closed() {
                return Err(ContainerError::InstanceDestroyed(key.to_string()));
            }
            return match realize(descriptor, &key, resolve, |_| {}) {
                Ok(object) => Ok(Arc::from(object)),
                Err(Unbuilt::Unresolved(err)) | Err(Unbuilt::Failed(err)) => Err(err),
            };
        }

        let slot = self.slot(descriptor, key)?;
        self.activate_slot(&slot, resolve)
    }

    /// 在已取得的槽位上激活实例
    pub(crate) fn activate_slot<F>(&self, slot: &InstanceSlot, resolve: F) -> ContainerResult<Instance>
    where
        F: Fn(&DependencySpec) -> ContainerResult<Resolved>,
    {
        let descriptor = &slot.descriptor;
        let current = thread::current().id();

        {
            let mut state = slot.state.lock();
            loop {
                match &*state {
                    SlotState::Active { instance, .. } => return Ok(Arc::clone(instance)),
                    SlotState::Failed(err) => return Err(err.clone()),
                    SlotState::PreDestroy | SlotState::Destroyed => {
                        return Err(ContainerError::InstanceDestroyed(slot.key.to_string()));
                    }
                    SlotState::Constructing { owner } | SlotState::Injected { owner }
                        if *owner == current =>
                    {
                        return Err(ContainerError::DependencyCycle {
                            cycle: vec![slot.key.to_string(), slot.key.to_string()],
                        });
                    }
                    SlotState::Constructing { .. } | SlotState::Injected { .. } => {
                        slot.changed.wait(&mut state);
                    }
                    SlotState::Uncreated => {
                        *state = SlotState::Constructing { owner: current };
                        break;
                    }
                }
            }
        }

        tracing::debug!("Constructing '{}'", slot.key);
        let mut guard = UnwindGuard::new(slot);
        let built = realize(descriptor, &slot.key, resolve, |_| {
            slot.transition(SlotState::Injected { owner: current });
        });
        guard.disarm();

        match built {
            Ok(object) => {
                let instance: Instance = Arc::from(object);
                let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
                slot.transition(SlotState::Active {
                    instance: Arc::clone(&instance),
                    sequence,
                });
                tracing::debug!("'{}' is active (#{})", slot.key, sequence);
                Ok(instance)
            }
            Err(Unbuilt::Unresolved(err)) => {
                tracing::debug!("Dependencies of '{}' unresolved: {}", slot.key, err);
                slot.transition(SlotState::Uncreated);
                Err(err)
            }
            Err(Unbuilt::Failed(err)) => {
                tracing::error!("{}", err);
                slot.transition(SlotState::Failed(err.clone()));
                Err(err)
            }
        }
    }

    /// 销毁槽位中的实例
    ///
    /// 等待进行中的构造结束；pre-destroy 最多执行一次，且在槽位锁之外执行。
    /// 返回 `None` 表示没有实例需要销毁。
    pub(crate) fn destroy(&self, slot: &InstanceSlot) -> Option<Result<(), ErrorInfo>> {
        let current = thread::current().id();
        let instance = {
            let mut state = slot.state.lock();
            loop {
                match &*state {
                    SlotState::Active { instance, .. } => {
                        let instance = Arc::clone(instance);
                        *state = SlotState::PreDestroy;
                        slot.changed.notify_all();
                        break instance;
                    }
                    SlotState::Uncreated | SlotState::Failed(_) => {
                        *state = SlotState::Destroyed;
                        slot.changed.notify_all();
                        return None;
                    }
                    SlotState::PreDestroy | SlotState::Destroyed => return None,
                    other => {
                        // 自己线程上的构造无法等待
                        if other.in_flight_owner() == Some(current) {
                            return None;
                        }
                        slot.changed.wait(&mut state);
                    }
                }
            }
        };

        let outcome = match &slot.descriptor.pre_destroy {
            Some(pre_destroy) => pre_destroy(instance.as_ref()).map_err(|err| {
                tracing::warn!("Pre-destroy of '{}' failed: {:#}", slot.key, err);
                ErrorInfo::from_anyhow(&err)
            }),
            None => Ok(()),
        };

        slot.transition(SlotState::Destroyed);
        tracing::debug!("'{}' destroyed", slot.key);
        Some(outcome)
    }

    /// 从表中移除一个槽位（不销毁），之后同一标识可以重新创建
    pub(crate) fn take(&self, key: &InstanceKey) -> Option<Arc<InstanceSlot>> {
        self.slots.write().remove(key)
    }

    /// 关闭：之后不再创建新槽位
    pub(crate) fn close(&self) {
        let _slots = self.slots.write();
        self.closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn state(&self, key: &InstanceKey) -> Option<LifecycleState> {
        self.slots.read().get(key).map(|slot| slot.state())
    }

    /// 当前所有槽位
    pub(crate) fn snapshot(&self) -> Vec<Arc<InstanceSlot>> {
        self.slots.read().values().cloned().collect()
    }

    /// 从表中移除满足条件的槽位（不销毁）
    pub(crate) fn detach<P>(&self, predicate: P) -> Vec<Arc<InstanceSlot>>
    where
        P: Fn(&InstanceSlot) -> bool,
    {
        let mut slots = self.slots.write();
        let keys: Vec<_> = slots
            .iter()
            .filter(|(_, slot)| predicate(slot))
            .map(|(key, _)| key.clone())
            .collect();
        keys.iter().filter_map(|key| slots.remove(key)).collect()
    }

    pub(crate) fn slot(
        &self,
        descriptor: &Arc<ServiceDescriptor>,
        key: InstanceKey,
    ) -> ContainerResult<Arc<InstanceSlot>> {
        if let Some(slot) = self.slots.read().get(&key) {
            return Ok(Arc::clone(slot));
        }

        let mut slots = self.slots.write();
        if self.is_closed() {
            return Err(ContainerError::InstanceDestroyed(key.to_string()));
        }
        let slot = slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(InstanceSlot::new(key, Arc::clone(descriptor))));
        Ok(Arc::clone(slot))
    }
}

/// 依赖解析、构造、注入、post-construct
///
/// `on_injected` 在全部注入完成、post-construct 之前调用。
fn realize<F, G>(
    descriptor: &ServiceDescriptor,
    key: &InstanceKey,
    resolve: F,
    on_injected: G,
) -> Result<Box<dyn Any + Send + Sync>, Unbuilt>
where
    F: Fn(&DependencySpec) -> ContainerResult<Resolved>,
    G: FnOnce(&InstanceKey),
{
    let args = descriptor
        .constructor_args
        .iter()
        .map(&resolve)
        .collect::<ContainerResult<Vec<_>>>()
        .map_err(Unbuilt::Unresolved)?;
    let injections = descriptor
        .injection_points
        .iter()
        .map(|point| resolve(&point.dependency))
        .collect::<ContainerResult<Vec<_>>>()
        .map_err(Unbuilt::Unresolved)?;

    let failed = |phase, cause| Unbuilt::Failed(ContainerError::activation(key.to_string(), phase, cause));

    let mut object = (descriptor.constructor)(&mut ResolvedArgs::new(args))
        .map_err(|cause| failed(ActivationPhase::Construct, cause))?;

    for (point, value) in descriptor.injection_points.iter().zip(injections) {
        tracing::trace!("Injecting '{}' into '{}'", point.name, key);
        (point.injector)(object.as_mut(), value).map_err(|cause| {
            failed(
                ActivationPhase::Inject,
                cause.context(format!("injection point '{}'", point.name)),
            )
        })?;
    }
    on_injected(key);

    if let Some(post_construct) = &descriptor.post_construct {
        post_construct(object.as_mut()).map_err(|cause| failed(ActivationPhase::PostConstruct, cause))?;
    }

    Ok(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Widget {
        id: usize,
    }

    fn no_deps(_: &DependencySpec) -> ContainerResult<Resolved> {
        unreachable!("descriptor has no dependencies")
    }

    fn counted(counter: Arc<AtomicUsize>) -> Arc<ServiceDescriptor> {
        Arc::new(ServiceDescriptor::new("Widget", move |_| {
            let id = counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            Ok(Widget { id })
        }))
    }

    #[test]
    fn test_single_flight_under_concurrency() {
        let manager = Arc::new(LifecycleManager::new());
        let constructed = Arc::new(AtomicUsize::new(0));
        let descriptor = counted(Arc::clone(&constructed));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let descriptor = Arc::clone(&descriptor);
                thread::spawn(move || {
                    manager
                        .activate(&descriptor, InstanceKey::service("Widget"), no_deps)
                        .unwrap()
                })
            })
            .collect();

        let instances: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(constructed.load(Ordering::SeqCst), 1);
        for instance in &instances[1..] {
            assert!(Arc::ptr_eq(&instances[0], instance));
        }
        assert_eq!(
            manager.state(&InstanceKey::service("Widget")),
            Some(LifecycleState::Active)
        );
    }

    #[test]
    fn test_prototype_is_not_cached() {
        let manager = LifecycleManager::new();
        let constructed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&constructed);
        let descriptor = Arc::new(
            ServiceDescriptor::new("Widget", move |_| {
                Ok(Widget {
                    id: counter.fetch_add(1, Ordering::SeqCst),
                })
            })
            .with_scope(Scope::Prototype),
        );

        let first = manager
            .activate(&descriptor, InstanceKey::service("Widget"), no_deps)
            .unwrap();
        let second = manager
            .activate(&descriptor, InstanceKey::service("Widget"), no_deps)
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.downcast_ref::<Widget>().unwrap().id, 1);
        assert!(manager.snapshot().is_empty());
    }

    #[test]
    fn test_post_construct_failure_is_terminal() {
        let manager = LifecycleManager::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let descriptor = Arc::new(
            ServiceDescriptor::new("Widget", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Widget { id: 0 })
            })
            .with_post_construct(|_: &mut Widget| -> anyhow::Result<()> {
                anyhow::bail!("not ready")
            }),
        );
        let key = InstanceKey::service("Widget");

        let first = manager.activate(&descriptor, key.clone(), no_deps).unwrap_err();
        assert!(matches!(
            first,
            ContainerError::ActivationFailure {
                phase: ActivationPhase::PostConstruct,
                ..
            }
        ));

        let second = manager.activate(&descriptor, key.clone(), no_deps).unwrap_err();
        assert_eq!(second.to_string(), first.to_string());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(&key), Some(LifecycleState::Failed));
    }

    #[test]
    fn test_unresolved_dependency_leaves_identity_uncreated() {
        let manager = LifecycleManager::new();
        let descriptor = Arc::new(
            ServiceDescriptor::new("Widget", |args| {
                args.single::<Widget>()?;
                Ok(Widget { id: 0 })
            })
            .with_constructor_arg(DependencySpec::single("Missing")),
        );
        let key = InstanceKey::service("Widget");

        let err = manager
            .activate(&descriptor, key.clone(), |spec| {
                Err(ContainerError::UnsatisfiedDependency {
                    requester: "Widget".into(),
                    dependency: spec.to_string(),
                })
            })
            .unwrap_err();
        assert!(err.is_structural());
        assert_eq!(manager.state(&key), Some(LifecycleState::Uncreated));
    }

    #[test]
    fn test_destroy_runs_pre_destroy_once() {
        let manager = LifecycleManager::new();
        let destroyed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&destroyed);
        let descriptor = Arc::new(
            ServiceDescriptor::new("Widget", |_| Ok(Widget { id: 0 })).with_pre_destroy(
                move |_: &Widget| {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
            ),
        );
        let key = InstanceKey::service("Widget");
        manager.activate(&descriptor, key.clone(), no_deps).unwrap();

        let slot = manager.snapshot().pop().unwrap();
        assert!(matches!(manager.destroy(&slot), Some(Ok(()))));
        assert!(manager.destroy(&slot).is_none());
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);

        let err = manager.activate(&descriptor, key, no_deps).unwrap_err();
        assert!(matches!(err, ContainerError::InstanceDestroyed(_)));
    }

    #[test]
    fn test_pre_destroy_failure_is_recorded() {
        let manager = LifecycleManager::new();
        let descriptor = Arc::new(
            ServiceDescriptor::new("Widget", |_| Ok(Widget { id: 0 })).with_pre_destroy(
                |_: &Widget| -> anyhow::Result<()> { anyhow::bail!("flush failed") },
            ),
        );
        let key = InstanceKey::service("Widget");
        manager.activate(&descriptor, key.clone(), no_deps).unwrap();

        let slot = manager.take(&key).unwrap();
        let outcome = manager.destroy(&slot).unwrap();
        assert_eq!(outcome.unwrap_err().message, "flush failed");
        assert_eq!(manager.state(&key), None);

        // 移除后可以重新创建
        manager.activate(&descriptor, key.clone(), no_deps).unwrap();
        assert_eq!(manager.state(&key), Some(LifecycleState::Active));
    }

    #[test]
    fn test_panicking_constructor_fails_the_identity() {
        let manager = Arc::new(LifecycleManager::new());
        let descriptor = Arc::new(ServiceDescriptor::new("Boom", |_| -> anyhow::Result<Widget> {
            panic!("constructor bug")
        }));

        let first = {
            let manager = Arc::clone(&manager);
            let descriptor = Arc::clone(&descriptor);
            thread::spawn(move || manager.activate(&descriptor, InstanceKey::service("Boom"), no_deps))
        };
        assert!(first.join().is_err());
        assert_eq!(
            manager.state(&InstanceKey::service("Boom")),
            Some(LifecycleState::Failed)
        );

        // 其他线程上的调用方拿到错误而不是一直等待
        let second = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.activate(&descriptor, InstanceKey::service("Boom"), no_deps))
        };
        let err = second.join().unwrap().unwrap_err();
        assert!(matches!(
            err,
            ContainerError::ActivationFailure {
                phase: ActivationPhase::Construct,
                ..
            }
        ));

        // 关闭不会被卡住
        let slots = manager.detach(|_| true);
        assert_eq!(slots.len(), 1);
        assert!(manager.destroy(&slots[0]).is_none());
    }

    #[test]
    fn test_closed_manager_refuses_new_instances() {
        let manager = LifecycleManager::new();
        manager.close();
        let descriptor = counted(Arc::new(AtomicUsize::new(0)));
        let err = manager
            .activate(&descriptor, InstanceKey::service("Widget"), no_deps)
            .unwrap_err();
        assert!(matches!(err, ContainerError::InstanceDestroyed(name) if name == "Widget"));
    }

    #[test]
    fn test_instance_key_display() {
        assert_eq!(InstanceKey::service("EarthWorld").to_string(), "EarthWorld");
        assert_eq!(
            InstanceKey::configured("ServerService", "alpha").to_string(),
            "ServerService[alpha]"
        );
    }
}

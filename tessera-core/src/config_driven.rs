//! 配置驱动激活
//!
//! 绑定了配置 Bean 类型的服务，每个匹配的配置子树对应一个独立管理生命周期的实例。
//! 配置事件严格按到达顺序处理。

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::constants::DEFAULT_CONFIG_SUBTREE;
use crate::context::ContextInner;
use crate::descriptor::{Instance, ServiceDescriptor};
use crate::error::ContainerResult;
use crate::lifecycle::{InstanceKey, InstanceSlot};
use crate::resolver::{Candidate, DependencyResolver};

/// 配置事件：某个子树出现（或更新）了一个已解码的 Bean，或者子树消失了
#[derive(Clone)]
pub struct ConfigEvent {
    pub bean_type: String,
    pub subtree: String,
    /// `None` 表示子树已移除
    pub bean: Option<Instance>,
}

impl ConfigEvent {
    pub fn present<B>(bean_type: impl Into<String>, subtree: impl Into<String>, bean: B) -> Self
    where
        B: Any + Send + Sync,
    {
        Self {
            bean_type: bean_type.into(),
            subtree: subtree.into(),
            bean: Some(Arc::new(bean)),
        }
    }

    pub fn removed(bean_type: impl Into<String>, subtree: impl Into<String>) -> Self {
        Self {
            bean_type: bean_type.into(),
            subtree: subtree.into(),
            bean: None,
        }
    }
}

impl fmt::Debug for ConfigEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigEvent")
            .field("bean_type", &self.bean_type)
            .field("subtree", &self.subtree)
            .field("present", &self.bean.is_some())
            .finish()
    }
}

/// 子树 -> 配置 Bean
#[derive(Clone)]
pub(crate) struct ConfigEntry {
    pub(crate) subtree: String,
    pub(crate) bean: Instance,
}

/// 每个配置驱动服务当前激活的子树（按出现顺序）
#[derive(Default)]
pub(crate) struct ConfigActivations {
    entries: RwLock<HashMap<String, Vec<ConfigEntry>>>,
    events: Mutex<()>,
}

impl ConfigActivations {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn entries(&self, service: &str) -> Vec<ConfigEntry> {
        self.entries
            .read()
            .get(service)
            .cloned()
            .unwrap_or_default()
    }

    /// 配置事件与关闭互斥，保证事件按到达顺序逐个处理
    pub(crate) fn serialize(&self) -> MutexGuard<'_, ()> {
        self.events.lock()
    }

    /// 在读锁内访问子树当前的登记项；持锁期间该子树不会被替换或移除
    pub(crate) fn with_entry<R>(
        &self,
        service: &str,
        subtree: &str,
        f: impl FnOnce(&ConfigEntry) -> R,
    ) -> Option<R> {
        let entries = self.entries.read();
        let entry = entries
            .get(service)?
            .iter()
            .find(|entry| entry.subtree == subtree)?;
        Some(f(entry))
    }

    /// 当前子树标识
    pub(crate) fn subtrees(&self, service: &str) -> Vec<String> {
        self.entries(service)
            .into_iter()
            .map(|entry| entry.subtree)
            .collect()
    }
}

/// 配置驱动激活器
pub(crate) struct ConfigActivator<'a> {
    inner: &'a ContextInner,
}

impl<'a> ConfigActivator<'a> {
    pub(crate) fn new(inner: &'a ContextInner) -> Self {
        Self { inner }
    }

    /// 为 activate-by-default 的服务登记 `@default` 子树
    pub(crate) fn register_defaults(&self) {
        for descriptor in self.inner.store.descriptors().iter() {
            if let Some(bean) = default_bean(descriptor) {
                let mut entries = self.inner.activations.entries.write();
                let list = entries.entry(descriptor.name.clone()).or_default();
                if list.is_empty() {
                    tracing::debug!(
                        "Registering default configuration for '{}'",
                        descriptor.name
                    );
                    list.push(ConfigEntry {
                        subtree: DEFAULT_CONFIG_SUBTREE.to_string(),
                        bean,
                    });
                }
            }
        }
    }

    /// 处理一个配置事件
    pub(crate) fn apply(&self, event: ConfigEvent) -> ContainerResult<()> {
        let _serial = self.inner.activations.serialize();

        if self.inner.scheduler.is_stopped() {
            tracing::warn!(
                "Ignoring configuration event {:?}: container is shut down",
                event
            );
            return Ok(());
        }

        let bound = self.inner.store.config_driven_for(&event.bean_type);
        if bound.is_empty() {
            tracing::debug!("No service bound to configuration type '{}'", event.bean_type);
            return Ok(());
        }

        for descriptor in bound {
            match &event.bean {
                Some(bean) => self.upsert(&descriptor, &event.subtree, Arc::clone(bean))?,
                None => self.remove(&descriptor, &event.subtree)?,
            }
        }
        Ok(())
    }

    fn upsert(
        &self,
        descriptor: &Arc<ServiceDescriptor>,
        subtree: &str,
        bean: Instance,
    ) -> ContainerResult<()> {
        let entry = ConfigEntry {
            subtree: subtree.to_string(),
            bean,
        };

        // 旧实例的槽位在写锁内摘下，之后的请求只会看到新的登记项
        let (replaced, retired) = {
            let mut entries = self.inner.activations.entries.write();
            let list = entries.entry(descriptor.name.clone()).or_default();
            match list.iter_mut().find(|e| e.subtree == subtree) {
                Some(existing) => {
                    *existing = entry.clone();
                    let key = InstanceKey::configured(&descriptor.name, subtree);
                    (true, self.inner.lifecycle.take(&key))
                }
                None => {
                    let before = list.len();
                    list.retain(|e| e.subtree != DEFAULT_CONFIG_SUBTREE);
                    let retired = if list.len() != before {
                        let key = InstanceKey::configured(&descriptor.name, DEFAULT_CONFIG_SUBTREE);
                        self.inner.lifecycle.take(&key)
                    } else {
                        None
                    };
                    list.push(entry.clone());
                    (false, retired)
                }
            }
        };

        if replaced {
            tracing::info!("Configuration of '{}[{}]' changed", descriptor.name, subtree);
        } else {
            tracing::info!("Configuration '{}[{}]' added", descriptor.name, subtree);
        }
        if let Some(slot) = retired {
            self.retire(&slot);
        }

        self.activate_if_started(descriptor, entry)
    }

    fn remove(&self, descriptor: &Arc<ServiceDescriptor>, subtree: &str) -> ContainerResult<()> {
        let (removed, retired, reinstated) = {
            let mut entries = self.inner.activations.entries.write();
            let list = entries.entry(descriptor.name.clone()).or_default();
            let before = list.len();
            list.retain(|e| e.subtree != subtree);
            let removed = list.len() != before;
            let retired = if removed {
                self.inner
                    .lifecycle
                    .take(&InstanceKey::configured(&descriptor.name, subtree))
            } else {
                None
            };

            let mut reinstated = None;
            if removed && list.is_empty() && self.inner.settings.activate_config_defaults {
                if let Some(bean) = default_bean(descriptor) {
                    let entry = ConfigEntry {
                        subtree: DEFAULT_CONFIG_SUBTREE.to_string(),
                        bean,
                    };
                    list.push(entry.clone());
                    reinstated = Some(entry);
                }
            }
            (removed, retired, reinstated)
        };

        if !removed {
            tracing::debug!(
                "Configuration '{}[{}]' is not active, nothing to remove",
                descriptor.name,
                subtree
            );
            return Ok(());
        }

        tracing::info!("Configuration '{}[{}]' removed", descriptor.name, subtree);
        if let Some(slot) = retired {
            self.retire(&slot);
        }

        match reinstated {
            Some(entry) => self.activate_if_started(descriptor, entry),
            None => Ok(()),
        }
    }

    /// 启动之后出现的子树，对有运行级别的服务立即激活
    fn activate_if_started(
        &self,
        descriptor: &Arc<ServiceDescriptor>,
        entry: ConfigEntry,
    ) -> ContainerResult<()> {
        if !(self.inner.scheduler.is_started() && descriptor.is_eager()) {
            return Ok(());
        }
        let candidate = Candidate::configured(Arc::clone(descriptor), entry);
        DependencyResolver::new(self.inner).activate(&candidate)?;
        Ok(())
    }

    fn retire(&self, slot: &InstanceSlot) {
        match self.inner.lifecycle.destroy(slot) {
            Some(Err(error)) => tracing::warn!(
                "Pre-destroy of '{}' failed during reconfiguration: {}",
                slot.key,
                error.full_description()
            ),
            Some(Ok(())) => tracing::debug!("Retired '{}'", slot.key),
            None => {}
        }
    }
}

fn default_bean(descriptor: &ServiceDescriptor) -> Option<Instance> {
    descriptor
        .config_driven
        .as_ref()
        .filter(|binding| binding.activate_by_default)
        .and_then(|binding| binding.default_bean())
}

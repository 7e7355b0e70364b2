//! 描述符仓库 - 注册阶段结束后冻结的不可变描述符目录

use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::descriptor::{Qualifier, ServiceDescriptor};
use crate::error::{ContainerError, ContainerResult};

/// 描述符仓库
///
/// 冻结前的注册进入 `pending`；`freeze()` 之后目录以只读切片保存，查询不再加锁。
#[derive(Default)]
pub struct DescriptorStore {
    pending: Mutex<Vec<Arc<ServiceDescriptor>>>,
    frozen: OnceCell<Arc<[Arc<ServiceDescriptor>]>>,
}

impl DescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册描述符
    ///
    /// 标识重复返回 `DuplicateDescriptor`，冻结后返回 `StoreFrozen`
    pub fn register(&self, descriptor: ServiceDescriptor) -> ContainerResult<()> {
        let mut pending = self.pending.lock();

        // freeze() 持有同一把锁，因此这里的检查不会与冻结交错
        if self.frozen.get().is_some() {
            return Err(ContainerError::StoreFrozen(descriptor.name));
        }

        if pending.iter().any(|d| d.name == descriptor.name) {
            return Err(ContainerError::DuplicateDescriptor(descriptor.name));
        }

        tracing::debug!(
            "Registering service descriptor '{}' ({}, scope: {}, run level: {:?})",
            descriptor.name,
            descriptor.type_name,
            descriptor.scope,
            descriptor.run_level
        );
        pending.push(Arc::new(descriptor));
        Ok(())
    }

    /// 冻结仓库，之后的注册全部失败
    pub fn freeze(&self) {
        let mut pending = self.pending.lock();
        if self.frozen.get().is_some() {
            return;
        }
        let catalog: Arc<[Arc<ServiceDescriptor>]> = std::mem::take(&mut *pending).into();
        tracing::debug!("Descriptor store frozen with {} descriptor(s)", catalog.len());
        // 在锁内检查过 frozen，set 不会失败
        let _ = self.frozen.set(catalog);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.get().is_some()
    }

    /// 所有描述符（声明顺序）
    pub fn descriptors(&self) -> Arc<[Arc<ServiceDescriptor>]> {
        match self.frozen.get() {
            Some(catalog) => Arc::clone(catalog),
            None => self.pending.lock().clone().into(),
        }
    }

    /// 按标识精确查找
    pub fn get(&self, name: &str) -> Option<Arc<ServiceDescriptor>> {
        self.descriptors().iter().find(|d| d.name == name).cloned()
    }

    /// 按类型过滤（标识或契约）和限定符过滤查询，结果保持声明顺序
    pub fn lookup(&self, target: &str, qualifiers: &[Qualifier]) -> Vec<Arc<ServiceDescriptor>> {
        self.descriptors()
            .iter()
            .filter(|d| d.provides(target))
            .filter(|d| qualifiers.iter().all(|q| d.qualifiers.contains(q)))
            .cloned()
            .collect()
    }

    /// 绑定到指定配置 Bean 类型的配置驱动描述符
    pub fn config_driven_for(&self, bean_type: &str) -> Vec<Arc<ServiceDescriptor>> {
        self.descriptors()
            .iter()
            .filter(|d| {
                d.config_driven
                    .as_ref()
                    .is_some_and(|binding| binding.bean_type == bean_type)
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! 延迟访问器（Provider）
//!
//! 持有容器的弱引用和一个已确定的候选；首次 `get()` 时才激活目标实例。
//! 容器关闭或被释放后，`get()` 返回 `InstanceDestroyed`。

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::context::ContextInner;
use crate::descriptor::Instance;
use crate::error::{ContainerError, ContainerResult};
use crate::resolver::{downcast, Candidate, DependencyResolver};

#[derive(Clone)]
pub struct ServiceProvider {
    context: Weak<ContextInner>,
    candidate: Candidate,
}

impl ServiceProvider {
    pub(crate) fn new(context: Weak<ContextInner>, candidate: Candidate) -> Self {
        Self { context, candidate }
    }

    /// 目标服务标识（配置驱动实例带子树，如 `ServerService[alpha]`）
    pub fn service_name(&self) -> String {
        self.candidate.label()
    }

    /// 激活并返回目标实例
    pub fn get_instance(&self) -> ContainerResult<Instance> {
        let inner = self
            .context
            .upgrade()
            .ok_or_else(|| ContainerError::InstanceDestroyed(self.service_name()))?;
        DependencyResolver::new(&inner).activate(&self.candidate)
    }

    /// 激活并按具体类型返回目标实例
    pub fn get<T: Any + Send + Sync>(&self) -> ContainerResult<Arc<T>> {
        downcast(self.get_instance()?, &self.service_name())
    }
}

impl fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("service", &self.service_name())
            .field("attached", &(self.context.strong_count() > 0))
            .finish()
    }
}

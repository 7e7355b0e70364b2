//! 运行级别调度
//!
//! 启动：按运行级别升序、同级按声明顺序急切激活服务。
//! 关闭：延迟实例最先销毁，然后按运行级别降序、同级按构造顺序的逆序销毁。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::descriptor::ServiceDescriptor;
use crate::error::ContainerResult;
use crate::lifecycle::{InstanceSlot, LifecycleManager, ShutdownReport};

#[derive(Default)]
pub(crate) struct RunLevelScheduler {
    started: AtomicBool,
    stopped: AtomicBool,
}

impl RunLevelScheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 启动计划：运行级别 -> 该级别的描述符（声明顺序）
    pub(crate) fn plan(
        descriptors: &[Arc<ServiceDescriptor>],
    ) -> BTreeMap<i32, Vec<Arc<ServiceDescriptor>>> {
        let mut levels: BTreeMap<i32, Vec<Arc<ServiceDescriptor>>> = BTreeMap::new();
        for descriptor in descriptors {
            if let Some(level) = descriptor.run_level {
                levels.entry(level).or_default().push(Arc::clone(descriptor));
            }
        }
        levels
    }

    /// 按计划依次激活；只运行一次，之后的调用返回空列表
    ///
    /// `activate` 返回本次激活的实例标识（配置驱动服务可能是零个或多个）
    pub(crate) fn startup<F>(
        &self,
        descriptors: &[Arc<ServiceDescriptor>],
        mut activate: F,
    ) -> ContainerResult<Vec<String>>
    where
        F: FnMut(&Arc<ServiceDescriptor>) -> ContainerResult<Vec<String>>,
    {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("Startup already performed, skipping");
            return Ok(Vec::new());
        }

        let mut activated = Vec::new();
        for (level, group) in Self::plan(descriptors) {
            tracing::info!("Starting run level {} ({} service(s))", level, group.len());
            for descriptor in group {
                activated.extend(activate(&descriptor)?);
            }
        }
        Ok(activated)
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// 关闭：幂等，第二次调用返回空报告
    pub(crate) fn shutdown(&self, lifecycle: &LifecycleManager) -> ShutdownReport {
        if self.stopped.swap(true, Ordering::SeqCst) {
            tracing::debug!("Shutdown already performed, skipping");
            return ShutdownReport::default();
        }

        tracing::info!("Shutting down container");
        lifecycle.close();
        let report = destroy_in_order(lifecycle, lifecycle.snapshot());
        tracing::info!(
            "Shutdown complete: {} instance(s) destroyed, {} pre-destroy failure(s)",
            report.destroyed.len(),
            report.failures.len()
        );
        report
    }
}

/// 按关闭顺序销毁一组槽位
pub(crate) fn destroy_in_order(
    lifecycle: &LifecycleManager,
    mut slots: Vec<Arc<InstanceSlot>>,
) -> ShutdownReport {
    slots.sort_by_cached_key(|slot| std::cmp::Reverse(shutdown_rank(slot)));

    let mut report = ShutdownReport::default();
    for slot in slots {
        let outcome = lifecycle.destroy(&slot);
        report.record(&slot.key, outcome);
    }
    report
}

/// 排序键，越大越先销毁：无运行级别视为最高级，同级构造越晚越大
fn shutdown_rank(slot: &InstanceSlot) -> (i64, u64) {
    let level = slot
        .descriptor
        .run_level
        .map(i64::from)
        .unwrap_or(i64::MAX);
    // 仍在构造中的实例拿不到序号，排在同级最前
    let sequence = slot.sequence().unwrap_or(u64::MAX);
    (level, sequence)
}

// tessera-core: 编译期绑定的依赖注入容器
//
// 提供：
// - 冻结后只读的描述符仓库
// - 按基数（single/optional/list/provider）解析依赖，拒绝构造期循环
// - 每个实例的生命周期状态机，同一标识只构造一次
// - 按运行级别启动和关闭
// - 按配置子树创建实例的配置驱动服务

pub mod config_driven;
pub mod constants;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod provider;
pub mod resolver;
mod runlevel;
pub mod scope;
pub mod settings;
pub mod store;
pub mod utils;

// 重新导出常用类型
pub use config_driven::ConfigEvent;
pub use constants::*;
pub use context::{InjectionContext, InjectionContextBuilder, Lookup};
pub use descriptor::{
    BindingSite, Cardinality, ConfigDrivenBinding, DependencySpec, DescriptorRegistration,
    Instance, InjectionPoint, InterceptorBinding, Qualifier, ServiceDescriptor,
};
pub use error::{
    ActivationPhase, ContainerError, ContainerResult, ErrorInfo, IntoResult, Result,
};
pub use lifecycle::{DestroyFailure, InstanceKey, LifecycleState, ShutdownReport};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use provider::ServiceProvider;
pub use resolver::{Resolved, ResolvedArgs};
pub use scope::Scope;
pub use settings::InjectionConfig;
pub use store::DescriptorStore;

// 导出 inventory，供描述符生成方提交注册项
pub use inventory;

/// Prelude 模块，包含常用的类型
pub mod prelude {
    pub use crate::config_driven::ConfigEvent;
    pub use crate::context::{InjectionContext, Lookup};
    pub use crate::descriptor::{
        ConfigDrivenBinding, DependencySpec, InterceptorBinding, Qualifier, ServiceDescriptor,
    };
    pub use crate::error::{ContainerError, ContainerResult, Result};
    pub use crate::lifecycle::{InstanceKey, LifecycleState};
    pub use crate::provider::ServiceProvider;
    pub use crate::resolver::{Resolved, ResolvedArgs};
    pub use crate::scope::Scope;
    pub use anyhow::{anyhow, Context};
}

//! 服务描述符 - 描述如何创建、注入和管理一个服务
//!
//! 描述符由外部生成步骤（构建期代码生成、手写注册等）产出，注册后不可变。

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::constants::NAMED_QUALIFIER;
use crate::error::IntoResult;
use crate::resolver::{Resolved, ResolvedArgs};
use crate::Scope;

/// 容器管理的实例（类型擦除）
pub type Instance = Arc<dyn Any + Send + Sync>;

/// 构造函数：接收已解析的构造参数，返回尚未注入的对象
pub type Constructor =
    Arc<dyn Fn(&mut ResolvedArgs) -> anyhow::Result<Box<dyn Any + Send + Sync>> + Send + Sync>;

/// 字段/方法注入函数
pub type Injector =
    Arc<dyn Fn(&mut (dyn Any + Send + Sync), Resolved) -> anyhow::Result<()> + Send + Sync>;

/// @PostConstruct 回调
pub type PostConstructCallback =
    Arc<dyn Fn(&mut (dyn Any + Send + Sync)) -> anyhow::Result<()> + Send + Sync>;

/// @PreDestroy 回调（实例此时可能仍被共享，只能拿到共享引用）
pub type PreDestroyCallback =
    Arc<dyn Fn(&(dyn Any + Send + Sync)) -> anyhow::Result<()> + Send + Sync>;

/// 限定符，例如 `@Named("red")`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Qualifier {
    pub name: String,
    pub value: Option<String>,
}

impl Qualifier {
    pub fn new(name: impl Into<String>, value: Option<String>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// `@Named(value)`
    pub fn named(value: impl Into<String>) -> Self {
        Self::new(NAMED_QUALIFIER, Some(value.into()))
    }

    /// 不带值的标记限定符
    pub fn marker(name: impl Into<String>) -> Self {
        Self::new(name, None)
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "@{}(\"{}\")", self.name, value),
            None => write!(f, "@{}", self.name),
        }
    }
}

/// 依赖的基数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// 恰好一个
    Single,
    /// 零个或一个
    Optional,
    /// 全部匹配项（按声明顺序）
    List,
    /// 延迟访问器，首次 `get()` 时才激活
    Provider,
    /// 每个匹配项一个延迟访问器
    ListOfProviders,
}

impl Cardinality {
    /// 是否在构造期解析（Provider 类依赖不参与构造期的环检测）
    pub fn is_eager(self) -> bool {
        !matches!(self, Cardinality::Provider | Cardinality::ListOfProviders)
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::Single => write!(f, "single"),
            Cardinality::Optional => write!(f, "optional"),
            Cardinality::List => write!(f, "list"),
            Cardinality::Provider => write!(f, "provider"),
            Cardinality::ListOfProviders => write!(f, "list-of-providers"),
        }
    }
}

/// 依赖声明：目标类型（或契约）、限定符和基数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpec {
    pub target: String,
    pub qualifiers: Vec<Qualifier>,
    pub cardinality: Cardinality,
}

impl DependencySpec {
    pub fn new(target: impl Into<String>, cardinality: Cardinality) -> Self {
        Self {
            target: target.into(),
            qualifiers: Vec::new(),
            cardinality,
        }
    }

    pub fn single(target: impl Into<String>) -> Self {
        Self::new(target, Cardinality::Single)
    }

    pub fn optional(target: impl Into<String>) -> Self {
        Self::new(target, Cardinality::Optional)
    }

    pub fn list(target: impl Into<String>) -> Self {
        Self::new(target, Cardinality::List)
    }

    pub fn provider(target: impl Into<String>) -> Self {
        Self::new(target, Cardinality::Provider)
    }

    pub fn list_of_providers(target: impl Into<String>) -> Self {
        Self::new(target, Cardinality::ListOfProviders)
    }

    /// 追加限定符
    pub fn qualified(mut self, qualifier: Qualifier) -> Self {
        self.qualifiers.push(qualifier);
        self
    }

    /// 候选服务的限定符是否满足本依赖（依赖上的每个限定符都必须出现在候选上）
    pub fn accepts_qualifiers(&self, candidate: &[Qualifier]) -> bool {
        self.qualifiers.iter().all(|q| candidate.contains(q))
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for qualifier in &self.qualifiers {
            write!(f, "{} ", qualifier)?;
        }
        write!(f, "{} [{}]", self.target, self.cardinality)
    }
}

/// 字段或方法注入点
#[derive(Clone)]
pub struct InjectionPoint {
    /// 字段或方法名
    pub name: String,
    pub dependency: DependencySpec,
    pub injector: Injector,
}

impl fmt::Debug for InjectionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectionPoint")
            .field("name", &self.name)
            .field("dependency", &self.dependency)
            .finish()
    }
}

/// 拦截器绑定的声明位置
///
/// 排序即链上的先后：契约（接口）上的声明在外层
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BindingSite {
    Contract,
    Implementation,
}

/// 方法上的拦截标记，例如实现类方法上的 `@Repeat`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptorBinding {
    pub method: String,
    pub marker: String,
    pub site: BindingSite,
}

impl InterceptorBinding {
    /// 声明在契约（接口）方法上的绑定
    pub fn contract(method: impl Into<String>, marker: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            marker: marker.into(),
            site: BindingSite::Contract,
        }
    }

    /// 声明在实现类方法上的绑定
    pub fn implementation(method: impl Into<String>, marker: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            marker: marker.into(),
            site: BindingSite::Implementation,
        }
    }
}

/// 配置驱动绑定：每个匹配的配置子树对应一个实例
#[derive(Clone)]
pub struct ConfigDrivenBinding {
    /// 绑定的配置 Bean 类型
    pub bean_type: String,

    /// 没有任何匹配子树时是否仍用默认值创建一个实例
    pub activate_by_default: bool,

    default_bean: Option<Arc<dyn Fn() -> Instance + Send + Sync>>,
}

impl ConfigDrivenBinding {
    pub fn new(bean_type: impl Into<String>) -> Self {
        Self {
            bean_type: bean_type.into(),
            activate_by_default: false,
            default_bean: None,
        }
    }

    /// 开启 activate-by-default，默认实例使用 `B::default()` 作为配置 Bean
    pub fn activate_by_default<B>(mut self) -> Self
    where
        B: Default + Any + Send + Sync,
    {
        self.activate_by_default = true;
        self.default_bean = Some(Arc::new(|| Arc::new(B::default()) as Instance));
        self
    }

    /// 创建默认配置 Bean
    pub fn default_bean(&self) -> Option<Instance> {
        self.default_bean.as_ref().map(|create| create())
    }
}

impl fmt::Debug for ConfigDrivenBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigDrivenBinding")
            .field("bean_type", &self.bean_type)
            .field("activate_by_default", &self.activate_by_default)
            .finish()
    }
}

/// 服务描述符
#[derive(Clone)]
pub struct ServiceDescriptor {
    /// 服务标识（类型名）
    pub name: String,

    /// 实现类型的 Rust 类型名（用于诊断）
    pub type_name: &'static str,

    /// 提供的契约（接口）名
    pub contracts: Vec<String>,

    pub scope: Scope,

    pub qualifiers: Vec<Qualifier>,

    /// 运行级别；`None` 表示延迟激活
    pub run_level: Option<i32>,

    pub constructor: Constructor,

    /// 构造参数依赖（按参数顺序）
    pub constructor_args: Vec<DependencySpec>,

    /// 字段/方法注入点（按声明顺序执行）
    pub injection_points: Vec<InjectionPoint>,

    pub post_construct: Option<PostConstructCallback>,

    pub pre_destroy: Option<PreDestroyCallback>,

    pub interceptors: Vec<InterceptorBinding>,

    pub config_driven: Option<ConfigDrivenBinding>,
}

impl ServiceDescriptor {
    /// 创建新的服务描述符
    pub fn new<T, F>(name: impl Into<String>, constructor: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&mut ResolvedArgs) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            type_name: std::any::type_name::<T>(),
            contracts: Vec::new(),
            scope: Scope::default(),
            qualifiers: Vec::new(),
            run_level: None,
            constructor: Arc::new(move |args| {
                let value = constructor(args)?;
                Ok(Box::new(value) as Box<dyn Any + Send + Sync>)
            }),
            constructor_args: Vec::new(),
            injection_points: Vec::new(),
            post_construct: None,
            pre_destroy: None,
            interceptors: Vec::new(),
            config_driven: None,
        }
    }

    /// 设置作用域
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// 声明提供的契约
    pub fn with_contract(mut self, contract: impl Into<String>) -> Self {
        self.contracts.push(contract.into());
        self
    }

    pub fn with_qualifier(mut self, qualifier: Qualifier) -> Self {
        self.qualifiers.push(qualifier);
        self
    }

    /// 设置运行级别（设置后服务在启动时被急切激活）
    pub fn with_run_level(mut self, run_level: i32) -> Self {
        self.run_level = Some(run_level);
        self
    }

    /// 追加一个构造参数依赖
    pub fn with_constructor_arg(mut self, dependency: DependencySpec) -> Self {
        self.constructor_args.push(dependency);
        self
    }

    /// 追加一个字段/方法注入点
    pub fn with_injection<T, F>(
        mut self,
        name: impl Into<String>,
        dependency: DependencySpec,
        inject: F,
    ) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&mut T, Resolved) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let name = name.into();
        let point = name.clone();
        let injector: Injector = Arc::new(move |target, value| {
            let target = target.downcast_mut::<T>().ok_or_else(|| {
                anyhow::anyhow!(
                    "injection point '{}' expects target {}",
                    point,
                    std::any::type_name::<T>()
                )
            })?;
            inject(target, value)
        });
        self.injection_points.push(InjectionPoint {
            name,
            dependency,
            injector,
        });
        self
    }

    /// 设置 @PostConstruct 回调
    pub fn with_post_construct<T, R, F>(mut self, callback: F) -> Self
    where
        T: Any + Send + Sync,
        R: IntoResult,
        F: Fn(&mut T) -> R + Send + Sync + 'static,
    {
        self.post_construct = Some(Arc::new(move |target| {
            let target = target.downcast_mut::<T>().ok_or_else(|| {
                anyhow::anyhow!("post-construct expects {}", std::any::type_name::<T>())
            })?;
            callback(target).into_result()
        }));
        self
    }

    /// 设置 @PreDestroy 回调
    pub fn with_pre_destroy<T, R, F>(mut self, callback: F) -> Self
    where
        T: Any + Send + Sync,
        R: IntoResult,
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        self.pre_destroy = Some(Arc::new(move |target| {
            let target = target.downcast_ref::<T>().ok_or_else(|| {
                anyhow::anyhow!("pre-destroy expects {}", std::any::type_name::<T>())
            })?;
            callback(target).into_result()
        }));
        self
    }

    /// 追加拦截器绑定
    pub fn with_interceptor(mut self, binding: InterceptorBinding) -> Self {
        self.interceptors.push(binding);
        self
    }

    /// 设置配置驱动绑定
    pub fn with_config_driven(mut self, binding: ConfigDrivenBinding) -> Self {
        self.config_driven = Some(binding);
        self
    }

    /// 是否能满足指定的类型过滤（自身标识或任一契约）
    pub fn provides(&self, target: &str) -> bool {
        self.name == target || self.contracts.iter().any(|c| c == target)
    }

    /// 是否在启动时急切激活
    pub fn is_eager(&self) -> bool {
        self.run_level.is_some()
    }

    pub fn is_config_driven(&self) -> bool {
        self.config_driven.is_some()
    }

    /// 所有依赖：先构造参数，再按声明顺序的注入点
    pub fn dependencies(&self) -> impl Iterator<Item = &DependencySpec> {
        self.constructor_args
            .iter()
            .chain(self.injection_points.iter().map(|p| &p.dependency))
    }

    /// 方法上的拦截绑定：契约处的在前，同一位置内按声明顺序
    pub fn interceptors_for(&self, method: &str) -> Vec<&InterceptorBinding> {
        let mut bindings: Vec<_> = self
            .interceptors
            .iter()
            .filter(|b| b.method == method)
            .collect();
        // sort_by_key 是稳定排序，同一位置内保持声明顺序
        bindings.sort_by_key(|b| b.site);
        bindings
    }

    /// 依赖是否指向本服务绑定的配置 Bean
    pub(crate) fn is_config_bean_dependency(&self, dependency: &DependencySpec) -> bool {
        self.config_driven
            .as_ref()
            .is_some_and(|binding| binding.bean_type == dependency.target)
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("contracts", &self.contracts)
            .field("scope", &self.scope)
            .field("qualifiers", &self.qualifiers)
            .field("run_level", &self.run_level)
            .field("constructor_args", &self.constructor_args)
            .field("injection_points", &self.injection_points)
            .field("interceptors", &self.interceptors)
            .field("config_driven", &self.config_driven)
            .finish()
    }
}

/// 编译期注册项 - 供外部生成步骤通过 inventory 提交描述符
pub struct DescriptorRegistration {
    pub name: &'static str,
    pub create: fn() -> ServiceDescriptor,
}

inventory::collect!(DescriptorRegistration);

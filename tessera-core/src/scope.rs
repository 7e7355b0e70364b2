use std::fmt;

/// 服务的作用域
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Scope {
    /// 单例模式 - 每个 (描述符, 配置子树) 只有一个实例
    #[default]
    Singleton,

    /// 原型模式 - 每次请求都创建新实例，容器不缓存也不负责销毁
    Prototype,

    /// 自定义作用域 - 实例缓存到 `close_scope(tag)` 为止
    Custom(String),
}

impl Scope {
    /// 创建自定义作用域
    pub fn custom(tag: impl Into<String>) -> Self {
        Scope::Custom(tag.into())
    }

    /// 实例是否由容器缓存
    pub fn is_cached(&self) -> bool {
        !matches!(self, Scope::Prototype)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Singleton => write!(f, "singleton"),
            Scope::Prototype => write!(f, "prototype"),
            Scope::Custom(tag) => write!(f, "{}", tag),
        }
    }
}

//! 调用上下文（InvocationContext）与参数模型
//!
//! 每次被拦截的方法调用都有一个调用上下文：目标实例、方法标识和调用时间。
//! 参数按位置保存；拦截器替换参数时必须保持个数和每个位置的类型不变。

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tessera_core::Instance;

/// 方法返回值（类型擦除）
pub type Value = Box<dyn Any + Send>;

/// 调用上下文
#[derive(Clone)]
pub struct InvocationContext {
    /// 目标实例标识，例如 `HelloWorldImpl` 或 `ServerService[alpha]`
    pub service: String,

    pub method: String,

    pub target: Instance,

    /// 调用开始时间
    pub timestamp: Instant,
}

impl InvocationContext {
    pub fn new(service: impl Into<String>, method: impl Into<String>, target: Instance) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            target,
            timestamp: Instant::now(),
        }
    }

    /// 完整的方法签名
    pub fn signature(&self) -> String {
        format!("{}::{}", self.service, self.method)
    }

    /// 按具体类型访问目标实例
    pub fn target<T: Any>(&self) -> Option<&T> {
        self.target.downcast_ref::<T>()
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("signature", &self.signature())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

impl fmt::Display for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.signature())
    }
}

#[derive(Clone)]
struct Argument {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Argument {
    fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    fn type_id(&self) -> TypeId {
        (*self.value).type_id()
    }
}

/// 按位置排列的方法参数
#[derive(Clone, Default)]
pub struct Arguments {
    values: Vec<Argument>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个参数
    pub fn with<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.values.push(Argument::new(value));
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 读取第 `index` 个参数
    pub fn get<T: Any>(&self, index: usize) -> anyhow::Result<&T> {
        let argument = self.argument(index)?;
        argument.value.downcast_ref::<T>().ok_or_else(|| {
            anyhow::anyhow!(
                "argument {} is {}, not {}",
                index,
                argument.type_name,
                std::any::type_name::<T>()
            )
        })
    }

    /// 替换第 `index` 个参数，新值必须与原值类型相同
    pub fn replace<T: Any + Send + Sync>(&mut self, index: usize, value: T) -> anyhow::Result<()> {
        let argument = self.argument(index)?;
        if argument.type_id() != TypeId::of::<T>() {
            anyhow::bail!(
                "cannot replace argument {} of type {} with {}",
                index,
                argument.type_name,
                std::any::type_name::<T>()
            );
        }
        self.values[index] = Argument::new(value);
        Ok(())
    }

    /// 检查参数是否与原始调用的个数和类型一致
    pub fn conforms_to(&self, original: &Arguments) -> anyhow::Result<()> {
        if self.len() != original.len() {
            anyhow::bail!(
                "expected {} argument(s), got {}",
                original.len(),
                self.len()
            );
        }
        for (index, (actual, expected)) in self.values.iter().zip(&original.values).enumerate() {
            if actual.type_id() != expected.type_id() {
                anyhow::bail!(
                    "argument {} must be {}, got {}",
                    index,
                    expected.type_name,
                    actual.type_name
                );
            }
        }
        Ok(())
    }

    fn argument(&self, index: usize) -> anyhow::Result<&Argument> {
        self.values.get(index).ok_or_else(|| {
            anyhow::anyhow!(
                "argument index {} out of range ({} argument(s))",
                index,
                self.values.len()
            )
        })
    }
}

impl fmt::Debug for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.values.iter().map(|a| a.type_name))
            .finish()
    }
}

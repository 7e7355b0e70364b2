//! 拦截链执行
//!
//! `Proceed` 是传给每个拦截器的续体：调用它会执行下一个拦截器，
//! 最后一个拦截器之后执行真实方法。续体可以被调用零次、一次或多次。

use std::fmt;
use std::sync::Arc;

use crate::interceptor::Interceptor;
use crate::invocation::{Arguments, InvocationContext, Value};

/// 真实方法
pub type Target<'a> = dyn Fn(&Arguments) -> anyhow::Result<Value> + 'a;

/// 拦截链的续体
#[derive(Clone, Copy)]
pub struct Proceed<'a> {
    links: &'a [Arc<dyn Interceptor>],
    target: &'a Target<'a>,
    invocation: &'a InvocationContext,
    shape: &'a Arguments,
}

impl<'a> Proceed<'a> {
    /// 从链头开始的续体；`shape` 是原始调用参数，用于校验替换后的参数
    pub fn new(
        links: &'a [Arc<dyn Interceptor>],
        target: &'a Target<'a>,
        invocation: &'a InvocationContext,
        shape: &'a Arguments,
    ) -> Self {
        Self {
            links,
            target,
            invocation,
            shape,
        }
    }

    /// 执行链的剩余部分
    ///
    /// 参数个数或类型与原始调用不一致时返回错误，下游什么都不执行
    pub fn proceed(&self, args: Arguments) -> anyhow::Result<Value> {
        args.conforms_to(self.shape)?;
        match self.links.split_first() {
            Some((link, rest)) => {
                tracing::trace!("{} -> {}", self.invocation, link.name());
                let next = Proceed {
                    links: rest,
                    ..*self
                };
                link.intercept(self.invocation, args, &next)
            }
            None => (self.target)(&args),
        }
    }

    /// 剩余的拦截器个数
    pub fn remaining(&self) -> usize {
        self.links.len()
    }

    pub fn invocation(&self) -> &InvocationContext {
        self.invocation
    }
}

impl fmt::Debug for Proceed<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proceed")
            .field("invocation", &self.invocation.signature())
            .field("remaining", &self.links.len())
            .finish()
    }
}

/// 用给定的拦截链执行一次调用
pub fn execute(
    links: &[Arc<dyn Interceptor>],
    invocation: &InvocationContext,
    args: Arguments,
    target: &Target<'_>,
) -> anyhow::Result<Value> {
    let shape = args.clone();
    Proceed::new(links, target, invocation, &shape).proceed(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Interceptor for Recording {
        fn name(&self) -> &str {
            self.name
        }

        fn intercept(
            &self,
            _invocation: &InvocationContext,
            args: Arguments,
            proceed: &Proceed<'_>,
        ) -> anyhow::Result<Value> {
            self.log.lock().push(format!("enter {}", self.name));
            let result = proceed.proceed(args);
            self.log.lock().push(format!("exit {}", self.name));
            result
        }
    }

    fn invocation() -> InvocationContext {
        InvocationContext::new("Target", "call", Arc::new(()))
    }

    #[test]
    fn test_links_nest_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let links: Vec<Arc<dyn Interceptor>> = vec![
            Arc::new(Recording {
                name: "outer",
                log: Arc::clone(&log),
            }),
            Arc::new(Recording {
                name: "inner",
                log: Arc::clone(&log),
            }),
        ];
        let body_log = Arc::clone(&log);
        let target = move |_: &Arguments| -> anyhow::Result<Value> {
            body_log.lock().push("body".to_string());
            Ok(Box::new(()))
        };

        execute(&links, &invocation(), Arguments::new(), &target).unwrap();
        assert_eq!(
            *log.lock(),
            vec!["enter outer", "enter inner", "body", "exit inner", "exit outer"]
        );
    }

    #[test]
    fn test_empty_chain_calls_target() {
        let calls = AtomicUsize::new(0);
        let target = |args: &Arguments| -> anyhow::Result<Value> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(*args.get::<u32>(0)? + 1))
        };

        let value = execute(&[], &invocation(), Arguments::new().with(41u32), &target).unwrap();
        assert_eq!(*value.downcast::<u32>().unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

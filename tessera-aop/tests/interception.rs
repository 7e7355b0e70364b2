use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tessera_aop::prelude::*;
use tessera_aop::{LoggingInterceptor, RepeatInterceptor};
use tessera_core::{
    ConfigDrivenBinding, ConfigEvent, ContainerError, DependencySpec, InjectionContext,
    InstanceKey, InterceptorBinding, Qualifier, ResolvedArgs, ServiceDescriptor,
    ServiceProvider, INTERCEPTOR_CONTRACT,
};

// ============================================================================
// 测试用拦截器
// ============================================================================

/// 不调用 proceed，直接返回固定值
struct ForceReturn(&'static str);

impl Interceptor for ForceReturn {
    fn name(&self) -> &str {
        "ForceReturn"
    }

    fn intercept(
        &self,
        _invocation: &InvocationContext,
        _args: Arguments,
        _proceed: &Proceed<'_>,
    ) -> anyhow::Result<Value> {
        Ok(Box::new(self.0.to_string()))
    }
}

/// 把第一个参数替换为 "modified"
struct ModifyArgument;

impl Interceptor for ModifyArgument {
    fn name(&self) -> &str {
        "ModifyArgument"
    }

    fn intercept(
        &self,
        _invocation: &InvocationContext,
        mut args: Arguments,
        proceed: &Proceed<'_>,
    ) -> anyhow::Result<Value> {
        args.replace(0, "modified".to_string())?;
        proceed.proceed(args)
    }
}

/// 丢掉所有参数后继续，违反参数个数约束
struct DropArguments;

impl Interceptor for DropArguments {
    fn name(&self) -> &str {
        "DropArguments"
    }

    fn intercept(
        &self,
        _invocation: &InvocationContext,
        _args: Arguments,
        proceed: &Proceed<'_>,
    ) -> anyhow::Result<Value> {
        proceed.proceed(Arguments::new())
    }
}

/// 捕获下游错误并替换
struct TranslateError;

impl Interceptor for TranslateError {
    fn name(&self) -> &str {
        "TranslateError"
    }

    fn intercept(
        &self,
        _invocation: &InvocationContext,
        args: Arguments,
        proceed: &Proceed<'_>,
    ) -> anyhow::Result<Value> {
        proceed
            .proceed(args)
            .map_err(|err| anyhow::anyhow!("translated: {}", err))
    }
}

/// 记录进入顺序
struct Recording {
    label: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl Interceptor for Recording {
    fn name(&self) -> &str {
        self.label
    }

    fn intercept(
        &self,
        invocation: &InvocationContext,
        args: Arguments,
        proceed: &Proceed<'_>,
    ) -> anyhow::Result<Value> {
        self.log
            .lock()
            .push(format!("{} {}", self.label, invocation.method));
        proceed.proceed(args)
    }
}

/// 由容器提供的拦截器：在返回的字符串后追加标记
struct Suffix;

impl Interceptor for Suffix {
    fn name(&self) -> &str {
        "Suffix"
    }

    fn intercept(
        &self,
        _invocation: &InvocationContext,
        args: Arguments,
        proceed: &Proceed<'_>,
    ) -> anyhow::Result<Value> {
        let value = proceed.proceed(args)?;
        let text = value
            .downcast::<String>()
            .map_err(|_| anyhow::anyhow!("Suffix expects a string result"))?;
        Ok(Box::new(format!("{} (suffixed)", text)))
    }
}

/// 通过 inventory 注册的拦截器
struct Audit;

static AUDITED: AtomicUsize = AtomicUsize::new(0);

impl Interceptor for Audit {
    fn name(&self) -> &str {
        "Audit"
    }

    fn intercept(
        &self,
        _invocation: &InvocationContext,
        args: Arguments,
        proceed: &Proceed<'_>,
    ) -> anyhow::Result<Value> {
        AUDITED.fetch_add(1, Ordering::SeqCst);
        proceed.proceed(args)
    }
}

fn audit() -> Arc<dyn Interceptor> {
    Arc::new(Audit)
}

tessera_aop::inventory::submit! {
    InterceptorRegistration::new("Audited", audit)
}

// ============================================================================
// 测试用服务
// ============================================================================

struct TheOtherService {
    throw_next: AtomicBool,
    calls: AtomicUsize,
}

impl TheOtherService {
    /// 设置标志后第一次调用失败，并清除标志
    fn intercepted_subset(&self) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.throw_next.swap(false, Ordering::SeqCst) {
            anyhow::bail!("flag was set");
        }
        Ok("ok".to_string())
    }

    fn echo(&self, args: &Arguments) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(args.get::<String>(0)?.clone())
    }
}

fn the_other_service() -> ServiceDescriptor {
    ServiceDescriptor::new("TheOtherService", |_| {
        Ok(TheOtherService {
            throw_next: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        })
    })
    .with_contract("TheOtherContract")
    .with_interceptor(InterceptorBinding::implementation("intercepted_subset", "Repeat"))
    .with_interceptor(InterceptorBinding::contract("forced_return", "Return"))
    .with_interceptor(InterceptorBinding::implementation("modified", "Modify"))
    .with_interceptor(InterceptorBinding::implementation("bad_arity", "DropArguments"))
    .with_interceptor(InterceptorBinding::implementation("translated", "Translate"))
    .with_interceptor(InterceptorBinding::implementation("ordered", "Inner"))
    .with_interceptor(InterceptorBinding::contract("ordered", "Outer"))
    .with_interceptor(InterceptorBinding::implementation("suffixed", "Suffixed"))
    .with_interceptor(InterceptorBinding::implementation("audited", "Audited"))
    .with_interceptor(InterceptorBinding::implementation("unbound", "Nowhere"))
}

fn suffix_service() -> ServiceDescriptor {
    ServiceDescriptor::new("SuffixInterceptor", |_| Ok(InterceptorService::new(Suffix)))
        .with_contract(INTERCEPTOR_CONTRACT)
        .with_qualifier(Qualifier::named("Suffixed"))
}

fn registry(log: &Arc<Mutex<Vec<String>>>) -> InterceptorRegistry {
    InterceptorRegistry::new()
        .with("Repeat", Arc::new(RepeatInterceptor::new(2)))
        .with("Return", Arc::new(ForceReturn("X")))
        .with("Modify", Arc::new(ModifyArgument))
        .with("DropArguments", Arc::new(DropArguments))
        .with("Translate", Arc::new(TranslateError))
        .with(
            "Outer",
            Arc::new(Recording {
                label: "outer",
                log: Arc::clone(log),
            }),
        )
        .with(
            "Inner",
            Arc::new(Recording {
                label: "inner",
                log: Arc::clone(log),
            }),
        )
        .with("Logged", Arc::new(LoggingInterceptor))
}

fn setup() -> (Interception, Arc<Mutex<Vec<String>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let context = InjectionContext::builder()
        .register(the_other_service())
        .and_then(|builder| builder.register(suffix_service()))
        .and_then(|builder| builder.build())
        .unwrap();
    let interception = Interception::with_registry(context, Arc::new(registry(&log)));
    (interception, log)
}

fn service_key() -> InstanceKey {
    InstanceKey::service("TheOtherService")
}

fn calls(interception: &Interception) -> usize {
    interception
        .context()
        .get::<TheOtherService>("TheOtherService")
        .unwrap()
        .calls
        .load(Ordering::SeqCst)
}

// ============================================================================
// 场景
// ============================================================================

#[test]
fn test_repeat_recovers_from_first_failure() {
    let (interception, _) = setup();
    let service = interception.bind::<TheOtherService>(service_key());

    let result = service
        .call("intercepted_subset", Arguments::new(), |s, _| {
            s.intercepted_subset()
        })
        .unwrap();

    assert_eq!(result, "ok");
    assert_eq!(calls(&interception), 2);
}

#[test]
fn test_forced_return_skips_the_method() {
    let (interception, _) = setup();
    let service = interception.bind::<TheOtherService>(service_key());

    let result = service
        .call("forced_return", Arguments::new().with("in".to_string()), |s, args| {
            s.echo(args)
        })
        .unwrap();

    assert_eq!(result, "X");
    assert_eq!(calls(&interception), 0);
}

#[test]
fn test_modified_arguments_reach_the_method() {
    let (interception, _) = setup();
    let service = interception.bind::<TheOtherService>(service_key());

    let result = service
        .call("modified", Arguments::new().with("original".to_string()), |s, args| {
            s.echo(args)
        })
        .unwrap();
    assert_eq!(result, "modified");
}

#[test]
fn test_arity_violation_is_reported() {
    let (interception, _) = setup();
    let service = interception.bind::<TheOtherService>(service_key());

    let err = service
        .call("bad_arity", Arguments::new().with("a".to_string()), |s, args| {
            s.echo(args)
        })
        .unwrap_err();

    assert!(matches!(err, ContainerError::InterceptionFailure { .. }));
    assert!(err
        .cause()
        .unwrap()
        .to_string()
        .contains("expected 1 argument(s), got 0"));
    assert_eq!(calls(&interception), 0);
}

#[test]
fn test_errors_propagate_or_get_replaced() {
    let (interception, _) = setup();
    let service = interception.bind::<TheOtherService>(service_key());

    // 没有拦截器的方法：方法自己的错误
    let err = service
        .call("plain", Arguments::new(), |_, _| -> anyhow::Result<()> {
            anyhow::bail!("boom")
        })
        .unwrap_err();
    assert!(matches!(err, ContainerError::MethodFailure { .. }));
    assert_eq!(err.cause().unwrap().to_string(), "boom");

    // 拦截器只是放行：仍然是方法自己的错误
    let err = service
        .call("ordered", Arguments::new(), |_, _| -> anyhow::Result<()> {
            anyhow::bail!("boom")
        })
        .unwrap_err();
    assert!(matches!(err, ContainerError::MethodFailure { .. }));
    assert_eq!(err.cause().unwrap().to_string(), "boom");

    let err = service
        .call("translated", Arguments::new(), |_, _| -> anyhow::Result<()> {
            anyhow::bail!("boom")
        })
        .unwrap_err();
    assert!(matches!(err, ContainerError::InterceptionFailure { .. }));
    assert_eq!(err.cause().unwrap().to_string(), "translated: boom");
}

#[test]
fn test_contract_bindings_wrap_implementation_bindings() {
    let (interception, log) = setup();
    let service = interception.bind::<TheOtherService>(service_key());

    service
        .call("ordered", Arguments::new(), |_, _| Ok(()))
        .unwrap();
    assert_eq!(*log.lock(), vec!["outer ordered", "inner ordered"]);

    let names: Vec<_> = interception
        .chain("TheOtherService", "ordered")
        .unwrap()
        .iter()
        .map(|link| link.name().to_string())
        .collect();
    assert_eq!(names, vec!["outer", "inner"]);
}

#[test]
fn test_container_provided_interceptor() {
    let (interception, _) = setup();
    let service = interception.bind::<TheOtherService>(service_key());

    let result = service
        .call("suffixed", Arguments::new().with("value".to_string()), |s, args| {
            s.echo(args)
        })
        .unwrap();
    assert_eq!(result, "value (suffixed)");
}

#[test]
fn test_unbound_marker_is_unsatisfied() {
    let (interception, _) = setup();
    let err = interception
        .chain("TheOtherService", "unbound")
        .unwrap_err();
    assert!(matches!(
        err,
        ContainerError::UnsatisfiedDependency { ref dependency, .. } if dependency == "@Nowhere"
    ));
}

#[test]
fn test_inventory_interceptor_in_global_registry() {
    let context = InjectionContext::builder()
        .register(the_other_service())
        .and_then(|builder| builder.build())
        .unwrap();
    let interception = Interception::new(context);

    let before = AUDITED.load(Ordering::SeqCst);
    interception
        .invoke(
            &service_key(),
            "audited",
            Arguments::new(),
            |_: &TheOtherService, _| Ok(()),
        )
        .unwrap();
    assert_eq!(AUDITED.load(Ordering::SeqCst), before + 1);
    assert!(get_global_registry().contains("Audited"));
}

#[test]
fn test_invocation_after_shutdown_fails() {
    let (interception, _) = setup();
    let service = interception.bind::<TheOtherService>(service_key());
    service
        .call("plain", Arguments::new(), |_, _| Ok(()))
        .unwrap();

    interception.context().shutdown();
    let err = service
        .call("plain", Arguments::new(), |_, _| Ok(()))
        .unwrap_err();
    assert!(matches!(err, ContainerError::InstanceDestroyed(_)));
}

// ============================================================================
// 注入 + 拦截
// ============================================================================

struct EarthWorld;

struct HelloWorldImpl {
    world: Arc<EarthWorld>,
    field_world: Option<Arc<EarthWorld>>,
    world_provider: Option<ServiceProvider>,
    all_worlds: Vec<Arc<EarthWorld>>,
    red_world: Option<Arc<EarthWorld>>,
    post_construct_calls: usize,
}

impl HelloWorldImpl {
    fn say_hello(&self) -> String {
        "Hello World".to_string()
    }
}

fn hello_context() -> InjectionContext {
    let earth =
        ServiceDescriptor::new("EarthWorld", |_| Ok(EarthWorld)).with_contract("InjectionWorld");
    let hello = ServiceDescriptor::new("HelloWorldImpl", |args: &mut ResolvedArgs| {
        Ok(HelloWorldImpl {
            world: args.single()?,
            field_world: None,
            world_provider: None,
            all_worlds: Vec::new(),
            red_world: None,
            post_construct_calls: 0,
        })
    })
    .with_contract("HelloWorld")
    .with_constructor_arg(DependencySpec::single("InjectionWorld"))
    .with_injection(
        "field_world",
        DependencySpec::single("InjectionWorld"),
        |hello: &mut HelloWorldImpl, value| {
            hello.field_world = Some(value.into_single()?);
            Ok(())
        },
    )
    .with_injection(
        "world_provider",
        DependencySpec::provider("InjectionWorld"),
        |hello: &mut HelloWorldImpl, value| {
            hello.world_provider = Some(value.into_provider()?);
            Ok(())
        },
    )
    .with_injection(
        "all_worlds",
        DependencySpec::list("InjectionWorld"),
        |hello: &mut HelloWorldImpl, value| {
            hello.all_worlds = value.into_list()?;
            Ok(())
        },
    )
    .with_injection(
        "red_world",
        DependencySpec::optional("InjectionWorld").qualified(Qualifier::named("red")),
        |hello: &mut HelloWorldImpl, value| {
            hello.red_world = value.into_optional()?;
            Ok(())
        },
    )
    .with_post_construct(|hello: &mut HelloWorldImpl| hello.post_construct_calls += 1)
    .with_interceptor(InterceptorBinding::contract("say_hello", "Logged"));

    InjectionContext::builder()
        .register(earth)
        .and_then(|builder| builder.register(hello))
        .and_then(|builder| builder.build())
        .unwrap()
}

#[test]
fn test_hello_world_through_interception() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let interception = Interception::with_registry(hello_context(), Arc::new(registry(&log)));

    let greeting = interception
        .invoke(
            &InstanceKey::service("HelloWorldImpl"),
            "say_hello",
            Arguments::new(),
            |hello: &HelloWorldImpl, _| Ok(hello.say_hello()),
        )
        .unwrap();
    assert_eq!(greeting, "Hello World");

    let hello = interception
        .context()
        .get::<HelloWorldImpl>("HelloWorld")
        .unwrap();
    assert_eq!(hello.post_construct_calls, 1);
    assert!(hello.red_world.is_none());
    assert_eq!(hello.all_worlds.len(), 1);
    assert!(Arc::ptr_eq(&hello.world, &hello.all_worlds[0]));
    assert!(Arc::ptr_eq(
        &hello.world,
        hello.field_world.as_ref().unwrap()
    ));
    let provided = hello
        .world_provider
        .as_ref()
        .unwrap()
        .get::<EarthWorld>()
        .unwrap();
    assert!(Arc::ptr_eq(&hello.world, &provided));
}

// ============================================================================
// 配置驱动服务 + 拦截
// ============================================================================

#[derive(Debug, Clone, Default)]
struct ServerConfig {
    port: u16,
}

struct ServerService {
    config: Arc<ServerConfig>,
}

fn server_context() -> InjectionContext {
    let server = ServiceDescriptor::new("ServerService", |args: &mut ResolvedArgs| {
        Ok(ServerService {
            config: args.single()?,
        })
    })
    .with_constructor_arg(DependencySpec::single("ServerConfig"))
    .with_config_driven(ConfigDrivenBinding::new("ServerConfig"))
    .with_interceptor(InterceptorBinding::implementation("port", "Logged"));

    InjectionContext::builder()
        .register(server)
        .and_then(|builder| builder.build())
        .unwrap()
}

#[test]
fn test_configured_instance_is_intercepted_until_removed() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let interception = Interception::with_registry(server_context(), Arc::new(registry(&log)));
    let context = interception.context();
    let key = InstanceKey::configured("ServerService", "alpha");

    context
        .apply_config(ConfigEvent::present(
            "ServerConfig",
            "alpha",
            ServerConfig { port: 8080 },
        ))
        .unwrap();

    let server = interception.bind::<ServerService>(key.clone());
    let port = server
        .call("port", Arguments::new(), |s, _| Ok(s.config.port))
        .unwrap();
    assert_eq!(port, 8080);

    context
        .apply_config(ConfigEvent::removed("ServerConfig", "alpha"))
        .unwrap();
    let err = server
        .call("port", Arguments::new(), |s, _| Ok(s.config.port))
        .unwrap_err();
    assert!(matches!(err, ContainerError::InstanceDestroyed(_)));
}

/// 容器内置常量
///
/// 在容器、拦截器模块和描述符生成方之间共享的标识符

/// activate-by-default 实例使用的配置子树标识
pub const DEFAULT_CONFIG_SUBTREE: &str = "@default";

/// `@Named` 限定符的名称
pub const NAMED_QUALIFIER: &str = "Named";

/// 拦截器服务提供的契约名称
///
/// 容器中提供该契约、并以 `@Named(marker)` 限定的服务会被当作 marker 对应的拦截器
pub const INTERCEPTOR_CONTRACT: &str = "tessera::Interceptor";

/// 环境变量：构建时是否校验依赖图
pub const ENV_VALIDATE_ON_BUILD: &str = "TESSERA_VALIDATE_ON_BUILD";

/// 环境变量：构建时是否登记 activate-by-default 的默认子树
pub const ENV_ACTIVATE_CONFIG_DEFAULTS: &str = "TESSERA_ACTIVATE_CONFIG_DEFAULTS";

//! 日志初始化

use tracing_subscriber::EnvFilter;

/// 初始化全局tracing订阅者
///
/// `RUST_LOG` 优先于 `default_filter`。重复调用不会报错，后续调用直接忽略。
pub fn init(default_filter: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

//! 日志初始化
//!
//! 库内部统一使用 `tracing` 宏；应用在启动时调用一次 [`init_logger`]（或 `init_logger!()`）：
//! - `RUST_LOG` 控制过滤规则，未设置时为 `info`
//! - 依赖 `log` crate 的第三方库记录也会转发到 `tracing`
//!
//! 重复调用是安全的：第二次及以后的调用不做任何事。

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// 未设置 `RUST_LOG` 时的过滤规则
pub const DEFAULT_FILTER: &str = "info";

static INIT: Once = Once::new();

/// 安装全局 fmt subscriber 与 `log` 桥接
pub fn init_logger() {
    init_logger_with(DEFAULT_FILTER);
}

/// 同 [`init_logger`]，指定默认过滤规则（`RUST_LOG` 优先）
pub fn init_logger_with(default_filter: &str) {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .finish();
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            tracing::debug!("Global tracing subscriber already installed");
        }

        // 宿主程序可能已经安装了 log 后端，失败时保留它
        let _ = tracing_log::LogTracer::builder()
            .with_max_level(log::LevelFilter::Trace)
            .init();
    });
}

/// 初始化日志
///
/// ```no_run
/// monome_sdk::init_logger!();
/// monome_sdk::init_logger!("monome_driver=debug");
/// ```
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::logging::init_logger()
    };
    ($filter:expr) => {
        $crate::logging::init_logger_with($filter)
    };
}

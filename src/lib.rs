//! rat_docbridge - 同步文档数据库驱动的异步桥接层
//!
//! 把同步的文档数据库驱动包装为异步接口：每次阻塞调用都被卸载到工作线程，
//! 查询结果以惰性游标的形式按批拉取，并提供变更流轮询与事务重试协议。
//!
//! 驱动后端通过 [`driver::Driver`] 接入，内置内存驱动与 MongoDB 同步驱动（`mongodb-support` 特性）。

// 导出所有公共模块
pub mod error;
pub mod types;
pub mod config;
pub mod i18n;
pub mod offload;
pub mod driver;
pub mod facade;
pub mod cursor;
pub mod change_stream;
pub mod session;

// 重新导出常用类型和函数
pub use error::{DocBridgeError, DocBridgeResult, ProviderError};
pub use types::*;
pub use config::{
    DocBridgeConfig, DocBridgeConfigBuilder, MongoConnectionConfig, MongoUriBuilder, OffloadConfig,
    TransactionRetryConfig,
};
pub use offload::run_sync;
pub use facade::{Client, Collection, Database, DelegateWrapper};
pub use cursor::{CommandCursor, Cursor};
pub use change_stream::ChangeStream;
pub use session::Session;
pub use driver::memory::{FailPoint, MemoryClient, MemoryDriver};

#[cfg(feature = "mongodb-support")]
pub use driver::mongo::{MongoClient, MongoDriver};

// 条件编译调试宏 - 只有在 debug 模式下才输出调试信息
#[cfg(debug_assertions)]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        rat_logger::debug!($($arg)*);
    };
}

#[cfg(not(debug_assertions))]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        // 在 release 模式下不输出调试信息
    };
}

/// 初始化rat_docbridge库
///
/// 这个函数会初始化多语言错误消息系统
///
/// 注意：日志系统由调用者自行初始化，本库不会自动初始化日志
pub fn init() {
    i18n::ErrorMessageI18n::init();
}

/// 库版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 库名称
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// 获取库信息
pub fn get_info() -> String {
    format!("{} v{}", NAME, VERSION)
}

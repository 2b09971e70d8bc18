//! Stock Redis - 带服务端函数的内存键值存储，以及基于它的库存扣减服务
//!
//! 存储部分兼容RESP协议，支持常用字符串命令和 `FCALL`。`FCALL` 调用的函数在存储的
//! 写锁内执行，是 "查询-判断-修改" 原子化的基础。
//!
//! 库存服务提供两种扣减方式:
//!
//! - 原子扣减: 通过 `FCALL deduct_stock` 在存储内一次完成判断和扣减
//! - 非原子扣减: 客户端 读 → 判断 → 等待 → 写，用于演示并发超卖
//!
//! ## 模块结构
//!
//! - `error` - 错误处理
//! - `resp` - RESP协议解析
//! - `store` - 数据存储
//! - `function` - 服务端函数
//! - `command` - 命令处理
//! - `connection` - 连接处理
//! - `server` - TCP服务端
//! - `client` - 异步客户端
//! - `stock` - 库存扣减服务
//! - `config` - 命令行配置
//! - `logging` - 日志初始化

pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod function;
pub mod logging;
pub mod resp;
pub mod server;
pub mod stock;
pub mod store;

// 重新导出常用类型
pub use client::{Client, ClientPool, SharedClient};
pub use error::{RedisError, RedisResult, StockError, StockResult};
pub use function::{DeductStock, FunctionRegistry, StoreFunction};
pub use resp::RespValue;
pub use server::Server;
pub use stock::{
    DeductOutcome, LocalBackend, StockBackend, StockConfig, StockService, UnsafeDeductOutcome,
};
pub use store::Store;

/// 默认端口
pub const DEFAULT_PORT: u16 = 6379;

/// 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

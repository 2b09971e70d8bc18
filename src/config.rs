//! 命令行与环境变量配置
//!
//! Rust特点: clap派生宏由结构体定义直接生成参数解析器

use crate::error::StockResult;
use crate::stock::{validate_amount, validate_count, validate_key, RaceMode, StockConfig};
use crate::DEFAULT_PORT;
use clap::{Args, Parser, Subcommand};
use std::time::Duration;

/// 日志相关参数，服务端与库存命令行共用
#[derive(Debug, Clone, Args)]
pub struct LogArgs {
    /// 默认日志过滤规则，RUST_LOG 优先
    #[arg(long = "log", default_value = "info")]
    pub filter: String,

    /// 输出JSON格式日志
    #[arg(long)]
    pub json_logs: bool,
}

/// 服务端地址参数
#[derive(Debug, Clone, Args)]
pub struct AddrArgs {
    #[arg(long, env = "REDIS_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(short, long, env = "REDIS_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

impl AddrArgs {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `redis-server` 的配置
#[derive(Debug, Clone, Parser)]
#[command(name = "redis-server", version, about = "带服务端函数的内存键值存储")]
pub struct ServerConfig {
    #[command(flatten)]
    pub addr: AddrArgs,

    /// 过期键清理间隔(秒)
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    pub cleanup_interval: u64,

    #[command(flatten)]
    pub log: LogArgs,
}

impl ServerConfig {
    pub fn cleanup_every(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval)
    }
}

/// `stock-cli` 的配置
#[derive(Debug, Clone, Parser)]
#[command(name = "stock-cli", version, about = "库存扣减演示: 原子扣减与非原子扣减")]
pub struct StockCliConfig {
    #[command(flatten)]
    pub addr: AddrArgs,

    /// 连接池大小
    #[arg(long, default_value_t = 8)]
    pub connections: usize,

    /// 非原子扣减在判断与写回之间等待的毫秒数
    #[arg(long, default_value_t = 100)]
    pub unsafe_delay_ms: u64,

    #[command(flatten)]
    pub log: LogArgs,

    #[command(subcommand)]
    pub command: StockCommand,
}

impl StockCliConfig {
    pub fn stock_config(&self) -> StockConfig {
        StockConfig {
            unsafe_delay: Duration::from_millis(self.unsafe_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum StockCommand {
    /// 初始化库存(覆盖旧值)
    Init {
        #[arg(long, default_value = "product:101:stock")]
        key: String,
        #[arg(long, allow_negative_numbers = true)]
        count: i64,
    },
    /// 原子扣减
    Deduct {
        #[arg(long, default_value = "product:101:stock")]
        key: String,
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        amount: i64,
    },
    /// 非原子扣减(演示竞态)
    DeductUnsafe {
        #[arg(long, default_value = "product:101:stock")]
        key: String,
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        amount: i64,
    },
    /// 查看当前库存
    Get {
        #[arg(long, default_value = "product:101:stock")]
        key: String,
    },
    /// 初始化后并发发起多次扣减并统计结果
    Race {
        #[arg(long, default_value = "product:101:stock")]
        key: String,
        #[arg(long, default_value_t = 10, allow_negative_numbers = true)]
        initial: i64,
        #[arg(long, default_value_t = 20)]
        callers: usize,
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        amount: i64,
        #[arg(long, value_enum, default_value_t = RaceMode::Safe)]
        mode: RaceMode,
    },
}

impl StockCommand {
    /// 校验参数，不访问存储。命令行在建立连接之前调用
    pub fn validate(&self) -> StockResult<()> {
        match self {
            StockCommand::Init { key, count } => {
                validate_key(key)?;
                validate_count(*count)
            }
            StockCommand::Deduct { key, amount } | StockCommand::DeductUnsafe { key, amount } => {
                validate_key(key)?;
                validate_amount(*amount)
            }
            StockCommand::Get { key } => validate_key(key),
            StockCommand::Race {
                key,
                initial,
                amount,
                ..
            } => {
                validate_key(key)?;
                validate_count(*initial)?;
                validate_amount(*amount)
            }
        }
    }
}

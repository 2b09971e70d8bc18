//! 错误处理模块
//!
//! 两层错误:
//! - `RedisError` 存储服务与协议层的错误
//! - `StockError` 库存服务的错误，区分 "调用方输入错误" 与 "基础设施错误"
//!
//! 库存不足不是错误，而是正常的业务结果，见 `stock::DeductOutcome`。

use std::io;
use std::num::ParseIntError;
use std::string::FromUtf8Error;
use thiserror::Error;

/// Redis错误类型 - 使用枚举统一管理所有可能的错误
///
/// Rust特点: 枚举可以携带数据，配合thiserror可以自动实现Error trait
#[derive(Debug, Error)]
pub enum RedisError {
    /// IO错误 - 网络或文件操作失败
    #[error("IO错误: {0}")]
    Io(#[from] io::Error),

    /// 协议解析错误
    #[error("协议错误: {0}")]
    Protocol(String),

    #[error("未知命令: {0}")]
    UnknownCommand(String),

    /// `FCALL` 调用了未注册的函数
    #[error("Function not found: {0}")]
    UnknownFunction(String),

    /// 参数数量错误
    #[error("wrong number of arguments for '{command}' command (expected {expected}, got {got})")]
    WrongNumberOfArguments {
        command: String,
        expected: usize,
        got: usize,
    },

    /// 命令选项组合非法，例如 `SET k v NX XX`
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("类型错误: {0}")]
    TypeError(String),

    /// 服务端函数拒绝执行，消息原样作为错误回复返回
    #[error("{0}")]
    Function(String),

    #[error("UTF-8解析错误: {0}")]
    Utf8Error(#[from] FromUtf8Error),

    #[error("整数解析错误: {0}")]
    ParseIntError(#[from] ParseIntError),

    /// 连接已关闭
    #[error("连接已关闭")]
    ConnectionClosed,

    /// 上一次请求在等待回复时被取消，连接上可能残留旧回复
    #[error("上一次请求被中断，连接不可再用")]
    Interrupted,

    /// 服务端返回的错误回复 (`-ERR ...`)
    #[error("服务端错误: {0}")]
    Server(String),

    /// 客户端收到了与命令不匹配的回复类型
    #[error("意外的回复: {0}")]
    UnexpectedReply(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 自定义Result类型别名
pub type RedisResult<T> = Result<T, RedisError>;

/// 库存服务错误
///
/// `InvalidInput` 在访问存储之前同步返回；`Store` 表示存储不可用或返回了错误，
/// 二者绝不会被当作 "库存不足" 处理。
#[derive(Debug, Error)]
pub enum StockError {
    /// 调用方输入非法: 空白key、非正数扣减量、负数库存
    #[error("参数错误: {0}")]
    InvalidInput(String),

    /// 非原子路径读到了无法解析为整数的库存值
    #[error("库存值不是整数: key={key}, value={value:?}")]
    NotAnInteger { key: String, value: String },

    /// 存储层失败
    #[error("存储错误: {0}")]
    Store(#[from] RedisError),
}

impl StockError {
    /// 是否为调用方输入错误
    pub fn is_client_error(&self) -> bool {
        matches!(self, StockError::InvalidInput(_))
    }

    /// 命令行程序的退出码: 输入错误为 2，其余为 1
    pub fn exit_code(&self) -> i32 {
        if self.is_client_error() {
            2
        } else {
            1
        }
    }
}

pub type StockResult<T> = Result<T, StockError>;

//! 连接处理模块
//!
//! Rust特点展示:
//! - async/await异步编程
//! - 所有权在异步上下文中的转移

use crate::command::{Command, CommandExecutor};
use crate::error::{RedisError, RedisResult};
use crate::function::FunctionRegistry;
use crate::resp::{RespParser, RespValue};
use crate::store::Store;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// 一个客户端连接
pub struct Connection {
    stream: TcpStream,
    buffer: BytesMut,
    /// 客户端地址(用于日志)
    addr: String,
}

impl Connection {
    /// 创建新连接
    ///
    /// Rust特点: 所有权转移 - TcpStream的所有权从调用者转移到Connection
    pub fn new(stream: TcpStream) -> Self {
        let addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
            addr,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// 处理客户端连接，直到客户端断开或发送QUIT
    ///
    /// 命令解析或执行失败只会向客户端回复错误，连接继续保持；
    /// 只有网络IO失败和协议失步才会结束连接。
    pub async fn handle(&mut self, store: &Store, functions: &FunctionRegistry) -> RedisResult<()> {
        info!(peer = %self.addr, "客户端已连接");
        let executor = CommandExecutor::new(store, functions);

        loop {
            let value = match self.read_command().await {
                Ok(Some(value)) => value,
                Ok(None) => {
                    info!(peer = %self.addr, "客户端断开连接");
                    break;
                }
                Err(RedisError::Io(e)) => return Err(RedisError::Io(e)),
                Err(e) => {
                    // 协议错误后缓冲区内容已不可信，回复错误后关闭连接
                    warn!(peer = %self.addr, error = %e, "协议错误");
                    let _ = self.write_response(&RespValue::Error(format!("ERR {}", e))).await;
                    break;
                }
            };

            let response = match Command::from_resp(value) {
                Ok(cmd) => {
                    debug!(peer = %self.addr, ?cmd, "执行命令");
                    let (response, should_quit) = executor.execute(cmd);
                    if should_quit {
                        self.write_response(&response).await?;
                        info!(peer = %self.addr, "客户端请求断开");
                        break;
                    }
                    response
                }
                Err(e) => {
                    debug!(peer = %self.addr, error = %e, "命令解析失败");
                    RespValue::Error(format!("ERR {}", e))
                }
            };

            self.write_response(&response).await?;
        }

        Ok(())
    }

    /// 从连接读取一个完整的命令
    ///
    /// 返回 `Ok(None)` 表示客户端在命令边界处正常关闭了连接
    async fn read_command(&mut self) -> RedisResult<Option<RespValue>> {
        loop {
            if let Some(value) = RespParser::parse(&mut self.buffer)? {
                return Ok(Some(value));
            }

            let bytes_read = self.stream.read_buf(&mut self.buffer).await?;
            if bytes_read == 0 {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(RedisError::ConnectionClosed)
                };
            }
        }
    }

    async fn write_response(&mut self, response: &RespValue) -> RedisResult<()> {
        self.stream.write_all(&response.serialize()).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

/// 后台任务：定期清理过期的键
pub async fn cleanup_task(store: Store, every: Duration) {
    let mut ticker = tokio::time::interval(every);

    loop {
        ticker.tick().await;
        let cleaned = store.cleanup_expired();
        if cleaned > 0 {
            debug!(cleaned, "清理过期的键");
        }
    }
}

//! TCP服务端
//!
//! 每个连接一个tokio任务，所有任务共享同一个 [`Store`] 句柄和函数表。

use crate::connection::Connection;
use crate::error::RedisResult;
use crate::function::FunctionRegistry;
use crate::store::Store;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{debug, error, info};

/// 已绑定端口、尚未开始接受连接的服务端
pub struct Server {
    listener: TcpListener,
    store: Store,
    functions: Arc<FunctionRegistry>,
}

impl Server {
    /// 绑定地址。端口为0时由系统分配，可通过 [`Server::local_addr`] 查询
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        store: Store,
        functions: FunctionRegistry,
    ) -> RedisResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            store,
            functions: Arc::new(functions),
        })
    }

    pub fn local_addr(&self) -> RedisResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// 一直运行，直到进程退出
    pub async fn run(self) -> RedisResult<()> {
        self.run_until(std::future::pending()).await
    }

    /// 接受连接直到 `shutdown` 完成
    ///
    /// 停止后不再接受新连接，已建立的连接任务继续运行到客户端断开。
    pub async fn run_until<F>(self, shutdown: F) -> RedisResult<()>
    where
        F: Future<Output = ()>,
    {
        info!(addr = %self.local_addr()?, "服务端开始监听");
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = &mut shutdown => {
                    info!("收到关闭信号，停止接受新连接");
                    return Ok(());
                }
            };

            match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "接受新连接");
                    let store = self.store.clone();
                    let functions = Arc::clone(&self.functions);

                    // Rust特点: move闭包获取store和函数表的所有权
                    tokio::spawn(async move {
                        let mut conn = Connection::new(stream);
                        if let Err(e) = conn.handle(&store, &functions).await {
                            error!(peer = %conn.addr(), error = %e, "连接处理失败");
                        }
                    });
                }
                Err(e) => error!(error = %e, "接受连接失败"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_shutdown_stops_accept_loop() {
        let server = Server::bind("127.0.0.1:0", Store::new(), FunctionRegistry::with_builtins())
            .await
            .unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async {
            let _ = rx.await;
        }));

        tx.send(()).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }
}

//! 异步客户端
//!
//! [`Client`] 持有一条TCP连接，一次只能有一个请求在途，因此方法都接收 `&mut self`。
//! 多个任务共享一条连接时使用 [`SharedClient`]，需要多条连接时使用 [`ClientPool`]。

use crate::error::{RedisError, RedisResult};
use crate::resp::{RespParser, RespValue};
use bytes::BytesMut;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;

/// 单连接客户端
///
/// 请求的future在写出命令之后、读到回复之前被丢弃(例如超时取消)时，回复会留在
/// 连接上，之后的请求无法再与回复对应。此后该客户端的所有请求都返回
/// [`RedisError::Interrupted`]，调用方需要重新连接。
pub struct Client {
    stream: TcpStream,
    buffer: BytesMut,
    /// 有请求已发出但尚未读到回复
    in_flight: bool,
}

impl Client {
    /// 连接到服务端
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> RedisResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
            in_flight: false,
        })
    }

    /// 发送命令并原样返回回复，错误回复也作为 `Ok(RespValue::Error)` 返回
    pub async fn send(&mut self, command: &RespValue) -> RedisResult<RespValue> {
        if self.in_flight {
            return Err(RedisError::Interrupted);
        }

        self.in_flight = true;
        self.stream.write_all(&command.serialize()).await?;
        self.stream.flush().await?;
        let reply = self.read_reply().await?;
        self.in_flight = false;
        Ok(reply)
    }

    /// 是否仍可发送请求
    pub fn is_usable(&self) -> bool {
        !self.in_flight
    }

    /// 发送命令，错误回复转换为 `RedisError::Server`
    pub async fn request<I, S>(&mut self, parts: I) -> RedisResult<RespValue>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        match self.send(&RespValue::command(parts)).await? {
            RespValue::Error(msg) => Err(RedisError::Server(msg)),
            reply => Ok(reply),
        }
    }

    async fn read_reply(&mut self) -> RedisResult<RespValue> {
        loop {
            if let Some(value) = RespParser::parse(&mut self.buffer)? {
                return Ok(value);
            }
            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return Err(RedisError::ConnectionClosed);
            }
        }
    }

    pub async fn ping(&mut self) -> RedisResult<()> {
        match self.request(["PING"]).await? {
            RespValue::SimpleString(s) if s == "PONG" => Ok(()),
            other => Err(unexpected("PING", &other)),
        }
    }

    /// `GET`，键不存在时返回 `None`
    pub async fn get(&mut self, key: &str) -> RedisResult<Option<Vec<u8>>> {
        match self.request(["GET", key]).await? {
            RespValue::BulkString(data) => Ok(Some(data)),
            RespValue::Null => Ok(None),
            other => Err(unexpected("GET", &other)),
        }
    }

    /// `GET` 并按UTF-8解码
    pub async fn get_string(&mut self, key: &str) -> RedisResult<Option<String>> {
        match self.get(key).await? {
            Some(data) => Ok(Some(String::from_utf8(data)?)),
            None => Ok(None),
        }
    }

    /// `SET`，无条件覆盖
    pub async fn set(&mut self, key: &str, value: impl AsRef<[u8]>) -> RedisResult<()> {
        let reply = self
            .request([b"SET".as_slice(), key.as_bytes(), value.as_ref()])
            .await?;
        expect_ok("SET", reply)
    }

    /// `SET key value PX ttl`
    pub async fn set_ex(&mut self, key: &str, value: impl AsRef<[u8]>, ttl: Duration) -> RedisResult<()> {
        let millis = ttl.as_millis().to_string();
        let reply = self
            .request([b"SET".as_slice(), key.as_bytes(), value.as_ref(), b"PX".as_slice(), millis.as_bytes()])
            .await?;
        expect_ok("SET", reply)
    }

    /// `DEL`，返回实际删除的键数量
    pub async fn del(&mut self, keys: &[&str]) -> RedisResult<i64> {
        let parts = std::iter::once("DEL").chain(keys.iter().copied());
        self.integer("DEL", parts).await
    }

    /// `INCRBY`，返回递增后的值
    pub async fn incr_by(&mut self, key: &str, delta: i64) -> RedisResult<i64> {
        let delta = delta.to_string();
        self.integer("INCRBY", ["INCRBY", key, delta.as_str()]).await
    }

    /// `PEXPIRE`，返回键是否存在
    pub async fn expire(&mut self, key: &str, ttl: Duration) -> RedisResult<bool> {
        let millis = ttl.as_millis().to_string();
        Ok(self.integer("PEXPIRE", ["PEXPIRE", key, millis.as_str()]).await? == 1)
    }

    /// `TTL`，-2 表示键不存在，-1 表示永不过期
    pub async fn ttl(&mut self, key: &str) -> RedisResult<i64> {
        self.integer("TTL", ["TTL", key]).await
    }

    /// `FCALL function numkeys key... arg...`
    pub async fn fcall(&mut self, function: &str, keys: &[&str], args: &[&str]) -> RedisResult<RespValue> {
        let numkeys = keys.len().to_string();
        let parts = ["FCALL", function, numkeys.as_str()]
            .into_iter()
            .chain(keys.iter().copied())
            .chain(args.iter().copied());
        self.request(parts).await
    }

    /// `FUNCTION LIST`
    pub async fn function_list(&mut self) -> RedisResult<Vec<String>> {
        match self.request(["FUNCTION", "LIST"]).await? {
            RespValue::Array(items) => Ok(items.iter().filter_map(RespValue::as_string).collect()),
            other => Err(unexpected("FUNCTION LIST", &other)),
        }
    }

    async fn integer<I, S>(&mut self, name: &str, parts: I) -> RedisResult<i64>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        match self.request(parts).await? {
            RespValue::Integer(n) => Ok(n),
            other => Err(unexpected(name, &other)),
        }
    }
}

fn expect_ok(name: &str, reply: RespValue) -> RedisResult<()> {
    match reply {
        RespValue::SimpleString(s) if s == "OK" => Ok(()),
        other => Err(unexpected(name, &other)),
    }
}

fn unexpected(name: &str, reply: &RespValue) -> RedisError {
    RedisError::UnexpectedReply(format!("{}: {:?}", name, reply))
}

/// 可在多个任务间共享的单连接客户端
///
/// 锁只覆盖一次 "请求-回复"，不同任务的请求在同一条连接上交替进行。
#[derive(Clone)]
pub struct SharedClient {
    inner: Arc<Mutex<Client>>,
}

impl SharedClient {
    pub fn new(client: Client) -> Self {
        Self {
            inner: Arc::new(Mutex::new(client)),
        }
    }

    pub async fn connect<A: ToSocketAddrs>(addr: A) -> RedisResult<Self> {
        Ok(Self::new(Client::connect(addr).await?))
    }

    /// 独占连接执行一次操作
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Client> {
        self.inner.lock().await
    }
}

/// 固定大小的连接池，按轮询分配连接
#[derive(Clone)]
pub struct ClientPool {
    clients: Arc<Vec<SharedClient>>,
    next: Arc<AtomicUsize>,
}

impl ClientPool {
    /// 建立 `size` 条连接，`size` 为0时按1处理
    pub async fn connect<A: ToSocketAddrs + Clone>(addr: A, size: usize) -> RedisResult<Self> {
        let mut clients = Vec::with_capacity(size.max(1));
        for _ in 0..size.max(1) {
            clients.push(SharedClient::connect(addr.clone()).await?);
        }
        Ok(Self {
            clients: Arc::new(clients),
            next: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// 轮询取下一条连接
    pub fn next_client(&self) -> &SharedClient {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        &self.clients[i]
    }
}

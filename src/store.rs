//! 数据存储模块
//!
//! Rust特点展示:
//! - Arc (原子引用计数) 实现多线程共享所有权
//! - RwLock (读写锁) 实现并发访问控制
//! - 闭包 + 锁守卫实现 "在锁内执行一段逻辑" 的原子操作
//!
//! 所有命令都只在一次加锁的范围内访问数据，因此单条命令天然是原子的。
//! 需要 "读-判断-写" 的复合操作时使用 [`Store::atomically`]，整个闭包都在写锁内执行。

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// 存储的值，包含数据和可选的过期时间
#[derive(Debug, Clone)]
pub struct StoredValue {
    data: Vec<u8>,
    /// 过期时间点 - None表示永不过期
    expires_at: Option<Instant>,
}

impl StoredValue {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            expires_at: None,
        }
    }

    /// 创建带过期时间的存储值
    ///
    /// Rust特点: 方法链式调用，返回Self实现构建器模式
    pub fn with_expiry(mut self, ttl: Duration) -> Self {
        self.expires_at = Some(Instant::now() + ttl);
        self
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Instant::now() > expires_at,
            None => false,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// 获取剩余生存时间(毫秒)，永不过期时返回None
    pub fn ttl_ms(&self) -> Option<i64> {
        self.expires_at.map(|expires_at| {
            let now = Instant::now();
            if now > expires_at {
                -1
            } else {
                (expires_at - now).as_millis() as i64
            }
        })
    }
}

type Entries = HashMap<String, StoredValue>;

/// 键值存储 - 线程安全的数据存储
///
/// `Store` 本身只是一个句柄，`clone()` 得到的是同一份数据。
#[derive(Debug, Clone, Default)]
pub struct Store {
    inner: Arc<RwLock<Entries>>,
}

/// 在 [`Store::atomically`] 闭包中使用的事务视图
///
/// 持有写锁期间存在，其他连接的任何命令都无法插入到闭包的读写之间。
pub struct StoreTxn<'a> {
    entries: &'a mut Entries,
}

impl StoreTxn<'_> {
    /// 读取未过期的值
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries
            .get(key)
            .filter(|v| !v.is_expired())
            .map(|v| v.data())
    }

    /// 写入值；若键已存在且未过期则保留其过期时间
    pub fn set(&mut self, key: &str, value: Vec<u8>) {
        match self.entries.get_mut(key) {
            Some(existing) if !existing.is_expired() => existing.data = value,
            _ => {
                self.entries.insert(key.to_string(), StoredValue::new(value));
            }
        }
    }

    pub fn del(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // 锁中毒时继续使用内部数据: 值都是完整写入的字节，不存在写了一半的状态
    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// 在写锁内执行闭包，闭包内的全部读写作为一个不可分割的整体生效
    ///
    /// Rust特点: 借用检查器保证 `StoreTxn` 不会逃出闭包，锁一定会被释放
    pub fn atomically<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut StoreTxn<'_>) -> R,
    {
        let mut entries = self.write();
        let mut txn = StoreTxn {
            entries: &mut *entries,
        };
        f(&mut txn)
    }

    /// 设置键值对，覆盖旧值与旧的过期时间
    pub fn set(&self, key: String, value: Vec<u8>) {
        self.write().insert(key, StoredValue::new(value));
    }

    /// 设置键值对，带过期时间
    pub fn set_with_expiry(&self, key: String, value: Vec<u8>, ttl: Duration) {
        self.write()
            .insert(key, StoredValue::new(value).with_expiry(ttl));
    }

    /// 按 NX / XX 条件设置，存在性判断和写入在同一次加锁内完成
    ///
    /// 返回是否执行了写入
    pub fn set_conditional(
        &self,
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
        nx: bool,
        xx: bool,
    ) -> bool {
        let mut store = self.write();
        let exists = store.get(&key).map_or(false, |v| !v.is_expired());
        if (nx && exists) || (xx && !exists) {
            return false;
        }
        let value = match ttl {
            Some(ttl) => StoredValue::new(value).with_expiry(ttl),
            None => StoredValue::new(value),
        };
        store.insert(key, value);
        true
    }

    /// 获取值
    ///
    /// Rust特点: Option<Vec<u8>> 明确表示可能不存在
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let store = self.read();
        store
            .get(key)
            .filter(|v| !v.is_expired())
            .map(|v| v.data().to_vec())
    }

    /// 删除键，返回是否成功删除
    pub fn del(&self, key: &str) -> bool {
        self.write().remove(key).is_some()
    }

    /// 批量删除键
    pub fn del_multi(&self, keys: &[String]) -> usize {
        let mut store = self.write();
        keys.iter()
            .filter(|key| store.remove(*key).is_some())
            .count()
    }

    pub fn exists(&self, key: &str) -> bool {
        let store = self.read();
        store.get(key).map_or(false, |v| !v.is_expired())
    }

    pub fn exists_multi(&self, keys: &[String]) -> usize {
        let store = self.read();
        keys.iter()
            .filter(|key| store.get(*key).map_or(false, |v| !v.is_expired()))
            .count()
    }

    /// 获取键的剩余生存时间(毫秒)
    ///
    /// -2 表示键不存在，-1 表示永不过期
    pub fn pttl(&self, key: &str) -> i64 {
        let store = self.read();
        match store.get(key) {
            Some(v) if !v.is_expired() => v.ttl_ms().unwrap_or(-1),
            _ => -2,
        }
    }

    /// 设置键的过期时间
    pub fn expire(&self, key: &str, ttl: Duration) -> bool {
        let mut store = self.write();
        match store.get_mut(key) {
            Some(v) if !v.is_expired() => {
                v.expires_at = Some(Instant::now() + ttl);
                true
            }
            _ => false,
        }
    }

    /// 移除键的过期时间
    pub fn persist(&self, key: &str) -> bool {
        let mut store = self.write();
        match store.get_mut(key) {
            Some(v) if !v.is_expired() && v.expires_at.is_some() => {
                v.expires_at = None;
                true
            }
            _ => false,
        }
    }

    /// 原子递增，键不存在时从0开始，保留原有过期时间
    pub fn incr(&self, key: &str, delta: i64) -> Result<i64, String> {
        self.atomically(|txn| {
            let current = match txn.get(key) {
                Some(data) => std::str::from_utf8(data)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or_else(|| "ERR value is not an integer or out of range".to_string())?,
                None => 0,
            };
            let value = current
                .checked_add(delta)
                .ok_or_else(|| "ERR increment or decrement would overflow".to_string())?;
            txn.set(key, value.to_string().into_bytes());
            Ok(value)
        })
    }

    /// 清理过期的键
    ///
    /// Rust特点: retain方法实现原地过滤
    pub fn cleanup_expired(&self) -> usize {
        let mut store = self.write();
        let before = store.len();
        store.retain(|_, v| !v.is_expired());
        before - store.len()
    }

    /// 获取数据库大小(键的数量)
    pub fn dbsize(&self) -> usize {
        let store = self.read();
        store.values().filter(|v| !v.is_expired()).count()
    }

    pub fn flushdb(&self) {
        self.write().clear();
    }
}

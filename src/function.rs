//! 服务端函数模块 - `FCALL` 的实现
//!
//! 客户端通过 `FCALL <name> <numkeys> key... arg...` 调用服务端注册的函数。
//! 函数体在 [`Store::atomically`] 内执行，等价于 Redis 中的 Lua 脚本:
//! 执行期间其他客户端的命令不会插入进来。
//!
//! 内置函数:
//! - `deduct_stock` 库存 "查询-判断-扣减" 的原子操作

use crate::error::{RedisError, RedisResult};
use crate::resp::RespValue;
use crate::store::{Store, StoreTxn};
use std::collections::BTreeMap;
use std::sync::Arc;

/// 可以注册到服务端的函数
///
/// Rust特点: trait对象 (`dyn StoreFunction`) 实现运行时多态
pub trait StoreFunction: Send + Sync {
    /// 调用名，`FCALL` 的第一个参数
    fn name(&self) -> &'static str;

    /// 函数要求的key数量
    fn num_keys(&self) -> usize;

    /// 在事务视图上执行函数
    fn call(&self, txn: &mut StoreTxn<'_>, keys: &[String], args: &[Vec<u8>])
        -> RedisResult<RespValue>;
}

/// 服务端函数表
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<&'static str, Arc<dyn StoreFunction>>,
}

impl FunctionRegistry {
    /// 空函数表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册了全部内置函数的函数表
    pub fn with_builtins() -> Self {
        Self::new().with(DeductStock)
    }

    /// 注册函数，同名函数会被替换
    pub fn with<F: StoreFunction + 'static>(mut self, function: F) -> Self {
        self.functions.insert(function.name(), Arc::new(function));
        self
    }

    /// 已注册的函数名，按字典序
    pub fn names(&self) -> Vec<&'static str> {
        self.functions.keys().copied().collect()
    }

    /// 查找函数并在存储上原子地执行
    pub fn call(
        &self,
        store: &Store,
        name: &str,
        keys: &[String],
        args: &[Vec<u8>],
    ) -> RedisResult<RespValue> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| RedisError::UnknownFunction(name.to_string()))?;

        if keys.len() != function.num_keys() {
            return Err(RedisError::WrongNumberOfArguments {
                command: name.to_string(),
                expected: function.num_keys(),
                got: keys.len(),
            });
        }

        store.atomically(|txn| function.call(txn, keys, args))
    }
}

/// 原子扣减库存
///
/// KEYS[1] 库存key，ARGV[1] 扣减数量。
///
/// 返回 `1` 表示扣减成功，`0` 表示库存不足。key不存在视为库存不足，且不会创建key。
pub struct DeductStock;

impl DeductStock {
    pub const NAME: &'static str = "deduct_stock";
}

impl StoreFunction for DeductStock {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn num_keys(&self) -> usize {
        1
    }

    fn call(
        &self,
        txn: &mut StoreTxn<'_>,
        keys: &[String],
        args: &[Vec<u8>],
    ) -> RedisResult<RespValue> {
        let key = &keys[0];
        let amount = args
            .first()
            .and_then(|a| parse_i64(a))
            .filter(|a| *a > 0)
            .ok_or_else(|| RedisError::Function("amount must be a positive integer".to_string()))?;

        let current = match txn.get(key) {
            Some(data) => parse_i64(data)
                .ok_or_else(|| RedisError::Function("value is not an integer".to_string()))?,
            None => return Ok(RespValue::Integer(0)),
        };

        if current >= amount {
            txn.set(key, (current - amount).to_string().into_bytes());
            Ok(RespValue::Integer(1))
        } else {
            Ok(RespValue::Integer(0))
        }
    }
}

fn parse_i64(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data).ok()?.trim().parse().ok()
}

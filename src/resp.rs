//! RESP协议解析模块
//!
//! RESP (REdis Serialization Protocol) 是Redis的通信协议，服务端与客户端共用这里的
//! 编解码逻辑。
//!
//! 解析是增量式的: 数据不完整时返回 `Ok(None)` 且不消费缓冲区，下一次读到更多
//! 数据后从头重新解析。只有完整解析出一个值时才会推进缓冲区。

use crate::error::{RedisError, RedisResult};
use bytes::{Buf, BytesMut};

/// 数组最大嵌套层数
pub const MAX_DEPTH: usize = 32;
/// 批量字符串最大长度 (512MB)
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;
/// 数组最大元素个数
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;
/// 单行(类型行或内联命令)最大长度
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// RESP数据类型
///
/// Rust特点: 枚举可以携带不同类型的数据(代数数据类型)
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// 简单字符串: +OK\r\n
    SimpleString(String),
    /// 错误: -Error message\r\n
    Error(String),
    /// 整数: :1000\r\n
    Integer(i64),
    /// 批量字符串: $6\r\nfoobar\r\n
    BulkString(Vec<u8>),
    /// 空值: $-1\r\n
    Null,
    /// 数组: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
    Array(Vec<RespValue>),
}

impl RespValue {
    /// 将RESP值序列化为字节
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }

    /// 追加序列化结果到已有缓冲区，数组元素递归写入同一个缓冲区
    fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Error(e) => {
                out.push(b'-');
                out.extend_from_slice(e.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Integer(i) => {
                out.extend_from_slice(format!(":{}\r\n", i).as_bytes());
            }
            RespValue::BulkString(data) => {
                out.extend_from_slice(format!("${}\r\n", data.len()).as_bytes());
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Null => out.extend_from_slice(b"$-1\r\n"),
            RespValue::Array(items) => {
                out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.write_to(out);
                }
            }
        }
    }

    /// 尝试将RESP值转换为字符串
    ///
    /// Rust特点: Option类型表示可能为空的值，避免空指针
    pub fn as_string(&self) -> Option<String> {
        match self {
            RespValue::SimpleString(s) => Some(s.clone()),
            RespValue::BulkString(data) => String::from_utf8(data.clone()).ok(),
            _ => None,
        }
    }

    /// 尝试将RESP值转换为整数
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(i) => Some(*i),
            RespValue::BulkString(data) => std::str::from_utf8(data)
                .ok()
                .and_then(|s| s.parse().ok()),
            _ => None,
        }
    }

    /// 由字符串参数构造命令数组，客户端发送命令时使用
    pub fn command<I, S>(parts: I) -> RespValue
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        RespValue::Array(
            parts
                .into_iter()
                .map(|p| RespValue::BulkString(p.as_ref().to_vec()))
                .collect(),
        )
    }
}

/// RESP解析器
pub struct RespParser;

impl RespParser {
    /// 从缓冲区解析一个完整的RESP值
    ///
    /// - `Ok(Some(v))` 解析成功，缓冲区已推进
    /// - `Ok(None)` 数据不完整，缓冲区保持不变
    /// - `Err(_)` 协议错误
    pub fn parse(buf: &mut BytesMut) -> RedisResult<Option<RespValue>> {
        match Self::parse_at(&buf[..], 0, 0)? {
            Some((value, consumed)) => {
                buf.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// 从 `pos` 开始解析，返回值以及解析结束的位置。`depth` 是当前数组嵌套层数
    fn parse_at(buf: &[u8], pos: usize, depth: usize) -> RedisResult<Option<(RespValue, usize)>> {
        if pos >= buf.len() {
            return Ok(None);
        }

        match buf[pos] {
            b'+' => Ok(Self::line(buf, pos + 1)?
                .map(|(line, next)| (RespValue::SimpleString(line), next))),
            b'-' => Ok(Self::line(buf, pos + 1)?.map(|(line, next)| (RespValue::Error(line), next))),
            b':' => match Self::line(buf, pos + 1)? {
                Some((line, next)) => Ok(Some((RespValue::Integer(line.parse()?), next))),
                None => Ok(None),
            },
            b'$' => Self::parse_bulk_string(buf, pos + 1),
            b'*' => Self::parse_array(buf, pos + 1, depth + 1),
            // 处理内联命令(如 PING)
            _ => Self::parse_inline_command(buf, pos),
        }
    }

    fn parse_bulk_string(buf: &[u8], pos: usize) -> RedisResult<Option<(RespValue, usize)>> {
        let (len, start) = match Self::line(buf, pos)? {
            Some((line, next)) => (line.parse::<i64>()?, next),
            None => return Ok(None),
        };

        if len == -1 {
            return Ok(Some((RespValue::Null, start)));
        }
        if len < 0 {
            return Err(RedisError::Protocol(format!("非法的批量字符串长度: {}", len)));
        }

        let end = usize::try_from(len)
            .ok()
            .filter(|len| *len <= MAX_BULK_LEN)
            .and_then(|len| start.checked_add(len))
            .filter(|end| end.checked_add(2).is_some())
            .ok_or_else(|| RedisError::Protocol(format!("批量字符串过长: {}", len)))?;
        // 数据后面还需要 \r\n
        if buf.len() < end + 2 {
            return Ok(None);
        }
        if &buf[end..end + 2] != b"\r\n" {
            return Err(RedisError::Protocol("批量字符串缺少结尾的CRLF".to_string()));
        }

        Ok(Some((RespValue::BulkString(buf[start..end].to_vec()), end + 2)))
    }

    /// 解析数组
    ///
    /// Rust特点: 递归调用处理嵌套数组
    fn parse_array(buf: &[u8], pos: usize, depth: usize) -> RedisResult<Option<(RespValue, usize)>> {
        if depth > MAX_DEPTH {
            return Err(RedisError::Protocol(format!("数组嵌套超过{}层", MAX_DEPTH)));
        }

        let (count, mut next) = match Self::line(buf, pos)? {
            Some((line, next)) => (line.parse::<i64>()?, next),
            None => return Ok(None),
        };

        if count == -1 {
            return Ok(Some((RespValue::Null, next)));
        }
        if count < 0 || count as u64 > MAX_ARRAY_LEN as u64 {
            return Err(RedisError::Protocol(format!("非法的数组长度: {}", count)));
        }

        let mut items = Vec::with_capacity((count as usize).min(1024));
        for _ in 0..count {
            match Self::parse_at(buf, next, depth)? {
                Some((value, after)) => {
                    items.push(value);
                    next = after;
                }
                None => return Ok(None),
            }
        }

        Ok(Some((RespValue::Array(items), next)))
    }

    /// 解析内联命令(简单的文本命令)
    fn parse_inline_command(buf: &[u8], pos: usize) -> RedisResult<Option<(RespValue, usize)>> {
        match Self::line(buf, pos)? {
            Some((content, next)) => {
                let parts: Vec<RespValue> = content
                    .split_whitespace()
                    .map(|s| RespValue::BulkString(s.as_bytes().to_vec()))
                    .collect();
                Ok(Some((RespValue::Array(parts), next)))
            }
            None => Ok(None),
        }
    }

    /// 读取 `pos` 开始的一行，返回 (行内容不含\r\n, 下一行的起始位置)
    fn line(buf: &[u8], pos: usize) -> RedisResult<Option<(String, usize)>> {
        let rest = match buf.get(pos..) {
            Some(rest) => rest,
            None => return Ok(None),
        };
        // 只在前 MAX_LINE_LEN+2 个字节内查找行尾
        let window = &rest[..rest.len().min(MAX_LINE_LEN + 2)];
        match window.windows(2).position(|w| w == b"\r\n") {
            Some(i) => {
                let line = String::from_utf8(rest[..i].to_vec())?;
                Ok(Some((line, pos + i + 2)))
            }
            None if rest.len() > MAX_LINE_LEN + 1 => {
                Err(RedisError::Protocol(format!("单行超过{}字节", MAX_LINE_LEN)))
            }
            None => Ok(None),
        }
    }
}

/// 便捷函数：创建OK响应
pub fn ok() -> RespValue {
    RespValue::SimpleString("OK".to_string())
}

/// 便捷函数：创建PONG响应
pub fn pong() -> RespValue {
    RespValue::SimpleString("PONG".to_string())
}

/// 便捷函数：创建错误响应
pub fn error(msg: &str) -> RespValue {
    RespValue::Error(msg.to_string())
}

/// 便捷函数：从字符串创建批量字符串
pub fn bulk_string(s: &str) -> RespValue {
    RespValue::BulkString(s.as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_integer() {
        assert_eq!(RespValue::Integer(42).serialize(), b":42\r\n");
    }

    #[test]
    fn test_serialize_array() {
        let value = RespValue::command(["SET", "key", "value"]);
        assert_eq!(
            value.serialize(),
            b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n"
        );
    }

    #[test]
    fn test_parse_simple_string() {
        let mut buf = BytesMut::from(&b"+OK\r\n"[..]);
        let result = RespParser::parse(&mut buf).unwrap().unwrap();
        assert_eq!(result, RespValue::SimpleString("OK".to_string()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_parse_error_reply() {
        let mut buf = BytesMut::from(&b"-ERR value is not an integer\r\n"[..]);
        let result = RespParser::parse(&mut buf).unwrap().unwrap();
        assert_eq!(result, RespValue::Error("ERR value is not an integer".to_string()));
    }

    #[test]
    fn test_parse_null_bulk() {
        let mut buf = BytesMut::from(&b"$-1\r\n"[..]);
        assert_eq!(RespParser::parse(&mut buf).unwrap(), Some(RespValue::Null));
    }

    #[test]
    fn test_incomplete_array_keeps_buffer() {
        let full = b"*3\r\n$5\r\nFCALL\r\n$12\r\ndeduct_stock\r\n$1\r\n1\r\n";
        let mut buf = BytesMut::from(&full[..20]);
        assert_eq!(RespParser::parse(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 20);

        buf.extend_from_slice(&full[20..]);
        let value = RespParser::parse(&mut buf).unwrap().unwrap();
        assert_eq!(value, RespValue::command(["FCALL", "deduct_stock", "1"]));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_incomplete_bulk_string() {
        let mut buf = BytesMut::from(&b"$5\r\nhel"[..]);
        assert_eq!(RespParser::parse(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"$5\r\nhel");
    }

    #[test]
    fn test_pipelined_values() {
        let mut buf = BytesMut::from(&b":1\r\n:0\r\n"[..]);
        assert_eq!(RespParser::parse(&mut buf).unwrap(), Some(RespValue::Integer(1)));
        assert_eq!(RespParser::parse(&mut buf).unwrap(), Some(RespValue::Integer(0)));
        assert_eq!(RespParser::parse(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_parse_inline_command() {
        let mut buf = BytesMut::from(&b"GET product:101:stock\r\n"[..]);
        let value = RespParser::parse(&mut buf).unwrap().unwrap();
        assert_eq!(value, RespValue::command(["GET", "product:101:stock"]));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let mut data = b"*1\r\n".repeat(200_000);
        data.extend_from_slice(b":1\r\n");
        let mut buf = BytesMut::from(&data[..]);
        assert!(matches!(
            RespParser::parse(&mut buf),
            Err(RedisError::Protocol(_))
        ));
    }

    #[test]
    fn test_nesting_within_limit() {
        let mut data = b"*1\r\n".repeat(MAX_DEPTH);
        data.extend_from_slice(b":1\r\n");
        let mut buf = BytesMut::from(&data[..]);
        assert!(RespParser::parse(&mut buf).unwrap().is_some());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_lengths_are_rejected() {
        let mut buf = BytesMut::from(format!("${}\r\n", MAX_BULK_LEN + 1).as_bytes());
        assert!(matches!(RespParser::parse(&mut buf), Err(RedisError::Protocol(_))));

        let mut buf = BytesMut::from(format!("*{}\r\n", MAX_ARRAY_LEN + 1).as_bytes());
        assert!(matches!(RespParser::parse(&mut buf), Err(RedisError::Protocol(_))));
    }

    #[test]
    fn test_unterminated_line_is_bounded() {
        let mut buf = BytesMut::from(&vec![b'a'; MAX_LINE_LEN + 10][..]);
        assert!(matches!(RespParser::parse(&mut buf), Err(RedisError::Protocol(_))));

        // 未超过上限时仍然等待更多数据
        let mut buf = BytesMut::from(&vec![b'a'; 100][..]);
        assert_eq!(RespParser::parse(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_negative_length_is_protocol_error() {
        let mut buf = BytesMut::from(&b"$-5\r\n"[..]);
        assert!(matches!(
            RespParser::parse(&mut buf),
            Err(RedisError::Protocol(_))
        ));
    }
}

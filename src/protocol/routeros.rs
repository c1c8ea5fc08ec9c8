//! RouterOS API 客户端
//!
//! 报文由若干 word 组成，每个 word 以变长长度前缀开头，空 word 结束一个 sentence。
//! 设备回复 `!re` 表示一行数据，`!done` 表示结束，`!trap` / `!fatal` 表示错误。

use super::{DeviceClient, DeviceSession, ProtocolError, QueryFilter, Row};
use crate::config::DeviceConfig;
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// 单个 word 的长度上限，超过视为流已错位
const MAX_WORD_LEN: usize = 4 * 1024 * 1024;

/// 写入 word 长度前缀
pub(crate) fn encode_length(len: usize, buf: &mut BytesMut) {
    if len < 0x80 {
        buf.put_u8(len as u8);
    } else if len < 0x4000 {
        buf.put_u16((len as u16) | 0x8000);
    } else if len < 0x20_0000 {
        let v = (len as u32) | 0xC0_0000;
        buf.put_u8((v >> 16) as u8);
        buf.put_u16(v as u16);
    } else if len < 0x1000_0000 {
        buf.put_u32((len as u32) | 0xE000_0000);
    } else {
        buf.put_u8(0xF0);
        buf.put_u32(len as u32);
    }
}

/// 编码一个完整 sentence
pub(crate) fn encode_sentence(words: &[String]) -> BytesMut {
    let mut buf = BytesMut::new();
    for word in words {
        encode_length(word.len(), &mut buf);
        buf.put_slice(word.as_bytes());
    }
    buf.put_u8(0);
    buf
}

async fn read_length<R: AsyncRead + Unpin>(reader: &mut R) -> Result<usize, ProtocolError> {
    let first = reader.read_u8().await? as usize;

    let len = if first & 0x80 == 0 {
        first
    } else if first & 0xC0 == 0x80 {
        ((first & 0x3F) << 8) | reader.read_u8().await? as usize
    } else if first & 0xE0 == 0xC0 {
        let rest = reader.read_u16().await? as usize;
        ((first & 0x1F) << 16) | rest
    } else if first & 0xF0 == 0xE0 {
        let b = reader.read_u8().await? as usize;
        let rest = reader.read_u16().await? as usize;
        ((first & 0x0F) << 24) | (b << 16) | rest
    } else if first == 0xF0 {
        reader.read_u32().await? as usize
    } else {
        return Err(ProtocolError::Decode(format!("无效的长度前缀: {:#x}", first)));
    };

    Ok(len)
}

async fn read_sentence<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<String>, ProtocolError> {
    let mut words = Vec::new();
    loop {
        let len = read_length(reader).await?;
        if len == 0 {
            return Ok(words);
        }
        if len > MAX_WORD_LEN {
            return Err(ProtocolError::Decode(format!("word 长度超出上限: {}", len)));
        }
        let mut raw = vec![0u8; len];
        reader.read_exact(&mut raw).await?;
        let word = String::from_utf8(raw)
            .map_err(|e| ProtocolError::Decode(e.to_string()))?;
        words.push(word);
    }
}

/// `=key=value` 形式的属性 word
fn parse_attribute(word: &str) -> Option<(String, String)> {
    let body = word.strip_prefix('=')?;
    let (key, value) = body.split_once('=')?;
    Some((key.to_string(), value.to_string()))
}

/// 发送命令并读取直到 `!done` 的所有回复
pub(crate) async fn exchange<S>(stream: &mut S, words: &[String]) -> Result<Vec<Row>, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&encode_sentence(words)).await?;
    stream.flush().await?;

    let mut rows = Vec::new();
    let mut trap: Option<String> = None;

    loop {
        let sentence = read_sentence(stream).await?;
        let Some(reply) = sentence.first() else {
            continue;
        };

        let attributes: Row = sentence[1..]
            .iter()
            .filter_map(|w| parse_attribute(w))
            .collect();

        match reply.as_str() {
            "!re" => rows.push(attributes),
            "!done" => break,
            "!trap" => {
                let message = attributes
                    .get("message")
                    .cloned()
                    .unwrap_or_else(|| "未知错误".to_string());
                trap.get_or_insert(message);
            }
            "!fatal" => {
                let message = sentence.get(1).cloned().unwrap_or_default();
                return Err(ProtocolError::Trap(format!("fatal: {}", message)));
            }
            other => {
                return Err(ProtocolError::Decode(format!("未知回复类型: {}", other)));
            }
        }
    }

    match trap {
        Some(message) => Err(ProtocolError::Trap(message)),
        None => Ok(rows),
    }
}

/// RouterOS API 客户端
#[derive(Debug, Default, Clone)]
pub struct RouterOsClient;

impl RouterOsClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeviceClient for RouterOsClient {
    async fn connect(
        &self,
        device: &DeviceConfig,
        timeout: Duration,
    ) -> Result<Arc<dyn DeviceSession>, ProtocolError> {
        let addr = format!("{}:{}", device.host, device.port);
        debug!(device = %device.id, "连接设备 API: {}", addr);

        let tcp = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ProtocolError::Timeout)?
            .map_err(|e| ProtocolError::Connect(format!("{}: {}", addr, e)))?;
        let _ = tcp.set_nodelay(true);

        let mut stream = BufReader::new(tcp);
        let login = vec![
            "/login".to_string(),
            format!("=name={}", device.username),
            format!("=password={}", device.password),
        ];

        let reply = tokio::time::timeout(timeout, exchange(&mut stream, &login))
            .await
            .map_err(|_| ProtocolError::Timeout)?;

        match reply {
            Ok(rows) => {
                // 旧版本固件返回 challenge，需要 MD5 登录
                if rows.iter().any(|r| r.contains_key("ret")) {
                    return Err(ProtocolError::Auth("不支持的旧版登录方式".to_string()));
                }
            }
            Err(ProtocolError::Trap(message)) => return Err(ProtocolError::Auth(message)),
            Err(e) => return Err(e),
        }

        Ok(Arc::new(RouterOsSession {
            device_id: device.id.clone(),
            timeout,
            stream: Mutex::new(Some(stream)),
        }))
    }
}

/// 单个 API 会话，同一会话上的查询串行执行
pub struct RouterOsSession {
    device_id: String,
    timeout: Duration,
    stream: Mutex<Option<BufReader<TcpStream>>>,
}

#[async_trait]
impl DeviceSession for RouterOsSession {
    async fn query(&self, path: &str, filters: &[QueryFilter]) -> Result<Vec<Row>, ProtocolError> {
        let mut words = Vec::with_capacity(filters.len() + 1);
        words.push(path.to_string());
        words.extend(filters.iter().map(QueryFilter::to_word));

        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(ProtocolError::Closed)?;

        let result = match tokio::time::timeout(self.timeout, exchange(stream, &words)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(device = %self.device_id, "查询超时: {}", path);
                Err(ProtocolError::Timeout)
            }
        };

        // 读写中途失败后无法确定流的位置，丢弃连接，后续查询返回 Closed
        if let Err(e) = &result {
            if e.is_transport() {
                if let Some(mut stream) = guard.take() {
                    let _ = stream.shutdown().await;
                }
            }
        }
        result
    }

    async fn close(&self) -> Result<(), ProtocolError> {
        let mut guard = self.stream.lock().await;
        if let Some(mut stream) = guard.take() {
            stream.write_all(&encode_sentence(&["/quit".to_string()])).await?;
            stream.shutdown().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn decode_length(bytes: &[u8]) -> usize {
        let mut reader = bytes;
        read_length(&mut reader).await.unwrap()
    }

    #[tokio::test]
    async fn test_length_prefix_boundaries() {
        for len in [0usize, 0x7F, 0x80, 0x3FFF, 0x4000, 0x1F_FFFF, 0x20_0000] {
            let mut buf = BytesMut::new();
            encode_length(len, &mut buf);
            assert_eq!(decode_length(&buf).await, len, "len = {:#x}", len);
        }
    }

    #[test]
    fn test_encode_short_word() {
        let buf = encode_sentence(&["/login".to_string()]);
        assert_eq!(&buf[..], b"\x06/login\x00");
    }

    #[tokio::test]
    async fn test_exchange_collects_rows() {
        let (mut client, mut device) = tokio::io::duplex(4096);

        tokio::spawn(async move {
            let request = read_sentence(&mut device).await.unwrap();
            assert_eq!(request[0], "/interface/print");

            let mut reply = BytesMut::new();
            reply.extend_from_slice(&encode_sentence(&[
                "!re".to_string(),
                "=name=ether1".to_string(),
                "=rx-byte=1000".to_string(),
            ]));
            reply.extend_from_slice(&encode_sentence(&[
                "!re".to_string(),
                "=name=vlan10".to_string(),
                "=comment=a=b".to_string(),
            ]));
            reply.extend_from_slice(&encode_sentence(&["!done".to_string()]));
            device.write_all(&reply).await.unwrap();
        });

        let rows = exchange(&mut client, &["/interface/print".to_string()])
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], "ether1");
        assert_eq!(rows[0]["rx-byte"], "1000");
        assert_eq!(rows[1]["comment"], "a=b");
    }

    #[tokio::test]
    async fn test_oversized_word_is_rejected() {
        let mut reader: &[u8] = &[0xF0, 0xFF, 0xFF, 0xFF, 0xFF];
        let result = read_sentence(&mut reader).await;
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[tokio::test]
    async fn test_timed_out_session_is_dropped() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let device = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);

            let request = read_sentence(&mut socket).await.unwrap();
            assert_eq!(request[0], "/system/health/print");
            // 回复晚于客户端超时
            tokio::time::sleep(Duration::from_millis(300)).await;
            let mut reply = BytesMut::new();
            reply.extend_from_slice(&encode_sentence(&[
                "!re".to_string(),
                "=name=temperature".to_string(),
                "=value=45".to_string(),
            ]));
            reply.extend_from_slice(&encode_sentence(&["!done".to_string()]));
            let _ = socket.write_all(&reply).await;
        });

        let tcp = TcpStream::connect(addr).await.unwrap();
        let session = RouterOsSession {
            device_id: "r1".to_string(),
            timeout: Duration::from_millis(100),
            stream: Mutex::new(Some(BufReader::new(tcp))),
        };

        let first = session.query("/system/health/print", &[]).await;
        assert!(matches!(first, Err(ProtocolError::Timeout)));

        // 不能读到上一条命令的迟到回复
        let second = session.query("/ppp/active/print", &[]).await;
        assert!(matches!(second, Err(ProtocolError::Closed)));

        device.await.unwrap();
    }

    #[tokio::test]
    async fn test_exchange_trap_is_error() {
        let (mut client, mut device) = tokio::io::duplex(4096);

        tokio::spawn(async move {
            let _ = read_sentence(&mut device).await.unwrap();
            let mut reply = BytesMut::new();
            reply.extend_from_slice(&encode_sentence(&[
                "!trap".to_string(),
                "=message=no such command".to_string(),
            ]));
            reply.extend_from_slice(&encode_sentence(&["!done".to_string()]));
            device.write_all(&reply).await.unwrap();
        });

        let result = exchange(&mut client, &["/ip/hotspot/active/print".to_string()]).await;
        assert!(matches!(result, Err(ProtocolError::Trap(m)) if m == "no such command"));
    }
}

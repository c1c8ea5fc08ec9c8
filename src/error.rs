use thiserror::Error;

use crate::protocol::ProtocolError;

/// 应用程序统一错误类型
#[derive(Error, Debug)]
pub enum AppError {
    /// 设备未找到
    #[error("设备未找到: {0}")]
    DeviceNotFound(String),

    /// 设备协议错误
    #[error("设备协议错误: {0}")]
    Protocol(#[from] ProtocolError),

    /// IO 错误
    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),
}

/// AppError 的 Result 类型别名
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// 将错误转换为 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::DeviceNotFound(_) => 404,
            AppError::Protocol(_) => 502,
            AppError::IoError(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(AppError::DeviceNotFound("r1".into()).status_code(), 404);
        assert_eq!(
            AppError::Protocol(ProtocolError::Timeout).status_code(),
            502
        );
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "bind");
        assert_eq!(AppError::from(io).status_code(), 500);
    }
}

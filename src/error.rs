//! 错误处理模块
//!
//! 定义桥接层统一的错误类型。驱动返回的错误以 [`ProviderError`] 原样携带，
//! 包括错误码与错误标签，事务重试逻辑依赖这些标签做判断。

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// 临时事务错误标签：整个事务可以重试
pub const TRANSIENT_TRANSACTION_ERROR: &str = "TransientTransactionError";

/// 提交结果未知标签：仅提交操作可以重试
pub const UNKNOWN_TRANSACTION_COMMIT_RESULT: &str = "UnknownTransactionCommitResult";

/// 服务器 MaxTimeMSExpired 错误码
pub const MAX_TIME_MS_EXPIRED: i32 = 50;

/// 桥接层结果类型
pub type DocBridgeResult<T> = Result<T, DocBridgeError>;

/// 驱动层结果类型
pub type DriverResult<T> = Result<T, ProviderError>;

/// 桥接层错误
#[derive(Error, Debug)]
pub enum DocBridgeError {
    /// 本地参数错误，在任何网络往返之前发现
    #[error("{message}")]
    InvalidArgument { message: String },

    /// 在不允许的状态下执行操作
    #[error("{message}")]
    InvalidOperation { message: String },

    /// 游标已关闭
    #[error("{}", crate::i18n::t("error.cursor_closed"))]
    CursorClosed,

    /// 驱动返回的错误，原样传递
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// 工作线程池错误
    #[error("{message}")]
    WorkerError { message: String },

    /// 配置错误
    #[error("{message}")]
    ConfigError { message: String },

    /// 连接错误
    #[error("{message}")]
    ConnectionError { message: String },

    /// 序列化错误
    #[error("{message}")]
    SerializationError { message: String },

    /// IO错误
    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),
}

impl DocBridgeError {
    /// 是否为驱动错误且带有指定标签
    pub fn has_error_label(&self, label: &str) -> bool {
        match self {
            DocBridgeError::Provider(err) => err.has_error_label(label),
            _ => false,
        }
    }

    /// 驱动错误码
    pub fn code(&self) -> Option<i32> {
        match self {
            DocBridgeError::Provider(err) => err.code(),
            _ => None,
        }
    }

    /// 是否为 MaxTimeMSExpired 错误
    pub fn is_max_time_expired(&self) -> bool {
        self.code() == Some(MAX_TIME_MS_EXPIRED)
    }

    /// 取出驱动错误
    pub fn as_provider(&self) -> Option<&ProviderError> {
        match self {
            DocBridgeError::Provider(err) => Some(err),
            _ => None,
        }
    }
}

/// 驱动错误
///
/// 保留服务器返回的错误码、错误码名称、消息与错误标签。
/// 来自真实驱动的原始错误保存在 `source` 中，可通过 [`std::error::Error::source`] 取回。
#[derive(Debug, Clone)]
pub struct ProviderError {
    code: Option<i32>,
    code_name: Option<String>,
    message: String,
    labels: BTreeSet<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            code_name: None,
            message: message.into(),
            labels: BTreeSet::new(),
            source: None,
        }
    }

    /// 设置错误码
    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    /// 设置错误码名称
    pub fn with_code_name(mut self, code_name: impl Into<String>) -> Self {
        self.code_name = Some(code_name.into());
        self
    }

    /// 追加错误标签
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    /// 追加多个错误标签
    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels.extend(labels.into_iter().map(Into::into));
        self
    }

    /// 保存原始错误
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }

    pub fn code_name(&self) -> Option<&str> {
        self.code_name.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn labels(&self) -> &BTreeSet<String> {
        &self.labels
    }

    pub fn has_error_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, &self.code_name) {
            (Some(code), Some(name)) => write!(f, "驱动错误 ({} {}): {}", code, name, self.message)?,
            (Some(code), None) => write!(f, "驱动错误 ({}): {}", code, self.message)?,
            _ => write!(f, "驱动错误: {}", self.message)?,
        }
        if !self.labels.is_empty() {
            let labels: Vec<&str> = self.labels.iter().map(String::as_str).collect();
            write!(f, " [{}]", labels.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<serde_json::Error> for DocBridgeError {
    fn from(err: serde_json::Error) -> Self {
        DocBridgeError::SerializationError {
            message: crate::i18n::tf("error.serialization", &[("message", &err.to_string())]),
        }
    }
}

/// 快速构建常用错误
#[macro_export]
macro_rules! quick_error {
    (invalid_argument, $msg:expr) => {
        $crate::error::DocBridgeError::InvalidArgument {
            message: $msg.to_string(),
        }
    };
    (invalid_operation, $msg:expr) => {
        $crate::error::DocBridgeError::InvalidOperation {
            message: $msg.to_string(),
        }
    };
    (config, $msg:expr) => {
        $crate::error::DocBridgeError::ConfigError {
            message: $msg.to_string(),
        }
    };
    (connection, $msg:expr) => {
        $crate::error::DocBridgeError::ConnectionError {
            message: $msg.to_string(),
        }
    };
    (worker, $msg:expr) => {
        $crate::error::DocBridgeError::WorkerError {
            message: $msg.to_string(),
        }
    };
    (serialization, $msg:expr) => {
        $crate::error::DocBridgeError::SerializationError {
            message: $msg.to_string(),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_labels() {
        let err: DocBridgeError = ProviderError::new("写冲突")
            .with_code(112)
            .with_code_name("WriteConflict")
            .with_label(TRANSIENT_TRANSACTION_ERROR)
            .into();

        assert!(err.has_error_label(TRANSIENT_TRANSACTION_ERROR));
        assert!(!err.has_error_label(UNKNOWN_TRANSACTION_COMMIT_RESULT));
        assert_eq!(err.code(), Some(112));
        assert!(!err.is_max_time_expired());
    }

    #[test]
    fn test_max_time_expired() {
        let err: DocBridgeError = ProviderError::new("operation exceeded time limit")
            .with_code(MAX_TIME_MS_EXPIRED)
            .with_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
            .into();
        assert!(err.is_max_time_expired());

        let local = quick_error!(invalid_argument, "length must be non-negative");
        assert!(!local.has_error_label(UNKNOWN_TRANSACTION_COMMIT_RESULT));
        assert_eq!(local.code(), None);
    }

    #[test]
    fn test_display_contains_labels() {
        let err = ProviderError::new("boom").with_code(11000).with_label("RetryableWriteError");
        let text = err.to_string();
        assert!(text.contains("11000"));
        assert!(text.contains("RetryableWriteError"));
    }
}

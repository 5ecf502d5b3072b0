//! 管道终止原因与稳定错误码。
//!
//! ## 设计目标（Why）
//! - 管道一旦 `terminate`，同一个原因需要同时交给生产侧、消费侧以及所有被联动终止的子管道，
//!   因此终止原因必须可廉价克隆，且在多处观察时保持完全一致；
//! - 错误码沿用 `<领域>.<语义>` 命名约定，便于日志检索与告警聚合。
//!
//! ## 契约说明（What）
//! - [`PipeError`] 是唯一的硬失败载体，`Closed` 属于正常流程状态，永远不会被包装为错误；
//! - [`codes`] 中的常量为 crate 内部产生的全部错误码，调用方自定义的终止原因可使用任意码值。
use std::{borrow::Cow, error::Error as StdError, fmt, sync::Arc};

/// 终止原因中携带的底层错误，使用 `Arc` 共享以便同一原因被多个端点观察。
pub type ErrorCause = Arc<dyn StdError + Send + Sync + 'static>;

/// crate 统一的结果别名，默认错误类型为 [`PipeError`]。
pub type Result<T, E = PipeError> = core::result::Result<T, E>;

/// 管道硬失败（`Terminated`）所携带的原因。
///
/// # 设计背景（Why）
/// - 终止需要在管道两侧、联动的下游以及解复用产生的全部子管道之间传播，原因对象因此必须 `Clone`；
/// - 保留可选的底层错误链，使传输层的 I/O 错误可以原样穿过管道交给业务层。
///
/// # 契约说明（What）
/// - `code`：稳定的 `'static` 错误码；
/// - `message`：面向排障人员的描述；
/// - `cause`：可选底层原因，通过 [`std::error::Error::source`] 暴露；
/// - 相等性只比较 `code` 与 `message`，底层原因不参与比较。
#[derive(Clone, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct PipeError {
    code: &'static str,
    message: Cow<'static, str>,
    #[source]
    cause: Option<ErrorCause>,
}

impl PipeError {
    /// 以错误码与描述构造终止原因。
    ///
    /// ```rust
    /// use spark_pipe::{PipeError, error::codes};
    ///
    /// let err = PipeError::new(codes::TERMINATED, "connection reset");
    /// assert_eq!(err.code(), codes::TERMINATED);
    /// assert_eq!(err.message(), "connection reset");
    /// ```
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// 附带底层原因。
    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// 附带已经共享的底层原因，避免二次包装。
    pub fn with_shared_cause(mut self, cause: ErrorCause) -> Self {
        self.cause = Some(cause);
        self
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 人类可读描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 底层原因。
    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }

    /// 判断错误码是否匹配。
    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }
}

impl fmt::Debug for PipeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("PipeError");
        debug.field("code", &self.code).field("message", &self.message);
        if let Some(cause) = &self.cause {
            debug.field("cause", &format_args!("{cause}"));
        }
        debug.finish()
    }
}

impl PartialEq for PipeError {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.message == other.message
    }
}

impl Eq for PipeError {}

/// crate 内部产生的稳定错误码。
pub mod codes {
    /// 调用方主动终止管道的通用错误码。
    pub const TERMINATED: &str = "pipe.terminated";
    /// 已存在待决的拉取登记时再次登记拉取。
    pub const PULL_CONFLICT: &str = "pipe.pull_conflict";
    /// 下游 Sink 在排空过程中被优雅关闭，剩余元素无法继续投递。
    pub const DOWNSTREAM_CLOSED: &str = "pipe.downstream_closed";
    /// 基础流在子流收到 `Tail` 之前结束。
    pub const STREAM_INCOMPLETE: &str = "pipe.stream_incomplete";
    /// 多路复用帧违反 `Head/Body/Tail` 协议。
    pub const PROTOCOL_VIOLATION: &str = "pipe.protocol_violation";
    /// 多路复用器的基础 Sink 被独立关闭。
    pub const BASE_CLOSED: &str = "pipe.multiplex.base_closed";
    /// 多路复用器中已存在同键的活跃子流。
    pub const DUPLICATE_STREAM: &str = "pipe.multiplex.duplicate_stream";
    /// `reduce` 作用于空流。
    pub const EMPTY_REDUCE: &str = "pipe.empty_reduce";
    /// 消费方放弃继续消费。
    pub const CANCELLED: &str = "pipe.cancelled";
}

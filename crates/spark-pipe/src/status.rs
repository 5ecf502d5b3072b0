//! 管道两侧的传输状态与推/拉结果。
//!
//! ## 契约说明（What）
//! - [`TransportState`] 对生产侧（input）与消费侧（output）分别跟踪；
//! - [`PushResult`] 的 `Filled`/`Full` 是流控信号而不是错误，调用方应在触发器就绪后继续；
//! - [`PullResult`] 的 `Closed` 表示优雅结束，`Error` 表示硬失败。
use crate::{error::PipeError, trigger::Trigger};

/// 管道单侧的传输状态。
///
/// # 契约说明（What）
/// - `Open`：正常收发；
/// - `Closed`：优雅结束，不再有新元素，不携带原因；
/// - `Terminated`：硬失败，携带原因并丢弃缓冲数据；
/// - 任一侧离开 `Open` 后永不回到 `Open`；一侧 `Terminated` 时另一侧必然也是 `Terminated`。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportState {
    /// 正常收发。
    Open,
    /// 优雅结束。
    Closed,
    /// 硬失败。
    Terminated(PipeError),
}

impl TransportState {
    /// 是否仍可收发。
    pub fn is_open(&self) -> bool {
        matches!(self, TransportState::Open)
    }

    /// 是否已到达终态。
    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }

    /// 将终态映射为对应的拉取结果；`Open` 映射为 `None`。
    pub fn as_pull_result<T>(&self) -> Option<PullResult<T>> {
        match self {
            TransportState::Open => None,
            TransportState::Closed => Some(PullResult::Closed),
            TransportState::Terminated(cause) => Some(PullResult::Error(cause.clone())),
        }
    }

    /// 若处于 `Terminated`，返回其原因。
    pub fn cause(&self) -> Option<&PipeError> {
        match self {
            TransportState::Terminated(cause) => Some(cause),
            _ => None,
        }
    }
}

/// `push` 的同步反馈。
///
/// # 教案式说明
/// - **意图 (Why)**：生产者需要在一次调用内得知“元素是否被接收”与“缓冲区是否还有余量”两件事，
///   以便在不阻塞线程的前提下决定是继续写入还是挂起等待；
/// - **契约 (What)**：
///   - `Ok`：已接收，缓冲区仍有余量；
///   - `Filled`：已接收，但缓冲区因此变满，触发器在下一次成功拉取释放空间后就绪；
///   - `Full`：**拒绝**，调用前缓冲区已满；被拒绝的元素原样交还，等待触发器后重试同一元素；
///   - `Closed`/`Error`：拒绝，输入侧已关闭或管道已终止，元素被丢弃。
#[must_use = "push 的结果携带背压信号，忽略可能导致元素丢失"]
#[derive(Debug)]
pub enum PushResult<T> {
    /// 已接收，仍有余量。
    Ok,
    /// 已接收，缓冲区已满。
    Filled(Trigger),
    /// 被拒绝，缓冲区在调用前已满；携带被拒绝的元素。
    Full(Trigger, T),
    /// 被拒绝，输入侧已优雅关闭。
    Closed,
    /// 被拒绝，管道已终止。
    Error(PipeError),
}

impl<T> PushResult<T> {
    /// 元素是否被接收（`Ok` 或 `Filled`）。
    pub fn is_accepted(&self) -> bool {
        matches!(self, PushResult::Ok | PushResult::Filled(_))
    }

    /// 若结果携带背压触发器，返回其引用。
    pub fn trigger(&self) -> Option<&Trigger> {
        match self {
            PushResult::Filled(trigger) | PushResult::Full(trigger, _) => Some(trigger),
            _ => None,
        }
    }

    /// 取回因 `Full` 被拒绝的元素。
    pub fn into_rejected(self) -> Option<T> {
        match self {
            PushResult::Full(_, item) => Some(item),
            _ => None,
        }
    }
}

/// `pull` 的结果。
#[derive(Debug, PartialEq, Eq)]
pub enum PullResult<T> {
    /// 取得一个元素。
    Item(T),
    /// 缓冲为空且输入侧已关闭。
    Closed,
    /// 管道已终止。
    Error(PipeError),
}

impl<T> PullResult<T> {
    /// 对元素分支应用映射，终态分支原样透传。
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> PullResult<U> {
        match self {
            PullResult::Item(item) => PullResult::Item(f(item)),
            PullResult::Closed => PullResult::Closed,
            PullResult::Error(cause) => PullResult::Error(cause),
        }
    }

    /// 取出元素。
    pub fn into_item(self) -> Option<T> {
        match self {
            PullResult::Item(item) => Some(item),
            _ => None,
        }
    }

    /// 是否为终态通知。
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PullResult::Item(_))
    }
}

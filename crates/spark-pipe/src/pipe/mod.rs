//! 管道契约：生产侧 [`Sink`]、消费侧 [`Source`] 与共同的终止能力 [`Terminate`]。
//!
//! ## 设计目标（Why）
//! - 所有操作均为同步、非阻塞：要么立即完成，要么登记回调并由同一执行上下文中的后续操作同步触发；
//! - 回调一律以 `Box<dyn ...>` 传递，保证 Trait 对象安全，使 `Box<dyn Source<Item = T>>`
//!   可以在拼接、解复用等场景中直接使用。
//!
//! ## 契约说明（What）
//! - 所有句柄都不是线程安全的，必须由单一串行上下文（事件循环 / Actor）访问；
//! - 实现必须在调用任何已登记回调之前完成自身状态迁移，以支持回调中的重入调用。
use std::{ops::ControlFlow, rc::Rc};

use crate::{
    error::PipeError,
    status::{PullResult, PushResult, TransportState},
    trigger::Trigger,
};

mod buffered;

pub use buffered::BufferedPipe;

/// 一次性拉取回调。
pub type PullCallback<T> = Box<dyn FnOnce(PullResult<T>)>;

/// 持续快速通道处理器；返回 `ControlFlow::Break(())` 表示停止接收。
pub type PullHandler<T> = Box<dyn FnMut(PullResult<T>) -> ControlFlow<()>>;

/// 输入侧进入终态时的一次性通知。
pub type TerminalCallback = Box<dyn FnOnce()>;

/// 管道两侧共享的终止能力。
///
/// 终止是整个管道的属性：无论从哪一侧调用，两侧都会进入 `Terminated`。
pub trait Terminate {
    /// 以给定原因立即、无条件地终止。
    fn terminate(&self, cause: PipeError);
}

/// 消费侧契约。
///
/// # 教案式说明
/// - **意图 (Why)**：统一缓冲管道、映射视图、拼接源、迭代器源等所有可拉取端点的协议；
/// - **契约 (What)**：
///   - [`try_pull`](Self::try_pull)：立即返回可用结果，暂无元素时返回 `None` 且不登记任何回调；
///   - [`pull`](Self::pull)：立即或在下一次推送时恰好调用一次回调；同一时刻只允许一个待决登记；
///   - [`pull_while`](Self::pull_while)：登记持续的快速通道处理器，直到其返回 `Break` 或收到终态通知；
///   - [`output_state`](Self::output_state)：消费侧状态。
pub trait Source: Terminate {
    /// 元素类型。
    type Item: 'static;

    /// 消费侧状态。
    fn output_state(&self) -> TransportState;

    /// 立即拉取；无可用结果时返回 `None`。
    fn try_pull(&self) -> Option<PullResult<Self::Item>>;

    /// 拉取一个结果；必要时登记到下一次推送。
    fn pull(&self, callback: PullCallback<Self::Item>);

    /// 登记快速通道处理器。
    fn pull_while(&self, handler: PullHandler<Self::Item>);
}

/// 生产侧契约。
///
/// # 教案式说明
/// - **意图 (Why)**：为生产者提供同步的背压反馈，使其在不阻塞线程的情况下决定继续写入或挂起；
/// - **契约 (What)**：
///   - [`push`](Self::push)：见 [`PushResult`] 的各分支语义；
///   - [`complete`](Self::complete)：优雅关闭输入侧，已缓冲元素仍可被排空；
///   - [`input_state`](Self::input_state)：生产侧状态；
///   - [`on_input_terminal`](Self::on_input_terminal)：输入侧离开 `Open` 时的通知，
///     使排空驱动等直接相连的上游无需再次推送即可观察到下游的关闭或终止。
pub trait Sink: Terminate {
    /// 元素类型。
    type Item: 'static;

    /// 生产侧状态。
    fn input_state(&self) -> TransportState;

    /// 推送一个元素。
    fn push(&self, item: Self::Item) -> PushResult<Self::Item>;

    /// 优雅关闭输入侧。
    fn complete(&self);

    /// 登记输入侧进入 `Closed` 或 `Terminated` 时的一次性回调。
    ///
    /// 输入侧已处于终态时回调立即执行；回调内应重新读取 [`input_state`](Self::input_state)。
    fn on_input_terminal(&self, callback: TerminalCallback);

    /// 当前推送是否会被立即接收。
    fn can_push(&self) -> bool {
        self.input_state().is_open()
    }

    /// 若此刻推送会得到 `Full`，返回届时会交出的触发器。
    ///
    /// 可能返回 `Full` 的实现必须覆盖此方法；包装视图据此在消费元素之前判断背压。
    fn pending_trigger(&self) -> Option<Trigger> {
        None
    }
}

impl<P: Terminate + ?Sized> Terminate for Rc<P> {
    fn terminate(&self, cause: PipeError) {
        (**self).terminate(cause)
    }
}

impl<P: Terminate + ?Sized> Terminate for Box<P> {
    fn terminate(&self, cause: PipeError) {
        (**self).terminate(cause)
    }
}

impl<S: Source + ?Sized> Source for Rc<S> {
    type Item = S::Item;

    fn output_state(&self) -> TransportState {
        (**self).output_state()
    }

    fn try_pull(&self) -> Option<PullResult<Self::Item>> {
        (**self).try_pull()
    }

    fn pull(&self, callback: PullCallback<Self::Item>) {
        (**self).pull(callback)
    }

    fn pull_while(&self, handler: PullHandler<Self::Item>) {
        (**self).pull_while(handler)
    }
}

impl<S: Source + ?Sized> Source for Box<S> {
    type Item = S::Item;

    fn output_state(&self) -> TransportState {
        (**self).output_state()
    }

    fn try_pull(&self) -> Option<PullResult<Self::Item>> {
        (**self).try_pull()
    }

    fn pull(&self, callback: PullCallback<Self::Item>) {
        (**self).pull(callback)
    }

    fn pull_while(&self, handler: PullHandler<Self::Item>) {
        (**self).pull_while(handler)
    }
}

impl<K: Sink + ?Sized> Sink for Rc<K> {
    type Item = K::Item;

    fn input_state(&self) -> TransportState {
        (**self).input_state()
    }

    fn push(&self, item: Self::Item) -> PushResult<Self::Item> {
        (**self).push(item)
    }

    fn complete(&self) {
        (**self).complete()
    }

    fn on_input_terminal(&self, callback: TerminalCallback) {
        (**self).on_input_terminal(callback)
    }

    fn can_push(&self) -> bool {
        (**self).can_push()
    }

    fn pending_trigger(&self) -> Option<Trigger> {
        (**self).pending_trigger()
    }
}

impl<K: Sink + ?Sized> Sink for Box<K> {
    type Item = K::Item;

    fn input_state(&self) -> TransportState {
        (**self).input_state()
    }

    fn push(&self, item: Self::Item) -> PushResult<Self::Item> {
        (**self).push(item)
    }

    fn complete(&self) {
        (**self).complete()
    }

    fn on_input_terminal(&self, callback: TerminalCallback) {
        (**self).on_input_terminal(callback)
    }

    fn can_push(&self) -> bool {
        (**self).can_push()
    }

    fn pending_trigger(&self) -> Option<Trigger> {
        (**self).pending_trigger()
    }
}

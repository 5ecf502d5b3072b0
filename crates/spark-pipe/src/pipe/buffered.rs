//! 有界缓冲管道：推/拉协议的基础实现。
//!
//! ## 核心意图（Why）
//! - 在单一串行上下文中，以显式状态机承载“队列 + 两侧状态 + 单一消费者槽 + 单一触发器槽”，
//!   取代递归闭包式的回调编排；
//! - 所有回调在状态迁移完成、内部借用释放之后才被调用，回调中的重入推/拉与外部调用行为一致。
//!
//! ## 行为契约（What）
//! - `push`：存在待决消费者时直接交付，否则入队；调用前已满返回 `Full`，因本次入队变满返回 `Filled`；
//! - `pull`：FIFO 出队；释放空间时触发生产侧触发器；队列排空且输入侧已关闭时消费侧转为 `Closed`；
//! - `pull_while`：先按序交付已缓冲元素，之后的推送绕过缓冲直接交付，直到处理器停止或管道终结；
//! - `complete`/`terminate`：见 [`Sink::complete`] 与 [`Terminate::terminate`]；
//!   二者都会触发待决的生产侧触发器，使等待空间的生产者在重试时观察到 `Closed`/`Error`。
use std::{cell::RefCell, collections::VecDeque, fmt, mem, ops::ControlFlow, rc::Rc};

use tracing::{debug, trace, warn};

use super::{PullCallback, PullHandler, Sink, Source, TerminalCallback, Terminate};
use crate::{
    config::PipeConfig,
    error::{PipeError, codes},
    status::{PullResult, PushResult, TransportState},
    trigger::Trigger,
};

/// 消费者登记槽。
enum Consumer<T> {
    Idle,
    Once(PullCallback<T>),
    FastTrack(PullHandler<T>),
}

impl<T> Consumer<T> {
    fn is_idle(&self) -> bool {
        matches!(self, Consumer::Idle)
    }
}

struct Core<T> {
    queue: VecDeque<T>,
    capacity: usize,
    input: TransportState,
    output: TransportState,
    consumer: Consumer<T>,
    trigger: Option<Trigger>,
    input_watchers: Vec<TerminalCallback>,
}

impl<T> Core<T> {
    /// 出队一个元素，并取走因释放空间而应触发的触发器。
    fn pop(&mut self) -> Option<(T, Option<Trigger>)> {
        let item = self.queue.pop_front()?;
        if self.queue.is_empty() && self.input == TransportState::Closed {
            self.output = TransportState::Closed;
        }
        Some((item, self.trigger.take()))
    }

    fn backpressure_trigger(&mut self) -> Trigger {
        self.trigger.get_or_insert_with(Trigger::new).clone()
    }
}

fn pull_conflict() -> PipeError {
    PipeError::new(
        codes::PULL_CONFLICT,
        "a pull registration is already pending on this pipe",
    )
}

fn fire(trigger: Option<Trigger>) {
    if let Some(trigger) = trigger {
        trigger.fire();
    }
}

fn notify(watchers: Vec<TerminalCallback>) {
    for watcher in watchers {
        watcher();
    }
}

/// 有界 FIFO 缓冲管道，同时实现 [`Sink`] 与 [`Source`]。
///
/// # 教案式说明
/// - **意图 (Why)**：作为整个流控引擎的基础类型，组合子、通道与多路复用层都构建在它之上；
/// - **契约 (What)**：
///   - 容量在构造时固定且至少为 1；
///   - 句柄可克隆，克隆体共享同一缓冲与状态；
///   - 缓冲元素归管道所有，交付给消费者时所有权随之转移；
/// - **执行逻辑 (How)**：每个操作在一次 `borrow_mut` 内完成迁移，取出需要通知的回调与触发器，
///   释放借用后再依次调用。
///
/// ```rust
/// use spark_pipe::prelude::*;
///
/// let pipe = BufferedPipe::new(2);
/// assert!(matches!(pipe.push(1), PushResult::Ok));
/// assert!(matches!(pipe.push(2), PushResult::Filled(_)));
/// assert!(matches!(pipe.push(3), PushResult::Full(_, 3)));
/// assert_eq!(pipe.try_pull(), Some(PullResult::Item(1)));
/// ```
pub struct BufferedPipe<T> {
    core: Rc<RefCell<Core<T>>>,
}

impl<T> Clone for BufferedPipe<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: 'static> BufferedPipe<T> {
    /// 以给定容量创建管道；容量 0 按 1 处理。
    pub fn new(capacity: usize) -> Self {
        Self {
            core: Rc::new(RefCell::new(Core {
                queue: VecDeque::with_capacity(capacity.max(1)),
                capacity: capacity.max(1),
                input: TransportState::Open,
                output: TransportState::Open,
                consumer: Consumer::Idle,
                trigger: None,
                input_watchers: Vec::new(),
            })),
        }
    }

    /// 按配置中的 `buffer_capacity` 创建管道。
    pub fn from_config(config: &PipeConfig) -> Self {
        Self::new(config.buffer_capacity)
    }

    /// 当前缓冲元素数量。
    pub fn len(&self) -> usize {
        self.core.borrow().queue.len()
    }

    /// 缓冲是否为空。
    pub fn is_empty(&self) -> bool {
        self.core.borrow().queue.is_empty()
    }

    /// 固定容量。
    pub fn capacity(&self) -> usize {
        self.core.borrow().capacity
    }

    /// 缓冲是否已满。
    pub fn is_full(&self) -> bool {
        let core = self.core.borrow();
        core.queue.len() >= core.capacity
    }

    /// 两个句柄是否指向同一管道。
    pub fn same_pipe(&self, other: &BufferedPipe<T>) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }

    /// 以快速通道模式驱动处理器：先排空缓冲，再视状态交付终态通知或重新登记。
    fn run_fast_track(&self, mut handler: PullHandler<T>) {
        loop {
            let mut core = self.core.borrow_mut();
            if let TransportState::Terminated(cause) = &core.output {
                let cause = cause.clone();
                drop(core);
                let _ = handler(PullResult::Error(cause));
                return;
            }
            if let Some((item, trigger)) = core.pop() {
                drop(core);
                let flow = handler(PullResult::Item(item));
                fire(trigger);
                if flow.is_break() {
                    return;
                }
                continue;
            }
            if core.output == TransportState::Closed {
                drop(core);
                let _ = handler(PullResult::Closed);
                return;
            }
            if !core.consumer.is_idle() {
                warn!("consumer registered while fast-track handler was running; dropping handler");
                return;
            }
            core.consumer = Consumer::FastTrack(handler);
            return;
        }
    }
}

impl<T: 'static> Terminate for BufferedPipe<T> {
    fn terminate(&self, cause: PipeError) {
        let (consumer, trigger, watchers, discarded) = {
            let mut core = self.core.borrow_mut();
            let fully_closed = core.input == TransportState::Closed
                && core.output == TransportState::Closed;
            if matches!(core.output, TransportState::Terminated(_)) || fully_closed {
                return;
            }
            debug!(
                code = cause.code(),
                discarded = core.queue.len(),
                "pipe terminated"
            );
            core.input = TransportState::Terminated(cause.clone());
            core.output = TransportState::Terminated(cause.clone());
            (
                mem::replace(&mut core.consumer, Consumer::Idle),
                core.trigger.take(),
                mem::take(&mut core.input_watchers),
                mem::take(&mut core.queue),
            )
        };
        match consumer {
            Consumer::Once(callback) => callback(PullResult::Error(cause)),
            Consumer::FastTrack(mut handler) => {
                let _ = handler(PullResult::Error(cause));
            }
            Consumer::Idle => {}
        }
        fire(trigger);
        notify(watchers);
        drop(discarded);
    }
}

impl<T: 'static> Sink for BufferedPipe<T> {
    type Item = T;

    fn input_state(&self) -> TransportState {
        self.core.borrow().input.clone()
    }

    fn push(&self, item: T) -> PushResult<T> {
        let mut core = self.core.borrow_mut();
        match &core.input {
            TransportState::Terminated(cause) => return PushResult::Error(cause.clone()),
            TransportState::Closed => return PushResult::Closed,
            TransportState::Open => {}
        }
        match mem::replace(&mut core.consumer, Consumer::Idle) {
            Consumer::Once(callback) => {
                drop(core);
                callback(PullResult::Item(item));
                PushResult::Ok
            }
            Consumer::FastTrack(mut handler) => {
                drop(core);
                if handler(PullResult::Item(item)).is_continue() {
                    self.run_fast_track(handler);
                }
                PushResult::Ok
            }
            Consumer::Idle => {
                if core.queue.len() >= core.capacity {
                    trace!(capacity = core.capacity, "push rejected, buffer full");
                    return PushResult::Full(core.backpressure_trigger(), item);
                }
                core.queue.push_back(item);
                if core.queue.len() >= core.capacity {
                    trace!(capacity = core.capacity, "buffer filled");
                    PushResult::Filled(core.backpressure_trigger())
                } else {
                    PushResult::Ok
                }
            }
        }
    }

    fn complete(&self) {
        let (consumer, trigger, watchers) = {
            let mut core = self.core.borrow_mut();
            if !core.input.is_open() {
                return;
            }
            debug!(buffered = core.queue.len(), "pipe input completed");
            core.input = TransportState::Closed;
            let watchers = mem::take(&mut core.input_watchers);
            if core.queue.is_empty() {
                core.output = TransportState::Closed;
                (
                    mem::replace(&mut core.consumer, Consumer::Idle),
                    core.trigger.take(),
                    watchers,
                )
            } else {
                (Consumer::Idle, core.trigger.take(), watchers)
            }
        };
        match consumer {
            Consumer::Once(callback) => callback(PullResult::Closed),
            Consumer::FastTrack(mut handler) => {
                let _ = handler(PullResult::Closed);
            }
            Consumer::Idle => {}
        }
        fire(trigger);
        notify(watchers);
    }

    fn on_input_terminal(&self, callback: TerminalCallback) {
        let terminal = {
            let mut core = self.core.borrow_mut();
            if core.input.is_open() {
                core.input_watchers.push(callback);
                return;
            }
            callback
        };
        terminal();
    }

    fn can_push(&self) -> bool {
        let core = self.core.borrow();
        core.input.is_open() && (!core.consumer.is_idle() || core.queue.len() < core.capacity)
    }

    fn pending_trigger(&self) -> Option<Trigger> {
        let mut core = self.core.borrow_mut();
        let full = core.input.is_open()
            && core.consumer.is_idle()
            && core.queue.len() >= core.capacity;
        full.then(|| core.backpressure_trigger())
    }
}

impl<T: 'static> Source for BufferedPipe<T> {
    type Item = T;

    fn output_state(&self) -> TransportState {
        self.core.borrow().output.clone()
    }

    fn try_pull(&self) -> Option<PullResult<T>> {
        let mut core = self.core.borrow_mut();
        if let Some(terminal) = core.output.as_pull_result::<T>() {
            return Some(terminal);
        }
        let (item, trigger) = core.pop()?;
        drop(core);
        fire(trigger);
        Some(PullResult::Item(item))
    }

    fn pull(&self, callback: PullCallback<T>) {
        let mut core = self.core.borrow_mut();
        if let TransportState::Terminated(cause) = &core.output {
            let cause = cause.clone();
            drop(core);
            callback(PullResult::Error(cause));
            return;
        }
        if let Some((item, trigger)) = core.pop() {
            drop(core);
            callback(PullResult::Item(item));
            fire(trigger);
            return;
        }
        if core.output == TransportState::Closed {
            drop(core);
            callback(PullResult::Closed);
            return;
        }
        if !core.consumer.is_idle() {
            drop(core);
            warn!("pull registered while another registration is pending");
            callback(PullResult::Error(pull_conflict()));
            return;
        }
        core.consumer = Consumer::Once(callback);
    }

    fn pull_while(&self, handler: PullHandler<T>) {
        let idle = self.core.borrow().consumer.is_idle();
        if !idle {
            warn!("fast-track handler registered while another registration is pending");
            let mut handler = handler;
            let _ = handler(PullResult::Error(pull_conflict()));
            return;
        }
        self.run_fast_track(handler);
    }
}

impl<T> fmt::Debug for BufferedPipe<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.borrow();
        f.debug_struct("BufferedPipe")
            .field("buffered", &core.queue.len())
            .field("capacity", &core.capacity)
            .field("input", &core.input)
            .field("output", &core.output)
            .finish()
    }
}

/// 将闭包装箱为快速通道处理器。
pub(crate) fn handler<T>(f: impl FnMut(PullResult<T>) -> ControlFlow<()> + 'static) -> PullHandler<T> {
    Box::new(f)
}

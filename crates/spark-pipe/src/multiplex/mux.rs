//! 复用器：把多个子管道汇合进一个基础汇。
//!
//! ## 核心意图（Why）
//! - 每个推入的 [`SubSource`] 拥有独立的排空循环，帧在基础汇上任意交错；
//! - 基础汇背压时，受阻的子流按先来后到排队，共享唯一一次触发器登记，
//!   就绪后依次恢复，任何一个再次受阻即停止恢复。
//!
//! ## 行为契约（What）
//! - `complete`：不再接收新子流；全部活跃子流结束后才完成基础汇；
//! - `terminate`：立即终止基础汇；活跃子流不会被主动通知，而是在下一次向基础汇推送时
//!   发现失败并终止自身子管道，其生产者随后观察到 `Error`；
//! - 基础汇被独立关闭或终止时，复用器经由基础汇的终态通知立即进入 [`MultiplexState::BaseLost`]，
//!   子流同样惰性发现；
//! - 与活跃子流键重复的 `SubSource` 会被以 `pipe.multiplex.duplicate_stream` 终止，复用器不受影响。
use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    fmt, mem,
    rc::Rc,
};

use tracing::{debug, trace, warn};

use super::{StreamFrame, SubSource};
use crate::{
    error::{PipeError, codes},
    pipe::{BufferedPipe, Sink, Source, TerminalCallback, Terminate},
    status::{PullResult, PushResult, TransportState},
    trigger::Trigger,
};

/// 复用器生命周期。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MultiplexState {
    /// 接收新子流。
    Open,
    /// 已调用 `complete`，等待活跃子流结束。
    Completing,
    /// 基础汇已完成。
    Closed,
    /// 经由复用器自身的 `terminate` 终止。
    Terminated(PipeError),
    /// 基础汇被独立关闭或终止。
    BaseLost(PipeError),
}

impl MultiplexState {
    fn failure(&self) -> Option<&PipeError> {
        match self {
            MultiplexState::Terminated(cause) | MultiplexState::BaseLost(cause) => Some(cause),
            _ => None,
        }
    }
}

struct Lane<F: StreamFrame> {
    key: F::Key,
    pipe: BufferedPipe<F>,
    pending: RefCell<Option<F>>,
}

struct Core<K>
where
    K: Sink,
    K::Item: StreamFrame,
{
    base: K,
    state: RefCell<MultiplexState>,
    active: RefCell<HashMap<<K::Item as StreamFrame>::Key, Rc<Lane<K::Item>>>>,
    waiters: RefCell<VecDeque<Rc<Lane<K::Item>>>>,
    armed: Cell<bool>,
    watchers: RefCell<Vec<TerminalCallback>>,
}

impl<K> Core<K>
where
    K: Sink + 'static,
    K::Item: StreamFrame,
{
    /// 同步基础汇的状态；基础汇已不可用时记录 `BaseLost` 并返回原因。
    fn observe_base(&self) -> Option<PipeError> {
        if let Some(cause) = self.state.borrow().failure() {
            return Some(cause.clone());
        }
        let lost = match self.base.input_state() {
            TransportState::Open => return None,
            TransportState::Closed => {
                if *self.state.borrow() == MultiplexState::Closed {
                    return None;
                }
                PipeError::new(codes::BASE_CLOSED, "multiplexer base sink closed")
            }
            TransportState::Terminated(cause) => cause,
        };
        self.lose_base(lost.clone());
        Some(lost)
    }

    fn lose_base(&self, cause: PipeError) {
        {
            let mut state = self.state.borrow_mut();
            if state.failure().is_some() {
                return;
            }
            debug!(code = cause.code(), "multiplexer base lost");
            *state = MultiplexState::BaseLost(cause);
        }
        self.notify_watchers();
    }

    /// 输入侧离开 `Open` 后通知登记的观察者。
    fn notify_watchers(&self) {
        let watchers = mem::take(&mut *self.watchers.borrow_mut());
        for watcher in watchers {
            watcher();
        }
    }

    fn pump(this: Rc<Self>, lane: Rc<Lane<K::Item>>) {
        loop {
            let pending = lane.pending.borrow_mut().take();
            let frame = match pending {
                Some(frame) => frame,
                None => match lane.pipe.try_pull() {
                    Some(PullResult::Item(frame)) => frame,
                    Some(PullResult::Closed) => return this.retire(&lane, None),
                    Some(PullResult::Error(cause)) => return this.retire(&lane, Some(cause)),
                    None => {
                        let (core, next) = (Rc::clone(&this), Rc::clone(&lane));
                        lane.pipe.pull(Box::new(move |result| match result {
                            PullResult::Item(frame) => {
                                *next.pending.borrow_mut() = Some(frame);
                                Self::pump(core, next);
                            }
                            PullResult::Closed => core.retire(&next, None),
                            PullResult::Error(cause) => core.retire(&next, Some(cause)),
                        }));
                        return;
                    }
                },
            };
            if !Self::forward(&this, &lane, frame) {
                return;
            }
        }
    }

    /// 把一个帧推入基础汇；返回 `false` 表示该子流已挂起或已结束。
    fn forward(this: &Rc<Self>, lane: &Rc<Lane<K::Item>>, frame: K::Item) -> bool {
        let failure = this.state.borrow().failure().cloned();
        if let Some(cause) = failure {
            this.abandon(lane, cause);
            return false;
        }
        if this.armed.get() {
            *lane.pending.borrow_mut() = Some(frame);
            this.waiters.borrow_mut().push_back(Rc::clone(lane));
            return false;
        }
        match this.base.push(frame) {
            PushResult::Ok => true,
            PushResult::Filled(trigger) => {
                Self::wait_for_base(this, lane, trigger);
                false
            }
            PushResult::Full(trigger, frame) => {
                *lane.pending.borrow_mut() = Some(frame);
                Self::wait_for_base(this, lane, trigger);
                false
            }
            PushResult::Closed => {
                let cause = PipeError::new(codes::BASE_CLOSED, "multiplexer base sink closed");
                this.lose_base(cause.clone());
                this.abandon(lane, cause);
                false
            }
            PushResult::Error(cause) => {
                this.lose_base(cause.clone());
                this.abandon(lane, cause);
                false
            }
        }
    }

    fn wait_for_base(this: &Rc<Self>, lane: &Rc<Lane<K::Item>>, trigger: Trigger) {
        trace!(key = ?lane.key, "sub-stream waiting for base capacity");
        this.waiters.borrow_mut().push_back(Rc::clone(lane));
        if !this.armed.replace(true) {
            let core = Rc::clone(this);
            trigger.on_ready(move || Self::resume_waiters(core));
        }
    }

    fn resume_waiters(this: Rc<Self>) {
        this.armed.set(false);
        while !this.armed.get() {
            let next = this.waiters.borrow_mut().pop_front();
            let Some(lane) = next else {
                break;
            };
            Self::pump(Rc::clone(&this), lane);
        }
    }

    /// 子流在发现复用器失败后终止自身子管道。
    fn abandon(&self, lane: &Rc<Lane<K::Item>>, cause: PipeError) {
        trace!(key = ?lane.key, code = cause.code(), "sub-stream discovered multiplexer failure");
        lane.pending.borrow_mut().take();
        self.remove(lane);
        lane.pipe.terminate(cause);
    }

    /// 子管道自身到达终态后注销，并在收尾阶段检查是否可以完成基础汇。
    fn retire(&self, lane: &Rc<Lane<K::Item>>, cause: Option<PipeError>) {
        match &cause {
            None => debug!(key = ?lane.key, "sub-stream finished"),
            Some(cause) => debug!(key = ?lane.key, code = cause.code(), "sub-stream aborted"),
        }
        self.remove(lane);
        self.finish_if_idle();
    }

    fn remove(&self, lane: &Rc<Lane<K::Item>>) {
        let mut active = self.active.borrow_mut();
        if active
            .get(&lane.key)
            .is_some_and(|current| Rc::ptr_eq(current, lane))
        {
            active.remove(&lane.key);
        }
    }

    fn finish_if_idle(&self) {
        let ready = {
            let mut state = self.state.borrow_mut();
            let ready = *state == MultiplexState::Completing && self.active.borrow().is_empty();
            if ready {
                *state = MultiplexState::Closed;
            }
            ready
        };
        if ready {
            debug!("all sub-streams finished, completing multiplexer base");
            self.base.complete();
        }
    }
}

/// 把推入的子流汇合进基础汇的 [`Sink`]。
pub struct Multiplexer<K>
where
    K: Sink,
    K::Item: StreamFrame,
{
    core: Rc<Core<K>>,
}

impl<K> Multiplexer<K>
where
    K: Sink + 'static,
    K::Item: StreamFrame,
{
    /// 以基础汇创建复用器。
    pub fn new(base: K) -> Self {
        let core = Rc::new(Core {
            base,
            state: RefCell::new(MultiplexState::Open),
            active: RefCell::new(HashMap::new()),
            waiters: RefCell::new(VecDeque::new()),
            armed: Cell::new(false),
            watchers: RefCell::new(Vec::new()),
        });
        let weak = Rc::downgrade(&core);
        core.base.on_input_terminal(Box::new(move || {
            if let Some(core) = weak.upgrade() {
                let _ = core.observe_base();
            }
        }));
        Self { core }
    }

    /// 当前生命周期状态；会先同步基础汇的状态。
    pub fn state(&self) -> MultiplexState {
        let _ = self.core.observe_base();
        self.core.state.borrow().clone()
    }

    /// 活跃子流数量。
    pub fn active_streams(&self) -> usize {
        self.core.active.borrow().len()
    }
}

/// 以 `base` 为基础汇创建复用器。
pub fn multiplex<K>(base: K) -> Multiplexer<K>
where
    K: Sink + 'static,
    K::Item: StreamFrame,
{
    Multiplexer::new(base)
}

impl<K> fmt::Debug for Multiplexer<K>
where
    K: Sink,
    K::Item: StreamFrame,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("state", &*self.core.state.borrow())
            .field("active", &self.core.active.borrow().len())
            .field("waiting", &self.core.waiters.borrow().len())
            .finish()
    }
}

impl<K> Terminate for Multiplexer<K>
where
    K: Sink + 'static,
    K::Item: StreamFrame,
{
    fn terminate(&self, cause: PipeError) {
        {
            let mut state = self.core.state.borrow_mut();
            if state.failure().is_some() {
                return;
            }
            debug!(code = cause.code(), "multiplexer terminated");
            *state = MultiplexState::Terminated(cause.clone());
        }
        self.core.base.terminate(cause);
        self.core.notify_watchers();
    }
}

impl<K> Sink for Multiplexer<K>
where
    K: Sink + 'static,
    K::Item: StreamFrame,
{
    type Item = SubSource<K::Item>;

    fn input_state(&self) -> TransportState {
        if let Some(cause) = self.core.observe_base() {
            return TransportState::Terminated(cause);
        }
        match &*self.core.state.borrow() {
            MultiplexState::Open => TransportState::Open,
            _ => TransportState::Closed,
        }
    }

    fn push(&self, sub: SubSource<K::Item>) -> PushResult<SubSource<K::Item>> {
        if let Some(cause) = self.core.observe_base() {
            return PushResult::Error(cause);
        }
        if *self.core.state.borrow() != MultiplexState::Open {
            return PushResult::Closed;
        }
        let (key, pipe) = sub.into_parts();
        if self.core.active.borrow().contains_key(&key) {
            warn!(?key, "sub-stream key already active, rejecting duplicate");
            pipe.terminate(PipeError::new(
                codes::DUPLICATE_STREAM,
                format!("sub-stream {key:?} is already active"),
            ));
            return PushResult::Ok;
        }
        debug!(?key, "sub-stream attached to multiplexer");
        let lane = Rc::new(Lane {
            key: key.clone(),
            pipe,
            pending: RefCell::new(None),
        });
        self.core.active.borrow_mut().insert(key, Rc::clone(&lane));
        Core::pump(Rc::clone(&self.core), lane);
        PushResult::Ok
    }

    fn complete(&self) {
        if self.core.observe_base().is_some() {
            return;
        }
        {
            let mut state = self.core.state.borrow_mut();
            if *state != MultiplexState::Open {
                return;
            }
            debug!(
                active = self.core.active.borrow().len(),
                "multiplexer completing"
            );
            *state = MultiplexState::Completing;
        }
        self.core.notify_watchers();
        self.core.finish_if_idle();
    }

    fn on_input_terminal(&self, callback: TerminalCallback) {
        if self.input_state().is_open() {
            self.core.watchers.borrow_mut().push(callback);
        } else {
            callback();
        }
    }
}

//! 解复用器：把单一帧流按流键拆分为子管道。
//!
//! ## 核心意图（Why）
//! - 每个帧被翻译为一串顺序动作（发布子流、转发帧、完成子流、等待背压），
//!   动作队列排空之前绝不路由下一个基础帧，从而保证不重排且背压逐级传导；
//! - 背压挂起期间仍在基础流上保留一次拉取登记，至多预取一个帧暂存，
//!   基础流在挂起期间被终止时可以立即传播到输出与全部子管道。
//!
//! ## 行为契约（What）
//! - 未知键的 `Head` 开启新子管道并发布 [`SubSource`]，`Head` 本身是子流的第一个元素；
//! - 已知键的 `Body`/`Tail` 转发到对应子管道，`Tail` 之后完成子管道并移除键；
//! - 任一子管道或输出管道返回 `Filled`/`Full` 时暂停消费基础流，直到其被排空；
//! - 基础流终止：输出与全部活跃子管道以同一原因终止；
//! - 基础流优雅结束：输出关闭，仍活跃的子管道以 `pipe.stream_incomplete` 终止；
//! - 畸形帧按 [`MalformedFramePolicy`] 处置。
use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    fmt, mem,
    rc::Rc,
};

use tracing::{debug, trace, warn};

use super::{Component, StreamFrame, SubSource};
use crate::{
    config::{DemuxConfig, MalformedFramePolicy},
    error::{PipeError, codes},
    pipe::{BufferedPipe, PullCallback, PullHandler, Sink, Source, Terminate},
    status::{PullResult, PushResult, TransportState},
    trigger::Trigger,
};

type Key<B> = <<B as Source>::Item as StreamFrame>::Key;

enum Action<F: StreamFrame> {
    Emit(SubSource<F>),
    Forward(BufferedPipe<F>, F),
    Finish(BufferedPipe<F>),
    Await(Trigger),
}

struct Core<B>
where
    B: Source,
    B::Item: StreamFrame,
{
    base: B,
    output: BufferedPipe<SubSource<B::Item>>,
    sub_capacity: usize,
    policy: MalformedFramePolicy,
    active: RefCell<HashMap<Key<B>, BufferedPipe<B::Item>>>,
    actions: RefCell<VecDeque<Action<B::Item>>>,
    /// 挂起期间预取的基础流结果。
    lookahead: RefCell<Option<PullResult<B::Item>>>,
    /// 基础流上是否已有本解复用器的拉取登记。
    watching: Cell<bool>,
    /// 是否正等待某个触发器。
    stalled: Cell<bool>,
    finished: Cell<bool>,
}

impl<B> Core<B>
where
    B: Source + 'static,
    B::Item: StreamFrame,
{
    fn pump(this: Rc<Self>) {
        loop {
            if this.finished.get() {
                return;
            }
            let action = this.actions.borrow_mut().pop_front();
            if let Some(action) = action {
                if !Self::run(&this, action) {
                    Self::watch_base(&this);
                    return;
                }
                continue;
            }
            let ahead = this.lookahead.borrow_mut().take();
            if let Some(result) = ahead {
                this.on_base(result);
                continue;
            }
            if this.watching.get() {
                return;
            }
            match this.base.try_pull() {
                Some(result) => this.on_base(result),
                None => return Self::watch_base(&this),
            }
        }
    }

    /// 在基础流上登记一次拉取。
    ///
    /// 未挂起时结果立即路由；挂起时 `Item`/`Closed` 暂存到预取槽，`Error` 立即关停。
    fn watch_base(this: &Rc<Self>) {
        if this.finished.get() || this.watching.get() || this.lookahead.borrow().is_some() {
            return;
        }
        this.watching.set(true);
        let again = Rc::clone(this);
        this.base.pull(Box::new(move |result| {
            again.watching.set(false);
            match result {
                PullResult::Error(cause) => again.shutdown(cause),
                result if again.stalled.get() => {
                    trace!("base frame held while demultiplexer is stalled");
                    *again.lookahead.borrow_mut() = Some(result);
                }
                result => {
                    again.on_base(result);
                    Self::pump(again);
                }
            }
        }));
    }

    /// 执行一个动作；返回 `false` 表示已挂起等待。
    fn run(this: &Rc<Self>, action: Action<B::Item>) -> bool {
        match action {
            Action::Emit(sub) => match this.output.push(sub) {
                PushResult::Ok => true,
                PushResult::Filled(trigger) => {
                    this.actions.borrow_mut().push_back(Action::Await(trigger));
                    true
                }
                PushResult::Full(trigger, sub) => {
                    trace!("demultiplexer output full, stalling base");
                    this.actions.borrow_mut().push_front(Action::Emit(sub));
                    Self::resume_on(this, trigger);
                    false
                }
                PushResult::Closed => {
                    this.shutdown(PipeError::new(
                        codes::CANCELLED,
                        "demultiplexer output closed",
                    ));
                    false
                }
                PushResult::Error(cause) => {
                    this.shutdown(cause);
                    false
                }
            },
            Action::Forward(pipe, frame) => match pipe.push(frame) {
                PushResult::Ok => true,
                PushResult::Filled(trigger) => {
                    this.actions.borrow_mut().push_back(Action::Await(trigger));
                    true
                }
                PushResult::Full(trigger, frame) => {
                    trace!("sub-stream full, stalling base");
                    this.actions
                        .borrow_mut()
                        .push_front(Action::Forward(pipe, frame));
                    Self::resume_on(this, trigger);
                    false
                }
                PushResult::Closed | PushResult::Error(_) => {
                    trace!("sub-stream no longer accepts frames, dropping frame");
                    true
                }
            },
            Action::Finish(pipe) => {
                pipe.complete();
                true
            }
            Action::Await(trigger) => {
                if trigger.is_fired() {
                    return true;
                }
                trace!("waiting for sub-stream to drain");
                Self::resume_on(this, trigger);
                false
            }
        }
    }

    fn resume_on(this: &Rc<Self>, trigger: Trigger) {
        this.stalled.set(true);
        let again = Rc::clone(this);
        trigger.on_ready(move || {
            again.stalled.set(false);
            Self::pump(again);
        });
    }

    fn on_base(&self, result: PullResult<B::Item>) {
        if self.finished.get() {
            return;
        }
        match result {
            PullResult::Item(frame) => self.route(frame),
            PullResult::Closed => {
                self.finished.set(true);
                let active = self.take_active();
                debug!(incomplete = active.len(), "demultiplexer base closed");
                self.output.complete();
                let cause = PipeError::new(
                    codes::STREAM_INCOMPLETE,
                    "base stream closed before sub-stream tail",
                );
                for pipe in active {
                    pipe.terminate(cause.clone());
                }
            }
            PullResult::Error(cause) => self.shutdown(cause),
        }
    }

    fn route(&self, frame: B::Item) {
        let key = frame.stream_key();
        match frame.component() {
            Component::Head => {
                if self.active.borrow().contains_key(&key) {
                    return self.malformed(&key, "duplicate head for active stream");
                }
                let pipe = BufferedPipe::new(self.sub_capacity);
                self.active.borrow_mut().insert(key.clone(), pipe.clone());
                debug!(?key, "sub-stream opened");
                let mut actions = self.actions.borrow_mut();
                actions.push_back(Action::Emit(SubSource::new(key, pipe.clone())));
                actions.push_back(Action::Forward(pipe, frame));
            }
            Component::Body => {
                let pipe = self.active.borrow().get(&key).cloned();
                match pipe {
                    Some(pipe) => self
                        .actions
                        .borrow_mut()
                        .push_back(Action::Forward(pipe, frame)),
                    None => self.malformed(&key, "body for unknown stream"),
                }
            }
            Component::Tail => {
                let pipe = self.active.borrow_mut().remove(&key);
                match pipe {
                    Some(pipe) => {
                        debug!(?key, "sub-stream tail received");
                        let mut actions = self.actions.borrow_mut();
                        actions.push_back(Action::Forward(pipe.clone(), frame));
                        actions.push_back(Action::Finish(pipe));
                    }
                    None => self.malformed(&key, "tail for unknown stream"),
                }
            }
        }
    }

    fn malformed(&self, key: &Key<B>, reason: &'static str) {
        match self.policy {
            MalformedFramePolicy::Drop => warn!(?key, reason, "dropping malformed frame"),
            MalformedFramePolicy::Fail => {
                warn!(?key, reason, "malformed frame, failing demultiplexer");
                self.shutdown(PipeError::new(
                    codes::PROTOCOL_VIOLATION,
                    format!("{reason}: {key:?}"),
                ));
            }
        }
    }

    fn take_active(&self) -> Vec<BufferedPipe<B::Item>> {
        self.active
            .borrow_mut()
            .drain()
            .map(|(_, pipe)| pipe)
            .collect()
    }

    fn shutdown(&self, cause: PipeError) {
        if self.finished.replace(true) {
            return;
        }
        let pending = mem::take(&mut *self.actions.borrow_mut());
        self.lookahead.borrow_mut().take();
        let active = self.take_active();
        debug!(code = cause.code(), active = active.len(), "demultiplexer terminated");
        self.base.terminate(cause.clone());
        self.output.terminate(cause.clone());
        for pipe in active {
            pipe.terminate(cause.clone());
        }
        drop(pending);
    }
}

/// 按流键拆分帧流的源，产出 [`SubSource`]。
///
/// 对其调用 `terminate` 会终止基础流、输出以及所有活跃子管道。
pub struct Demultiplexer<B>
where
    B: Source,
    B::Item: StreamFrame,
{
    core: Rc<Core<B>>,
}

impl<B> Demultiplexer<B>
where
    B: Source + 'static,
    B::Item: StreamFrame,
{
    /// 以子管道容量创建，其余参数取默认值。
    pub fn new(base: B, sub_buffer_capacity: usize) -> Self {
        Self::from_config(
            base,
            &DemuxConfig {
                sub_buffer_capacity,
                ..DemuxConfig::default()
            },
        )
    }

    /// 按配置创建并立即开始消费基础流。
    pub fn from_config(base: B, config: &DemuxConfig) -> Self {
        let core = Rc::new(Core {
            base,
            output: BufferedPipe::new(config.output_capacity),
            sub_capacity: config.sub_buffer_capacity.max(1),
            policy: config.malformed_frames,
            active: RefCell::new(HashMap::new()),
            actions: RefCell::new(VecDeque::new()),
            lookahead: RefCell::new(None),
            watching: Cell::new(false),
            stalled: Cell::new(false),
            finished: Cell::new(false),
        });
        Core::pump(Rc::clone(&core));
        Self { core }
    }

    /// 已开启但尚未收到 `Tail` 的子流数量。
    pub fn active_streams(&self) -> usize {
        self.core.active.borrow().len()
    }
}

/// 以给定子管道容量解复用 `base`。
pub fn demultiplex<B>(base: B, sub_buffer_capacity: usize) -> Demultiplexer<B>
where
    B: Source + 'static,
    B::Item: StreamFrame,
{
    Demultiplexer::new(base, sub_buffer_capacity)
}

impl<B> fmt::Debug for Demultiplexer<B>
where
    B: Source,
    B::Item: StreamFrame,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Demultiplexer")
            .field("active", &self.core.active.borrow().len())
            .field("finished", &self.core.finished.get())
            .field("output", &self.core.output)
            .finish()
    }
}

impl<B> Terminate for Demultiplexer<B>
where
    B: Source + 'static,
    B::Item: StreamFrame,
{
    fn terminate(&self, cause: PipeError) {
        self.core.shutdown(cause);
    }
}

impl<B> Source for Demultiplexer<B>
where
    B: Source + 'static,
    B::Item: StreamFrame,
{
    type Item = SubSource<B::Item>;

    fn output_state(&self) -> TransportState {
        self.core.output.output_state()
    }

    fn try_pull(&self) -> Option<PullResult<Self::Item>> {
        self.core.output.try_pull()
    }

    fn pull(&self, callback: PullCallback<Self::Item>) {
        self.core.output.pull(callback);
    }

    fn pull_while(&self, handler: PullHandler<Self::Item>) {
        self.core.output.pull_while(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[derive(Debug, PartialEq, Eq)]
    struct Frame(u8, Component);

    impl StreamFrame for Frame {
        type Key = u8;

        fn stream_key(&self) -> u8 {
            self.0
        }

        fn component(&self) -> Component {
            self.1
        }
    }

    fn base_with(frames: Vec<Frame>) -> BufferedPipe<Frame> {
        let base = BufferedPipe::new(frames.len().max(1));
        for frame in frames {
            let _ = base.push(frame);
        }
        base
    }

    fn next_sub(demux: &Demultiplexer<BufferedPipe<Frame>>) -> SubSource<Frame> {
        match demux.try_pull() {
            Some(PullResult::Item(sub)) => sub,
            other => panic!("期望新的子流，实际为 {other:?}"),
        }
    }

    #[test]
    fn head_frame_is_first_item_of_sub_stream() {
        let base = base_with(vec![Frame(1, Component::Head), Frame(1, Component::Tail)]);
        let demux = demultiplex(base, 4);
        let sub = next_sub(&demux);
        assert_eq!(*sub.key(), 1);
        assert_eq!(sub.try_pull(), Some(PullResult::Item(Frame(1, Component::Head))));
        assert_eq!(sub.try_pull(), Some(PullResult::Item(Frame(1, Component::Tail))));
        assert_eq!(sub.try_pull(), Some(PullResult::Closed));
        assert_eq!(demux.active_streams(), 0);
    }

    #[test]
    fn full_sub_stream_stalls_base_consumption() {
        let base = base_with(vec![
            Frame(1, Component::Head),
            Frame(1, Component::Body),
            Frame(1, Component::Body),
        ]);
        let demux = demultiplex(base.clone(), 1);
        let sub = next_sub(&demux);
        assert_eq!(sub.pipe().len(), 1);
        assert_eq!(base.len(), 1, "子管道已满时至多预取一个基础帧");

        assert_eq!(sub.try_pull(), Some(PullResult::Item(Frame(1, Component::Head))));
        assert_eq!(sub.pipe().len(), 1);
        assert_eq!(base.len(), 0);
    }

    #[traced_test]
    #[test]
    fn unknown_key_body_is_dropped_with_warning() {
        let base = base_with(vec![Frame(9, Component::Body), Frame(2, Component::Head)]);
        let demux = demultiplex(base, 4);
        let sub = next_sub(&demux);
        assert_eq!(*sub.key(), 2);
        assert!(demux.output_state().is_open());
        assert!(logs_contain("dropping malformed frame"));
    }

    #[test]
    fn fail_policy_terminates_everything() {
        let base = base_with(vec![Frame(1, Component::Head), Frame(1, Component::Head)]);
        let config = DemuxConfig {
            malformed_frames: MalformedFramePolicy::Fail,
            ..DemuxConfig::default()
        };
        let demux = Demultiplexer::from_config(base.clone(), &config);

        assert!(matches!(
            demux.output_state(),
            TransportState::Terminated(ref e) if e.is(codes::PROTOCOL_VIOLATION)
        ));
        assert!(matches!(base.input_state(), TransportState::Terminated(_)));
        assert_eq!(demux.active_streams(), 0);
    }
}

//! 源到汇的排空驱动：[`drain_into`] 与序列灌入 [`feed`]。
//!
//! ## 设计目标（Why）
//! - 以显式的“待重试元素 + 循环”状态机代替逐元素递归回调，长序列不会加深调用栈；
//! - 背压时挂起在汇交出的触发器上，就绪后从中断处继续。
//!
//! ## 契约说明（What）
//! - `drain_into`：源 `Closed` 时完成汇，源失败时以同一原因终止汇；
//!   汇被终止时以其原因终止源，汇被独立完成时以 `pipe.downstream_closed` 终止源。
//!   驱动通过 [`Sink::on_input_terminal`] 监听汇，即便正挂起在空闲的源上也会立即传播；
//! - `feed`：把序列逐个推入汇，序列耗尽时兑现推送数量，不会完成汇。
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use tracing::{debug, trace};

use crate::{
    deferred::Deferred,
    error::{PipeError, codes},
    pipe::{Sink, Source},
    status::{PullResult, PushResult, TransportState},
};

fn downstream_closed() -> PipeError {
    PipeError::new(codes::DOWNSTREAM_CLOSED, "sink closed before source was exhausted")
}

struct Drain<S: Source, K> {
    source: S,
    sink: K,
    pending: RefCell<Option<S::Item>>,
    settled: Cell<bool>,
    done: Deferred<()>,
}

/// 把 `source` 的全部元素转移到 `sink`，返回排空结果。
///
/// 结果在源优雅结束时为 `Ok(())`，任一侧终止时为对应原因。
pub fn drain_into<S, K>(source: S, sink: K) -> Deferred<()>
where
    S: Source + 'static,
    K: Sink<Item = S::Item> + 'static,
{
    let drain = Rc::new(Drain {
        source,
        sink,
        pending: RefCell::new(None),
        settled: Cell::new(false),
        done: Deferred::new(),
    });
    let done = drain.done.clone();
    Drain::watch_sink(&drain);
    Drain::pump(drain);
    done
}

impl<S, K> Drain<S, K>
where
    S: Source + 'static,
    K: Sink<Item = S::Item> + 'static,
{
    fn watch_sink(this: &Rc<Self>) {
        let weak = Rc::downgrade(this);
        this.sink.on_input_terminal(Box::new(move || {
            if let Some(drain) = weak.upgrade() {
                drain.on_sink_terminal();
            }
        }));
    }

    fn on_sink_terminal(&self) {
        if self.settled.get() {
            return;
        }
        match self.sink.input_state() {
            TransportState::Open => {}
            TransportState::Closed => self.abort_source(downstream_closed()),
            TransportState::Terminated(cause) => self.abort_source(cause),
        }
    }

    fn pump(this: Rc<Self>) {
        loop {
            if this.settled.get() {
                return;
            }
            match this.sink.input_state() {
                TransportState::Open => {}
                TransportState::Closed => return this.abort_source(downstream_closed()),
                TransportState::Terminated(cause) => return this.abort_source(cause),
            }
            let pending = this.pending.borrow_mut().take();
            let next = match pending {
                Some(item) => PullResult::Item(item),
                None => match this.source.try_pull() {
                    Some(result) => result,
                    None => {
                        let again = Rc::clone(&this);
                        this.source.pull(Box::new(move |result| {
                            if again.handle(result) {
                                Self::pump(again);
                            }
                        }));
                        return;
                    }
                },
            };
            if !this.handle(next) {
                return;
            }
        }
    }

    /// 处理一个拉取结果；返回 `true` 表示可以继续同步推进。
    fn handle(self: &Rc<Self>, result: PullResult<S::Item>) -> bool {
        match result {
            PullResult::Item(item) => match self.sink.push(item) {
                PushResult::Ok => true,
                PushResult::Filled(trigger) => {
                    trace!("drain paused, sink filled");
                    let again = Rc::clone(self);
                    trigger.on_ready(move || Self::pump(again));
                    false
                }
                PushResult::Full(trigger, item) => {
                    trace!("drain paused, sink full");
                    *self.pending.borrow_mut() = Some(item);
                    let again = Rc::clone(self);
                    trigger.on_ready(move || Self::pump(again));
                    false
                }
                PushResult::Closed => {
                    self.abort_source(downstream_closed());
                    false
                }
                PushResult::Error(cause) => {
                    self.abort_source(cause);
                    false
                }
            },
            PullResult::Closed => {
                if self.settled.replace(true) {
                    return false;
                }
                debug!("drain finished, completing sink");
                self.sink.complete();
                self.done.succeed(());
                false
            }
            PullResult::Error(cause) => {
                if self.settled.replace(true) {
                    return false;
                }
                debug!(code = cause.code(), "drain source failed, terminating sink");
                self.sink.terminate(cause.clone());
                self.done.fail(cause);
                false
            }
        }
    }

    fn abort_source(&self, cause: PipeError) {
        if self.settled.replace(true) {
            return;
        }
        debug!(code = cause.code(), "drain sink unavailable, terminating source");
        self.pending.borrow_mut().take();
        self.source.terminate(cause.clone());
        self.done.fail(cause);
    }
}

struct Feed<K: Sink, I> {
    sink: K,
    items: RefCell<I>,
    pending: RefCell<Option<K::Item>>,
    pushed: Cell<usize>,
    done: Deferred<usize>,
}

/// 把序列逐个推入 `sink`，兑现成功推送的数量。
///
/// 汇先关闭时以 `pipe.downstream_closed` 失败，汇被终止时以其原因失败。
pub fn feed<K, I>(items: I, sink: K) -> Deferred<usize>
where
    K: Sink + 'static,
    I: IntoIterator<Item = K::Item>,
    I::IntoIter: 'static,
{
    let feed = Rc::new(Feed {
        sink,
        items: RefCell::new(items.into_iter()),
        pending: RefCell::new(None),
        pushed: Cell::new(0),
        done: Deferred::new(),
    });
    let done = feed.done.clone();
    Feed::pump(feed);
    done
}

impl<K, I> Feed<K, I>
where
    K: Sink + 'static,
    I: Iterator<Item = K::Item> + 'static,
{
    fn pump(this: Rc<Self>) {
        loop {
            let pending = this.pending.borrow_mut().take();
            let next = match pending {
                Some(item) => Some(item),
                None => this.items.borrow_mut().next(),
            };
            let Some(item) = next else {
                this.done.succeed(this.pushed.get());
                return;
            };
            match this.sink.push(item) {
                PushResult::Ok => this.pushed.set(this.pushed.get() + 1),
                PushResult::Filled(trigger) => {
                    this.pushed.set(this.pushed.get() + 1);
                    let again = Rc::clone(&this);
                    trigger.on_ready(move || Self::pump(again));
                    return;
                }
                PushResult::Full(trigger, item) => {
                    *this.pending.borrow_mut() = Some(item);
                    let again = Rc::clone(&this);
                    trigger.on_ready(move || Self::pump(again));
                    return;
                }
                PushResult::Closed => {
                    this.done.fail(downstream_closed());
                    return;
                }
                PushResult::Error(cause) => {
                    this.done.fail(cause);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{pipe::BufferedPipe, pipe::Terminate};

    #[test]
    fn drain_moves_everything_across_a_small_sink() {
        let source = BufferedPipe::new(16);
        for v in 0..10 {
            let _ = source.push(v);
        }
        source.complete();

        let sink = BufferedPipe::new(2);
        let done = drain_into(source.clone(), sink.clone());
        let mut seen = Vec::new();
        while let Some(PullResult::Item(v)) = sink.try_pull() {
            seen.push(v);
        }
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert_eq!(sink.try_pull(), Some(PullResult::Closed));
        assert_eq!(done.try_take(), Some(Ok(())));
    }

    #[test]
    fn sink_termination_propagates_to_source() {
        let source = BufferedPipe::<u8>::new(4);
        let sink = BufferedPipe::new(4);
        let done = drain_into(source.clone(), sink.clone());
        sink.terminate(PipeError::new(codes::CANCELLED, "consumer gone"));
        let _ = source.push(1);

        assert!(matches!(
            source.output_state(),
            TransportState::Terminated(ref e) if e.is(codes::CANCELLED)
        ));
        assert!(matches!(done.try_take(), Some(Err(e)) if e.is(codes::CANCELLED)));
    }

    #[test]
    fn sink_termination_reaches_idle_source_immediately() {
        let source = BufferedPipe::<u8>::new(4);
        let sink = BufferedPipe::new(4);
        let done = drain_into(source.clone(), sink.clone());
        sink.terminate(PipeError::new(codes::CANCELLED, "consumer gone"));

        assert!(matches!(
            source.output_state(),
            TransportState::Terminated(ref e) if e.is(codes::CANCELLED)
        ));
        assert!(matches!(done.try_take(), Some(Err(e)) if e.is(codes::CANCELLED)));
    }

    #[test]
    fn independent_sink_close_reaches_idle_source() {
        let source = BufferedPipe::<u8>::new(4);
        let sink = BufferedPipe::new(4);
        let done = drain_into(source.clone(), sink.clone());
        sink.complete();

        assert!(matches!(
            source.output_state(),
            TransportState::Terminated(ref e) if e.is(codes::DOWNSTREAM_CLOSED)
        ));
        assert!(matches!(done.try_take(), Some(Err(e)) if e.is(codes::DOWNSTREAM_CLOSED)));
    }

    #[test]
    fn completing_the_sink_itself_is_not_a_downstream_close() {
        let source = BufferedPipe::new(4);
        let sink = BufferedPipe::new(4);
        let done = drain_into(source.clone(), sink.clone());
        let _ = source.push(1u8);
        source.complete();

        assert_eq!(done.try_take(), Some(Ok(())));
        assert_eq!(sink.try_pull(), Some(PullResult::Item(1)));
        assert_eq!(sink.try_pull(), Some(PullResult::Closed));
    }

    #[test]
    fn feed_waits_on_backpressure_and_counts_items() {
        let sink = BufferedPipe::new(1);
        let done = feed(vec![1, 2, 3], sink.clone());
        assert!(!done.is_resolved(), "容量为 1 时灌入应挂起");

        let mut seen = Vec::new();
        while let Some(PullResult::Item(v)) = sink.try_pull() {
            seen.push(v);
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(done.try_take(), Some(Ok(3)));
        assert!(sink.input_state().is_open(), "feed 不负责完成汇");
    }

    #[test]
    fn feed_into_closed_sink_fails() {
        let sink = BufferedPipe::<u8>::new(4);
        sink.complete();
        let done = feed([1], sink);
        assert!(matches!(done.try_take(), Some(Err(e)) if e.is(codes::DOWNSTREAM_CLOSED)));
    }
}

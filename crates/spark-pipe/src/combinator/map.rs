//! 逐元素变换视图：[`Mapped`]、[`FilterMap`] 与生产侧的 [`MapInput`]。
//!
//! 视图本身不持有缓冲，状态查询与终止全部委托给底层端点。
use std::{marker::PhantomData, ops::ControlFlow, rc::Rc};

use tracing::error;

use crate::{
    error::{PipeError, codes},
    pipe::{PullCallback, PullHandler, Sink, Source, TerminalCallback, Terminate},
    status::{PullResult, PushResult, TransportState},
    trigger::Trigger,
};

/// 对每个拉出的元素应用 `f` 的源视图。
pub struct Mapped<S, F> {
    inner: S,
    f: Rc<F>,
}

impl<S, F> Mapped<S, F> {
    pub(crate) fn new(inner: S, f: F) -> Self {
        Self {
            inner,
            f: Rc::new(f),
        }
    }

    /// 取回底层源。
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Terminate, F> Terminate for Mapped<S, F> {
    fn terminate(&self, cause: PipeError) {
        self.inner.terminate(cause);
    }
}

impl<S, F, U> Source for Mapped<S, F>
where
    S: Source,
    F: Fn(S::Item) -> U + 'static,
    U: 'static,
{
    type Item = U;

    fn output_state(&self) -> TransportState {
        self.inner.output_state()
    }

    fn try_pull(&self) -> Option<PullResult<U>> {
        self.inner.try_pull().map(|r| r.map(|item| (self.f)(item)))
    }

    fn pull(&self, callback: PullCallback<U>) {
        let f = Rc::clone(&self.f);
        self.inner
            .pull(Box::new(move |r| callback(r.map(|item| f(item)))));
    }

    fn pull_while(&self, mut handler: PullHandler<U>) {
        let f = Rc::clone(&self.f);
        self.inner
            .pull_while(Box::new(move |r| handler(r.map(|item| f(item)))));
    }
}

/// 映射并丢弃 `None` 的源视图。
///
/// 被丢弃的元素对下游不可见；单次 `pull` 会持续向底层拉取，直到得到保留的元素或终态。
pub struct FilterMap<S, F> {
    inner: Rc<S>,
    f: Rc<F>,
}

impl<S, F> FilterMap<S, F> {
    pub(crate) fn new(inner: S, f: F) -> Self {
        Self {
            inner: Rc::new(inner),
            f: Rc::new(f),
        }
    }
}

impl<S: Terminate, F> Terminate for FilterMap<S, F> {
    fn terminate(&self, cause: PipeError) {
        self.inner.terminate(cause);
    }
}

fn pull_filtered<S, F, U>(inner: Rc<S>, f: Rc<F>, callback: PullCallback<U>)
where
    S: Source + 'static,
    F: Fn(S::Item) -> Option<U> + 'static,
    U: 'static,
{
    // 连续被过滤的已缓冲元素在此同步消化，避免回调链逐层加深。
    loop {
        match inner.try_pull() {
            Some(PullResult::Item(item)) => match f(item) {
                Some(kept) => return callback(PullResult::Item(kept)),
                None => continue,
            },
            Some(PullResult::Closed) => return callback(PullResult::Closed),
            Some(PullResult::Error(cause)) => return callback(PullResult::Error(cause)),
            None => break,
        }
    }
    let source = Rc::clone(&inner);
    inner.pull(Box::new(move |r| match r {
        PullResult::Item(item) => match f(item) {
            Some(kept) => callback(PullResult::Item(kept)),
            None => pull_filtered(source, f, callback),
        },
        PullResult::Closed => callback(PullResult::Closed),
        PullResult::Error(cause) => callback(PullResult::Error(cause)),
    }));
}

impl<S, F, U> Source for FilterMap<S, F>
where
    S: Source + 'static,
    F: Fn(S::Item) -> Option<U> + 'static,
    U: 'static,
{
    type Item = U;

    fn output_state(&self) -> TransportState {
        self.inner.output_state()
    }

    fn try_pull(&self) -> Option<PullResult<U>> {
        loop {
            match self.inner.try_pull()? {
                PullResult::Item(item) => {
                    if let Some(kept) = (self.f)(item) {
                        return Some(PullResult::Item(kept));
                    }
                }
                PullResult::Closed => return Some(PullResult::Closed),
                PullResult::Error(cause) => return Some(PullResult::Error(cause)),
            }
        }
    }

    fn pull(&self, callback: PullCallback<U>) {
        pull_filtered(Rc::clone(&self.inner), Rc::clone(&self.f), callback);
    }

    fn pull_while(&self, mut handler: PullHandler<U>) {
        let f = Rc::clone(&self.f);
        self.inner.pull_while(Box::new(move |r| match r {
            PullResult::Item(item) => match f(item) {
                Some(kept) => handler(PullResult::Item(kept)),
                None => ControlFlow::Continue(()),
            },
            PullResult::Closed => handler(PullResult::Closed),
            PullResult::Error(cause) => handler(PullResult::Error(cause)),
        }));
    }
}

/// 推送前先对元素应用 `f` 的汇视图。
///
/// 变换后的元素无法逆映射，因此背压判断在变换之前完成：底层报告
/// [`Sink::pending_trigger`] 时直接以原元素返回 `Full`。
///
/// 底层汇未报告触发器却返回 `Full` 属于实现缺陷：元素已被变换无法交还，
/// 视图以 `pipe.protocol_violation` 终止底层汇并返回 `Error`。
pub struct MapInput<K, F, A> {
    inner: K,
    f: F,
    _input: PhantomData<fn(A)>,
}

impl<K, F, A> MapInput<K, F, A> {
    pub(crate) fn new(inner: K, f: F) -> Self {
        Self {
            inner,
            f,
            _input: PhantomData,
        }
    }

    /// 取回底层汇。
    pub fn into_inner(self) -> K {
        self.inner
    }
}

impl<K: Terminate, F, A> Terminate for MapInput<K, F, A> {
    fn terminate(&self, cause: PipeError) {
        self.inner.terminate(cause);
    }
}

impl<K, F, A> Sink for MapInput<K, F, A>
where
    K: Sink,
    F: Fn(A) -> K::Item,
    A: 'static,
{
    type Item = A;

    fn input_state(&self) -> TransportState {
        self.inner.input_state()
    }

    fn push(&self, item: A) -> PushResult<A> {
        if let Some(trigger) = self.inner.pending_trigger() {
            return PushResult::Full(trigger, item);
        }
        match self.inner.push((self.f)(item)) {
            PushResult::Ok => PushResult::Ok,
            PushResult::Filled(trigger) => PushResult::Filled(trigger),
            PushResult::Full(..) => {
                error!("underlying sink rejected a mapped item without reporting readiness");
                let cause = PipeError::new(
                    codes::PROTOCOL_VIOLATION,
                    "sink returned Full without a pending trigger",
                );
                self.inner.terminate(cause.clone());
                PushResult::Error(cause)
            }
            PushResult::Closed => PushResult::Closed,
            PushResult::Error(cause) => PushResult::Error(cause),
        }
    }

    fn complete(&self) {
        self.inner.complete();
    }

    fn on_input_terminal(&self, callback: TerminalCallback) {
        self.inner.on_input_terminal(callback);
    }

    fn can_push(&self) -> bool {
        self.inner.can_push()
    }

    fn pending_trigger(&self) -> Option<Trigger> {
        self.inner.pending_trigger()
    }
}

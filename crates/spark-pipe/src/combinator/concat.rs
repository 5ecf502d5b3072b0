//! 顺序拼接两个源：先排空 `first`，再衔接 `second`。
//!
//! ## 契约说明（What）
//! - `first` 终止时拼接体立即以同一原因终止；`second` 在拉取路径观察到该终止时被连带终止，
//!   `output_state` 只做查询；
//! - `second` 在 `first` 耗尽之前被单独终止，不影响拼接体的状态，直到轮到它时才暴露；
//! - 对拼接体调用 `terminate` 会终止所有尚未到达终态的组成源。
use std::{cell::Cell, ops::ControlFlow, rc::Rc};

use tracing::debug;

use crate::{
    error::PipeError,
    pipe::{PullCallback, PullHandler, Source, Terminate},
    status::{PullResult, TransportState},
};

struct Inner<A, B> {
    first: A,
    second: B,
    first_done: Cell<bool>,
}

impl<A: Source, B: Source<Item = A::Item>> Inner<A, B> {
    fn advance(&self) {
        if !self.first_done.replace(true) {
            debug!("first source exhausted, switching to second");
        }
    }

    fn fail_second(&self, cause: &PipeError) {
        if self.second.output_state().is_open() {
            self.second.terminate(cause.clone());
        }
    }
}

/// 两个源的顺序拼接。
pub struct Concat<A, B> {
    inner: Rc<Inner<A, B>>,
}

impl<A, B> Concat<A, B> {
    pub(crate) fn new(first: A, second: B) -> Self {
        Self {
            inner: Rc::new(Inner {
                first,
                second,
                first_done: Cell::new(false),
            }),
        }
    }
}

impl<A, B> Terminate for Concat<A, B>
where
    A: Source,
    B: Source<Item = A::Item>,
{
    fn terminate(&self, cause: PipeError) {
        if !self.inner.first_done.get() && self.inner.first.output_state().is_open() {
            self.inner.first.terminate(cause.clone());
        }
        self.inner.fail_second(&cause);
    }
}

impl<A, B> Source for Concat<A, B>
where
    A: Source + 'static,
    B: Source<Item = A::Item> + 'static,
{
    type Item = A::Item;

    fn output_state(&self) -> TransportState {
        let inner = &self.inner;
        if inner.first_done.get() {
            return inner.second.output_state();
        }
        match inner.first.output_state() {
            TransportState::Closed => inner.second.output_state(),
            state => state,
        }
    }

    fn try_pull(&self) -> Option<PullResult<Self::Item>> {
        let inner = &self.inner;
        if !inner.first_done.get() {
            match inner.first.try_pull()? {
                PullResult::Closed => inner.advance(),
                PullResult::Error(cause) => {
                    inner.fail_second(&cause);
                    return Some(PullResult::Error(cause));
                }
                item => return Some(item),
            }
        }
        inner.second.try_pull()
    }

    fn pull(&self, callback: PullCallback<Self::Item>) {
        if self.inner.first_done.get() {
            return self.inner.second.pull(callback);
        }
        let inner = Rc::clone(&self.inner);
        self.inner.first.pull(Box::new(move |r| match r {
            PullResult::Closed => {
                inner.advance();
                inner.second.pull(callback);
            }
            PullResult::Error(cause) => {
                inner.fail_second(&cause);
                callback(PullResult::Error(cause));
            }
            item => callback(item),
        }));
    }

    fn pull_while(&self, handler: PullHandler<Self::Item>) {
        if self.inner.first_done.get() {
            return self.inner.second.pull_while(handler);
        }
        let inner = Rc::clone(&self.inner);
        let mut handler = Some(handler);
        self.inner.first.pull_while(Box::new(move |r| match r {
            PullResult::Closed => {
                inner.advance();
                if let Some(handler) = handler.take() {
                    inner.second.pull_while(handler);
                }
                ControlFlow::Break(())
            }
            PullResult::Error(cause) => {
                inner.fail_second(&cause);
                match handler.as_mut() {
                    Some(handler) => handler(PullResult::Error(cause)),
                    None => ControlFlow::Break(()),
                }
            }
            item => match handler.as_mut() {
                Some(handler) => handler(item),
                None => ControlFlow::Break(()),
            },
        }));
    }
}

//! 由迭代器驱动的源：[`IterSource`] 及其便捷构造 [`from_iter`]、[`one`]、[`empty`]、[`failed`]。
use std::{cell::RefCell, iter::Peekable};

use crate::{
    error::PipeError,
    pipe::{PullCallback, PullHandler, Source, Terminate},
    status::{PullResult, TransportState},
};

enum State<I: Iterator> {
    Active(Peekable<I>),
    Exhausted,
    Terminated(PipeError),
}

/// 同步产出迭代器元素的源。
///
/// 迭代器在拉取时惰性推进；最后一个元素被取走后源立即报告 `Closed`。
pub struct IterSource<I: Iterator> {
    state: RefCell<State<I>>,
}

impl<I: Iterator> IterSource<I> {
    /// 以迭代器创建源。
    pub fn new(items: I) -> Self {
        Self {
            state: RefCell::new(State::Active(items.peekable())),
        }
    }

    fn next_result(&self) -> PullResult<I::Item> {
        let mut state = self.state.borrow_mut();
        let next = match &mut *state {
            State::Active(items) => items.next(),
            State::Exhausted => return PullResult::Closed,
            State::Terminated(cause) => return PullResult::Error(cause.clone()),
        };
        match next {
            Some(item) => PullResult::Item(item),
            None => {
                *state = State::Exhausted;
                PullResult::Closed
            }
        }
    }
}

impl<I: Iterator> Terminate for IterSource<I> {
    fn terminate(&self, cause: PipeError) {
        let mut state = self.state.borrow_mut();
        if let State::Active(_) = &*state {
            *state = State::Terminated(cause);
        }
    }
}

impl<I> Source for IterSource<I>
where
    I: Iterator,
    I::Item: 'static,
{
    type Item = I::Item;

    fn output_state(&self) -> TransportState {
        let mut state = self.state.borrow_mut();
        let drained = match &mut *state {
            State::Active(items) => items.peek().is_none(),
            State::Exhausted => return TransportState::Closed,
            State::Terminated(cause) => return TransportState::Terminated(cause.clone()),
        };
        if drained {
            *state = State::Exhausted;
            TransportState::Closed
        } else {
            TransportState::Open
        }
    }

    fn try_pull(&self) -> Option<PullResult<I::Item>> {
        Some(self.next_result())
    }

    fn pull(&self, callback: PullCallback<I::Item>) {
        callback(self.next_result());
    }

    fn pull_while(&self, mut handler: PullHandler<I::Item>) {
        loop {
            let result = self.next_result();
            let terminal = result.is_terminal();
            if handler(result).is_break() || terminal {
                return;
            }
        }
    }
}

/// 以任意可迭代序列创建源。
pub fn from_iter<I>(items: I) -> IterSource<I::IntoIter>
where
    I: IntoIterator,
{
    IterSource::new(items.into_iter())
}

/// 只产出一个元素的源。
pub fn one<T>(item: T) -> IterSource<std::iter::Once<T>> {
    IterSource::new(std::iter::once(item))
}

/// 立即关闭的源。
pub fn empty<T>() -> IterSource<std::iter::Empty<T>> {
    IterSource::new(std::iter::empty())
}

/// 以给定原因预先终止的源。
pub fn failed<T>(cause: PipeError) -> IterSource<std::iter::Empty<T>> {
    IterSource {
        state: RefCell::new(State::Terminated(cause)),
    }
}

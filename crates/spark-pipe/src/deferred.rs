//! 折叠类组合子的延迟结果。
//!
//! ## 契约说明（What）
//! - [`Deferred`] 至多被兑现一次，兑现内容为值或终止原因；重复兑现被忽略；
//! - 观察方式：登记回调（[`on_complete`](Deferred::on_complete)）、轮询（[`poll`](Deferred::poll)）、
//!   一次性取走（[`try_take`](Deferred::try_take)）或作为 [`Future`] 等待；
//! - 结果只能被取走一次：回调、`try_take` 与 `Future` 三者中先到者获得结果。
use std::{
    cell::RefCell,
    fmt,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

use crate::error::{PipeError, Result};

type CompleteCallback<T> = Box<dyn FnOnce(Result<T>)>;

/// 轮询延迟结果得到的快照。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion<T> {
    /// 尚未兑现。
    Pending,
    /// 已兑现。
    Ready(Result<T>),
    /// 已兑现且结果已被取走。
    Taken,
}

struct State<T> {
    result: Option<Result<T>>,
    resolved: bool,
    callback: Option<CompleteCallback<T>>,
    waker: Option<Waker>,
}

/// 至多兑现一次的延迟结果句柄。
pub struct Deferred<T> {
    state: Rc<RefCell<State<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: 'static> Deferred<T> {
    /// 创建未兑现的延迟结果。
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                result: None,
                resolved: false,
                callback: None,
                waker: None,
            })),
        }
    }

    /// 以值兑现。
    pub fn succeed(&self, value: T) {
        self.resolve(Ok(value));
    }

    /// 以终止原因兑现。
    pub fn fail(&self, cause: PipeError) {
        self.resolve(Err(cause));
    }

    /// 兑现结果；若已兑现则忽略。
    pub fn resolve(&self, result: Result<T>) {
        let (callback, waker, result) = {
            let mut state = self.state.borrow_mut();
            if state.resolved {
                return;
            }
            state.resolved = true;
            match state.callback.take() {
                Some(callback) => (Some(callback), None, Some(result)),
                None => {
                    state.result = Some(result);
                    (None, state.waker.take(), None)
                }
            }
        };
        if let (Some(callback), Some(result)) = (callback, result) {
            callback(result);
        }
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// 登记兑现回调。若已兑现且结果未被取走，回调立即执行。
    pub fn on_complete(&self, callback: impl FnOnce(Result<T>) + 'static) {
        let ready = {
            let mut state = self.state.borrow_mut();
            match state.result.take() {
                Some(result) => Some(result),
                None => {
                    if !state.resolved {
                        state.callback = Some(Box::new(callback));
                    }
                    return;
                }
            }
        };
        if let Some(result) = ready {
            callback(result);
        }
    }

    /// 一次性取走结果。
    pub fn try_take(&self) -> Option<Result<T>> {
        self.state.borrow_mut().result.take()
    }

    /// 是否已兑现。
    pub fn is_resolved(&self) -> bool {
        self.state.borrow().resolved
    }

    /// 轮询当前快照。
    pub fn poll(&self) -> Completion<T>
    where
        T: Clone,
    {
        let state = self.state.borrow();
        match (&state.result, state.resolved) {
            (Some(result), _) => Completion::Ready(result.clone()),
            (None, true) => Completion::Taken,
            (None, false) => Completion::Pending,
        }
    }
}

impl<T: 'static> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("resolved", &self.state.borrow().resolved)
            .finish()
    }
}

impl<T: 'static> Future for Deferred<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.borrow_mut();
        match state.result.take() {
            Some(result) => Poll::Ready(result),
            None => {
                state.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

//! 吞掉一切的汇。
use std::{cell::RefCell, marker::PhantomData, mem};

use crate::{
    error::PipeError,
    pipe::{Sink, TerminalCallback, Terminate},
    status::{PushResult, TransportState},
};

/// 接收并丢弃所有元素的汇，永不产生背压。
pub struct Blackhole<T> {
    state: RefCell<TransportState>,
    watchers: RefCell<Vec<TerminalCallback>>,
    _item: PhantomData<fn(T)>,
}

impl<T> Blackhole<T> {
    /// 创建打开状态的黑洞汇。
    pub fn new() -> Self {
        Self {
            state: RefCell::new(TransportState::Open),
            watchers: RefCell::new(Vec::new()),
            _item: PhantomData,
        }
    }
}

impl<T> Default for Blackhole<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Blackhole<T> {
    fn close_with(&self, next: TransportState) {
        {
            let mut state = self.state.borrow_mut();
            if !state.is_open() {
                return;
            }
            *state = next;
        }
        let watchers = mem::take(&mut *self.watchers.borrow_mut());
        for watcher in watchers {
            watcher();
        }
    }
}

impl<T> Terminate for Blackhole<T> {
    fn terminate(&self, cause: PipeError) {
        self.close_with(TransportState::Terminated(cause));
    }
}

impl<T: 'static> Sink for Blackhole<T> {
    type Item = T;

    fn input_state(&self) -> TransportState {
        self.state.borrow().clone()
    }

    fn push(&self, item: T) -> PushResult<T> {
        match &*self.state.borrow() {
            TransportState::Open => {
                drop(item);
                PushResult::Ok
            }
            TransportState::Closed => PushResult::Closed,
            TransportState::Terminated(cause) => PushResult::Error(cause.clone()),
        }
    }

    fn complete(&self) {
        self.close_with(TransportState::Closed);
    }

    fn on_input_terminal(&self, callback: TerminalCallback) {
        let open = self.state.borrow().is_open();
        if open {
            self.watchers.borrow_mut().push(callback);
        } else {
            callback();
        }
    }
}

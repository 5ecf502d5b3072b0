//! 子流复用与解复用。
//!
//! ## 设计目标（Why）
//! - 在单一有序帧流上承载多个逻辑子流：帧通过 [`StreamFrame`] 暴露流键与组成部分；
//! - 解复用侧把帧流按键拆分为独立的子管道，复用侧把多个子管道汇合回一个帧流。
//!
//! ## 契约说明（What）
//! - 子流由 `Head` 开启、`Body` 延续、`Tail` 结束；
//! - 解复用侧的失败立即传播到所有活跃子管道；复用侧的失败由子管道在下一次推送时惰性发现。
use std::{fmt, hash::Hash};

use crate::{
    error::PipeError,
    pipe::{BufferedPipe, PullCallback, PullHandler, Source, Terminate},
    status::{PullResult, TransportState},
};

mod demux;
mod mux;

pub use demux::{Demultiplexer, demultiplex};
pub use mux::{MultiplexState, Multiplexer, multiplex};

/// 帧在子流中的位置。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Component {
    /// 开启子流的首帧。
    Head,
    /// 子流中间帧。
    Body,
    /// 结束子流的尾帧。
    Tail,
}

/// 可被复用层路由的帧。
///
/// # 契约说明（What）
/// - `stream_key` 在同一子流的所有帧上必须一致；
/// - 同一时刻每个键至多对应一个活跃子流，`Tail` 之后键可被重新开启。
pub trait StreamFrame: 'static {
    /// 流键。
    type Key: Eq + Hash + Clone + fmt::Debug + 'static;

    /// 所属子流的键。
    fn stream_key(&self) -> Self::Key;

    /// 帧在子流中的位置。
    fn component(&self) -> Component;
}

/// 流键与其专属子管道的配对。
pub struct SubSource<F: StreamFrame> {
    key: F::Key,
    pipe: BufferedPipe<F>,
}

impl<F: StreamFrame> SubSource<F> {
    /// 以键和子管道组装。
    pub fn new(key: F::Key, pipe: BufferedPipe<F>) -> Self {
        Self { key, pipe }
    }

    /// 流键。
    pub fn key(&self) -> &F::Key {
        &self.key
    }

    /// 子管道句柄。
    pub fn pipe(&self) -> &BufferedPipe<F> {
        &self.pipe
    }

    /// 拆分为键与子管道。
    pub fn into_parts(self) -> (F::Key, BufferedPipe<F>) {
        (self.key, self.pipe)
    }
}

impl<F: StreamFrame> fmt::Debug for SubSource<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubSource")
            .field("key", &self.key)
            .field("pipe", &self.pipe)
            .finish()
    }
}

impl<F: StreamFrame> Terminate for SubSource<F> {
    fn terminate(&self, cause: PipeError) {
        self.pipe.terminate(cause);
    }
}

impl<F: StreamFrame> Source for SubSource<F> {
    type Item = F;

    fn output_state(&self) -> TransportState {
        self.pipe.output_state()
    }

    fn try_pull(&self) -> Option<PullResult<F>> {
        self.pipe.try_pull()
    }

    fn pull(&self, callback: PullCallback<F>) {
        self.pipe.pull(callback);
    }

    fn pull_while(&self, handler: PullHandler<F>) {
        self.pipe.pull_while(handler);
    }
}

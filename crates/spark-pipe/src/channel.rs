//! 双向通道：一个端点同时是某个汇与另一个源。
//!
//! ## 契约说明（What）
//! - [`Channel`] 把一个 [`Sink`] 与一个 [`Source`] 组合为单一端点，推/拉分别委托；
//! - 对端点调用 `terminate` 会同时终止两个方向；
//! - [`channel_pair`] 创建两个交叉连接的端点：一端推入的元素从另一端拉出。
use crate::{
    error::PipeError,
    pipe::{BufferedPipe, PullCallback, PullHandler, Sink, Source, TerminalCallback, Terminate},
    status::{PullResult, PushResult, TransportState},
    trigger::Trigger,
};

/// 汇与源组成的双向端点。
#[derive(Clone, Debug)]
pub struct Channel<K, S> {
    sink: K,
    source: S,
}

/// 以缓冲管道组成的双向端点：推入 `A`，拉出 `B`。
pub type DuplexChannel<A, B> = Channel<BufferedPipe<A>, BufferedPipe<B>>;

impl<K, S> Channel<K, S> {
    /// 组合一个汇与一个源。
    pub fn new(sink: K, source: S) -> Self {
        Self { sink, source }
    }

    /// 发送方向。
    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// 接收方向。
    pub fn source(&self) -> &S {
        &self.source
    }

    /// 拆分为两个方向。
    pub fn into_parts(self) -> (K, S) {
        (self.sink, self.source)
    }
}

impl<K: Terminate, S: Terminate> Terminate for Channel<K, S> {
    fn terminate(&self, cause: PipeError) {
        self.sink.terminate(cause.clone());
        self.source.terminate(cause);
    }
}

impl<K: Sink, S: Terminate> Sink for Channel<K, S> {
    type Item = K::Item;

    fn input_state(&self) -> TransportState {
        self.sink.input_state()
    }

    fn push(&self, item: K::Item) -> PushResult<K::Item> {
        self.sink.push(item)
    }

    fn complete(&self) {
        self.sink.complete();
    }

    fn on_input_terminal(&self, callback: TerminalCallback) {
        self.sink.on_input_terminal(callback);
    }

    fn can_push(&self) -> bool {
        self.sink.can_push()
    }

    fn pending_trigger(&self) -> Option<Trigger> {
        self.sink.pending_trigger()
    }
}

impl<K: Terminate, S: Source> Source for Channel<K, S> {
    type Item = S::Item;

    fn output_state(&self) -> TransportState {
        self.source.output_state()
    }

    fn try_pull(&self) -> Option<PullResult<S::Item>> {
        self.source.try_pull()
    }

    fn pull(&self, callback: PullCallback<S::Item>) {
        self.source.pull(callback);
    }

    fn pull_while(&self, handler: PullHandler<S::Item>) {
        self.source.pull_while(handler);
    }
}

/// 创建一对交叉连接的端点。
///
/// 左端推入的 `A` 从右端拉出，右端推入的 `B` 从左端拉出；两个方向各自拥有容量为
/// `capacity` 的缓冲。
///
/// ```rust
/// use spark_pipe::prelude::*;
///
/// let (client, server) = channel_pair::<&str, usize>(4);
/// let _ = client.push("ping");
/// assert_eq!(server.try_pull(), Some(PullResult::Item("ping")));
/// let _ = server.push(4);
/// assert_eq!(client.try_pull(), Some(PullResult::Item(4)));
/// ```
pub fn channel_pair<A: 'static, B: 'static>(
    capacity: usize,
) -> (DuplexChannel<A, B>, DuplexChannel<B, A>) {
    let forward = BufferedPipe::new(capacity);
    let backward = BufferedPipe::new(capacity);
    (
        Channel::new(forward.clone(), backward.clone()),
        Channel::new(backward, forward),
    )
}

//! 复用与解复用的集成测试。
//!
//! # 结构说明 (How)
//! - `Frame`：测试用帧，携带流键、组成部分与数值负载；
//! - `demux`：解复用契约（路由、背压、基础流终态传播、畸形帧策略）；
//! - `mux`：复用契约（完成等待、惰性失败发现、基础流丢失）；
//! - `roundtrip`：复用后再解复用，验证子流内容不变。
use spark_pipe::prelude::*;

mod demux;
mod mux;
mod roundtrip;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub key: u32,
    pub component: Component,
    pub value: u32,
}

impl Frame {
    pub fn new(key: u32, component: Component, value: u32) -> Self {
        Self {
            key,
            component,
            value,
        }
    }
}

impl StreamFrame for Frame {
    type Key = u32;

    fn stream_key(&self) -> u32 {
        self.key
    }

    fn component(&self) -> Component {
        self.component
    }
}

/// 以给定帧序列填充一个已完成的基础管道。
pub fn closed_base(frames: impl IntoIterator<Item = Frame>) -> BufferedPipe<Frame> {
    let frames: Vec<Frame> = frames.into_iter().collect();
    let base = BufferedPipe::new(frames.len().max(1));
    for frame in frames {
        let _ = base.push(frame);
    }
    base.complete();
    base
}

//! 常用类型与扩展 Trait 的一站式导入。
//!
//! ```rust
//! use spark_pipe::prelude::*;
//!
//! let pipe = BufferedPipe::new(4);
//! let sum = pipe.clone().fold(0, |acc, v: u32| acc + v);
//! for v in 1..=3 {
//!     let _ = pipe.push(v);
//! }
//! pipe.complete();
//! assert_eq!(sum.try_take(), Some(Ok(6)));
//! ```
pub use crate::{
    channel::{Channel, DuplexChannel, channel_pair},
    combinator::{Blackhole, IterSource, SinkExt, SourceExt, empty, failed, from_iter, one},
    config::{DemuxConfig, MalformedFramePolicy, PipeConfig},
    deferred::{Completion, Deferred},
    error::{PipeError, codes},
    multiplex::{
        Component, Demultiplexer, MultiplexState, Multiplexer, StreamFrame, SubSource,
        demultiplex, multiplex,
    },
    pipe::{BufferedPipe, Sink, Source, Terminate},
    status::{PullResult, PushResult, TransportState},
    trigger::Trigger,
};

#![deny(unsafe_code)]
#![doc = "spark-pipe: 单线程、非阻塞、背压感知的流式管道引擎。"]
#![doc = ""]
#![doc = "== 执行模型 =="]
#![doc = "所有句柄均为 `Rc<RefCell<_>>` 共享状态，必须由同一串行上下文（事件循环 / Actor）访问；"]
#![doc = "操作要么立即完成，要么登记回调并由后续推/拉同步触发，绝不阻塞线程。"]
#![doc = ""]
#![doc = "== 模块分层 =="]
#![doc = "- [`pipe`]：推/拉契约与有界缓冲管道；"]
#![doc = "- [`combinator`]：映射、排空、折叠、拼接等组合子；"]
#![doc = "- [`channel`]：双向通道；"]
#![doc = "- [`multiplex`]：以流键区分子流的复用/解复用；"]
#![doc = "- [`trigger`]/[`deferred`]：背压就绪与延迟结果原语。"]

pub mod channel;
pub mod combinator;
pub mod config;
pub mod deferred;
pub mod error;
pub mod multiplex;
pub mod pipe;
pub mod prelude;
pub mod status;
pub mod trigger;

pub use config::{ConfigError, DemuxConfig, MalformedFramePolicy, PipeConfig};
pub use deferred::{Completion, Deferred};
pub use error::{ErrorCause, PipeError, Result, codes};
pub use pipe::{BufferedPipe, PullCallback, PullHandler, Sink, Source, TerminalCallback, Terminate};
pub use status::{PullResult, PushResult, TransportState};
pub use trigger::Trigger;

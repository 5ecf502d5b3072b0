//! 管道容量与多路复用策略配置。
//!
//! ## 设计目标（Why）
//! - 缓冲容量与子流缓冲容量是本 crate 唯一的运行期参数，集中到一个可反序列化的结构中，
//!   便于宿主从 TOML 配置文件装载；
//! - 解复用器面对畸形帧时的处置策略同样在此声明。
//!
//! ## 契约说明（What）
//! - 所有容量必须 ≥ 1，[`PipeConfig::validate`] 负责校验；
//! - 缺省字段使用 [`Default`] 中的取值。
//!
//! ```rust
//! use spark_pipe::config::{MalformedFramePolicy, PipeConfig};
//!
//! let config = PipeConfig::from_toml_str(
//!     r#"
//!     buffer_capacity = 32
//!
//!     [demux]
//!     sub_buffer_capacity = 4
//!     malformed_frames = "fail"
//!     "#,
//! )
//! .expect("合法配置");
//! assert_eq!(config.buffer_capacity, 32);
//! assert_eq!(config.demux.malformed_frames, MalformedFramePolicy::Fail);
//! ```
use serde::Deserialize;

/// 配置装载与校验错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML 解析失败。
    #[error("failed to parse pipe configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// 容量字段为 0。
    #[error("`{field}` must be at least 1")]
    ZeroCapacity {
        /// 出错的字段路径。
        field: &'static str,
    },
}

/// 解复用器遇到畸形帧时的处置策略。
///
/// 畸形帧指：引用未知键的 `Body`/`Tail`，或引用活跃键的重复 `Head`。
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MalformedFramePolicy {
    /// 丢弃该帧并记录告警。
    #[default]
    Drop,
    /// 以协议错误终止整个解复用器。
    Fail,
}

/// 解复用器配置。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DemuxConfig {
    /// 每个子流管道的容量。
    pub sub_buffer_capacity: usize,
    /// 输出 `SubSource` 管道的容量。
    pub output_capacity: usize,
    /// 畸形帧处置策略。
    pub malformed_frames: MalformedFramePolicy,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            sub_buffer_capacity: 16,
            output_capacity: 8,
            malformed_frames: MalformedFramePolicy::Drop,
        }
    }
}

/// 顶层管道配置。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipeConfig {
    /// [`BufferedPipe`](crate::pipe::BufferedPipe) 的默认容量。
    pub buffer_capacity: usize,
    /// 解复用器配置。
    pub demux: DemuxConfig,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 64,
            demux: DemuxConfig::default(),
        }
    }
}

impl PipeConfig {
    /// 从 TOML 文本解析并校验配置。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: PipeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验所有容量字段。
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacities = [
            ("buffer_capacity", self.buffer_capacity),
            ("demux.sub_buffer_capacity", self.demux.sub_buffer_capacity),
            ("demux.output_capacity", self.demux.output_capacity),
        ];
        match capacities.iter().find(|(_, value)| *value == 0) {
            Some(&(field, _)) => Err(ConfigError::ZeroCapacity { field }),
            None => Ok(()),
        }
    }
}

//! 组合子：在 [`Source`]/[`Sink`] 之上构建的变换、排空、折叠与拼接。
//!
//! ## 设计目标（Why）
//! - 以扩展 Trait（[`SourceExt`]、[`SinkExt`]）暴露组合子，所有实现了基础契约的端点自动获得；
//! - 组合子只依赖基础契约，不感知底层是缓冲管道、迭代器还是拼接体。
//!
//! ## 契约说明（What）
//! - 视图类组合子（`map`、`filter_map`、`map_input`、`chain`）不持有缓冲，状态与终止均委托给底层；
//! - 驱动类组合子（`drain_into`、`feed`、`fold` 族）立即开始推进，结果以 [`Deferred`] 交付。
mod blackhole;
mod concat;
mod drain;
mod fold;
mod iter;
mod map;

pub use blackhole::Blackhole;
pub use concat::Concat;
pub use drain::{drain_into, feed};
pub use iter::{IterSource, empty, failed, from_iter, one};
pub use map::{FilterMap, MapInput, Mapped};

use crate::{
    deferred::Deferred,
    pipe::{Sink, Source},
};

/// 源侧扩展方法。
///
/// 除视图类方法外，调用会立即登记消费者；同一源上只应存在一个驱动者。
pub trait SourceExt: Source + Sized + 'static {
    /// 逐元素映射。
    fn map<U, F>(self, f: F) -> Mapped<Self, F>
    where
        F: Fn(Self::Item) -> U + 'static,
        U: 'static,
    {
        Mapped::new(self, f)
    }

    /// 映射并丢弃 `None`。
    fn filter_map<U, F>(self, f: F) -> FilterMap<Self, F>
    where
        F: Fn(Self::Item) -> Option<U> + 'static,
        U: 'static,
    {
        FilterMap::new(self, f)
    }

    /// 在当前源耗尽后衔接 `second`。
    fn chain<B>(self, second: B) -> Concat<Self, B>
    where
        B: Source<Item = Self::Item> + 'static,
    {
        Concat::new(self, second)
    }

    /// 把全部元素排空到 `sink`；见 [`drain_into`]。
    fn drain_into<K>(self, sink: K) -> Deferred<()>
    where
        K: Sink<Item = Self::Item> + 'static,
    {
        drain::drain_into(self, sink)
    }

    /// 折叠全部元素。
    fn fold<A, F>(self, initial: A, f: F) -> Deferred<A>
    where
        A: 'static,
        F: Fn(A, Self::Item) -> A + 'static,
    {
        fold::fold(&self, initial, f)
    }

    /// 折叠直到 `proceed` 对累加值返回 `false`。
    fn fold_while<A, F, P>(self, initial: A, f: F, proceed: P) -> Deferred<A>
    where
        A: 'static,
        F: Fn(A, Self::Item) -> A + 'static,
        P: Fn(&A) -> bool + 'static,
    {
        fold::fold_while(&self, initial, f, proceed)
    }

    /// 以首元素为初值折叠；空源以 `pipe.empty_reduce` 失败。
    fn reduce<F>(self, f: F) -> Deferred<Self::Item>
    where
        F: Fn(Self::Item, Self::Item) -> Self::Item + 'static,
    {
        fold::reduce(&self, f)
    }

    /// 收集全部元素。
    fn collect(self) -> Deferred<Vec<Self::Item>> {
        fold::collect(&self)
    }
}

impl<S: Source + Sized + 'static> SourceExt for S {}

/// 汇侧扩展方法。
pub trait SinkExt: Sink + Sized + 'static {
    /// 推送前先对元素应用 `f`。
    fn map_input<A, F>(self, f: F) -> MapInput<Self, F, A>
    where
        F: Fn(A) -> Self::Item,
        A: 'static,
    {
        MapInput::new(self, f)
    }

    /// 把序列逐个推入当前汇；见 [`feed`]。
    fn feed<I>(self, items: I) -> Deferred<usize>
    where
        I: IntoIterator<Item = Self::Item>,
        I::IntoIter: 'static,
    {
        drain::feed(items, self)
    }
}

impl<K: Sink + Sized + 'static> SinkExt for K {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{pipe::BufferedPipe, status::PullResult};

    #[test]
    fn map_then_collect() {
        let pipe = BufferedPipe::new(4);
        let doubled = pipe.clone().map(|v: u32| v * 2).collect();
        for v in 1..=3 {
            let _ = pipe.push(v);
        }
        pipe.complete();
        assert_eq!(doubled.try_take(), Some(Ok(vec![2, 4, 6])));
    }

    #[test]
    fn filter_map_skips_rejected_items_on_single_pull() {
        let pipe = BufferedPipe::new(4);
        let evens = pipe.clone().filter_map(|v: u32| (v % 2 == 0).then_some(v));
        let _ = pipe.push(1);
        let _ = pipe.push(3);
        let _ = pipe.push(4);
        assert_eq!(evens.try_pull(), Some(PullResult::Item(4)));
        assert_eq!(evens.try_pull(), None);
    }

    #[test]
    fn map_input_rejects_before_transforming() {
        let pipe = BufferedPipe::new(1);
        let text = pipe.clone().map_input(|v: u32| v.to_string());
        assert!(matches!(text.push(1), crate::status::PushResult::Filled(_)));
        assert!(matches!(text.push(2), crate::status::PushResult::Full(_, 2)));
        assert_eq!(pipe.try_pull(), Some(PullResult::Item("1".to_owned())));
    }
}

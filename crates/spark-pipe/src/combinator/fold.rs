//! 折叠族组合子：`fold`、`fold_while`、`reduce` 与 `collect`。
//!
//! 全部基于快速通道处理器实现：已缓冲元素同步折叠，之后的推送直接进入累加器，
//! 结果通过 [`Deferred`] 交付。
use std::ops::ControlFlow;

use tracing::trace;

use crate::{
    deferred::Deferred,
    error::{PipeError, codes},
    pipe::Source,
    status::PullResult,
};

/// 带早停谓词的折叠。
///
/// 每次累加后以新累加值调用 `proceed`；返回 `false` 时立即以该值兑现并停止接收，
/// 剩余元素保留在源中。
pub(crate) fn fold_while<S, A, F, P>(source: &S, initial: A, f: F, proceed: P) -> Deferred<A>
where
    S: Source + ?Sized,
    A: 'static,
    F: Fn(A, S::Item) -> A + 'static,
    P: Fn(&A) -> bool + 'static,
{
    let done = Deferred::new();
    let result = done.clone();
    let mut acc = Some(initial);
    source.pull_while(Box::new(move |r| match r {
        PullResult::Item(item) => {
            let Some(current) = acc.take() else {
                return ControlFlow::Break(());
            };
            let next = f(current, item);
            if proceed(&next) {
                acc = Some(next);
                ControlFlow::Continue(())
            } else {
                trace!("fold stopped by predicate");
                done.succeed(next);
                ControlFlow::Break(())
            }
        }
        PullResult::Closed => {
            if let Some(value) = acc.take() {
                done.succeed(value);
            }
            ControlFlow::Break(())
        }
        PullResult::Error(cause) => {
            acc = None;
            done.fail(cause);
            ControlFlow::Break(())
        }
    }));
    result
}

pub(crate) fn fold<S, A, F>(source: &S, initial: A, f: F) -> Deferred<A>
where
    S: Source + ?Sized,
    A: 'static,
    F: Fn(A, S::Item) -> A + 'static,
{
    fold_while(source, initial, f, |_| true)
}

/// 以首元素为初值的折叠；空序列以 `pipe.empty_reduce` 失败。
pub(crate) fn reduce<S, F>(source: &S, f: F) -> Deferred<S::Item>
where
    S: Source + ?Sized,
    F: Fn(S::Item, S::Item) -> S::Item + 'static,
{
    let partial = fold(source, None, move |acc, item| {
        Some(match acc {
            Some(acc) => f(acc, item),
            None => item,
        })
    });
    let done = Deferred::new();
    let result = done.clone();
    partial.on_complete(move |r| match r {
        Ok(Some(value)) => done.succeed(value),
        Ok(None) => done.fail(PipeError::new(
            codes::EMPTY_REDUCE,
            "reduce over a source that closed without items",
        )),
        Err(cause) => done.fail(cause),
    });
    result
}

pub(crate) fn collect<S>(source: &S) -> Deferred<Vec<S::Item>>
where
    S: Source + ?Sized,
{
    fold(source, Vec::new(), |mut items, item| {
        items.push(item);
        items
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pipe::{BufferedPipe, Sink, Terminate},
        status::TransportState,
    };

    #[test]
    fn fold_includes_buffered_and_later_items() {
        let pipe = BufferedPipe::new(4);
        let _ = pipe.push(1);
        let _ = pipe.push(2);
        let sum = fold(&pipe, 0, |acc, v| acc + v);
        assert!(!sum.is_resolved());
        let _ = pipe.push(3);
        pipe.complete();
        assert_eq!(sum.try_take(), Some(Ok(6)));
    }

    #[test]
    fn fold_while_leaves_rest_in_source() {
        let pipe = BufferedPipe::new(8);
        for v in 1..=6 {
            let _ = pipe.push(v);
        }
        let sum = fold_while(&pipe, 0, |acc, v| acc + v, |acc| *acc < 6);
        assert_eq!(sum.try_take(), Some(Ok(6)));
        assert_eq!(pipe.len(), 3, "早停后剩余元素应留在源中");
        assert_eq!(pipe.output_state(), TransportState::Open);
    }

    #[test]
    fn reduce_on_empty_source_fails() {
        let pipe = BufferedPipe::<u32>::new(1);
        let max = reduce(&pipe, u32::max);
        pipe.complete();
        assert!(matches!(max.try_take(), Some(Err(e)) if e.is(codes::EMPTY_REDUCE)));
    }

    #[test]
    fn collect_propagates_termination() {
        let pipe = BufferedPipe::new(2);
        let items = collect(&pipe);
        let _ = pipe.push("a");
        pipe.terminate(PipeError::new(codes::CANCELLED, "abort"));
        assert!(matches!(items.try_take(), Some(Err(e)) if e.is(codes::CANCELLED)));
    }
}

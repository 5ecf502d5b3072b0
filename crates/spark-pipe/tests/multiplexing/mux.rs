use spark_pipe::multiplex::Component::{Body, Head, Tail};
use spark_pipe::prelude::*;

use super::Frame;

fn attach(mux: &Multiplexer<BufferedPipe<Frame>>, key: u32) -> BufferedPipe<Frame> {
    let sub = BufferedPipe::new(2);
    assert!(matches!(
        mux.push(SubSource::new(key, sub.clone())),
        PushResult::Ok
    ));
    sub
}

/// 复用器完成时必须等待每个活跃子流结束后才关闭基础汇。
#[test]
fn completion_waits_for_every_active_stream() {
    let base = BufferedPipe::new(16);
    let mux = multiplex(base.clone());
    let one = attach(&mux, 1);
    let two = attach(&mux, 2);
    let _ = one.push(Frame::new(1, Head, 0));
    let _ = two.push(Frame::new(2, Head, 0));

    mux.complete();
    assert_eq!(mux.state(), MultiplexState::Completing);
    assert!(matches!(mux.push(SubSource::new(3, BufferedPipe::new(1))), PushResult::Closed));
    assert!(base.input_state().is_open());

    let _ = one.push(Frame::new(1, Tail, 0));
    one.complete();
    assert!(base.input_state().is_open(), "子流 2 仍活跃时基础汇应保持开放");

    let _ = two.push(Frame::new(2, Tail, 0));
    two.complete();
    assert_eq!(base.input_state(), TransportState::Closed);
    assert_eq!(mux.state(), MultiplexState::Closed);
    assert_eq!(base.len(), 4);
}

#[test]
fn completing_idle_multiplexer_closes_base_immediately() {
    let base = BufferedPipe::<Frame>::new(1);
    let mux = multiplex(base.clone());
    mux.complete();
    assert_eq!(base.input_state(), TransportState::Closed);
    assert_eq!(mux.input_state(), TransportState::Closed);
}

/// 终止复用器不会主动通知子流；子流在下一次推送时才发现失败。
#[test]
fn termination_is_discovered_lazily_by_sub_streams() {
    let base = BufferedPipe::new(16);
    let mux = multiplex(base.clone());
    let one = attach(&mux, 1);
    let _ = one.push(Frame::new(1, Head, 0));

    mux.terminate(PipeError::new(codes::CANCELLED, "connection dropped"));
    assert!(matches!(base.input_state(), TransportState::Terminated(_)));
    assert!(one.input_state().is_open(), "子流不应被主动通知");

    let _ = one.push(Frame::new(1, Body, 1));
    assert!(matches!(
        one.push(Frame::new(1, Body, 2)),
        PushResult::Error(ref e) if e.is(codes::CANCELLED)
    ));
    assert!(matches!(mux.state(), MultiplexState::Terminated(_)));
}

#[test]
fn independently_terminated_base_marks_base_lost() {
    let base = BufferedPipe::new(16);
    let mux = multiplex(base.clone());
    let one = attach(&mux, 1);

    base.terminate(PipeError::new(codes::TERMINATED, "socket closed"));
    assert!(matches!(mux.state(), MultiplexState::BaseLost(ref e) if e.is(codes::TERMINATED)));
    assert!(matches!(mux.input_state(), TransportState::Terminated(_)));

    let _ = one.push(Frame::new(1, Head, 0));
    assert!(matches!(one.input_state(), TransportState::Terminated(_)));
}

#[test]
fn interleaves_streams_under_base_backpressure() {
    let base = BufferedPipe::new(1);
    let mux = multiplex(base.clone());
    let one = attach(&mux, 1);
    let two = attach(&mux, 2);
    let _ = one.push(Frame::new(1, Head, 1));
    let _ = two.push(Frame::new(2, Head, 2));
    let _ = one.push(Frame::new(1, Tail, 3));
    let _ = two.push(Frame::new(2, Tail, 4));
    one.complete();
    two.complete();
    mux.complete();

    let frames = base.clone().collect().try_take();
    let Some(Ok(frames)) = frames else {
        panic!("基础汇应在全部子流结束后关闭");
    };
    let mut values: Vec<u32> = frames.iter().map(|f| f.value).collect();
    values.sort_unstable();
    assert_eq!(values, vec![1, 2, 3, 4]);

    let ones: Vec<u32> = frames
        .iter()
        .filter(|f| f.key == 1)
        .map(|f| f.value)
        .collect();
    assert_eq!(ones, vec![1, 3], "同一子流内的帧保持顺序");
}

use std::{cell::RefCell, collections::HashMap, ops::ControlFlow, rc::Rc};

use spark_pipe::prelude::*;

use super::{Frame, closed_base};
use spark_pipe::multiplex::Component::{Body, Head, Tail};

type Sums = Rc<RefCell<HashMap<u32, Result<u32, PipeError>>>>;

/// 消费全部子流，把每个子流的负载和记录到表中。
fn sum_every_stream(demux: &Demultiplexer<BufferedPipe<Frame>>) -> Sums {
    let sums: Sums = Rc::new(RefCell::new(HashMap::new()));
    let table = Rc::clone(&sums);
    demux.pull_while(Box::new(move |r| {
        if let PullResult::Item(sub) = r {
            let key = *sub.key();
            let table = Rc::clone(&table);
            sub.fold(0, |acc, frame: Frame| acc + frame.value)
                .on_complete(move |total| {
                    table.borrow_mut().insert(key, total);
                });
        }
        ControlFlow::Continue(())
    }));
    sums
}

#[test]
fn interleaved_streams_are_routed_by_key() {
    let base = closed_base([
        Frame::new(1, Head, 1),
        Frame::new(2, Head, 1),
        Frame::new(1, Body, 1),
        Frame::new(2, Tail, 1),
        Frame::new(1, Tail, 1),
    ]);
    let demux = demultiplex(base, 1);
    let sums = sum_every_stream(&demux);

    let sums = sums.borrow();
    assert_eq!(sums.get(&1), Some(&Ok(3)));
    assert_eq!(sums.get(&2), Some(&Ok(2)));
    assert_eq!(demux.output_state(), TransportState::Closed);
}

#[test]
fn base_termination_terminates_output_and_open_streams() {
    let base = BufferedPipe::new(4);
    let _ = base.push(Frame::new(1, Head, 0));
    let _ = base.push(Frame::new(2, Head, 0));
    let demux = demultiplex(base.clone(), 4);
    let sums = sum_every_stream(&demux);

    base.terminate(PipeError::new(codes::CANCELLED, "transport reset"));

    let sums = sums.borrow();
    assert_eq!(sums.len(), 2);
    assert!(sums.values().all(|r| matches!(r, Err(e) if e.is(codes::CANCELLED))));
    assert!(matches!(demux.output_state(), TransportState::Terminated(_)));
}

#[test]
fn base_completion_closes_output_and_fails_unfinished_streams() {
    let base = closed_base([
        Frame::new(1, Head, 5),
        Frame::new(1, Tail, 5),
        Frame::new(2, Head, 7),
    ]);
    let demux = demultiplex(base, 4);
    let sums = sum_every_stream(&demux);

    let sums = sums.borrow();
    assert_eq!(sums.get(&1), Some(&Ok(10)));
    assert!(matches!(sums.get(&2), Some(Err(e)) if e.is(codes::STREAM_INCOMPLETE)));
    assert_eq!(demux.output_state(), TransportState::Closed);
    assert_eq!(demux.active_streams(), 0);
}

#[test]
fn stalled_sub_stream_holds_back_later_frames() {
    let base = BufferedPipe::new(8);
    for frame in [
        Frame::new(1, Head, 0),
        Frame::new(1, Body, 1),
        Frame::new(2, Head, 0),
    ] {
        let _ = base.push(frame);
    }
    let demux = demultiplex(base.clone(), 1);

    let Some(PullResult::Item(first)) = demux.try_pull() else {
        panic!("应发布第一个子流");
    };
    assert_eq!(demux.try_pull(), None, "子流 1 未排空前不应发布子流 2");
    assert_eq!(base.len(), 1, "挂起期间至多预取一个基础帧");

    assert_eq!(first.try_pull(), Some(PullResult::Item(Frame::new(1, Head, 0))));
    assert_eq!(first.try_pull(), Some(PullResult::Item(Frame::new(1, Body, 1))));
    let Some(PullResult::Item(second)) = demux.try_pull() else {
        panic!("子流 1 排空后应发布子流 2");
    };
    assert_eq!(*second.key(), 2);
}

/// 子流挂起期间基础流被终止，输出与所有子流立即终止，不必等待挂起的子流被排空。
#[test]
fn base_termination_during_stall_reaches_every_stream() {
    let base = BufferedPipe::new(4);
    for frame in [
        Frame::new(2, Head, 0),
        Frame::new(1, Head, 0),
        Frame::new(1, Body, 1),
    ] {
        let _ = base.push(frame);
    }
    let demux = demultiplex(base.clone(), 2);
    let Some(PullResult::Item(two)) = demux.try_pull() else {
        panic!("应发布子流 2");
    };
    let Some(PullResult::Item(one)) = demux.try_pull() else {
        panic!("应发布子流 1");
    };

    base.terminate(PipeError::new(codes::CANCELLED, "transport reset"));

    for sub in [&two, &one] {
        assert!(
            matches!(sub.output_state(), TransportState::Terminated(ref e) if e.is(codes::CANCELLED)),
            "子流 {} 应随基础流终止",
            sub.key()
        );
    }
    assert!(matches!(demux.output_state(), TransportState::Terminated(_)));
    assert_eq!(demux.active_streams(), 0);
}

/// 挂起期间基础流优雅结束，已接收的帧仍按序交付后才关闭。
#[test]
fn base_close_during_stall_keeps_pending_frames() {
    let base = BufferedPipe::new(4);
    let _ = base.push(Frame::new(1, Head, 0));
    let _ = base.push(Frame::new(1, Body, 1));
    let demux = demultiplex(base.clone(), 1);
    let _ = base.push(Frame::new(1, Tail, 2));
    base.complete();

    let Some(PullResult::Item(sub)) = demux.try_pull() else {
        panic!("应发布子流 1");
    };
    let mut seen = Vec::new();
    while let Some(PullResult::Item(frame)) = sub.try_pull() {
        seen.push(frame.value);
    }
    assert_eq!(seen, vec![0, 1, 2]);
    assert_eq!(sub.try_pull(), Some(PullResult::Closed));
    assert_eq!(demux.output_state(), TransportState::Closed);
}

#[test]
fn drop_policy_ignores_unknown_keys() {
    let base = closed_base([
        Frame::new(9, Body, 100),
        Frame::new(1, Head, 1),
        Frame::new(9, Tail, 100),
        Frame::new(1, Tail, 1),
    ]);
    let demux = demultiplex(base, 2);
    let sums = sum_every_stream(&demux);

    let sums = sums.borrow();
    assert_eq!(sums.len(), 1);
    assert_eq!(sums.get(&1), Some(&Ok(2)));
}

#[test]
fn fail_policy_turns_unknown_key_into_protocol_violation() {
    let base = closed_base([Frame::new(1, Head, 1), Frame::new(9, Body, 100)]);
    let config = PipeConfig::from_toml_str(
        r#"
        [demux]
        sub_buffer_capacity = 2
        malformed_frames = "fail"
        "#,
    )
    .expect("合法配置");
    let demux = Demultiplexer::from_config(base, &config.demux);
    let sums = sum_every_stream(&demux);

    assert!(matches!(
        demux.output_state(),
        TransportState::Terminated(ref e) if e.is(codes::PROTOCOL_VIOLATION)
    ));
    let sums = sums.borrow();
    assert!(sums.is_empty() || sums.values().all(|r| r.is_err()));
}

#[test]
fn key_can_be_reopened_after_tail() {
    let base = closed_base([
        Frame::new(3, Head, 1),
        Frame::new(3, Tail, 1),
        Frame::new(3, Head, 10),
        Frame::new(3, Tail, 10),
    ]);
    let demux = demultiplex(base, 4);
    let totals = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&totals);
    demux.pull_while(Box::new(move |r| {
        if let PullResult::Item(sub) = r {
            let sink = Rc::clone(&sink);
            sub.fold(0, |acc, frame: Frame| acc + frame.value)
                .on_complete(move |total| sink.borrow_mut().push(total));
        }
        ControlFlow::Continue(())
    }));
    assert_eq!(*totals.borrow(), vec![Ok(2), Ok(20)]);
}

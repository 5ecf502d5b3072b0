//! 双向通道集成测试。
use std::{cell::RefCell, ops::ControlFlow, rc::Rc};

use spark_pipe::prelude::*;

/// 服务端把收到的每个请求长度回写给客户端。
#[test]
fn request_response_over_channel_pair() {
    let (client, server) = channel_pair::<String, usize>(2);

    let responder = server.clone();
    server.pull_while(Box::new(move |r| match r {
        PullResult::Item(request) => {
            let _ = responder.push(request.len());
            ControlFlow::Continue(())
        }
        PullResult::Closed => {
            responder.complete();
            ControlFlow::Break(())
        }
        PullResult::Error(_) => ControlFlow::Break(()),
    }));

    let replies = client.source().clone().collect();
    for request in ["ping", "hello"] {
        assert!(client.push(request.to_owned()).is_accepted());
    }
    client.complete();
    assert_eq!(replies.try_take(), Some(Ok(vec![4, 5])));
}

#[test]
fn termination_from_either_end_reaches_both_directions() {
    let (left, right) = channel_pair::<u8, u8>(1);
    let seen = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&seen);
    left.pull(Box::new(move |r| *slot.borrow_mut() = Some(r)));

    right.terminate(PipeError::new(codes::CANCELLED, "peer reset"));

    assert!(matches!(
        seen.borrow().as_ref(),
        Some(PullResult::Error(e)) if e.is(codes::CANCELLED)
    ));
    assert!(matches!(left.push(1), PushResult::Error(_)));
}

#[test]
fn custom_channel_over_arbitrary_halves() {
    let outbound = Blackhole::<u32>::new();
    let inbound = from_iter(["a", "b"]);
    let channel = Channel::new(outbound, inbound);

    assert!(matches!(channel.push(7), PushResult::Ok));
    assert_eq!(channel.try_pull(), Some(PullResult::Item("a")));
    let (sink, _source) = channel.into_parts();
    assert!(sink.input_state().is_open());
}

use std::{cell::RefCell, collections::BTreeMap, ops::ControlFlow, rc::Rc};

use spark_pipe::multiplex::Component::{Body, Head, Tail};
use spark_pipe::prelude::*;

use super::Frame;

/// 复用到同一管道后再解复用，每个子流的内容与顺序保持不变。
#[test]
fn multiplex_then_demultiplex_preserves_sub_streams() {
    let wire = BufferedPipe::new(2);
    let mux = multiplex(wire.clone());
    let demux = demultiplex(wire, 2);

    let received: Rc<RefCell<BTreeMap<u32, Vec<u32>>>> = Rc::new(RefCell::new(BTreeMap::new()));
    let table = Rc::clone(&received);
    demux.pull_while(Box::new(move |r| {
        if let PullResult::Item(sub) = r {
            let key = *sub.key();
            let table = Rc::clone(&table);
            sub.map(|frame: Frame| frame.value)
                .collect()
                .on_complete(move |values| {
                    if let Ok(values) = values {
                        table.borrow_mut().insert(key, values);
                    }
                });
        }
        ControlFlow::Continue(())
    }));

    let producers: Vec<_> = (1..=3u32)
        .map(|key| {
            let sub = BufferedPipe::new(1);
            let _ = mux.push(SubSource::new(key, sub.clone()));
            (key, sub)
        })
        .collect();
    for (key, sub) in &producers {
        let frames = vec![
            Frame::new(*key, Head, key * 10),
            Frame::new(*key, Body, key * 10 + 1),
            Frame::new(*key, Tail, key * 10 + 2),
        ];
        let _ = sub.clone().feed(frames);
        sub.complete();
    }
    mux.complete();

    let received = received.borrow();
    assert_eq!(received.len(), 3);
    for key in 1..=3u32 {
        assert_eq!(
            received.get(&key),
            Some(&vec![key * 10, key * 10 + 1, key * 10 + 2])
        );
    }
    assert_eq!(demux.output_state(), TransportState::Closed);
}

use std::cell::RefCell;
use std::convert::Infallible;
use std::rc::Rc;

use socketflow::{
    FlowError, Fold, IterationPolicy, MemoryChannel, OutboundMessage, Outgoing, Termination, flow,
};

use super::{deliver_all, run_local, wait_for_emissions};

#[test]
fn test_pass_through_stream() {
    run_local(async {
        let messages = ["Hell", "o", "Wor", "ld"];
        let channel = MemoryChannel::opened();

        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = received.clone();
        let stage = flow(channel.clone())
            .receive(|message: String, _: Fold<(), String>| async move {
                Ok::<_, Infallible>(message)
            });
        let _subscription = stage.subscribe(move |message| sink.borrow_mut().push(message.clone()));

        deliver_all(&channel, &messages);
        channel.close();

        assert_eq!(stage.settled().await, Termination::Completed);
        assert_eq!(*received.borrow(), messages);
    });
}

#[test]
fn test_late_subscriber_replays_history() {
    run_local(async {
        let channel = MemoryChannel::opened();
        let stage = flow(channel.clone())
            .receive(|n: u32, _: Fold<(), u32>| async move { Ok::<_, Infallible>(n * 10) });

        deliver_all(&channel, &["1", "2"]);
        channel.close();
        assert_eq!(stage.settled().await, Termination::Completed);

        let replayed = Rc::new(RefCell::new(Vec::new()));
        let sink = replayed.clone();
        let _subscription = stage.subscribe(move |n| sink.borrow_mut().push(*n));
        assert_eq!(*replayed.borrow(), vec![10, 20]);
    });
}

#[test]
fn test_skip_sentinel_suppresses_sends() {
    run_local(async {
        let channel = MemoryChannel::opened();
        let stage = flow(channel.clone())
            .receive(|n: u32, _: Fold<(), u32>| async move { Ok::<_, Infallible>(n) })
            .send_with(|n| {
                if n % 2 == 0 {
                    Outgoing::send(format!("even {}", n))
                } else {
                    Outgoing::Skip
                }
            });

        deliver_all(&channel, &["1", "2", "3", "4"]);
        assert_eq!(wait_for_emissions(&stage, 4).await, vec![1, 2, 3, 4]);

        let sent: Vec<OutboundMessage> = channel.sent().into_iter().map(|(m, _)| m).collect();
        assert_eq!(
            sent,
            vec![OutboundMessage::from("even 2"), OutboundMessage::from("even 4")]
        );
        channel.close();
    });
}

#[test]
fn test_sibling_rounds_pull_contiguous_records() {
    run_local(async {
        let channel = MemoryChannel::opened();
        let root = flow(channel.clone());
        let sum = |n: u32, fold: Fold<(), u32>| async move {
            Ok::<_, Infallible>(fold.partial().copied().unwrap_or_default() + n)
        };
        let left = root.receive_with(sum, IterationPolicy::Fixed(2));
        let right = root.receive_with(sum, IterationPolicy::Fixed(2));

        deliver_all(&channel, &["1", "2", "30", "40"]);
        channel.close();

        assert_eq!(left.settled().await, Termination::Completed);
        assert_eq!(right.settled().await, Termination::Completed);
        assert_eq!(left.emissions(), vec![3]);
        assert_eq!(right.emissions(), vec![70]);
    });
}

#[test]
fn test_exhaustion_fails_stage_and_chain() {
    run_local(async {
        let channel = MemoryChannel::opened();
        let batch = flow(channel.clone()).receive_with(
            |n: u32, fold: Fold<(), Vec<u32>>| async move {
                let mut batch = fold.partial().cloned().unwrap_or_default();
                batch.push(n);
                Ok::<_, Infallible>(batch)
            },
            IterationPolicy::Fixed(3),
        );
        let after = batch.receive(|m: String, _: Fold<Vec<u32>, String>| async move {
            Ok::<_, Infallible>(m)
        });

        deliver_all(&channel, &["1", "2"]);
        channel.close();

        let exhausted = Termination::Failed(FlowError::StreamExhausted);
        assert_eq!(batch.settled().await, exhausted);
        assert_eq!(after.settled().await, exhausted);
        assert!(batch.emissions().is_empty());

        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = errors.clone();
        let _subscription = after.subscribe_with(Rc::new(
            socketflow::FnObserver::new(|_: &String| {})
                .with_error(move |e| sink.borrow_mut().push(e.clone())),
        ));
        assert_eq!(*errors.borrow(), vec![FlowError::StreamExhausted]);
    });
}

#[test]
fn test_handler_error_reaches_subscribers() {
    run_local(async {
        let channel = MemoryChannel::opened();
        let stage = flow(channel.clone()).receive(|n: i64, _: Fold<(), i64>| async move {
            if n < 0 {
                Err(format!("negative input {}", n))
            } else {
                Ok(n)
            }
        });

        deliver_all(&channel, &["5", "-1", "7"]);

        assert_eq!(
            stage.settled().await,
            Termination::Failed(FlowError::Handler("negative input -1".to_string()))
        );
        assert_eq!(stage.emissions(), vec![5]);
        channel.close();
    });
}

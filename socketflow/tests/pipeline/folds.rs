use std::convert::Infallible;

use socketflow::{Fold, IterationPolicy, MemoryChannel, Termination, flow};

use super::{deliver_all, run_local};

#[test]
fn test_fixed_count_fold() {
    run_local(async {
        let channel = MemoryChannel::opened();
        let folded = flow(channel.clone())
            .receive(|n: u32, _: Fold<(), u32>| async move { Ok::<_, Infallible>(n) })
            .receive_with(
                |n: u32, fold: Fold<u32, String>| async move {
                    let prefix = fold.fold_with(|seed| seed.to_string(), |acc| acc);
                    Ok::<_, Infallible>(format!("{}{}", prefix, n))
                },
                IterationPolicy::Fixed(2),
            );

        for n in ["1", "2", "3", "4"] {
            deliver_all(&channel, &[n, "5", "6"]);
        }
        channel.close();

        assert_eq!(folded.settled().await, Termination::Completed);
        assert_eq!(folded.emissions(), vec!["156", "256", "356", "456"]);
    });
}

#[test]
fn test_predicate_terminated_fold() {
    run_local(async {
        let channel = MemoryChannel::opened();
        let folded = flow(channel.clone())
            .receive(|n: usize, _: Fold<(), usize>| async move { Ok::<_, Infallible>(n) })
            .receive_with(
                |letter: String, fold: Fold<usize, String>| async move {
                    let acc = fold.fold_with(|_| String::new(), |acc| acc);
                    Ok::<_, Infallible>(acc + &letter)
                },
                IterationPolicy::until(|expected: &usize| {
                    let expected = *expected;
                    move |acc: &String| acc.len() == expected
                }),
            );

        for n in 1..=4usize {
            channel.deliver_text(n.to_string());
            for _ in 0..n {
                channel.deliver_text("a");
            }
        }
        channel.close();

        assert_eq!(folded.settled().await, Termination::Completed);
        assert_eq!(folded.emissions(), vec!["a", "aa", "aaa", "aaaa"]);
    });
}

#[test]
fn test_computed_count_fold() {
    run_local(async {
        let channel = MemoryChannel::opened();
        let folded = flow(channel.clone())
            .receive(|n: usize, _: Fold<(), usize>| async move { Ok::<_, Infallible>(n) })
            .receive_with(
                |word: String, fold: Fold<usize, Vec<String>>| async move {
                    let mut words = fold.partial().cloned().unwrap_or_default();
                    words.push(word);
                    Ok::<_, Infallible>(words)
                },
                IterationPolicy::computed(|count: &usize| *count),
            );

        deliver_all(&channel, &["2", "red", "fish", "0", "1", "blue"]);
        channel.close();

        assert_eq!(folded.settled().await, Termination::Completed);
        assert_eq!(
            folded.emissions(),
            vec![
                vec!["red".to_string(), "fish".to_string()],
                vec!["blue".to_string()],
            ]
        );
    });
}

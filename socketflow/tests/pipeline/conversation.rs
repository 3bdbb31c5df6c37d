use std::convert::Infallible;

use serde::Deserialize;
use socketflow::{
    DuplexChannel, FlowError, Fold, IterationPolicy, MemoryChannel, OutboundMessage, Outgoing,
    SendOptions, Stage, Termination, flow,
};

use super::{run_local, wait_for_emissions};

#[derive(Debug, Clone, Deserialize)]
struct Greeting {
    data: String,
    #[serde(rename = "messageLength")]
    message_length: usize,
}

type Sentence = (Greeting, String);

/// Peer answering "?" when told a sentence has four parts.
fn spawn_peer(server: MemoryChannel) -> Stage<Option<String>> {
    flow(server)
        .receive(|parts: i64, _: Fold<(), Option<String>>| async move {
            Ok::<_, Infallible>((parts == 4).then(|| "?".to_string()))
        })
        .send_with(|reply| reply.clone().map(OutboundMessage::from).into())
}

#[test]
fn test_multi_stage_conversation() {
    run_local(async {
        let (client, server) = MemoryChannel::pair();
        let peer = spawn_peer(server.clone());

        let root = flow(client.clone());
        let answer = root
            .receive(|greeting: Greeting, _: Fold<(), Greeting>| async move {
                Ok::<_, Infallible>(greeting)
            })
            .receive_with(
                |word: String, fold: Fold<Greeting, Sentence>| async move {
                    let sentence = match fold {
                        Fold::Seed(greeting) => (greeting, word),
                        Fold::Partial((greeting, text)) => (greeting, format!("{} {}", text, word)),
                    };
                    Ok::<_, Infallible>(sentence)
                },
                IterationPolicy::until(|greeting: &Greeting| {
                    let expected = greeting.message_length;
                    move |(_, text): &Sentence| text.split(' ').count() == expected
                }),
            )
            .receive_with(
                |word: String, fold: Fold<Sentence, Sentence>| async move {
                    let (greeting, text) = fold.into_inner();
                    Ok::<_, Infallible>((greeting, format!("{}-{}", text, word)))
                },
                IterationPolicy::Fixed(3),
            )
            .send_with(|(_, text)| {
                Outgoing::json(&text.split('-').count()).unwrap_or(Outgoing::Skip)
            })
            .receive(|suffix: String, fold: Fold<Sentence, String>| async move {
                let (greeting, text) = fold.seed().cloned().expect("single-record round");
                Ok::<_, Infallible>(format!("{} {}{}", greeting.data, text, suffix))
            });

        client.open();
        let options = SendOptions::default();
        for message in [
            r#"{"data":"hi!","messageLength":3}"#,
            "how",
            "are",
            "you",
            "today",
            "and",
            "forever",
        ] {
            server.send(message.into(), &options).expect("server send");
        }

        assert_eq!(
            wait_for_emissions(&answer, 1).await,
            vec!["hi! how are you-today-and-forever?"]
        );
        assert_eq!(peer.emissions(), vec![Some("?".to_string())]);

        // The next round is waiting for a greeting when the channel closes.
        wait_for_emissions(&root, 2).await;
        client.close();
        assert_eq!(
            answer.settled().await,
            Termination::Failed(FlowError::StreamExhausted)
        );
    });
}

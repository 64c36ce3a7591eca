use comms::msg::{Command, Msg, Payload};
use tokio::io;

#[tokio::test]
async fn send_recv() {
    const SIZE: usize = 128;

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    let (rx, two_tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, two_tx);

    let sent = Msg::Control(Command::Hello {
        rank: 2,
        world_size: 4,
    });

    let writer = tokio::spawn(async move {
        tx.send(&sent).await.unwrap();
        tx.send(&Msg::Data(Payload::Values {
            seq: 3,
            values: vec![0.5; 64],
        }))
        .await
        .unwrap();
        tx.send(&Msg::Err("boom".into())).await.unwrap();
    });

    let msg: Msg = rx.recv().await.unwrap();
    assert_eq!(
        msg,
        Msg::Control(Command::Hello {
            rank: 2,
            world_size: 4
        })
    );

    match rx.recv::<Msg>().await.unwrap() {
        Msg::Data(Payload::Values { seq, values }) => {
            assert_eq!(seq, 3);
            assert_eq!(values, vec![0.5; 64]);
        }
        other => panic!("unexpected msg: {other:?}"),
    }

    assert_eq!(rx.recv::<Msg>().await.unwrap(), Msg::Err("boom".into()));
    writer.await.unwrap();
}

#[tokio::test]
async fn closed_stream_is_an_error() {
    let (one, two) = io::duplex(64);
    drop(two);

    let (rx, tx) = io::split(one);
    let (mut rx, _) = comms::channel(rx, tx);

    assert!(rx.recv::<Msg>().await.is_err());
}

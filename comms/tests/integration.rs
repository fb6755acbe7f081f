use comms::{
    msg::{Command, Msg, Payload},
    specs::{
        CompletionEvent, DeviceId, Event, ModelSnapshot, RequestPayload, ResponsePayload, TaskId,
        TaskReceipt, TaskSubmission, Tensor,
    },
};
use tokio::io;

fn predict_request() -> RequestPayload {
    RequestPayload::Predict {
        model: ModelSnapshot {
            topology: "{}".into(),
            weights: vec![Tensor::zeros(vec![2, 1])],
        },
        batch_size: 2,
        inputs: Tensor::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap(),
    }
}

#[tokio::test]
async fn send_recv_submission_and_receipt() {
    const SIZE: usize = 4096;

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (mut consumer_rx, mut consumer_tx) = comms::channel(rx, tx);
    let (rx, tx) = io::split(two);
    let (mut broker_rx, mut broker_tx) = comms::channel(rx, tx);

    let submission = TaskSubmission::new(DeviceId(3), 11, predict_request());
    consumer_tx
        .send(&Msg::Data(Payload::Submit(submission)))
        .await
        .unwrap();

    let Msg::Data(Payload::Submit(got)) = broker_rx.recv().await.unwrap() else {
        panic!("expected a submission");
    };
    assert_eq!(got.device_id, DeviceId(3));
    assert_eq!(got.consumer_id, 11);
    assert_eq!(got.request, predict_request());

    let receipt = TaskReceipt {
        task_id: TaskId(42),
        sent_at_ms: 1_000,
    };
    broker_tx
        .send(&Msg::Data(Payload::Accepted(receipt)))
        .await
        .unwrap();

    let Msg::Data(Payload::Accepted(got)) = consumer_rx.recv().await.unwrap() else {
        panic!("expected a receipt");
    };
    assert_eq!(got, receipt);
}

#[tokio::test]
async fn frames_arrive_in_order() {
    let (one, two) = io::duplex(64);
    let (rx, tx) = io::split(one);
    let (_, mut frame_tx) = comms::channel(rx, tx);
    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    let sender = tokio::spawn(async move {
        frame_tx.send(&Msg::Control(Command::Subscribe { consumer_id: 1 }))
            .await?;
        let event = Event::Completion(CompletionEvent {
            task_id: TaskId(5),
            device_id: DeviceId(9),
            response: ResponsePayload::Evaluate { loss: Some(0.5) },
        });
        frame_tx.send(&Msg::Data(Payload::Event(event))).await?;
        frame_tx.send(&Msg::Err("bye".into())).await
    });

    let first: Msg = rx.recv().await.unwrap();
    assert!(matches!(
        first,
        Msg::Control(Command::Subscribe { consumer_id: 1 })
    ));

    match rx.recv().await.unwrap() {
        Msg::Data(Payload::Event(Event::Completion(ev))) => {
            assert_eq!(ev.task_id, TaskId(5));
            assert_eq!(ev.response.loss(), Some(0.5));
        }
        other => panic!("unexpected message {other:?}"),
    }

    let mut buf = Vec::new();
    let last: Msg = rx.recv_into(&mut buf).await.unwrap();
    assert!(matches!(last, Msg::Err(text) if text == "bye"));

    sender.await.unwrap().unwrap();
}

#[tokio::test]
async fn closed_stream_is_an_error() {
    let (one, two) = io::duplex(64);
    drop(one);
    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    assert!(rx.recv::<Msg>().await.is_err());
}

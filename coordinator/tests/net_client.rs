use std::{
    io,
    time::{Duration, SystemTime},
};

use comms::{
    msg::{Command, Msg, Payload},
    specs::{
        CompletionEvent, DeviceId, Event, ModelSnapshot, RequestPayload, ResponsePayload, TaskId,
        TaskReceipt, TaskSubmission, Tensor,
    },
};
use coordinator::{DeviceDirectory, NetClient, TaskChannel};
use tokio::net::TcpListener;
use tokio_test::{assert_err, assert_ok};

const DEVICES: [DeviceId; 2] = [DeviceId(1), DeviceId(2)];

/// Serves one control connection and one subscription, then reports the last command seen
/// on the subscription.
async fn fake_broker(listener: TcpListener) -> io::Result<Command> {
    let (control, _) = listener.accept().await?;
    let (rx, tx) = control.into_split();
    let (mut control_rx, mut control_tx) = comms::channel(rx, tx);

    let Msg::Control(Command::ListDevices { freshness_secs: 60 }) = control_rx.recv().await? else {
        return Err(io::Error::other("expected a device listing"));
    };
    control_tx
        .send(&Msg::Data(Payload::Devices(DEVICES.to_vec())))
        .await?;

    let (sub, _) = listener.accept().await?;
    let (rx, tx) = sub.into_split();
    let (mut sub_rx, mut sub_tx) = comms::channel(rx, tx);

    let subscribe @ Msg::Control(Command::Subscribe { .. }) = sub_rx.recv().await? else {
        return Err(io::Error::other("expected a subscription"));
    };
    sub_tx.send(&subscribe).await?;

    let mut next_task = 0;
    loop {
        match control_rx.recv().await? {
            Msg::Data(Payload::Submit(submission)) if DEVICES.contains(&submission.device_id) => {
                next_task += 1;
                let task_id = TaskId(next_task);

                let receipt = TaskReceipt::new(task_id, SystemTime::now());
                control_tx.send(&Msg::Data(Payload::Accepted(receipt))).await?;

                let event = Event::Completion(CompletionEvent {
                    task_id,
                    device_id: submission.device_id,
                    response: ResponsePayload::Evaluate { loss: Some(0.25) },
                });
                sub_tx.send(&Msg::Data(Payload::Event(event))).await?;
            }
            Msg::Data(Payload::Submit(submission)) => {
                let detail = format!("unknown {}", submission.device_id);
                control_tx.send(&Msg::Err(detail)).await?;
            }
            Msg::Control(Command::Disconnect) => break,
            other => return Err(io::Error::other(format!("unexpected {}", other.kind()))),
        }
    }

    match sub_rx.recv().await? {
        Msg::Control(cmd) => Ok(cmd),
        other => Err(io::Error::other(format!("unexpected {}", other.kind()))),
    }
}

fn evaluate_request() -> RequestPayload {
    RequestPayload::Evaluate {
        model: ModelSnapshot {
            topology: "{}".into(),
            weights: vec![Tensor::zeros(vec![1])],
        },
        batch_size: 1,
        inputs: Tensor::zeros(vec![2, 1]),
        outputs: Tensor::zeros(vec![2, 1]),
    }
}

#[tokio::test]
async fn net_client_talks_to_the_broker() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let broker = tokio::spawn(fake_broker(listener));

    let mut client = assert_ok!(NetClient::connect(addr).await);
    assert_eq!(client.broker_addr(), addr);

    let devices = assert_ok!(client.list_available(Duration::from_secs(60)).await);
    assert_eq!(devices, DEVICES);

    let mut subscription = assert_ok!(client.subscribe(7).await);

    let submission = TaskSubmission::new(DeviceId(2), 7, evaluate_request());
    let receipt = assert_ok!(client.submit(&submission).await);
    assert_eq!(receipt.task_id, TaskId(1));

    let Some(Event::Completion(completion)) = subscription.recv().await else {
        panic!("expected a completion event");
    };
    assert_eq!(completion.task_id, TaskId(1));
    assert_eq!(completion.device_id, DeviceId(2));
    assert_eq!(completion.response.loss(), Some(0.25));

    let unknown = TaskSubmission::new(DeviceId(9), 7, evaluate_request());
    let err = assert_err!(client.submit(&unknown).await);
    assert_eq!(err.to_string(), "unknown device-9");

    subscription.cancel();
    assert!(subscription.recv().await.is_none());
    assert_ok!(client.disconnect().await);

    let last = broker.await.unwrap().unwrap();
    assert_eq!(last, Command::Unsubscribe);
}

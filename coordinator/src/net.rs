use std::{io, net::SocketAddr, time::Duration};

use comms::{
    FrameReceiver, FrameSender,
    msg::{Command, Msg, Payload},
    specs::{DeviceId, TaskReceipt, TaskSubmission},
};
use log::{debug, info, warn};
use tokio::{
    net::{
        TcpStream, ToSocketAddrs,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;

use crate::channel::{DeviceDirectory, Subscription, TaskChannel};

const EVENT_QUEUE_LEN: usize = 1024;

/// A TCP client for the external task broker.
///
/// Requests (`Submit`, `ListDevices`) share one control connection and are answered in
/// order. Each subscription gets a connection of its own that lives as long as the
/// `Subscription` does.
pub struct NetClient {
    addr: SocketAddr,
    rx: FrameReceiver<OwnedReadHalf>,
    tx: FrameSender<OwnedWriteHalf>,
}

impl NetClient {
    /// Connects to the broker at `addr`.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let (addr, rx, tx) = open(addr).await?;
        info!("connected to broker at {addr}");

        Ok(Self { addr, rx, tx })
    }

    pub fn broker_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Gracefully closes the control connection.
    pub async fn disconnect(mut self) -> io::Result<()> {
        self.tx.send(&Msg::Control(Command::Disconnect)).await?;
        self.tx.shutdown().await
    }

    async fn request(&mut self, msg: &Msg) -> io::Result<Payload> {
        self.tx.send(msg).await?;

        match self.rx.recv().await? {
            Msg::Data(payload) => Ok(payload),
            Msg::Err(detail) => Err(io::Error::other(detail)),
            other => Err(unexpected(&other)),
        }
    }
}

impl TaskChannel for NetClient {
    async fn submit(&mut self, submission: &TaskSubmission) -> io::Result<TaskReceipt> {
        let msg = Msg::Data(Payload::Submit(submission.clone()));

        match self.request(&msg).await? {
            Payload::Accepted(receipt) => Ok(receipt),
            other => Err(unexpected(&Msg::Data(other))),
        }
    }

    async fn subscribe(&mut self, consumer_id: u64) -> io::Result<Subscription> {
        let (_, mut rx, mut tx) = open(self.addr).await?;

        let subscribe = Msg::Control(Command::Subscribe { consumer_id });
        tx.send(&subscribe).await?;

        // The broker echoes the command once both streams are attached.
        match rx.recv().await? {
            Msg::Control(Command::Subscribe { .. }) => {}
            Msg::Err(detail) => return Err(io::Error::other(detail)),
            other => return Err(unexpected(&other)),
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_LEN);
        let token = CancellationToken::new();
        let cancelled = token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    msg = rx.recv::<Msg>() => match msg {
                        Ok(Msg::Data(Payload::Event(event))) => {
                            if events_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Ok(Msg::Err(detail)) => {
                            warn!("broker closed the subscription: {detail}");
                            break;
                        }
                        Ok(other) => warn!("ignoring unexpected {} message on subscription", other.kind()),
                        Err(e) => {
                            debug!("subscription stream ended: {e}");
                            break;
                        }
                    },
                }
            }

            if let Err(e) = tx.send(&Msg::Control(Command::Unsubscribe)).await {
                debug!("failed to unsubscribe: {e}");
            }
            if let Err(e) = tx.shutdown().await {
                debug!("failed to shut the subscription down: {e}");
            }
        });

        debug!("subscribed as consumer {consumer_id}");
        Ok(Subscription::new(events_rx, token))
    }
}

impl DeviceDirectory for NetClient {
    async fn list_available(&mut self, freshness: Duration) -> io::Result<Vec<DeviceId>> {
        let msg = Msg::Control(Command::ListDevices {
            freshness_secs: freshness.as_secs(),
        });

        match self.request(&msg).await? {
            Payload::Devices(ids) => Ok(ids),
            other => Err(unexpected(&Msg::Data(other))),
        }
    }
}

async fn open<A: ToSocketAddrs>(
    addr: A,
) -> io::Result<(
    SocketAddr,
    FrameReceiver<OwnedReadHalf>,
    FrameSender<OwnedWriteHalf>,
)> {
    let stream = TcpStream::connect(addr).await?;
    let addr = stream.peer_addr()?;
    let (rx, tx) = stream.into_split();
    let (rx, tx) = comms::channel(rx, tx);

    Ok((addr, rx, tx))
}

fn unexpected(msg: &Msg) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("unexpected {} message from broker", msg.kind()),
    )
}

use clap::ValueEnum;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::config::clamp_permits;
use crate::message::Message;

/// What a producer does when the queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OverflowPolicy {
    #[default]
    Block,
    Drop,
    Grow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Accepted,
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("message channel closed")]
pub struct ChannelClosed;

#[derive(Debug, Clone)]
pub enum MessageSender {
    Bounded {
        tx: mpsc::Sender<Message>,
        policy: OverflowPolicy,
    },
    Unbounded(mpsc::UnboundedSender<Message>),
}

#[derive(Debug)]
pub enum MessageReceiver {
    Bounded(mpsc::Receiver<Message>),
    Unbounded(mpsc::UnboundedReceiver<Message>),
}

pub fn channel(capacity: usize, policy: OverflowPolicy) -> (MessageSender, MessageReceiver) {
    match policy {
        OverflowPolicy::Grow => {
            let (tx, rx) = mpsc::unbounded_channel();
            (MessageSender::Unbounded(tx), MessageReceiver::Unbounded(rx))
        }
        OverflowPolicy::Block | OverflowPolicy::Drop => {
            let (tx, rx) = mpsc::channel(clamp_permits(capacity));
            (
                MessageSender::Bounded { tx, policy },
                MessageReceiver::Bounded(rx),
            )
        }
    }
}

impl MessageSender {
    pub async fn enqueue(&self, message: Message) -> Result<Enqueued, ChannelClosed> {
        match self {
            MessageSender::Bounded {
                tx,
                policy: OverflowPolicy::Drop,
            } => match tx.try_send(message) {
                Ok(()) => Ok(Enqueued::Accepted),
                Err(TrySendError::Full(_)) => Ok(Enqueued::Dropped),
                Err(TrySendError::Closed(_)) => Err(ChannelClosed),
            },
            MessageSender::Bounded { tx, .. } => tx
                .send(message)
                .await
                .map(|()| Enqueued::Accepted)
                .map_err(|_| ChannelClosed),
            MessageSender::Unbounded(tx) => tx
                .send(message)
                .map(|()| Enqueued::Accepted)
                .map_err(|_| ChannelClosed),
        }
    }

    pub fn policy(&self) -> OverflowPolicy {
        match self {
            MessageSender::Bounded { policy, .. } => *policy,
            MessageSender::Unbounded(_) => OverflowPolicy::Grow,
        }
    }
}

impl MessageReceiver {
    pub async fn recv(&mut self) -> Option<Message> {
        match self {
            MessageReceiver::Bounded(rx) => rx.recv().await,
            MessageReceiver::Unbounded(rx) => rx.recv().await,
        }
    }
}

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::channel::MessageReceiver;
use crate::message::Message;

pub trait MessageSink: Send + 'static {
    fn report(&mut self, message: Message);
}

#[derive(Debug, Default)]
pub struct LogSink;

impl MessageSink for LogSink {
    fn report(&mut self, message: Message) {
        info!(from = %message.origin(), payload = %message.text(), "received message");
    }
}

impl MessageSink for mpsc::UnboundedSender<Message> {
    fn report(&mut self, message: Message) {
        let _ = self.send(message);
    }
}

impl MessageSink for Box<dyn MessageSink> {
    fn report(&mut self, message: Message) {
        (**self).report(message)
    }
}

pub struct Aggregator<S> {
    rx: MessageReceiver,
    sink: S,
}

impl<S: MessageSink> Aggregator<S> {
    pub fn new(rx: MessageReceiver, sink: S) -> Self {
        Self { rx, sink }
    }

    /// Drains the queue until every sender is dropped or `shutdown` fires.
    /// Returns how many messages were reported.
    pub async fn run(mut self, shutdown: CancellationToken) -> u64 {
        let mut handled = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                m = self.rx.recv() => m,
            };

            match next {
                Some(message) => {
                    self.sink.report(message);
                    handled += 1;
                }
                None => break,
            }
        }

        debug!(handled, "aggregator stopped");
        handled
    }
}

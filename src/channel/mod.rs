//! Mailbox channels
//!
//! A mailbox is the one-directional, ordered delivery primitive between
//! a sender and a receiver. Mailboxes are bounded: a sender waits when
//! the receiver's queue is full, which is the backpressure story for
//! overloaded instances. Writing to a closed mailbox fails with
//! `ChannelClosed`; reading a closed, drained mailbox signals
//! end-of-stream with `None`.
//!
//! Mailboxes back both an instance's inbox and the caller side of a
//! reply channel.

use tokio::sync::mpsc;

use crate::core::{Envelope, FabricError, FabricResult};

/// Default capacity for instance inboxes
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

/// Default capacity for transport-internal delivery queues
pub const DELIVERY_QUEUE_CAPACITY: usize = 256;

/// Create a bounded mailbox pair
pub fn mailbox(capacity: usize) -> (MailboxSender, MailboxReader) {
    let (tx, rx) = mpsc::channel(capacity);
    (MailboxSender(tx), MailboxReader(rx))
}

/// Writer end of a mailbox; cheap to clone
#[derive(Clone)]
pub struct MailboxSender(mpsc::Sender<Envelope>);

impl MailboxSender {
    /// Deliver an envelope, waiting while the mailbox is full
    pub async fn send(&self, env: Envelope) -> FabricResult<()> {
        self.0
            .send(env)
            .await
            .map_err(|_| FabricError::ChannelClosed)
    }

    /// Deliver without waiting
    pub fn try_send(&self, env: Envelope) -> FabricResult<()> {
        self.0.try_send(env).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => FabricError::transport("mailbox full"),
            mpsc::error::TrySendError::Closed(_) => FabricError::ChannelClosed,
        })
    }

    /// True once the reader end is gone
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

impl std::fmt::Debug for MailboxSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxSender")
            .field("closed", &self.0.is_closed())
            .finish()
    }
}

/// Reader end of a mailbox; envelopes come out in FIFO order
pub struct MailboxReader(mpsc::Receiver<Envelope>);

impl MailboxReader {
    /// Wrap a raw receiver whose sender a transport keeps internally
    pub(crate) fn from_receiver(rx: mpsc::Receiver<Envelope>) -> Self {
        Self(rx)
    }

    /// Receive the next envelope; `None` once closed and drained
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.0.recv().await
    }

    /// Receive without waiting
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.0.try_recv().ok()
    }

    /// Close the reader; senders fail from here on, queued envelopes can
    /// still be drained
    pub fn close(&mut self) {
        self.0.close();
    }
}

impl std::fmt::Debug for MailboxReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxReader").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_to_closed_mailbox_fails() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(async {
            let (tx, rx) = mailbox(4);
            drop(rx);
            let result = tx.send(Envelope::empty("t")).await;
            assert!(matches!(result, Err(FabricError::ChannelClosed)));
            assert!(tx.is_closed());
        });
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (tx, mut rx) = mailbox(8);
        for i in 0..5u8 {
            tx.send(Envelope::new("t", vec![i])).await.unwrap();
        }
        for i in 0..5u8 {
            let env = rx.recv().await.unwrap();
            assert_eq!(env.payload, vec![i]);
        }
    }

    #[tokio::test]
    async fn test_drained_closed_mailbox_signals_end() {
        let (tx, mut rx) = mailbox(4);
        tx.send(Envelope::empty("t")).await.unwrap();
        drop(tx);

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_try_send_full() {
        let (tx, _rx) = mailbox(1);
        tx.try_send(Envelope::empty("t")).unwrap();
        let result = tx.try_send(Envelope::empty("t"));
        assert!(matches!(result, Err(FabricError::Transport(_))));
    }

    #[tokio::test]
    async fn test_closed_reader_still_drains() {
        let (tx, mut rx) = mailbox(4);
        tx.send(Envelope::new("t", b"a".to_vec())).await.unwrap();
        rx.close();

        assert!(tx.send(Envelope::empty("t")).await.is_err());
        let env = rx.recv().await.unwrap();
        assert_eq!(env.payload, b"a");
        assert!(rx.recv().await.is_none());
    }
}

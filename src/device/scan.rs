use std::sync::Arc;
use std::time::Duration;
use futures::channel::mpsc::Sender;
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::device::link::LinkEvent;
use crate::device::transport::Transport;
use crate::error::TransportError;

/**
 * A time-bounded scan. The session forwards every device the transport
 * reports; name matching happens in the link, which stops the session on
 * the first match. The session expires on its own when the timeout elapses,
 * so an absent device does not keep the radio busy forever. The underlying
 * transport scan is stopped on every exit path.
 */
pub struct ScanSession {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/**
 * Delivers one event to the link unless the session is cancelled first.
 * The link cancels before joining the session, so a send that is still
 * waiting for mailbox room can never hold up the join.
 */
async fn deliver<D, C>(
    cancel: &CancellationToken,
    events: &mut Sender<(u64, LinkEvent<D, C>)>,
    event: (u64, LinkEvent<D, C>),
) {
    tokio::select! {
        _ = cancel.cancelled() => {},
        _ = events.send(event) => {},
    }
}

impl ScanSession {
    pub fn spawn<T: Transport>(
        transport: Arc<T>,
        timeout: Duration,
        generation: u64,
        mut events: Sender<(u64, LinkEvent<T::Device, T::Channel>)>,
        cancel: CancellationToken,
    ) -> ScanSession {
        let task_cancel = cancel.clone();

        let handle = spawn(async move {
            let mut discovered = match transport.scan().await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!("Failed to start scanning: {}", err);
                    deliver(&task_cancel, &mut events, (generation, LinkEvent::ScanFailed { error: err })).await;
                    return;
                },
            };

            let expiry = sleep(timeout);
            tokio::pin!(expiry);

            'mainloop: loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        break 'mainloop;
                    },
                    _ = &mut expiry => {
                        debug!("Scan expired after {:?}", timeout);
                        deliver(&task_cancel, &mut events, (generation, LinkEvent::ScanExpired)).await;
                        break 'mainloop;
                    },
                    next = discovered.next() => match next {
                        Some(seen) => {
                            // a full mailbox only drops a sighting, advertisements repeat
                            if let Err(err) = events.try_send((generation, LinkEvent::DeviceSeen { seen })) {
                                if err.is_disconnected() {
                                    break 'mainloop;
                                }
                                debug!("The link is busy, dropped a sighting");
                            }
                        },
                        None => {
                            warn!("The discovery stream ended on its own");
                            let error = TransportError::ScanInterrupted;
                            deliver(&task_cancel, &mut events, (generation, LinkEvent::ScanFailed { error })).await;
                            break 'mainloop;
                        },
                    },
                }
            }

            drop(discovered);
            if let Err(err) = transport.stop_scan().await {
                warn!("Failed to stop scanning: {}", err);
            }
        });

        ScanSession { cancel, handle }
    }

    /**
     * Stops the session. Safe to call more than once, and after the session
     * has already expired.
     */
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /**
     * Stops the session and waits until the transport scan has been stopped.
     * Starting a new scan before this returns could race the old stop.
     */
    pub async fn shutdown(self) {
        self.stop();
        self.handle.await.expect("Failed to join scan task");
    }
}

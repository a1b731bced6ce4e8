use std::future::Future;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::TransportError;

/**
 * A device seen while scanning: the advertised name, the adapter address,
 * and the transport's opaque connect handle.
 */
#[derive(Debug, Clone)]
pub struct Discovered<D> {
    pub name: String,
    pub address: String,
    pub device: D,
}

/**
 * Connection lifecycle notifications for one device. The outcome of the
 * connect attempt arrives first (`Connected` or `Failed`); a later
 * `Disconnected` means the link dropped.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    Failed,
}

/**
 * What capability discovery found on a connected device. `channel` is
 * present only when both the service and its writable characteristic
 * matched the expected identifiers.
 */
#[derive(Debug, Clone)]
pub struct Capabilities<C> {
    pub service_found: bool,
    pub channel: Option<C>,
}

/**
 * The radio/GATT engine, as far as this crate is concerned. All operations
 * are issue-now, complete-later; scan results and connection changes are
 * delivered as streams so the caller can marshal them onto its own task.
 */
pub trait Transport: Send + Sync + 'static {
    type Device: Clone + Send + Sync + 'static;
    type Channel: Clone + Send + Sync + 'static;

    /**
     * Starts scanning and returns the stream of devices seen. The stream
     * is unfiltered; name matching happens upstream.
     */
    fn scan(
        &self,
    ) -> impl Future<Output = Result<BoxStream<'static, Discovered<Self::Device>>, TransportError>> + Send;

    fn stop_scan(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /**
     * Initiates a connect and returns the stream of connection events for
     * this device, starting with the outcome of the attempt itself.
     */
    fn connect(
        &self,
        device: &Self::Device,
    ) -> impl Future<Output = Result<BoxStream<'static, ConnectionEvent>, TransportError>> + Send;

    fn discover_capabilities(
        &self,
        device: &Self::Device,
        service: Uuid,
        characteristic: Uuid,
    ) -> impl Future<Output = Result<Capabilities<Self::Channel>, TransportError>> + Send;

    fn write(
        &self,
        device: &Self::Device,
        channel: &Self::Channel,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn close(&self, device: &Self::Device) -> impl Future<Output = ()> + Send;
}

/**
 * Consent for using the radio. `request_permission` is fire and forget;
 * the answer is delivered later as a granted/denied command into the link.
 */
pub trait PermissionGate: Send + Sync + 'static {
    fn has_permission(&self) -> bool;
    fn request_permission(&self);
}

/**
 * Gate for platforms where the adapter needs no runtime prompt.
 */
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantedGate;

impl PermissionGate for GrantedGate {
    fn has_permission(&self) -> bool {
        true
    }

    fn request_permission(&self) {}
}

use std::time::Duration;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::time::sleep;
use uuid::Uuid;

use crate::device::transport::{Capabilities, ConnectionEvent, Discovered, Transport};
use crate::error::TransportError;

fn map_btle_error(err: btleplug::Error) -> TransportError {
    match err {
        btleplug::Error::PermissionDenied => TransportError::PermissionDenied,
        other => TransportError::Btle { source: other },
    }
}

/**
 * The production transport, backed by btleplug. One instance wraps one
 * bluetooth adapter; every write is bounded by the configured deadline so
 * a stuck GATT transaction cannot wedge the command pipeline.
 */
#[derive(Debug, Clone)]
pub struct BtleTransport {
    adapter: Adapter,
    write_deadline: Duration,
}

impl BtleTransport {
    /**
     * Picks the first usable adapter.
     */
    pub async fn new(write_deadline: Duration) -> Result<BtleTransport, TransportError> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters.into_iter().next().ok_or(TransportError::NoAdapter)?;

        info!(
            "Using bluetooth adapter {}",
            adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()),
        );
        Ok(BtleTransport { adapter, write_deadline })
    }
}

impl Transport for BtleTransport {
    type Device = Peripheral;
    type Channel = Characteristic;

    async fn scan(&self) -> Result<BoxStream<'static, Discovered<Peripheral>>, TransportError> {
        let events = self.adapter.events().await.map_err(map_btle_error)?;
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(map_btle_error)?;

        let adapter = self.adapter.clone();
        let discovered = events
            .filter_map(move |event| {
                let adapter = adapter.clone();
                async move {
                    let id = match event {
                        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                        _ => return None,
                    };

                    let peripheral = match adapter.peripheral(&id).await {
                        Ok(peripheral) => peripheral,
                        Err(err) => {
                            warn!("Failed to look up a discovered peripheral: {:?}", err);
                            return None;
                        },
                    };

                    let properties = match peripheral.properties().await {
                        Ok(Some(properties)) => properties,
                        Ok(None) => return None,
                        Err(err) => {
                            warn!("Could not query peripheral for properties: {:?}", err);
                            return None;
                        },
                    };

                    // devices that advertise no name cannot match the filter
                    let name = properties.local_name?;
                    Some(Discovered {
                        name,
                        address: properties.address.to_string(),
                        device: peripheral,
                    })
                }
            })
            .boxed();

        Ok(discovered)
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(
        &self,
        device: &Peripheral,
    ) -> Result<BoxStream<'static, ConnectionEvent>, TransportError> {
        // subscribe before connecting so an immediate drop is not missed
        let events = self.adapter.events().await?;

        let peripheral = device.clone();
        let id = peripheral.id();

        let attempt = stream::once(async move {
            match peripheral.connect().await {
                Ok(()) => ConnectionEvent::Connected,
                Err(err) => {
                    warn!("Connecting to peripheral failed: {:?}", err);
                    ConnectionEvent::Failed
                },
            }
        });

        let drops = events.filter_map(move |event| {
            let id = id.clone();
            async move {
                match event {
                    CentralEvent::DeviceDisconnected(other) if other == id => {
                        Some(ConnectionEvent::Disconnected)
                    },
                    _ => None,
                }
            }
        });

        Ok(attempt.chain(drops).boxed())
    }

    async fn discover_capabilities(
        &self,
        device: &Peripheral,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Capabilities<Characteristic>, TransportError> {
        device.discover_services().await?;

        let mut service_found = false;
        for candidate in device.services() {
            if !candidate.uuid.eq(&service) {
                continue;
            }
            service_found = true;

            for found in &candidate.characteristics {
                if found.uuid.eq(&characteristic) {
                    debug!("Found drive characteristic {:?} {:?}", candidate.uuid, found.uuid);
                    return Ok(Capabilities {
                        service_found: true,
                        channel: Some(found.clone()),
                    });
                }
            }
        }

        Ok(Capabilities { service_found, channel: None })
    }

    async fn write(
        &self,
        device: &Peripheral,
        channel: &Characteristic,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let fut = device.write(channel, payload, WriteType::WithResponse);

        tokio::select! {
            _ = sleep(self.write_deadline) => {
                warn!("Writing to the drive characteristic took too long");
                Err(TransportError::WriteTimedOut)
            },
            result = fut => {
                result.map_err(TransportError::from)
            },
        }
    }

    async fn close(&self, device: &Peripheral) {
        if let Err(err) = device.disconnect().await {
            debug!("Failed to disconnect peripheral: {:?}", err);
        }
    }
}

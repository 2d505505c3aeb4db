//! Real Bluetooth LE transport built on `btleplug`.
//!
//! Compiled only with the `ble` feature.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{BDAddr, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use hub_core::HubAddress;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{HubAdapter, HubTransport, TransportError};

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(300);

fn link_error(op: &'static str, err: btleplug::Error) -> TransportError {
    match err {
        btleplug::Error::NotConnected => TransportError::Disconnected,
        btleplug::Error::TimedOut(after) => TransportError::TimedOut { op, after },
        other => TransportError::Link {
            code: None,
            message: format!("{op}: {other}"),
        },
    }
}

/// A local Bluetooth adapter.
pub struct BtleAdapter {
    adapter: Adapter,
    scan_timeout: Duration,
}

impl BtleAdapter {
    /// Opens the adapter whose description contains `name`, or the first one.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AdapterUnavailable`] if the Bluetooth stack
    /// cannot be reached or no matching adapter exists.
    pub async fn open(name: Option<&str>, scan_timeout: Duration) -> Result<Self, TransportError> {
        let unavailable = |e: btleplug::Error| TransportError::AdapterUnavailable(e.to_string());

        let manager = Manager::new().await.map_err(unavailable)?;
        let adapters = manager.adapters().await.map_err(unavailable)?;

        let mut selected = None;
        for adapter in adapters {
            let info = adapter.adapter_info().await.map_err(unavailable)?;
            debug!("found Bluetooth adapter: {info}");
            let matches = name.map_or(true, |wanted| info.contains(wanted));
            if matches {
                info!("using Bluetooth adapter {info}");
                selected = Some(adapter);
                break;
            }
        }

        let adapter = selected.ok_or_else(|| {
            TransportError::AdapterUnavailable(match name {
                Some(wanted) => format!("no adapter matching {wanted:?}"),
                None => "no Bluetooth adapter found".to_string(),
            })
        })?;

        Ok(Self {
            adapter,
            scan_timeout,
        })
    }

    async fn find_peripheral(&self, address: &HubAddress) -> Result<Peripheral, TransportError> {
        let wanted = BDAddr::from(address.octets());
        let deadline = tokio::time::Instant::now() + self.scan_timeout;

        while tokio::time::Instant::now() < deadline {
            let peripherals = self
                .adapter
                .peripherals()
                .await
                .map_err(|e| link_error("scan", e))?;
            if let Some(found) = peripherals.into_iter().find(|p| p.address() == wanted) {
                return Ok(found);
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        }

        Err(TransportError::ConnectFailed {
            address: *address,
            message: format!("not seen within {:?}", self.scan_timeout),
        })
    }
}

#[async_trait]
impl HubAdapter for BtleAdapter {
    async fn connect(&self, address: &HubAddress) -> Result<Box<dyn HubTransport>, TransportError> {
        let connect_failed = |e: btleplug::Error| TransportError::ConnectFailed {
            address: *address,
            message: e.to_string(),
        };

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(connect_failed)?;
        let found = self.find_peripheral(address).await;
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("stop_scan failed: {e}");
        }
        let peripheral = found?;

        peripheral.connect().await.map_err(connect_failed)?;
        if let Err(e) = peripheral.discover_services().await {
            let _ = peripheral.disconnect().await;
            return Err(connect_failed(e));
        }
        debug!(
            "hub {address} exposes {} characteristics",
            peripheral.characteristics().len()
        );

        Ok(Box::new(BtleTransport { peripheral }))
    }
}

/// An open connection to one hub.
pub struct BtleTransport {
    peripheral: Peripheral,
}

impl BtleTransport {
    fn characteristic(&self, uuid: &Uuid) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == *uuid)
            .ok_or(TransportError::CharacteristicNotFound { uuid: *uuid })
    }
}

#[async_trait]
impl HubTransport for BtleTransport {
    async fn write(&self, characteristic: &Uuid, data: &[u8]) -> Result<(), TransportError> {
        let target = self.characteristic(characteristic)?;
        self.peripheral
            .write(&target, data, WriteType::WithResponse)
            .await
            .map_err(|e| link_error("write", e))
    }

    async fn read(&self, characteristic: &Uuid) -> Result<Vec<u8>, TransportError> {
        let target = self.characteristic(characteristic)?;
        self.peripheral
            .read(&target)
            .await
            .map_err(|e| link_error("read", e))
    }

    async fn disconnect(&self) {
        if let Err(e) = self.peripheral.disconnect().await {
            warn!("disconnect failed: {e}");
        }
    }
}

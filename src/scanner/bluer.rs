//! BlueZ D-Bus backend for scale scanning.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.

use super::{
    ADVERTISEMENT_CHANNEL_BUFFER_SIZE, AdvertisementResult, SERVICE_DATA_16_TYPE, ScanError,
};
use crate::advertisement::{RawAdvertisement, WEIGHT_SERVICE_UUID16};
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{Adapter, Address, DeviceEvent, DeviceProperty, Session, Uuid};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Convert BlueZ service data into a [`RawAdvertisement`].
fn to_advertisement(address: Address, service_data: HashMap<Uuid, Vec<u8>>) -> RawAdvertisement {
    RawAdvertisement {
        device: address.to_string(),
        service_data: service_data
            .into_iter()
            .map(|(uuid, data)| (uuid.to_string(), data))
            .collect(),
    }
}

/// Start scanning for scales using the BlueZ D-Bus backend.
///
/// Registers an advertisement monitor matching body-composition service data.
/// Every matched device is watched for service-data changes, each change is
/// sent through the returned channel. Runs until the receiver is dropped.
pub async fn start_scan() -> Result<mpsc::Receiver<AdvertisementResult>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    log::debug!("Using Bluetooth adapter {}", adapter.name());

    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    // Service data AD structures start with the 16-bit UUID in little-endian order
    let pattern = Pattern {
        data_type: SERVICE_DATA_16_TYPE,
        start_position: 0,
        content: WEIGHT_SERVICE_UUID16.to_le_bytes().to_vec(),
    };

    let monitor_manager = adapter.monitor().await?;
    let mut monitor_handle = monitor_manager
        .register(Monitor {
            patterns: Some(vec![pattern]),
            ..Default::default()
        })
        .await?;

    // Spawn a task that owns all Bluetooth state and runs the event loop
    tokio::spawn(async move {
        // Keep all Bluetooth state alive by moving it into this task
        let _session = session;
        let _monitor_manager = monitor_manager;
        let mut watched = HashSet::new();

        while let Some(event) = monitor_handle.next().await {
            if tx.is_closed() {
                break;
            }
            match event {
                MonitorEvent::DeviceFound(device_id) => {
                    let address = device_id.device;
                    log::debug!("Scale advertisement from {address}");
                    if let Err(e) = process_device(&adapter, address, &tx, &mut watched).await
                        && tx.send(Err(e)).await.is_err()
                    {
                        break;
                    }
                }
                MonitorEvent::DeviceLost(device_id) => {
                    log::debug!("Lost {}", device_id.device);
                }
                _ => {}
            }
        }
        log::debug!("BlueZ monitor stopped");
    });

    Ok(rx)
}

/// Forward the current service data of a discovered device and watch it for
/// further changes.
///
/// Each device is watched at most once. The watcher ends when the channel is
/// closed or the device disappears from BlueZ.
async fn process_device(
    adapter: &Adapter,
    address: Address,
    tx: &mpsc::Sender<AdvertisementResult>,
    watched: &mut HashSet<Address>,
) -> Result<(), ScanError> {
    let device = adapter.device(address)?;

    if let Some(service_data) = device.service_data().await? {
        let _ = tx.send(Ok(to_advertisement(address, service_data))).await;
    }

    if !watched.insert(address) {
        return Ok(());
    }

    let mut events = device.events().await?;
    let tx = tx.clone();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if let DeviceEvent::PropertyChanged(DeviceProperty::ServiceData(service_data)) = event
                && tx
                    .send(Ok(to_advertisement(address, service_data)))
                    .await
                    .is_err()
            {
                break;
            }
        }
    });

    Ok(())
}

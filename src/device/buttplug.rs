// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! A client for device servers speaking the Buttplug JSON message protocol over a websocket.
//!
//! Every websocket frame is a JSON array of externally tagged messages. Requests carry a non-zero
//! `Id` that the server echoes in its response; messages with an `Id` of zero are server events.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{
        mpsc::{self, Receiver, Sender, UnboundedSender},
        oneshot,
    },
    task::JoinHandle,
};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

use crate::error::{DeviceError, TransportError};

use super::TransportEvent;

/// The protocol message version this client speaks.
const MESSAGE_VERSION: u32 = 3;
const EVENT_ID: u32 = 0;
const VIBRATE: &str = "Vibrate";
const EVENT_BUFFER: usize = 64;
/// How long the server gets to answer a request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Messages sent from the client to the server.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all_fields = "PascalCase")]
pub(crate) enum ClientMessage {
    RequestServerInfo {
        id: u32,
        client_name: String,
        message_version: u32,
    },
    Ping {
        id: u32,
    },
    StartScanning {
        id: u32,
    },
    StopScanning {
        id: u32,
    },
    RequestDeviceList {
        id: u32,
    },
    ScalarCmd {
        id: u32,
        device_index: u32,
        scalars: Vec<Scalar>,
    },
    StopDeviceCmd {
        id: u32,
        device_index: u32,
    },
}

/// One actuator setting within a scalar command.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct Scalar {
    index: u32,
    scalar: f64,
    actuator_type: String,
}

/// Messages sent from the server to the client.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all_fields = "PascalCase")]
pub(crate) enum ServerMessage {
    Ok {
        id: u32,
    },
    Error {
        id: u32,
        #[serde(default)]
        error_message: String,
        #[serde(default)]
        error_code: u32,
    },
    ServerInfo {
        id: u32,
        #[serde(default)]
        server_name: String,
        message_version: u32,
        #[serde(default)]
        max_ping_time: u32,
    },
    DeviceList {
        id: u32,
        devices: Vec<DeviceMessageInfo>,
    },
    DeviceAdded {
        id: u32,
        device_name: String,
        device_index: u32,
        #[serde(default)]
        device_messages: DeviceMessages,
    },
    DeviceRemoved {
        id: u32,
        device_index: u32,
    },
    ScanningFinished {
        id: u32,
    },
}

impl ServerMessage {
    fn id(&self) -> u32 {
        match self {
            ServerMessage::Ok { id }
            | ServerMessage::Error { id, .. }
            | ServerMessage::ServerInfo { id, .. }
            | ServerMessage::DeviceList { id, .. }
            | ServerMessage::DeviceAdded { id, .. }
            | ServerMessage::DeviceRemoved { id, .. }
            | ServerMessage::ScanningFinished { id } => *id,
        }
    }
}

/// A device description as it appears in device lists.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DeviceMessageInfo {
    device_name: String,
    device_index: u32,
    #[serde(default)]
    device_messages: DeviceMessages,
}

/// The commands a device accepts. Only scalar commands matter here.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DeviceMessages {
    #[serde(default)]
    scalar_cmd: Vec<ScalarAttributes>,
}

impl DeviceMessages {
    /// Returns the feature indices of every vibration actuator.
    fn vibrate_features(&self) -> Vec<u32> {
        self.scalar_cmd
            .iter()
            .enumerate()
            .filter(|(_, attributes)| attributes.actuator_type == VIBRATE)
            .map(|(index, _)| index as u32)
            .collect()
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ScalarAttributes {
    actuator_type: String,
}

/// Parses a websocket frame into server messages. Messages this client doesn't understand are
/// skipped.
pub(crate) fn parse_frame(text: &str) -> Result<Vec<ServerMessage>, TransportError> {
    let values: Vec<serde_json::Value> = serde_json::from_str(text)?;
    Ok(values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<ServerMessage>(value.clone()) {
            Ok(message) => Some(message),
            Err(e) => {
                debug!(err = %e, message = %value, "Skipping unrecognized server message.");
                None
            }
        })
        .collect())
}

/// Forgets a request's response slot once the requester stops waiting, whether it got an answer,
/// timed out or was dropped.
struct PendingRequest<'a> {
    shared: &'a Shared,
    id: u32,
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        self.shared.pending.lock().remove(&self.id);
    }
}

/// State shared between the client, its devices and its background tasks.
struct Shared {
    next_id: AtomicU32,
    pending: Mutex<HashMap<u32, oneshot::Sender<ServerMessage>>>,
    outgoing: Mutex<Option<UnboundedSender<Message>>>,
    devices: Mutex<BTreeMap<u32, Arc<Device>>>,
}

impl Shared {
    /// Sends a request and waits for the response with the matching ID. Server errors are turned
    /// into transport errors.
    async fn request<F>(&self, build: F) -> Result<ServerMessage, TransportError>
    where
        F: FnOnce(u32) -> ClientMessage,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text = serde_json::to_string(&[build(id)])?;

        let outgoing = match self.outgoing.lock().clone() {
            Some(outgoing) => outgoing,
            None => return Err(TransportError::NotConnected),
        };

        let (response_tx, response_rx) = oneshot::channel();
        self.pending.lock().insert(id, response_tx);
        let _pending = PendingRequest { shared: self, id };
        if outgoing.send(Message::Text(text)).is_err() {
            return Err(TransportError::Closed);
        }

        let response = tokio::time::timeout(REQUEST_TIMEOUT, response_rx)
            .await
            .map_err(|_| TransportError::TimedOut(REQUEST_TIMEOUT))?;
        match response {
            Ok(ServerMessage::Error {
                error_message,
                error_code,
                ..
            }) => Err(TransportError::Rejected {
                code: error_code,
                message: error_message,
            }),
            Ok(message) => Ok(message),
            Err(_) => Err(TransportError::Closed),
        }
    }

    /// Sends a request that the server should acknowledge with Ok.
    async fn expect_ok<F>(&self, build: F) -> Result<(), TransportError>
    where
        F: FnOnce(u32) -> ClientMessage,
    {
        match self.request(build).await? {
            ServerMessage::Ok { .. } => Ok(()),
            other => Err(TransportError::Protocol(format!(
                "expected Ok, got {:?}",
                other
            ))),
        }
    }

    /// Routes a message from the server to its waiting request, or forwards it as an event.
    async fn route(self: &Arc<Self>, message: ServerMessage, events: &Sender<TransportEvent>) {
        let id = message.id();
        if id != EVENT_ID {
            match self.pending.lock().remove(&id) {
                Some(response_tx) => {
                    // The requester may have gone away, which is fine.
                    let _ = response_tx.send(message);
                }
                None => warn!(id, "Response for unknown request."),
            }
            return;
        }

        let event = match message {
            ServerMessage::DeviceAdded {
                device_name,
                device_index,
                device_messages,
                ..
            } => {
                let device = self.insert_device(DeviceMessageInfo {
                    device_name,
                    device_index,
                    device_messages,
                });
                info!(device = %device, "Device added.");
                TransportEvent::DeviceAdded(device)
            }
            ServerMessage::DeviceRemoved { device_index, .. } => {
                self.devices.lock().remove(&device_index);
                info!(index = device_index, "Device removed.");
                TransportEvent::DeviceRemoved(device_index)
            }
            ServerMessage::ScanningFinished { .. } => {
                debug!("Server finished scanning.");
                return;
            }
            other => {
                debug!(message = ?other, "Ignoring server event.");
                return;
            }
        };

        if events.send(event).await.is_err() {
            debug!("Event receiver is gone.");
        }
    }

    fn insert_device(self: &Arc<Self>, info: DeviceMessageInfo) -> Arc<Device> {
        let device = Arc::new(Device {
            index: info.device_index,
            name: info.device_name,
            vibrate_features: info.device_messages.vibrate_features(),
            shared: Arc::downgrade(self),
        });
        self.devices.lock().insert(device.index, device.clone());
        device
    }

    /// Forgets the session. Pending requests fail with a closed error.
    fn close(&self) {
        self.outgoing.lock().take();
        self.pending.lock().clear();
        self.devices.lock().clear();
    }

    async fn read_loop<S>(shared: Weak<Shared>, mut stream: S, events: Sender<TransportEvent>)
    where
        S: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        while let Some(frame) = stream.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!(err = %e, "Error reading from device server.");
                    break;
                }
            };

            let Some(shared) = shared.upgrade() else {
                return;
            };
            match parse_frame(&text) {
                Ok(messages) => {
                    for message in messages {
                        shared.route(message, &events).await;
                    }
                }
                Err(e) => warn!(err = %e, "Malformed frame from device server."),
            }
        }

        info!("Device server closed the connection.");
        if let Some(shared) = shared.upgrade() {
            shared.close();
        }
        let _ = events.send(TransportEvent::Disconnected).await;
    }
}

/// A device reachable through a device server.
pub struct Device {
    index: u32,
    name: String,
    vibrate_features: Vec<u32>,
    shared: Weak<Shared>,
}

impl Device {
    fn shared(&self) -> Result<Arc<Shared>, DeviceError> {
        self.shared
            .upgrade()
            .ok_or(DeviceError::Transport(TransportError::NotConnected))
    }
}

fn device_error(e: TransportError) -> DeviceError {
    match e {
        TransportError::Rejected { message, .. } => DeviceError::Rejected(message),
        e => DeviceError::Transport(e),
    }
}

#[async_trait]
impl super::Device for Device {
    fn index(&self) -> u32 {
        self.index
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn has_vibration(&self) -> bool {
        !self.vibrate_features.is_empty()
    }

    async fn vibrate(&self, speed: f64) -> Result<(), DeviceError> {
        if self.vibrate_features.is_empty() {
            return Err(DeviceError::Unsupported);
        }

        let speed = speed.clamp(0.0, 1.0);
        let scalars: Vec<Scalar> = self
            .vibrate_features
            .iter()
            .map(|feature| Scalar {
                index: *feature,
                scalar: speed,
                actuator_type: VIBRATE.to_string(),
            })
            .collect();
        let device_index = self.index;

        self.shared()?
            .expect_ok(|id| ClientMessage::ScalarCmd {
                id,
                device_index,
                scalars,
            })
            .await
            .map_err(device_error)
    }

    async fn stop(&self) -> Result<(), DeviceError> {
        let device_index = self.index;
        self.shared()?
            .expect_ok(|id| ClientMessage::StopDeviceCmd { id, device_index })
            .await
            .map_err(device_error)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (index {})", self.name, self.index)
    }
}

/// A websocket client for a device server.
pub struct Client {
    name: String,
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Client {
    /// Creates a new client that announces itself with the given name.
    pub fn new(name: &str) -> Client {
        Client {
            name: name.to_string(),
            shared: Arc::new(Shared {
                next_id: AtomicU32::new(1),
                pending: Mutex::new(HashMap::new()),
                outgoing: Mutex::new(None),
                devices: Mutex::new(BTreeMap::new()),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Stops the background tasks and forgets the session.
    fn teardown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.shared.close();
    }

    /// Performs the handshake and returns the server's ping interval.
    async fn handshake(&self) -> Result<Option<Duration>, TransportError> {
        let client_name = self.name.clone();
        match self
            .shared
            .request(|id| ClientMessage::RequestServerInfo {
                id,
                client_name,
                message_version: MESSAGE_VERSION,
            })
            .await?
        {
            ServerMessage::ServerInfo {
                server_name,
                message_version,
                max_ping_time,
                ..
            } => {
                info!(
                    server = server_name,
                    message_version, max_ping_time, "Connected to device server."
                );
                if max_ping_time == 0 {
                    Ok(None)
                } else {
                    Ok(Some(Duration::from_millis((max_ping_time / 2).max(1).into())))
                }
            }
            other => Err(TransportError::Protocol(format!(
                "expected ServerInfo, got {:?}",
                other
            ))),
        }
    }

    /// Asks the server for its device list and replaces the local copy with it.
    async fn refresh_devices(&self) -> Result<Vec<Arc<Device>>, TransportError> {
        let devices = match self
            .shared
            .request(|id| ClientMessage::RequestDeviceList { id })
            .await?
        {
            ServerMessage::DeviceList { devices, .. } => devices,
            other => {
                return Err(TransportError::Protocol(format!(
                    "expected DeviceList, got {:?}",
                    other
                )))
            }
        };

        self.shared.devices.lock().clear();
        Ok(devices
            .into_iter()
            .map(|info| self.shared.insert_device(info))
            .collect())
    }

    fn spawn_pinger(&self, interval: Duration) -> JoinHandle<()> {
        let shared = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                if let Err(e) = shared.expect_ok(|id| ClientMessage::Ping { id }).await {
                    error!(err = %e, "Ping to device server failed.");
                    return;
                }
            }
        })
    }
}

#[async_trait]
impl super::Transport for Client {
    async fn connect(&self, address: &str) -> Result<Receiver<TransportEvent>, TransportError> {
        info!(address, client = self.name, "Connecting to device server.");
        self.teardown();

        let (socket, _) = tokio_tungstenite::connect_async(address)
            .await
            .map_err(|e| TransportError::Websocket(Box::new(e)))?;
        let (mut sink, stream) = socket.split();
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        *self.shared.outgoing.lock() = Some(outgoing_tx);

        // The writer ends once every sender is dropped, which closes the socket.
        tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    warn!(err = %e, "Error writing to device server.");
                    break;
                }
            }
            let _ = sink.close().await;
        });
        let reader = tokio::spawn(Shared::read_loop(
            Arc::downgrade(&self.shared),
            stream,
            events_tx,
        ));
        self.tasks.lock().push(reader);

        let ping_interval = match self.handshake().await {
            Ok(ping_interval) => ping_interval,
            Err(e) => {
                self.teardown();
                return Err(e);
            }
        };
        if let Some(ping_interval) = ping_interval {
            let pinger = self.spawn_pinger(ping_interval);
            self.tasks.lock().push(pinger);
        }

        if let Err(e) = self.refresh_devices().await {
            self.teardown();
            return Err(e);
        }

        Ok(events_rx)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.teardown();
        Ok(())
    }

    async fn start_scanning(&self) -> Result<(), TransportError> {
        self.shared
            .expect_ok(|id| ClientMessage::StartScanning { id })
            .await
    }

    async fn stop_scanning(&self) -> Result<(), TransportError> {
        self.shared
            .expect_ok(|id| ClientMessage::StopScanning { id })
            .await
    }

    async fn devices(&self) -> Result<Vec<Arc<dyn super::Device>>, TransportError> {
        Ok(self
            .refresh_devices()
            .await?
            .into_iter()
            .map(|device| device as Arc<dyn super::Device>)
            .collect())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.teardown();
    }
}

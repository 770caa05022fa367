//! Scenario replay against a loopback transport
//!
//! A scenario is a TOML file of steps:
//!
//! ```toml
//! [[step]]
//! action = "load"
//!
//! [[step]]
//! action = "connect"
//! device_id = "webusb-1"
//! vendor_id = 0x1234
//! product_id = 0x5678
//!
//! [[step]]
//! action = "open"
//! channel = "URBDRC_00"
//! ```
//!
//! Rejections from the multiplexer are reported per step and do not stop
//! the replay; malformed steps do.

use anyhow::{Context, Result, anyhow};
use mux::{LoopbackTransport, MuxError, ResultCode, SessionSettings, SlotSnapshot, UsbSession};
use protocol::{
    CONTROL_CHANNEL_NAME, ControlMessage, DeviceDescriptor, DeviceTransfer, TransferKind,
    encode_control,
};
use serde::Deserialize;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(rename = "step", default)]
    pub steps: Vec<Step>,
}

/// Control message kinds a `send_control` step can frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    Connect,
    Disconnect,
    Data,
    /// Send `bytes` as-is
    Raw,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Register the plugin and let the transport initialize it
    Load,
    /// Inbound device attach
    Connect {
        device_id: String,
        #[serde(default)]
        vendor_id: u16,
        #[serde(default)]
        product_id: u16,
        #[serde(default)]
        name: String,
    },
    /// Inbound device detach
    Disconnect { device_id: String },
    /// Inbound device traffic
    Data {
        device_id: String,
        #[serde(default)]
        endpoint: u8,
        #[serde(default)]
        payload: String,
        #[serde(default = "Step::default_transfer_type")]
        transfer_type: String,
    },
    /// Remote side opens a channel
    Open { channel: String },
    /// Remote side closes a channel
    RemoteClose { channel: String },
    /// Remote side writes a frame on the control channel
    SendControl {
        message: ControlKind,
        #[serde(default)]
        device_id: String,
        #[serde(default)]
        bytes: Vec<u8>,
    },
    /// Transport shuts the plugin down
    Terminate,
}

impl Step {
    fn default_transfer_type() -> String {
        "bulk".to_string()
    }

    fn connect(device_id: &str, vendor_id: u16, product_id: u16) -> Self {
        Step::Connect {
            device_id: device_id.to_string(),
            vendor_id,
            product_id,
            name: String::new(),
        }
    }

    /// One-line description for the replay log
    pub fn describe(&self) -> String {
        match self {
            Step::Load => "load".to_string(),
            Step::Connect {
                device_id,
                vendor_id,
                product_id,
                ..
            } => format!("connect {} ({:04x}:{:04x})", device_id, vendor_id, product_id),
            Step::Disconnect { device_id } => format!("disconnect {}", device_id),
            Step::Data {
                device_id,
                endpoint,
                payload,
                transfer_type,
            } => format!(
                "data {} endpoint {:#04x} {} ({} bytes)",
                device_id,
                endpoint,
                transfer_type,
                payload.len()
            ),
            Step::Open { channel } => format!("open {}", channel),
            Step::RemoteClose { channel } => format!("remote_close {}", channel),
            Step::SendControl {
                message, device_id, ..
            } => format!("send_control {:?} {}", message, device_id),
            Step::Terminate => "terminate".to_string(),
        }
    }
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse scenario: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Fill every slot, overflow by one, free the lowest slot, then retry
    pub fn capacity_demo(capacity: usize) -> Self {
        let mut steps = vec![
            Step::Load,
            Step::Open {
                channel: CONTROL_CHANNEL_NAME.to_string(),
            },
        ];

        for i in 0..capacity {
            let id = format!("dev-{}", i);
            steps.push(Step::connect(&id, 0x1000 + i as u16, 0x2000));
        }
        steps.push(Step::connect("dev-overflow", 0x1fff, 0x2000));
        steps.push(Step::Open {
            channel: protocol::device_channel_name(0),
        });
        steps.push(Step::Disconnect {
            device_id: "dev-0".to_string(),
        });
        steps.push(Step::connect("dev-overflow", 0x1fff, 0x2000));
        steps.push(Step::Terminate);

        Self { steps }
    }
}

/// Outcome of one replayed step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    Ok(String),
    Rejected(String),
}

impl std::fmt::Display for StepResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepResult::Ok(detail) => write!(f, "ok: {}", detail),
            StepResult::Rejected(reason) => write!(f, "rejected: {}", reason),
        }
    }
}

impl From<MuxError> for StepResult {
    fn from(err: MuxError) -> Self {
        StepResult::Rejected(err.to_string())
    }
}

impl From<ResultCode> for StepResult {
    fn from(code: ResultCode) -> Self {
        if code.is_ok() {
            StepResult::Ok(code.to_string())
        } else {
            StepResult::Rejected(code.to_string())
        }
    }
}

/// A session wired to a loopback transport
pub struct ScenarioRunner {
    transport: LoopbackTransport,
    session: UsbSession,
}

impl ScenarioRunner {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            transport: LoopbackTransport::new(),
            session: UsbSession::new(settings),
        }
    }

    pub fn session(&self) -> &UsbSession {
        &self.session
    }

    pub fn transport(&self) -> &LoopbackTransport {
        &self.transport
    }

    pub fn run_step(&self, step: &Step) -> Result<StepResult> {
        let result: StepResult = match step {
            Step::Load => match self.session.load(&self.transport) {
                Ok(_) => self.transport.initialize_plugins().into(),
                Err(e) => e.into(),
            },
            Step::Connect {
                device_id,
                vendor_id,
                product_id,
                name,
            } => {
                let mut descriptor = DeviceDescriptor::new(device_id, *vendor_id, *product_id);
                descriptor.name = name.clone();
                match self.session.on_connect(descriptor) {
                    Ok(outcome) => StepResult::Ok(format!("{:?}", outcome)),
                    Err(e) => e.into(),
                }
            }
            Step::Disconnect { device_id } => match self.session.on_disconnect(device_id) {
                Ok(outcome) => StepResult::Ok(format!("{:?}", outcome)),
                Err(e) => e.into(),
            },
            Step::Data {
                device_id,
                endpoint,
                payload,
                transfer_type,
            } => {
                let kind: TransferKind = transfer_type
                    .parse()
                    .with_context(|| format!("Invalid data step for {}", device_id))?;
                match self
                    .session
                    .on_data(device_id, *endpoint, payload.as_bytes(), kind)
                {
                    Ok(written) => StepResult::Ok(format!("{} bytes written", written)),
                    Err(e) => e.into(),
                }
            }
            Step::Open { channel } => match self.transport.open_channel(channel) {
                Ok(opened) => StepResult::Ok(format!("channel id {}", opened.id())),
                Err(code) => code.into(),
            },
            Step::RemoteClose { channel } => self.transport.remote_close(channel).into(),
            Step::SendControl {
                message,
                device_id,
                bytes,
            } => {
                let frame = control_frame(*message, device_id, bytes)?;
                self.transport.deliver(CONTROL_CHANNEL_NAME, &frame).into()
            }
            Step::Terminate => self.transport.terminate_plugins().into(),
        };
        Ok(result)
    }

    pub fn slot_table(&self) -> String {
        format_slot_table(&self.session.slots())
    }
}

fn control_frame(kind: ControlKind, device_id: &str, bytes: &[u8]) -> Result<Vec<u8>> {
    let message = match kind {
        ControlKind::Raw => return Ok(bytes.to_vec()),
        ControlKind::Connect => ControlMessage::Connect(DeviceDescriptor::new(device_id, 0, 0)),
        ControlKind::Disconnect => ControlMessage::disconnect(device_id),
        ControlKind::Data => ControlMessage::Data(DeviceTransfer {
            device_id: device_id.to_string(),
            endpoint: 0,
            transfer_type: TransferKind::Bulk,
            data: bytes.to_vec(),
        }),
    };
    let frame = encode_control(&message)
        .map_err(|e| anyhow!("Cannot frame control message for '{}': {}", device_id, e))?;
    Ok(frame.to_vec())
}

/// Render slots as a fixed-width table
pub fn format_slot_table(slots: &[SlotSnapshot]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "  {:<4} {:<10} {:<9} {:<4} DEVICE",
        "SLOT", "CHANNEL", "STATE", "GEN"
    );
    for slot in slots {
        let _ = writeln!(
            out,
            "  {:<4} {:<10} {:<9} {:<4} {}",
            slot.index.0,
            slot.channel_name,
            slot.state,
            slot.generation,
            slot.device_id.as_deref().unwrap_or("-")
        );
    }
    out
}

//! Plugin lifecycle
//!
//! A [`UsbSession`] is the per-session context every entry point goes
//! through. It owns the slot table and the control channel state behind a
//! single mutex, which serializes slot mutations, channel handle updates and
//! the one-time plugin registration check.
//!
//! Lifecycle:
//! 1. [`UsbSession::load`] registers a [`UsbPlugin`] with the transport
//!    (at most once per session; repeated loads are no-ops).
//! 2. The transport calls [`DvcPlugin::initialize`], which registers the
//!    control channel listener.
//! 3. The transport calls [`DvcPlugin::terminated`], which drops the control
//!    listener, removes every device channel, and resets the session.

use crate::control::ControlListener;
use crate::device_channel::release_device_channel;
use crate::error::{MuxError, Result};
use crate::slots::{SlotSnapshot, SlotTable};
use crate::transport::{
    ChannelManager, DeviceDataSink, DvcPlugin, ListenerRegistration, PluginRegistry, ResultCode,
    TracingSink, VirtualChannel,
};
use protocol::{CONTROL_CHANNEL_NAME, DEFAULT_MAX_DEVICES, PLUGIN_NAME};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info};

/// Slot table as held by a live session
pub(crate) type DeviceSlots = SlotTable<Box<dyn ListenerRegistration>, Arc<dyn VirtualChannel>>;

/// Per-session settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Whether inbound USB events are honoured at all
    pub usb_enabled: bool,
    /// Number of device slots
    pub max_devices: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            usb_enabled: false,
            max_devices: DEFAULT_MAX_DEVICES,
        }
    }
}

impl SessionSettings {
    pub fn enabled(max_devices: usize) -> Self {
        Self {
            usb_enabled: true,
            max_devices,
        }
    }
}

/// Mutable session state, guarded by `SessionShared::state`
pub(crate) struct SessionState {
    pub(crate) registered: bool,
    pub(crate) manager: Option<Arc<dyn ChannelManager>>,
    pub(crate) control_listener: Option<Box<dyn ListenerRegistration>>,
    pub(crate) control_channel: Option<Arc<dyn VirtualChannel>>,
    /// Bumped per accepted control connection so stale close callbacks are inert
    pub(crate) control_generation: u64,
    pub(crate) slots: DeviceSlots,
}

impl SessionState {
    fn new(max_devices: usize) -> Self {
        Self {
            registered: false,
            manager: None,
            control_listener: None,
            control_channel: None,
            control_generation: 0,
            slots: SlotTable::new(max_devices),
        }
    }
}

/// State shared between the session handle, the plugin, and every callback
pub(crate) struct SessionShared {
    pub(crate) settings: SessionSettings,
    pub(crate) sink: Arc<dyn DeviceDataSink>,
    state: Mutex<SessionState>,
}

impl SessionShared {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        // No code path leaves the state half-updated across a panic
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn initialize(self: &Arc<Self>, manager: Arc<dyn ChannelManager>) -> Result<()> {
        debug!("Initializing USB plugin");
        let mut state = self.lock_state();

        if state.control_listener.is_some() {
            debug!("USB plugin already initialized");
            return Ok(());
        }

        let listener = Arc::new(ControlListener::new(Arc::downgrade(self)));
        let registration = manager
            .create_listener(CONTROL_CHANNEL_NAME, 0, listener)
            .map_err(MuxError::ControlRegistration)?;

        state.control_listener = Some(registration);
        state.manager = Some(manager);

        info!("USB plugin initialized with control channel");
        Ok(())
    }

    fn terminate(&self) {
        debug!("USB plugin terminating");

        // Hold the released resources until the lock is gone
        let released: Vec<_> = {
            let mut state = self.lock_state();

            state.control_listener = None;
            state.control_channel = None;

            let released = state
                .slots
                .in_use_indices()
                .into_iter()
                .filter_map(|slot| release_device_channel(&mut state, slot))
                .collect();

            state.manager = None;
            state.registered = false;
            released
        };

        debug!(
            "USB plugin terminated ({} device channels released)",
            released.len()
        );
    }
}

/// The plugin object handed to the transport
pub struct UsbPlugin {
    shared: Arc<SessionShared>,
}

impl DvcPlugin for UsbPlugin {
    fn initialize(&self, manager: Arc<dyn ChannelManager>) -> ResultCode {
        match self.shared.initialize(manager) {
            Ok(()) => ResultCode::OK,
            Err(e) => {
                e.log();
                e.result_code()
            }
        }
    }

    fn terminated(&self) -> ResultCode {
        self.shared.terminate();
        ResultCode::OK
    }
}

/// Session context for USB redirection
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct UsbSession {
    pub(crate) shared: Arc<SessionShared>,
}

impl UsbSession {
    /// Create a session whose device traffic is only logged
    pub fn new(settings: SessionSettings) -> Self {
        Self::with_sink(settings, Arc::new(TracingSink))
    }

    /// Create a session routing device channel traffic to `sink`
    pub fn with_sink(settings: SessionSettings, sink: Arc<dyn DeviceDataSink>) -> Self {
        let state = SessionState::new(settings.max_devices);
        Self {
            shared: Arc::new(SessionShared {
                settings,
                sink,
                state: Mutex::new(state),
            }),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.shared.settings
    }

    /// Register the plugin with the transport
    ///
    /// Returns `Ok(true)` when this call registered the plugin and
    /// `Ok(false)` when it was already registered.
    pub fn load(&self, registry: &dyn PluginRegistry) -> Result<bool> {
        {
            let mut state = self.shared.lock_state();
            if state.registered {
                debug!("USB plugin already loaded");
                return Ok(false);
            }
            // Claim before calling out so a concurrent load sees it
            state.registered = true;
        }

        let plugin = Arc::new(UsbPlugin {
            shared: Arc::clone(&self.shared),
        });

        let code = registry.register_plugin(PLUGIN_NAME, plugin);
        if !code.is_ok() {
            self.shared.lock_state().registered = false;
            error!("Failed to register USB plugin: {}", code);
            return Err(MuxError::PluginRegistration(code));
        }

        debug!("USB plugin loaded");
        Ok(true)
    }

    pub fn is_loaded(&self) -> bool {
        self.shared.lock_state().registered
    }

    /// Whether the control channel listener is registered
    pub fn is_initialized(&self) -> bool {
        self.shared.lock_state().control_listener.is_some()
    }

    /// Whether the remote side currently has the control channel open
    pub fn control_channel_open(&self) -> bool {
        self.shared.lock_state().control_channel.is_some()
    }

    pub fn capacity(&self) -> usize {
        self.shared.lock_state().slots.capacity()
    }

    pub fn in_use_count(&self) -> usize {
        self.shared.lock_state().slots.in_use_count()
    }

    pub fn slots(&self) -> Vec<SlotSnapshot> {
        self.shared.lock_state().slots.snapshot()
    }

    /// Slot currently held by `device_id`
    pub fn slot_of(&self, device_id: &str) -> Option<SlotSnapshot> {
        let state = self.shared.lock_state();
        let index = state.slots.find_slot_by_device_id(device_id)?;
        state.slots.snapshot().into_iter().nth(index.0)
    }
}

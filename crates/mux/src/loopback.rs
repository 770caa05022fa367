//! In-memory transport
//!
//! [`LoopbackTransport`] plays both roles of the dynamic-channel stack: it
//! registers plugins and listeners, and it stands in for the remote side
//! by opening channels, delivering bytes and closing them. Failures can be
//! injected to exercise registration error paths.
//!
//! The transport never holds its own lock while calling into a plugin,
//! listener or channel callback, so callbacks are free to call back into it.

use crate::transport::{
    ChannelCallback, ChannelManager, DvcPlugin, ListenerCallback, ListenerRegistration,
    PluginRegistry, ResultCode, VirtualChannel,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, trace};

struct OpenChannel {
    channel: Arc<LoopbackChannel>,
    callback: Arc<dyn ChannelCallback>,
}

#[derive(Default)]
struct LoopbackState {
    listeners: HashMap<String, Arc<dyn ListenerCallback>>,
    channels: HashMap<u32, OpenChannel>,
    plugins: Vec<(String, Arc<dyn DvcPlugin>)>,
    listener_failures: HashMap<String, ResultCode>,
    plugin_failure: Option<ResultCode>,
    next_channel_id: u32,
}

impl LoopbackState {
    fn open_by_name(&self, name: &str) -> Option<&OpenChannel> {
        self.channels
            .values()
            .filter(|open| open.channel.name == name)
            .max_by_key(|open| open.channel.id)
    }
}

type Shared = Arc<Mutex<LoopbackState>>;

fn lock(state: &Mutex<LoopbackState>) -> MutexGuard<'_, LoopbackState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Loopback dynamic-channel transport
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    inner: Shared,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create_listener` for `name` fail with `code`
    pub fn fail_listener(&self, name: &str, code: ResultCode) {
        lock(&self.inner)
            .listener_failures
            .insert(name.to_string(), code);
    }

    /// Make `register_plugin` fail with `code`
    pub fn fail_plugin_registration(&self, code: ResultCode) {
        lock(&self.inner).plugin_failure = Some(code);
    }

    pub fn clear_failures(&self) {
        let mut state = lock(&self.inner);
        state.listener_failures.clear();
        state.plugin_failure = None;
    }

    /// Hand the channel manager to every registered plugin
    ///
    /// Returns the first failure, after initializing the rest.
    pub fn initialize_plugins(&self) -> ResultCode {
        let plugins = lock(&self.inner).plugins.clone();
        let manager: Arc<dyn ChannelManager> = Arc::new(self.clone());

        let mut result = ResultCode::OK;
        for (name, plugin) in plugins {
            let code = plugin.initialize(Arc::clone(&manager));
            debug!("Plugin {} initialized: {}", name, code);
            if !code.is_ok() && result.is_ok() {
                result = code;
            }
        }
        result
    }

    /// Shut every plugin down and forget it, along with any open channels
    pub fn terminate_plugins(&self) -> ResultCode {
        let plugins = std::mem::take(&mut lock(&self.inner).plugins);

        for (name, plugin) in plugins {
            let code = plugin.terminated();
            debug!("Plugin {} terminated: {}", name, code);
        }

        // Plugins are gone; channels die without close callbacks
        let channels = std::mem::take(&mut lock(&self.inner).channels);
        for open in channels.into_values() {
            open.channel.closed.store(true, Ordering::SeqCst);
        }
        ResultCode::OK
    }

    /// Open a channel named `name` from the remote side
    ///
    /// Returns the channel if the listener accepted it, or the listener's
    /// rejection code. `NOT_FOUND` if nobody listens on `name`.
    pub fn open_channel(&self, name: &str) -> Result<Arc<LoopbackChannel>, ResultCode> {
        let (listener, channel) = {
            let mut state = lock(&self.inner);
            let listener = state
                .listeners
                .get(name)
                .cloned()
                .ok_or(ResultCode::NOT_FOUND)?;

            state.next_channel_id += 1;
            let channel = Arc::new(LoopbackChannel {
                id: state.next_channel_id,
                name: name.to_string(),
                transport: Arc::downgrade(&self.inner),
                written: Mutex::new(Vec::new()),
                write_failure: Mutex::new(None),
                closed: AtomicBool::new(false),
            });
            (listener, channel)
        };

        let callback = listener.on_new_channel_connection(channel.clone())?;
        trace!("Channel {} (id {}) accepted", name, channel.id);

        // A close that raced the accept found nothing to remove; deliver it here
        let closed_early = {
            let mut state = lock(&self.inner);
            if channel.is_closed() {
                true
            } else {
                state.channels.insert(
                    channel.id,
                    OpenChannel {
                        channel: Arc::clone(&channel),
                        callback: Arc::clone(&callback),
                    },
                );
                false
            }
        };

        if closed_early {
            trace!("Channel {} (id {}) closed during accept", name, channel.id);
            callback.on_close();
        }
        Ok(channel)
    }

    /// Deliver `data` from the remote side on the open channel `name`
    pub fn deliver(&self, name: &str, data: &[u8]) -> ResultCode {
        let callback = lock(&self.inner)
            .open_by_name(name)
            .map(|open| Arc::clone(&open.callback));

        match callback {
            Some(callback) => callback.on_data_received(data),
            None => ResultCode::NOT_FOUND,
        }
    }

    /// Close the open channel `name` from the remote side
    pub fn remote_close(&self, name: &str) -> ResultCode {
        let channel = lock(&self.inner)
            .open_by_name(name)
            .map(|open| Arc::clone(&open.channel));

        match channel {
            Some(channel) => channel.close(),
            None => ResultCode::NOT_FOUND,
        }
    }

    /// Currently open channel named `name`
    pub fn channel(&self, name: &str) -> Option<Arc<LoopbackChannel>> {
        lock(&self.inner)
            .open_by_name(name)
            .map(|open| Arc::clone(&open.channel))
    }

    pub fn is_listening(&self, name: &str) -> bool {
        lock(&self.inner).listeners.contains_key(name)
    }

    /// Registered listener names, sorted
    pub fn listener_names(&self) -> Vec<String> {
        let mut names: Vec<_> = lock(&self.inner).listeners.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of open channels, sorted
    pub fn open_channel_names(&self) -> Vec<String> {
        let mut names: Vec<_> = lock(&self.inner)
            .channels
            .values()
            .map(|open| open.channel.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn plugin_names(&self) -> Vec<String> {
        lock(&self.inner)
            .plugins
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl ChannelManager for LoopbackTransport {
    fn create_listener(
        &self,
        name: &str,
        _flags: u32,
        callback: Arc<dyn ListenerCallback>,
    ) -> Result<Box<dyn ListenerRegistration>, ResultCode> {
        let mut state = lock(&self.inner);

        if let Some(&code) = state.listener_failures.get(name) {
            debug!("Injected failure for listener {}: {}", name, code);
            return Err(code);
        }
        if state.listeners.contains_key(name) {
            return Err(ResultCode::ALREADY_OPEN);
        }

        state.listeners.insert(name.to_string(), callback);
        trace!("Listener {} registered", name);

        Ok(Box::new(LoopbackListener {
            name: name.to_string(),
            transport: Arc::downgrade(&self.inner),
        }))
    }
}

impl PluginRegistry for LoopbackTransport {
    fn register_plugin(&self, name: &str, plugin: Arc<dyn DvcPlugin>) -> ResultCode {
        let mut state = lock(&self.inner);

        if let Some(code) = state.plugin_failure {
            debug!("Injected failure for plugin {}: {}", name, code);
            return code;
        }
        if state.plugins.iter().any(|(existing, _)| existing == name) {
            return ResultCode::ALREADY_CONNECTED;
        }

        state.plugins.push((name.to_string(), plugin));
        ResultCode::OK
    }
}

/// Listener registration; dropping it unregisters the listener
pub struct LoopbackListener {
    name: String,
    transport: Weak<Mutex<LoopbackState>>,
}

impl ListenerRegistration for LoopbackListener {
    fn channel_name(&self) -> &str {
        &self.name
    }
}

impl Drop for LoopbackListener {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.upgrade() {
            lock(&transport).listeners.remove(&self.name);
            trace!("Listener {} unregistered", self.name);
        }
    }
}

/// A channel opened through the loopback transport
pub struct LoopbackChannel {
    id: u32,
    name: String,
    transport: Weak<Mutex<LoopbackState>>,
    written: Mutex<Vec<Vec<u8>>>,
    write_failure: Mutex<Option<ResultCode>>,
    closed: AtomicBool,
}

impl LoopbackChannel {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Frames written by the local side, oldest first
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make subsequent writes fail with `code`
    pub fn fail_writes(&self, code: ResultCode) {
        *self
            .write_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(code);
    }
}

impl VirtualChannel for LoopbackChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&self, data: &[u8]) -> ResultCode {
        if self.is_closed() {
            return ResultCode::NOT_CONNECTED;
        }
        if let Some(code) = *self
            .write_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
        {
            return code;
        }

        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(data.to_vec());
        ResultCode::OK
    }

    fn close(&self) -> ResultCode {
        if self.closed.swap(true, Ordering::SeqCst) {
            return ResultCode::NOT_CONNECTED;
        }

        let callback = self
            .transport
            .upgrade()
            .and_then(|transport| lock(&transport).channels.remove(&self.id))
            .map(|open| open.callback);

        trace!("Channel {} (id {}) closed", self.name, self.id);
        match callback {
            Some(callback) => callback.on_close(),
            None => ResultCode::OK,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        received: Mutex<Vec<Vec<u8>>>,
        closes: Mutex<u32>,
    }

    impl ChannelCallback for Recorder {
        fn on_data_received(&self, data: &[u8]) -> ResultCode {
            self.received.lock().unwrap().push(data.to_vec());
            ResultCode::OK
        }

        fn on_close(&self) -> ResultCode {
            *self.closes.lock().unwrap() += 1;
            ResultCode::OK
        }
    }

    struct AcceptAll(Arc<Recorder>);

    impl ListenerCallback for AcceptAll {
        fn on_new_channel_connection(
            &self,
            _channel: Arc<dyn VirtualChannel>,
        ) -> Result<Arc<dyn ChannelCallback>, ResultCode> {
            Ok(self.0.clone())
        }
    }

    /// Closes every channel from inside the accept, before the transport records it
    struct CloseDuringAccept(Arc<Recorder>);

    impl ListenerCallback for CloseDuringAccept {
        fn on_new_channel_connection(
            &self,
            channel: Arc<dyn VirtualChannel>,
        ) -> Result<Arc<dyn ChannelCallback>, ResultCode> {
            assert_eq!(channel.close(), ResultCode::OK);
            Ok(self.0.clone())
        }
    }

    fn recorder() -> Arc<Recorder> {
        Arc::new(Recorder {
            received: Mutex::new(Vec::new()),
            closes: Mutex::new(0),
        })
    }

    #[test]
    fn test_listener_drop_unregisters() {
        let transport = LoopbackTransport::new();
        let registration = transport
            .create_listener("URBDRC", 0, Arc::new(AcceptAll(recorder())))
            .unwrap();
        assert!(transport.is_listening("URBDRC"));
        assert_eq!(registration.channel_name(), "URBDRC");

        // Same name twice is refused
        assert_eq!(
            transport
                .create_listener("URBDRC", 0, Arc::new(AcceptAll(recorder())))
                .err(),
            Some(ResultCode::ALREADY_OPEN)
        );

        drop(registration);
        assert!(!transport.is_listening("URBDRC"));
        assert_eq!(transport.open_channel("URBDRC").err(), Some(ResultCode::NOT_FOUND));
    }

    #[test]
    fn test_deliver_and_close() {
        let transport = LoopbackTransport::new();
        let rec = recorder();
        let _registration = transport
            .create_listener("URBDRC_00", 0, Arc::new(AcceptAll(rec.clone())))
            .unwrap();

        let channel = transport.open_channel("URBDRC_00").unwrap();
        assert_eq!(transport.deliver("URBDRC_00", b"abc"), ResultCode::OK);
        assert_eq!(rec.received.lock().unwrap().as_slice(), &[b"abc".to_vec()]);

        assert_eq!(channel.write(b"out"), ResultCode::OK);
        assert_eq!(channel.written(), vec![b"out".to_vec()]);

        assert_eq!(transport.remote_close("URBDRC_00"), ResultCode::OK);
        assert_eq!(channel.close(), ResultCode::NOT_CONNECTED);
        assert_eq!(*rec.closes.lock().unwrap(), 1);
        assert_eq!(channel.write(b"late"), ResultCode::NOT_CONNECTED);
        assert_eq!(transport.deliver("URBDRC_00", b"x"), ResultCode::NOT_FOUND);
    }

    #[test]
    fn test_close_during_accept_still_notifies() {
        let transport = LoopbackTransport::new();
        let rec = recorder();
        let _registration = transport
            .create_listener("URBDRC_00", 0, Arc::new(CloseDuringAccept(rec.clone())))
            .unwrap();

        let channel = transport.open_channel("URBDRC_00").unwrap();
        assert!(channel.is_closed());
        assert_eq!(*rec.closes.lock().unwrap(), 1);
        assert!(transport.open_channel_names().is_empty());
        assert_eq!(transport.remote_close("URBDRC_00"), ResultCode::NOT_FOUND);
        assert_eq!(*rec.closes.lock().unwrap(), 1);
    }

    #[test]
    fn test_injected_failures() {
        let transport = LoopbackTransport::new();
        transport.fail_listener("URBDRC_01", ResultCode::NO_MEMORY);
        assert_eq!(
            transport
                .create_listener("URBDRC_01", 0, Arc::new(AcceptAll(recorder())))
                .err(),
            Some(ResultCode::NO_MEMORY)
        );
        assert!(!transport.is_listening("URBDRC_01"));

        transport.clear_failures();
        assert!(transport
            .create_listener("URBDRC_01", 0, Arc::new(AcceptAll(recorder())))
            .is_ok());
    }

    #[test]
    fn test_write_failure() {
        let transport = LoopbackTransport::new();
        let _registration = transport
            .create_listener("URBDRC_02", 0, Arc::new(AcceptAll(recorder())))
            .unwrap();
        let channel = transport.open_channel("URBDRC_02").unwrap();

        channel.fail_writes(ResultCode::NO_MEMORY);
        assert_eq!(channel.write(b"x"), ResultCode::NO_MEMORY);
        assert!(channel.written().is_empty());
    }
}

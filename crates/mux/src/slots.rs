//! Device slot table
//!
//! A fixed-capacity arena of device slots. Free slots are kept in an ordered
//! free-list so allocation always hands out the lowest free index, and a
//! device-id index rejects duplicates without scanning.
//!
//! The table is generic over the listener (`L`) and channel (`C`) handles it
//! owns, so it stays pure data: no I/O happens here. Each slot carries a
//! generation that advances whenever the slot is released; callbacks created
//! for one tenant of a slot carry that generation and become inert once the
//! slot moves on.
//!
//! Slot lifecycle:
//!
//! ```text
//! Free ──reserve──> Reserved ──attach_channel──> Active
//!   ^                  │                            │ detach_channel / remove
//!   │                  │                            v
//!   └──────remove──────┴─remove / complete_removal─ Closing
//! ```
//!
//! An Active slot has two teardown paths, the transport closing its channel
//! and an explicit removal. It goes Closing on whichever comes first and is
//! only freed by the second, so its channel name is never handed out while
//! the old channel may still be open.

use protocol::{DEFAULT_MAX_DEVICES, MAX_SLOT_CAPACITY, device_channel_name};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Stable identity of a slot, used to derive its channel name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotIndex(pub usize);

impl SlotIndex {
    /// Device channel name for this slot (e.g. `URBDRC_03`)
    pub fn channel_name(self) -> String {
        device_channel_name(self.0)
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Observable state of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Unused
    Free,
    /// Listener registered, waiting for the remote to open the channel
    Reserved,
    /// Channel open
    Active,
    /// One of the two teardown paths has run, waiting for the other
    Closing,
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotState::Free => "free",
            SlotState::Reserved => "reserved",
            SlotState::Active => "active",
            SlotState::Closing => "closing",
        };
        f.pad(s)
    }
}

/// Slot table misuse
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("Slot {0} is out of range")]
    OutOfRange(SlotIndex),

    #[error("Slot {0} is already in use")]
    Occupied(SlotIndex),

    #[error("Device {device_id} already occupies slot {slot}")]
    DuplicateDevice { device_id: String, slot: SlotIndex },
}

/// One entry of the table
#[derive(Debug)]
pub struct DeviceSlot<L, C> {
    index: SlotIndex,
    generation: u64,
    device_id: Option<String>,
    listener: Option<L>,
    channel: Option<C>,
    closing: bool,
    /// Explicitly removed, waiting for the transport to confirm the close
    removed: bool,
}

impl<L, C> DeviceSlot<L, C> {
    fn new(index: SlotIndex) -> Self {
        Self {
            index,
            generation: 0,
            device_id: None,
            listener: None,
            channel: None,
            closing: false,
            removed: false,
        }
    }

    pub fn index(&self) -> SlotIndex {
        self.index
    }

    /// Generation of the current (or, when free, the next) tenant
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn listener(&self) -> Option<&L> {
        self.listener.as_ref()
    }

    pub fn channel(&self) -> Option<&C> {
        self.channel.as_ref()
    }

    pub fn is_in_use(&self) -> bool {
        self.device_id.is_some()
    }

    /// Removed by the session but still waiting for its channel close
    pub fn is_awaiting_close(&self) -> bool {
        self.removed
    }

    pub fn state(&self) -> SlotState {
        match (&self.device_id, &self.channel, self.closing) {
            (None, _, _) => SlotState::Free,
            (Some(_), _, true) => SlotState::Closing,
            (Some(_), Some(_), false) => SlotState::Active,
            (Some(_), None, false) => SlotState::Reserved,
        }
    }
}

/// Resources taken out of a slot by [`SlotTable::release`] or [`SlotTable::remove`]
#[derive(Debug)]
pub struct ReleasedSlot<L, C> {
    pub index: SlotIndex,
    /// Generation of the tenant the resources belonged to
    pub generation: u64,
    pub device_id: String,
    pub listener: Option<L>,
    pub channel: Option<C>,
    /// State the slot was in before release
    pub previous_state: SlotState,
    /// The slot stays Closing until [`SlotTable::complete_removal`] runs
    pub awaiting_close: bool,
}

/// Copy of a slot's observable state, for reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub index: SlotIndex,
    pub state: SlotState,
    pub device_id: Option<String>,
    pub channel_name: String,
    pub generation: u64,
}

/// Fixed-capacity registry of device slots
#[derive(Debug)]
pub struct SlotTable<L, C> {
    slots: Vec<DeviceSlot<L, C>>,
    free: BTreeSet<SlotIndex>,
    by_device: HashMap<String, SlotIndex>,
}

impl<L, C> Default for SlotTable<L, C> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEVICES)
    }
}

impl<L, C> SlotTable<L, C> {
    /// Create a table with `capacity` slots
    ///
    /// Capacity is clamped to `1..=MAX_SLOT_CAPACITY` so every index renders
    /// as a two-digit channel suffix.
    pub fn new(capacity: usize) -> Self {
        let clamped = capacity.clamp(1, MAX_SLOT_CAPACITY);
        if clamped != capacity {
            warn!("Slot capacity {} out of range, using {}", capacity, clamped);
        }

        Self {
            slots: (0..clamped).map(|i| DeviceSlot::new(SlotIndex(i))).collect(),
            free: (0..clamped).map(SlotIndex).collect(),
            by_device: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn in_use_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Lowest-indexed free slot, or `None` when the table is full
    pub fn find_free_slot(&self) -> Option<SlotIndex> {
        self.free.first().copied()
    }

    /// Slot currently holding `device_id`
    pub fn find_slot_by_device_id(&self, device_id: &str) -> Option<SlotIndex> {
        self.by_device.get(device_id).copied()
    }

    pub fn get(&self, index: SlotIndex) -> Option<&DeviceSlot<L, C>> {
        self.slots.get(index.0)
    }

    pub fn state(&self, index: SlotIndex) -> Option<SlotState> {
        self.get(index).map(DeviceSlot::state)
    }

    /// Generation a slot is currently at
    pub fn generation(&self, index: SlotIndex) -> Option<u64> {
        self.get(index).map(DeviceSlot::generation)
    }

    /// Move a free slot to Reserved for `device_id`, taking ownership of its listener
    ///
    /// The index must come from [`find_free_slot`](Self::find_free_slot) in
    /// the same critical section. On error nothing is mutated and `listener`
    /// is dropped.
    pub fn reserve(
        &mut self,
        index: SlotIndex,
        device_id: String,
        listener: L,
    ) -> Result<(), SlotError> {
        if let Some(&slot) = self.by_device.get(&device_id) {
            return Err(SlotError::DuplicateDevice { device_id, slot });
        }

        let slot = self
            .slots
            .get_mut(index.0)
            .ok_or(SlotError::OutOfRange(index))?;
        if slot.is_in_use() {
            return Err(SlotError::Occupied(index));
        }

        slot.device_id = Some(device_id.clone());
        slot.listener = Some(listener);
        slot.channel = None;
        slot.closing = false;
        slot.removed = false;

        self.free.remove(&index);
        self.by_device.insert(device_id, index);
        Ok(())
    }

    /// Store the live channel of a Reserved slot (Reserved -> Active)
    ///
    /// Refused, handing the channel back, if the generation is stale or the
    /// slot is not Reserved.
    pub fn attach_channel(
        &mut self,
        index: SlotIndex,
        generation: u64,
        channel: C,
    ) -> Result<(), C> {
        match self.slots.get_mut(index.0) {
            Some(slot)
                if slot.generation == generation && slot.state() == SlotState::Reserved =>
            {
                slot.channel = Some(channel);
                Ok(())
            }
            _ => Err(channel),
        }
    }

    /// Clear the channel after a transport close (Active -> Closing)
    ///
    /// Returns `None`, without mutating, for a stale generation or a slot
    /// that is not Active.
    pub fn detach_channel(&mut self, index: SlotIndex, generation: u64) -> Option<C> {
        let slot = self.slots.get_mut(index.0)?;
        if slot.generation != generation || slot.state() != SlotState::Active {
            return None;
        }
        slot.closing = true;
        slot.channel.take()
    }

    /// Channel and device of an Active slot at `generation`
    pub fn active_channel(&self, index: SlotIndex, generation: u64) -> Option<(&C, &str)> {
        let slot = self.get(index)?;
        if slot.generation != generation || slot.state() != SlotState::Active {
            return None;
        }
        Some((slot.channel.as_ref()?, slot.device_id.as_deref()?))
    }

    /// Channel of whichever tenant currently holds `index`, if Active
    pub fn current_channel(&self, index: SlotIndex) -> Option<&C> {
        let slot = self.get(index)?;
        if slot.state() == SlotState::Active {
            slot.channel.as_ref()
        } else {
            None
        }
    }

    /// Explicitly remove the device holding a slot
    ///
    /// Reserved slots, and Closing slots whose channel the transport already
    /// closed, are freed at once. An Active slot gives up its listener,
    /// channel and device id but stays Closing, out of the free-list, until
    /// [`complete_removal`](Self::complete_removal) runs for its generation.
    /// Returns `None` for a free slot or one already removed.
    pub fn remove(&mut self, index: SlotIndex) -> Option<ReleasedSlot<L, C>> {
        let slot = self.slots.get_mut(index.0)?;
        if slot.removed {
            return None;
        }
        if slot.state() != SlotState::Active {
            return self.release(index);
        }

        let device_id = slot.device_id.clone()?;
        slot.closing = true;
        slot.removed = true;
        let removed = ReleasedSlot {
            index,
            generation: slot.generation,
            listener: slot.listener.take(),
            channel: slot.channel.take(),
            device_id,
            previous_state: SlotState::Active,
            awaiting_close: true,
        };

        self.by_device.remove(&removed.device_id);
        Some(removed)
    }

    /// Free a removed slot once its channel close is confirmed
    ///
    /// Does nothing unless the slot was removed while Active and is still at
    /// `generation`.
    pub fn complete_removal(
        &mut self,
        index: SlotIndex,
        generation: u64,
    ) -> Option<ReleasedSlot<L, C>> {
        let slot = self.get(index)?;
        if slot.generation != generation || !slot.removed {
            return None;
        }
        self.release(index)
    }

    /// Free a slot unconditionally, returning what it still owned
    ///
    /// Idempotent: releasing a free slot returns `None` and changes nothing.
    /// Advances the slot's generation so callbacks of the old tenant go inert.
    pub fn release(&mut self, index: SlotIndex) -> Option<ReleasedSlot<L, C>> {
        let slot = self.slots.get_mut(index.0)?;
        let previous_state = slot.state();
        let generation = slot.generation;
        let device_id = slot.device_id.take()?;

        let released = ReleasedSlot {
            index,
            generation,
            listener: slot.listener.take(),
            channel: slot.channel.take(),
            device_id,
            previous_state,
            awaiting_close: false,
        };
        slot.closing = false;
        slot.removed = false;
        slot.generation = slot.generation.wrapping_add(1);

        // A removed tenant's id may already belong to another slot
        if self.by_device.get(&released.device_id) == Some(&index) {
            self.by_device.remove(&released.device_id);
        }
        self.free.insert(index);
        Some(released)
    }

    /// Indices of every in-use slot, ascending
    pub fn in_use_indices(&self) -> Vec<SlotIndex> {
        self.slots
            .iter()
            .filter(|s| s.is_in_use())
            .map(DeviceSlot::index)
            .collect()
    }

    pub fn snapshot(&self) -> Vec<SlotSnapshot> {
        self.slots
            .iter()
            .map(|s| SlotSnapshot {
                index: s.index,
                state: s.state(),
                device_id: s.device_id.clone(),
                channel_name: s.index.channel_name(),
                generation: s.generation,
            })
            .collect()
    }
}

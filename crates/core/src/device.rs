//! Device registry with exclusive reservations.
//!
//! [`DevicePool`] is the only state shared between concurrent session
//! creations. Reservation and release are its only mutating operations and
//! both run under a single lock, so two callers can never hold the same
//! device.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use mdrive_protocol::{Capabilities, DeviceKind, DeviceVariation};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::negotiate::same_sdk;

/// Stable identity of a device, e.g. a simulator name or a hardware UDID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for DeviceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// A physical or virtual execution target and the profile it can serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
	id: DeviceId,
	name: String,
	simulator: bool,
	kinds: BTreeSet<DeviceKind>,
	sdks: BTreeSet<String>,
	variations: BTreeSet<DeviceVariation>,
}

impl Device {
	/// A simulator can boot any of `sdks` in every form factor and variation.
	pub fn simulator<I, S>(id: impl Into<String>, name: impl Into<String>, sdks: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			id: DeviceId::new(id),
			name: name.into(),
			simulator: true,
			kinds: [DeviceKind::Iphone, DeviceKind::Ipad].into_iter().collect(),
			sdks: sdks.into_iter().map(Into::into).collect(),
			variations: DeviceVariation::ALL.into_iter().collect(),
		}
	}

	/// Real hardware has one form factor, one installed SDK and one screen.
	pub fn real(id: impl Into<String>, name: impl Into<String>, kind: DeviceKind, sdk: impl Into<String>, variation: DeviceVariation) -> Self {
		Self {
			id: DeviceId::new(id),
			name: name.into(),
			simulator: false,
			kinds: [kind].into_iter().collect(),
			sdks: [sdk.into()].into_iter().collect(),
			variations: [variation].into_iter().collect(),
		}
	}

	/// Restricts the form factors this device serves.
	pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = DeviceKind>) -> Self {
		self.kinds = kinds.into_iter().collect();
		self
	}

	/// Restricts the variations this device serves.
	pub fn with_variations(mut self, variations: impl IntoIterator<Item = DeviceVariation>) -> Self {
		self.variations = variations.into_iter().collect();
		self
	}

	pub fn id(&self) -> &DeviceId {
		&self.id
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn is_simulator(&self) -> bool {
		self.simulator
	}

	pub fn kinds(&self) -> &BTreeSet<DeviceKind> {
		&self.kinds
	}

	pub fn sdks(&self) -> &BTreeSet<String> {
		&self.sdks
	}

	pub fn variations(&self) -> &BTreeSet<DeviceVariation> {
		&self.variations
	}

	/// Returns `true` when this device satisfies every constraint in `caps`.
	/// Unset constraints match anything.
	pub fn accepts(&self, caps: &Capabilities) -> bool {
		if caps.simulator_only() && !self.simulator {
			return false;
		}
		if caps.device.is_some_and(|kind| !self.kinds.contains(&kind)) {
			return false;
		}
		if caps.variation.is_some_and(|variation| !self.variations.contains(&variation)) {
			return false;
		}
		match caps.sdk_version.as_deref() {
			Some(wanted) => self.sdks.iter().any(|sdk| same_sdk(sdk, wanted)),
			None => true,
		}
	}
}

/// Point-in-time view of one pool entry.
#[derive(Debug, Clone)]
pub struct DeviceStatus {
	pub device: Arc<Device>,
	pub reserved: bool,
}

struct Slot {
	device: Arc<Device>,
	/// Generation of the live reservation, `None` while free.
	reservation: Option<u64>,
}

struct PoolState {
	slots: Vec<Slot>,
	next_generation: u64,
}

struct PoolInner {
	state: Mutex<PoolState>,
}

impl PoolInner {
	fn release_generation(&self, id: &DeviceId, generation: u64) -> bool {
		let mut state = self.state.lock();
		match state.slots.iter_mut().find(|slot| slot.device.id() == id) {
			Some(slot) if slot.reservation == Some(generation) => {
				slot.reservation = None;
				true
			}
			_ => false,
		}
	}
}

/// Shared, lock-guarded registry of devices.
#[derive(Clone)]
pub struct DevicePool {
	inner: Arc<PoolInner>,
}

impl fmt::Debug for DevicePool {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DevicePool")
			.field("devices", &self.len())
			.field("free", &self.free_count())
			.finish()
	}
}

impl DevicePool {
	/// Creates a pool; registration order is the reservation tie-break order.
	pub fn new(devices: impl IntoIterator<Item = Device>) -> Self {
		let slots = devices
			.into_iter()
			.map(|device| Slot {
				device: Arc::new(device),
				reservation: None,
			})
			.collect();
		Self {
			inner: Arc::new(PoolInner {
				state: Mutex::new(PoolState { slots, next_generation: 1 }),
			}),
		}
	}

	/// Reserves the first free device, in registration order, that accepts `caps`.
	pub fn reserve(&self, caps: &Capabilities) -> Result<DeviceLease> {
		let mut state = self.inner.state.lock();
		let Some(idx) = state.slots.iter().position(|slot| slot.reservation.is_none() && slot.device.accepts(caps)) else {
			let free = state.slots.iter().filter(|slot| slot.reservation.is_none()).count();
			return Err(Error::NoMatchingDevice(describe(caps, state.slots.len(), free)));
		};

		let generation = state.next_generation;
		state.next_generation += 1;
		let slot = &mut state.slots[idx];
		slot.reservation = Some(generation);
		let device = Arc::clone(&slot.device);
		drop(state);

		info!(target = "mdrive.pool", device = %device.id(), simulator = device.is_simulator(), "device reserved");
		Ok(DeviceLease {
			device,
			generation,
			pool: Arc::clone(&self.inner),
		})
	}

	/// Frees `id` regardless of who holds it. Releasing a free or unknown
	/// device is a no-op.
	pub fn release(&self, id: &DeviceId) {
		let mut state = self.inner.state.lock();
		if let Some(slot) = state.slots.iter_mut().find(|slot| slot.device.id() == id) {
			if slot.reservation.take().is_some() {
				debug!(target = "mdrive.pool", device = %id, "device released");
			}
		}
	}

	pub fn len(&self) -> usize {
		self.inner.state.lock().slots.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn free_count(&self) -> usize {
		self.inner.state.lock().slots.iter().filter(|slot| slot.reservation.is_none()).count()
	}

	pub fn is_reserved(&self, id: &DeviceId) -> bool {
		self.inner
			.state
			.lock()
			.slots
			.iter()
			.any(|slot| slot.device.id() == id && slot.reservation.is_some())
	}

	pub fn snapshot(&self) -> Vec<DeviceStatus> {
		self.inner
			.state
			.lock()
			.slots
			.iter()
			.map(|slot| DeviceStatus {
				device: Arc::clone(&slot.device),
				reserved: slot.reservation.is_some(),
			})
			.collect()
	}
}

/// Exclusive hold on one device. Dropping the lease releases the device
/// unless the pool has since handed it to someone else.
pub struct DeviceLease {
	device: Arc<Device>,
	generation: u64,
	pool: Arc<PoolInner>,
}

impl DeviceLease {
	pub fn device(&self) -> &Arc<Device> {
		&self.device
	}

	/// Returns the device to the pool.
	pub fn release(self) {
		drop(self);
	}
}

impl fmt::Debug for DeviceLease {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DeviceLease")
			.field("device", self.device.id())
			.field("generation", &self.generation)
			.finish()
	}
}

impl Drop for DeviceLease {
	fn drop(&mut self) {
		if self.pool.release_generation(self.device.id(), self.generation) {
			debug!(target = "mdrive.pool", device = %self.device.id(), "device released");
		}
	}
}

fn describe(caps: &Capabilities, total: usize, free: usize) -> String {
	format!(
		"device={} sdk={} variation={} simulator={} ({free} of {total} devices free)",
		caps.device.map(|kind| kind.as_str()).unwrap_or("any"),
		caps.sdk_version.as_deref().unwrap_or("any"),
		caps.variation.map(|variation| variation.as_str()).unwrap_or("any"),
		caps.simulator_only(),
	)
}

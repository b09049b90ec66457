//! Object registry: klass factories, ordered object lists, slots.
//!
//! Factories are registered per klass (build-time plug-in map replacing
//! shared-library discovery); registration is idempotent. Objects are
//! exclusively owned by their slots; everything else refers to them by id.

use std::collections::HashMap;
use std::sync::Arc;

use emu_common::error::{CoreError, CoreResult};
use emu_common::klass::{ALL_KLASSES, Capabilities, Klass};
use emu_common::object::{ObjectFactory, ObjectId, SimObject};
use emu_common::state::ObjectState;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

/// One registered object. The slot mutex serializes every entry point of
/// the object; the snapshot lock carries the copy-out state for
/// concurrent readers.
pub struct ObjectSlot {
    pub id: ObjectId,
    pub klass: Klass,
    pub name: String,
    /// The object itself; `None` for virtual (host-side) registrations.
    pub object: Option<Mutex<Box<dyn SimObject>>>,
    /// Published state, refreshed after every entry-point invocation.
    pub snapshot: RwLock<Option<ObjectState>>,
    /// Capability set copied at creation.
    pub capabilities: Capabilities,
    /// Update-thread pacing [Hz], copied at creation.
    pub update_hz: f64,
}

impl ObjectSlot {
    /// Copy the object's current state into the published snapshot.
    pub fn publish(&self, object: &dyn SimObject) {
        if self.capabilities.contains(Capabilities::GET_STATE) {
            *self.snapshot.write() = Some(object.state());
        }
    }
}

#[derive(Default)]
struct RegistryState {
    by_klass: HashMap<Klass, Vec<Arc<ObjectSlot>>>,
    by_id: HashMap<ObjectId, Arc<ObjectSlot>>,
}

/// The registry. Creation happens before `start`; lookups happen from
/// every thread afterwards.
pub struct Registry {
    factories: Mutex<HashMap<Klass, ObjectFactory>>,
    state: RwLock<RegistryState>,
    next_id: Mutex<u64>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            factories: Mutex::new(HashMap::new()),
            state: RwLock::new(RegistryState::default()),
            next_id: Mutex::new(1),
        }
    }

    /// Register a klass factory. Idempotent: re-registering a klass keeps
    /// the first factory.
    pub fn register_klass(&self, klass: Klass, factory: ObjectFactory) {
        let mut factories = self.factories.lock();
        if factories.contains_key(&klass) {
            debug!(target: "emu.core.registry", "factory for {klass} already registered");
            return;
        }
        factories.insert(klass, factory);
    }

    fn alloc_id(&self) -> ObjectId {
        let mut next = self.next_id.lock();
        let id = ObjectId::new(*next);
        *next += 1;
        id
    }

    /// Create an object through its klass factory and append it to the
    /// klass list. Rejects duplicates without mutating the registry.
    pub fn create(&self, klass: Klass, name: &str, config: &[u8]) -> CoreResult<ObjectId> {
        let factory = *self
            .factories
            .lock()
            .get(&klass)
            .ok_or_else(|| CoreError::LoadFailure(format!("no factory for klass {klass}")))?;

        if self.lookup(klass, name).is_some() {
            return Err(CoreError::Duplicate {
                klass,
                name: name.to_string(),
            });
        }

        let object = factory(name, config)?;
        let id = self.alloc_id();
        let capabilities = object.capabilities();
        let update_hz = object.update_frequency();
        let snapshot = if capabilities.contains(Capabilities::GET_STATE) {
            Some(object.state())
        } else {
            None
        };
        let slot = Arc::new(ObjectSlot {
            id,
            klass,
            name: name.to_string(),
            object: Some(Mutex::new(object)),
            snapshot: RwLock::new(snapshot),
            capabilities,
            update_hz,
        });

        let mut state = self.state.write();
        state.by_klass.entry(klass).or_default().push(Arc::clone(&slot));
        state.by_id.insert(id, slot);
        info!(target: "emu.core.registry", "created {klass}/{name} as {id}");
        Ok(id)
    }

    /// Insert a bare slot so host-side objects can be referenced by
    /// internal consumers.
    pub fn register_virtual(&self, klass: Klass, name: &str) -> CoreResult<ObjectId> {
        if self.lookup(klass, name).is_some() {
            return Err(CoreError::Duplicate {
                klass,
                name: name.to_string(),
            });
        }
        let id = self.alloc_id();
        let slot = Arc::new(ObjectSlot {
            id,
            klass,
            name: name.to_string(),
            object: None,
            snapshot: RwLock::new(None),
            capabilities: Capabilities::empty(),
            update_hz: 0.0,
        });
        let mut state = self.state.write();
        state.by_klass.entry(klass).or_default().push(Arc::clone(&slot));
        state.by_id.insert(id, slot);
        info!(target: "emu.core.registry", "registered virtual {klass}/{name} as {id}");
        Ok(id)
    }

    /// Resolve `(klass, name)`; case-sensitive full-length compare.
    pub fn lookup(&self, klass: Klass, name: &str) -> Option<ObjectId> {
        let state = self.state.read();
        state
            .by_klass
            .get(&klass)?
            .iter()
            .find(|slot| slot.name == name)
            .map(|slot| slot.id)
    }

    /// Ids of a klass in insertion order.
    pub fn list(&self, klass: Klass) -> Vec<ObjectId> {
        let state = self.state.read();
        state
            .by_klass
            .get(&klass)
            .map(|slots| slots.iter().map(|s| s.id).collect())
            .unwrap_or_default()
    }

    /// Slot by id.
    pub fn get(&self, id: ObjectId) -> Option<Arc<ObjectSlot>> {
        self.state.read().by_id.get(&id).cloned()
    }

    /// Every slot, klass-enumeration order then insertion order.
    pub fn all_slots(&self) -> Vec<Arc<ObjectSlot>> {
        let state = self.state.read();
        let mut out = Vec::with_capacity(state.by_id.len());
        for klass in ALL_KLASSES {
            if let Some(slots) = state.by_klass.get(&klass) {
                out.extend(slots.iter().cloned());
            }
        }
        out
    }

    /// Published snapshot of an object.
    pub fn snapshot(&self, id: ObjectId) -> Option<ObjectState> {
        self.get(id).and_then(|slot| *slot.snapshot.read())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

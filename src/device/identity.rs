use crate::domain::{DeviceIdType, DeviceIdentity, TelemetryError, effective_type};
use crate::store::{RequestStore, StoreError};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

/// Preference key holding a persisted identifier-type override.
pub const DEVICE_ID_TYPE_PREFERENCE: &str = "rask.telemetry.DeviceId.type";
/// Preference key holding the generated durable identifier.
pub const DURABLE_ID_PREFERENCE: &str = "rask.telemetry.DeviceId.durable";

/// Read side of the identifier resolver, used by the dispatcher.
pub trait IdentityProvider: Send + Sync {
    fn snapshot(&self) -> DeviceIdentity;
}

impl IdentityProvider for DeviceIdentity {
    fn snapshot(&self) -> DeviceIdentity {
        self.clone()
    }
}

/// Source of the platform-generated durable identifier.
pub trait DurableIdSource: Send + Sync {
    fn durable_id(&self, store: &dyn RequestStore) -> Result<String, StoreError>;
}

/// Generates a v4 UUID on first use and keeps it in the preference store.
#[derive(Debug, Default, Clone, Copy)]
pub struct StoredUuidSource;

impl DurableIdSource for StoredUuidSource {
    fn durable_id(&self, store: &dyn RequestStore) -> Result<String, StoreError> {
        if let Some(id) = store.preference(DURABLE_ID_PREFERENCE)?
            && !id.is_empty()
        {
            return Ok(id);
        }

        let id = uuid::Uuid::new_v4().to_string();
        store.set_preference(DURABLE_ID_PREFERENCE, Some(&id))?;
        info!("Generated durable device id");
        Ok(id)
    }
}

/// Resolves and holds the device identifier.
pub struct DeviceId {
    state: RwLock<DeviceIdentity>,
    durable: Arc<dyn DurableIdSource>,
}

impl std::fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceId")
            .field("state", &*self.state.read())
            .finish()
    }
}

impl DeviceId {
    /// Identifier produced by the given strategy. Developer-supplied ids
    /// must go through [`DeviceId::developer_supplied`].
    pub fn new(id_type: DeviceIdType) -> Result<Self, TelemetryError> {
        if id_type == DeviceIdType::DeveloperSupplied {
            return Err(TelemetryError::invalid_argument(
                "Developer-supplied device ids need a value",
            ));
        }
        Ok(Self::from_identity(DeviceIdentity::unresolved(id_type)))
    }

    pub fn developer_supplied(id: impl Into<String>) -> Result<Self, TelemetryError> {
        let id = id.into();
        if id.is_empty() {
            return Err(TelemetryError::invalid_argument(
                "Device id must not be empty",
            ));
        }
        Ok(Self::from_identity(DeviceIdentity::resolved(
            DeviceIdType::DeveloperSupplied,
            id,
        )))
    }

    fn from_identity(identity: DeviceIdentity) -> Self {
        Self {
            state: RwLock::new(identity),
            durable: Arc::new(StoredUuidSource),
        }
    }

    pub fn with_durable_source(mut self, source: Arc<dyn DurableIdSource>) -> Self {
        self.durable = source;
        self
    }

    /// Applies any persisted type override, then resolves what can be
    /// resolved synchronously. Advertising ids stay pending until
    /// [`DeviceId::set_id`] is called.
    pub fn init(&self, store: &dyn RequestStore) -> Result<(), TelemetryError> {
        let stored = retrieve_overridden_type(store)?;
        let mut state = self.state.write();

        let id_type = effective_type(stored, state.id_type);
        if id_type != state.id_type {
            info!(
                "Overridden device id strategy detected: {}, using it instead of {}",
                id_type, state.id_type
            );
            if id_type != DeviceIdType::DeveloperSupplied {
                state.value = None;
            }
            state.id_type = id_type;
        }

        match id_type {
            DeviceIdType::DeveloperSupplied => {
                if !state.is_resolved() {
                    warn!("Developer-supplied device id strategy is active without an id");
                }
            }
            DeviceIdType::OpenUdid => {
                if !state.is_resolved() {
                    state.value = Some(self.durable.durable_id(store)?);
                }
            }
            DeviceIdType::AdvertisingId => {
                if !state.is_resolved() {
                    info!("Waiting for the advertising id to be supplied");
                }
            }
        }

        Ok(())
    }

    /// Records an identifier resolved outside of `init`.
    pub fn set_id(&self, id_type: DeviceIdType, id: impl Into<String>) {
        let id = id.into();
        info!("Device id is now {} (type {})", id, id_type);
        *self.state.write() = DeviceIdentity::resolved(id_type, id);
    }

    /// Persists `id_type` as the override and re-resolves.
    pub fn switch_to_type(
        &self,
        id_type: DeviceIdType,
        store: &dyn RequestStore,
    ) -> Result<(), TelemetryError> {
        {
            let mut state = self.state.write();
            warn!(
                "Switching device id strategy to {} from {}",
                id_type, state.id_type
            );
            if state.id_type != id_type {
                state.id_type = id_type;
                if id_type != DeviceIdType::DeveloperSupplied {
                    state.value = None;
                }
            }
        }
        store_overridden_type(store, id_type)?;
        self.init(store)
    }

    pub fn id(&self) -> Option<String> {
        self.state.read().id().map(str::to_string)
    }

    pub fn id_type(&self) -> DeviceIdType {
        self.state.read().id_type
    }
}

impl IdentityProvider for DeviceId {
    fn snapshot(&self) -> DeviceIdentity {
        self.state.read().clone()
    }
}

/// Whether a supplied id matches the registered one. Only developer-supplied
/// ids (or an unspecified type) are compared; generated ids always match.
pub fn device_id_equals_null_safe(
    id: Option<&str>,
    id_type: Option<DeviceIdType>,
    device_id: Option<&DeviceId>,
) -> bool {
    match id_type {
        None | Some(DeviceIdType::DeveloperSupplied) => {
            let registered = device_id.and_then(DeviceId::id);
            registered.as_deref() == id
        }
        Some(_) => true,
    }
}

fn retrieve_overridden_type(store: &dyn RequestStore) -> Result<Option<DeviceIdType>, StoreError> {
    Ok(store
        .preference(DEVICE_ID_TYPE_PREFERENCE)?
        .and_then(|value| value.parse().ok()))
}

fn store_overridden_type(store: &dyn RequestStore, id_type: DeviceIdType) -> Result<(), StoreError> {
    store.set_preference(DEVICE_ID_TYPE_PREFERENCE, Some(id_type.as_str()))
}

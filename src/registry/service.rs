//! Device Registry
//!
//! Owns the device lifecycle: self-registration (upsert), strict admin create,
//! credential checks, key rotation, metadata updates and deletion.

use crate::registry::credentials::{generate_api_key, keys_match, DUMMY_KEY};
use crate::registry::error::{RegistryError, RegistryResult};
use crate::storage::{
    Device, DeviceChanges, DeviceFilter, DeviceStatus, DeviceType, NewDevice, Page,
    TelemetryStore,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Attempts before a run of key collisions becomes a conflict
const MAX_WRITE_ATTEMPTS: usize = 5;

const MAX_DEVICE_ID_LEN: usize = 100;
const MAX_NAME_LEN: usize = 200;
const MAX_LOCATION_LEN: usize = 200;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 500;

/// Registration payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceRegistration {
    pub device_id: String,
    pub device_name: String,
    /// Defaults to `multi` on creation; left untouched on re-registration
    #[serde(default)]
    pub device_type: Option<DeviceType>,
    #[serde(default)]
    pub location: Option<String>,
}

impl DeviceRegistration {
    pub fn new(device_id: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
            device_type: None,
            location: None,
        }
    }

    pub fn with_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = Some(device_type);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Outcome of `register` / `create`
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredDevice {
    pub device: Device,
    /// Only present when the device was created by this call
    pub api_key: Option<String>,
    pub created: bool,
}

/// Device registry backed by the telemetry store
#[derive(Clone)]
pub struct DeviceRegistry {
    store: TelemetryStore,
}

impl DeviceRegistry {
    pub fn new(store: TelemetryStore) -> Self {
        Self { store }
    }

    /// Idempotent registration keyed by `device_id`.
    ///
    /// A new device is created with a fresh key. An existing one has its
    /// name, type and location updated and no key is returned.
    pub async fn register(&self, registration: DeviceRegistration) -> RegistryResult<RegisteredDevice> {
        validate_registration(&registration)?;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let api_key = generate_api_key();
            let new_device = new_device(&registration, DeviceStatus::Active, api_key.clone());

            match self.store.insert_device(new_device).await {
                Ok(device) => {
                    tracing::info!(device_id = %device.device_id, "Device registered");
                    return Ok(RegisteredDevice {
                        device,
                        api_key: Some(api_key),
                        created: true,
                    });
                }
                Err(e) if e.is_conflict_on("device_id") => {
                    let changes = DeviceChanges {
                        device_name: Some(registration.device_name.trim().to_string()),
                        device_type: registration.device_type,
                        location: trimmed_location(&registration),
                        status: None,
                    };
                    if let Some(device) = self
                        .store
                        .update_device(&registration.device_id, changes)
                        .await?
                    {
                        tracing::info!(device_id = %device.device_id, "Device re-registered");
                        return Ok(RegisteredDevice {
                            device,
                            api_key: None,
                            created: false,
                        });
                    }
                    // Deleted between the insert and the update; try to create again
                    tracing::debug!(device_id = %registration.device_id, attempt, "Device vanished during registration");
                }
                Err(e) if e.is_conflict_on("api_key") => {
                    tracing::warn!(device_id = %registration.device_id, attempt, "API key collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(RegistryError::Conflict(format!(
            "could not register device '{}' after {} attempts",
            registration.device_id, MAX_WRITE_ATTEMPTS
        )))
    }

    /// Strict administrative create. A duplicate id is a conflict.
    pub async fn create(
        &self,
        registration: DeviceRegistration,
        status: DeviceStatus,
    ) -> RegistryResult<RegisteredDevice> {
        validate_registration(&registration)?;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let api_key = generate_api_key();
            match self
                .store
                .insert_device(new_device(&registration, status, api_key.clone()))
                .await
            {
                Ok(device) => {
                    tracing::info!(device_id = %device.device_id, status = %status, "Device created");
                    return Ok(RegisteredDevice {
                        device,
                        api_key: Some(api_key),
                        created: true,
                    });
                }
                Err(e) if e.is_conflict_on("device_id") => {
                    return Err(RegistryError::Conflict(format!(
                        "device '{}' already exists",
                        registration.device_id
                    )));
                }
                Err(e) if e.is_conflict_on("api_key") => {
                    tracing::warn!(device_id = %registration.device_id, attempt, "API key collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(RegistryError::Conflict(format!(
            "could not create device '{}' after {} attempts",
            registration.device_id, MAX_WRITE_ATTEMPTS
        )))
    }

    /// Check a device's credential.
    ///
    /// Unknown device, wrong key and inactive device all fail with the same
    /// `RegistryError::Authentication`.
    pub async fn authenticate(&self, device_id: &str, api_key: &str) -> RegistryResult<Device> {
        match self.store.find_credentials(device_id).await? {
            Some((device, stored_key)) => {
                let key_ok = keys_match(&stored_key, api_key);
                if key_ok && device.status.accepts_readings() {
                    Ok(device)
                } else {
                    tracing::warn!(device_id = %device_id, "Device authentication failed");
                    Err(RegistryError::Authentication)
                }
            }
            None => {
                let _ = keys_match(DUMMY_KEY, api_key);
                tracing::warn!(device_id = %device_id, "Authentication attempt for unknown device");
                Err(RegistryError::Authentication)
            }
        }
    }

    /// Replace the device's key. The old key stops working immediately.
    pub async fn rotate_key(&self, device_id: &str) -> RegistryResult<String> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let api_key = generate_api_key();
            match self.store.set_api_key(device_id, api_key.clone()).await {
                Ok(true) => {
                    tracing::info!(device_id = %device_id, "API key rotated");
                    return Ok(api_key);
                }
                Ok(false) => return Err(RegistryError::NotFound(device_id.to_string())),
                Err(e) if e.is_conflict_on("api_key") => {
                    tracing::warn!(device_id = %device_id, attempt, "API key collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(RegistryError::Conflict(format!(
            "could not rotate key for device '{}'",
            device_id
        )))
    }

    /// List devices matching a filter
    pub async fn list(&self, mut filter: DeviceFilter) -> RegistryResult<Page<Device>> {
        filter.limit = if filter.limit == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            filter.limit.min(MAX_PAGE_SIZE)
        };
        let (limit, offset) = (filter.limit, filter.offset);

        let (items, total) = self.store.list_devices(filter).await?;
        Ok(Page {
            items,
            total,
            limit,
            offset,
        })
    }

    pub async fn get(&self, device_id: &str) -> RegistryResult<Device> {
        self.store
            .get_device(device_id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(device_id.to_string()))
    }

    /// Partial metadata and status update
    pub async fn update(&self, device_id: &str, changes: DeviceChanges) -> RegistryResult<Device> {
        if let Some(name) = &changes.device_name {
            validate_name(name)?;
        }
        if let Some(location) = &changes.location {
            validate_location(location)?;
        }

        let changes = DeviceChanges {
            device_name: changes.device_name.map(|n| n.trim().to_string()),
            location: changes.location.map(|l| l.trim().to_string()),
            ..changes
        };

        let device = self
            .store
            .update_device(device_id, changes)
            .await?
            .ok_or_else(|| RegistryError::NotFound(device_id.to_string()))?;

        tracing::info!(device_id = %device_id, status = %device.status, "Device updated");
        Ok(device)
    }

    pub async fn update_status(&self, device_id: &str, status: DeviceStatus) -> RegistryResult<Device> {
        self.update(
            device_id,
            DeviceChanges {
                status: Some(status),
                ..Default::default()
            },
        )
        .await
    }

    /// Hard delete; readings go with the device
    pub async fn delete(&self, device_id: &str) -> RegistryResult<()> {
        if self.store.delete_device(device_id).await? {
            tracing::info!(device_id = %device_id, "Device deleted");
            Ok(())
        } else {
            Err(RegistryError::NotFound(device_id.to_string()))
        }
    }
}

fn new_device(registration: &DeviceRegistration, status: DeviceStatus, api_key: String) -> NewDevice {
    NewDevice {
        device_id: registration.device_id.clone(),
        device_name: registration.device_name.trim().to_string(),
        device_type: registration.device_type.unwrap_or_default(),
        location: trimmed_location(registration),
        status,
        api_key,
        registered_at: Utc::now(),
    }
}

/// Blank locations count as absent
fn trimmed_location(registration: &DeviceRegistration) -> Option<String> {
    registration
        .location
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
}

fn validate_registration(registration: &DeviceRegistration) -> RegistryResult<()> {
    validate_device_id(&registration.device_id)?;
    validate_name(&registration.device_name)?;
    if let Some(location) = &registration.location {
        validate_location(location)?;
    }
    Ok(())
}

pub(crate) fn validate_device_id(device_id: &str) -> RegistryResult<()> {
    if device_id.is_empty() {
        return Err(RegistryError::Validation("device_id cannot be empty".to_string()));
    }
    if device_id.chars().count() > MAX_DEVICE_ID_LEN {
        return Err(RegistryError::Validation(format!(
            "device_id exceeds {} characters",
            MAX_DEVICE_ID_LEN
        )));
    }
    if device_id.trim() != device_id {
        return Err(RegistryError::Validation(
            "device_id cannot have leading or trailing whitespace".to_string(),
        ));
    }
    Ok(())
}

fn validate_name(name: &str) -> RegistryResult<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RegistryError::Validation("device_name cannot be empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(RegistryError::Validation(format!(
            "device_name exceeds {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(())
}

fn validate_location(location: &str) -> RegistryResult<()> {
    if location.trim().chars().count() > MAX_LOCATION_LEN {
        return Err(RegistryError::Validation(format!(
            "location exceeds {} characters",
            MAX_LOCATION_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{SensorFields, StorageConfig, StorageError};
    use std::collections::HashSet;
    use tempfile::tempdir;

    async fn create_test_registry() -> (DeviceRegistry, TelemetryStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = TelemetryStore::open(StorageConfig::new(dir.path()))
            .await
            .unwrap();
        (DeviceRegistry::new(store.clone()), store, dir)
    }

    #[tokio::test]
    async fn test_reregister_trims_location() {
        let (registry, _store, _dir) = create_test_registry().await;

        registry
            .register(DeviceRegistration::new("D1", "Field sensor").with_location("Garden A"))
            .await
            .unwrap();

        let again = registry
            .register(DeviceRegistration::new("D1", "Field sensor").with_location("  Greenhouse 2 \t"))
            .await
            .unwrap();
        assert!(!again.created);
        assert_eq!(again.device.location.as_deref(), Some("Greenhouse 2"));

        let stored = registry.get("D1").await.unwrap();
        assert_eq!(stored.location.as_deref(), Some("Greenhouse 2"));
    }

    #[tokio::test]
    async fn test_register_creates_then_updates() {
        let (registry, _store, _dir) = create_test_registry().await;

        let first = registry
            .register(DeviceRegistration::new("ESP32-001", "Garden Sensor").with_location("Garden A"))
            .await
            .unwrap();
        assert!(first.created);
        assert!(first.api_key.is_some());
        assert_eq!(first.device.device_type, DeviceType::Multi);

        let second = registry
            .register(
                DeviceRegistration::new("ESP32-001", "Renamed Sensor")
                    .with_type(DeviceType::Soil)
                    .with_location("Garden B"),
            )
            .await
            .unwrap();
        assert!(!second.created);
        assert!(second.api_key.is_none());
        assert_eq!(second.device.device_name, "Renamed Sensor");
        assert_eq!(second.device.device_type, DeviceType::Soil);
        assert_eq!(second.device.location.as_deref(), Some("Garden B"));
        assert_eq!(second.device.registered_at, first.device.registered_at);

        let page = registry.list(DeviceFilter::default()).await.unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn test_reregistration_keeps_key() {
        let (registry, _store, _dir) = create_test_registry().await;

        let first = registry
            .register(DeviceRegistration::new("D1", "Field sensor"))
            .await
            .unwrap();
        let key = first.api_key.unwrap();

        registry
            .register(DeviceRegistration::new("D1", "Field sensor"))
            .await
            .unwrap();

        assert!(registry.authenticate("D1", &key).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_first_registration() {
        let (registry, _store, _dir) = create_test_registry().await;

        let mut handles = Vec::new();
        for i in 0..10 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .register(DeviceRegistration::new("shared", format!("Sensor {}", i)))
                    .await
                    .unwrap()
            }));
        }

        let mut created = 0;
        let mut keys = Vec::new();
        for handle in handles {
            let result = handle.await.unwrap();
            if result.created {
                created += 1;
            }
            keys.extend(result.api_key);
        }

        assert_eq!(created, 1);
        assert_eq!(keys.len(), 1);
        assert!(registry.authenticate("shared", &keys[0]).await.is_ok());
        assert_eq!(registry.list(DeviceFilter::default()).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_create_is_strict() {
        let (registry, _store, _dir) = create_test_registry().await;

        let created = registry
            .create(DeviceRegistration::new("D1", "Field sensor"), DeviceStatus::Maintenance)
            .await
            .unwrap();
        assert_eq!(created.device.status, DeviceStatus::Maintenance);

        let err = registry
            .create(DeviceRegistration::new("D1", "Field sensor"), DeviceStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_authentication_failures_are_uniform() {
        let (registry, _store, _dir) = create_test_registry().await;
        let key = registry
            .register(DeviceRegistration::new("D1", "Field sensor"))
            .await
            .unwrap()
            .api_key
            .unwrap();

        let wrong_key = registry.authenticate("D1", "not-the-key").await.unwrap_err();
        let unknown = registry.authenticate("ghost", &key).await.unwrap_err();

        registry.update_status("D1", DeviceStatus::Inactive).await.unwrap();
        let retired = registry.authenticate("D1", &key).await.unwrap_err();

        for err in [wrong_key, unknown, retired] {
            assert!(matches!(err, RegistryError::Authentication));
            assert_eq!(err.to_string(), "Invalid device credentials");
        }
    }

    #[tokio::test]
    async fn test_maintenance_device_authenticates() {
        let (registry, _store, _dir) = create_test_registry().await;
        let key = registry
            .register(DeviceRegistration::new("D1", "Field sensor"))
            .await
            .unwrap()
            .api_key
            .unwrap();

        registry.update_status("D1", DeviceStatus::Maintenance).await.unwrap();
        assert!(registry.authenticate("D1", &key).await.is_ok());
    }

    #[tokio::test]
    async fn test_rotate_key_invalidates_old_key() {
        let (registry, store, _dir) = create_test_registry().await;
        let old_key = registry
            .register(DeviceRegistration::new("D1", "Field sensor"))
            .await
            .unwrap()
            .api_key
            .unwrap();

        let new_key = registry.rotate_key("D1").await.unwrap();
        assert_ne!(old_key, new_key);

        assert!(matches!(
            registry.authenticate("D1", &old_key).await,
            Err(RegistryError::Authentication)
        ));
        assert!(registry.authenticate("D1", &new_key).await.is_ok());

        // A write carrying the old key is refused by the store as well
        let err = store
            .append_reading("D1", &old_key, SensorFields::default().humidity(50.0))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::CredentialRejected(_)));

        assert!(matches!(
            registry.rotate_key("ghost").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_registration_validation() {
        let (registry, _store, _dir) = create_test_registry().await;

        for registration in [
            DeviceRegistration::new("", "Field sensor"),
            DeviceRegistration::new(" D1", "Field sensor"),
            DeviceRegistration::new("x".repeat(101), "Field sensor"),
            DeviceRegistration::new("D1", "   "),
            DeviceRegistration::new("D1", "Field sensor").with_location("y".repeat(201)),
        ] {
            let err = registry.register(registration).await.unwrap_err();
            assert!(matches!(err, RegistryError::Validation(_)), "got {:?}", err);
        }
    }

    #[tokio::test]
    async fn test_list_caps_page_size() {
        let (registry, _store, _dir) = create_test_registry().await;
        let mut ids = HashSet::new();
        for i in 0..3 {
            let id = format!("D{}", i);
            registry
                .register(DeviceRegistration::new(id.clone(), "Field sensor"))
                .await
                .unwrap();
            ids.insert(id);
        }

        let page = registry
            .list(DeviceFilter {
                limit: 10_000,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.limit, MAX_PAGE_SIZE);
        assert_eq!(page.items.len(), 3);

        let listed: HashSet<_> = page.items.into_iter().map(|d| d.device_id).collect();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn test_get_update_delete() {
        let (registry, _store, _dir) = create_test_registry().await;
        registry
            .register(DeviceRegistration::new("D1", "Field sensor").with_location("Field 3"))
            .await
            .unwrap();

        let updated = registry
            .update(
                "D1",
                DeviceChanges {
                    device_name: Some("  Field probe ".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.device_name, "Field probe");
        assert_eq!(updated.location.as_deref(), Some("Field 3"));

        let err = registry
            .update(
                "D1",
                DeviceChanges {
                    device_name: Some(String::new()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));

        registry.delete("D1").await.unwrap();
        assert!(matches!(registry.get("D1").await, Err(RegistryError::NotFound(_))));
        assert!(matches!(registry.delete("D1").await, Err(RegistryError::NotFound(_))));
    }
}

//! Device service: admin CRUD, PIN login, and config snapshots.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use atrio_core::types::{AssignmentMode, DeviceSnapshot};

use crate::auth::{hash_pin, verify_pin, JwtManager};
use crate::db::DeviceRecord;
use crate::error::VenueError;
use crate::AppState;

// =============================================================================
// Wire Types
// =============================================================================

/// Admin request to register a new device.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeviceRequest {
    pub name: String,
    pub location: Option<String>,
    #[serde(default = "default_assignment")]
    pub assignment: AssignmentMode,
    #[serde(default)]
    pub shared_terminal: bool,
    /// Optional PIN; without one the device can only join via pairing token.
    pub pin: Option<String>,
    #[serde(default)]
    pub can_refund: bool,
    #[serde(default = "default_true")]
    pub can_discount: bool,
}

fn default_assignment() -> AssignmentMode {
    AssignmentMode::Permanent
}

fn default_true() -> bool {
    true
}

/// Admin request to update a device. Absent fields keep their value.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDeviceRequest {
    pub name: Option<String>,
    pub location: Option<String>,
    pub assignment: Option<AssignmentMode>,
    pub shared_terminal: Option<bool>,
    pub pin: Option<String>,
    pub can_refund: Option<bool>,
    pub can_discount: Option<bool>,
}

/// PIN login request from a terminal.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLoginRequest {
    pub device_id: String,
    pub pin: String,
}

/// PIN login response: a fresh credential plus everything the terminal
/// needs to start working.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLoginResponse {
    pub device_credential: String,
    pub device: DeviceSnapshot,
    pub config: DeviceConfigSnapshot,
}

/// An operator as shown in the shared-terminal roster.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorSummary {
    pub id: String,
    pub name: String,
}

/// Per-device permission flags.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePermissions {
    pub can_refund: bool,
    pub can_discount: bool,
}

/// Everything a terminal needs to configure itself after pairing or login.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfigSnapshot {
    pub device: DeviceSnapshot,
    pub catalog_version: i64,
    /// Empty unless the device is a shared terminal.
    pub operators: Vec<OperatorSummary>,
    pub permissions: DevicePermissions,
}

// =============================================================================
// Service
// =============================================================================

/// Device service implementation.
pub struct DeviceService {
    state: Arc<AppState>,
    jwt_manager: JwtManager,
}

impl DeviceService {
    /// Create a new device service.
    pub fn new(state: Arc<AppState>) -> Self {
        let jwt_manager = JwtManager::new(
            state.config.jwt_secret.clone(),
            state.config.jwt_device_lifetime_secs,
        );

        DeviceService { state, jwt_manager }
    }

    // =========================================================================
    // Admin Operations
    // =========================================================================

    /// Register a new device.
    pub async fn create_device(
        &self,
        request: CreateDeviceRequest,
    ) -> Result<DeviceSnapshot, VenueError> {
        if request.name.trim().is_empty() {
            return Err(VenueError::InvalidRequest(
                "Device name must not be empty".to_string(),
            ));
        }

        let pin_hash = match &request.pin {
            Some(pin) => Some(hash_pin(pin)?),
            None => None,
        };

        let now = Utc::now();
        let record = DeviceRecord {
            id: Uuid::new_v4().to_string(),
            name: request.name,
            location: request.location,
            assignment: request.assignment,
            shared_terminal: request.shared_terminal,
            pin_hash,
            can_refund: request.can_refund,
            can_discount: request.can_discount,
            is_active: true,
            last_seen_at: None,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        };
        self.state.db.insert_device(&record).await?;

        info!(device_id = %record.id, name = %record.name, "Device registered");
        Ok(record.snapshot())
    }

    /// List all devices.
    pub async fn list_devices(&self) -> Result<Vec<DeviceSnapshot>, VenueError> {
        let rows = self.state.db.list_devices().await?;
        Ok(rows.iter().map(DeviceRecord::snapshot).collect())
    }

    /// Get one device.
    pub async fn get_device(&self, device_id: &str) -> Result<DeviceSnapshot, VenueError> {
        let record = self.require_device(device_id).await?;
        Ok(record.snapshot())
    }

    /// Update a device's editable fields.
    pub async fn update_device(
        &self,
        device_id: &str,
        request: UpdateDeviceRequest,
    ) -> Result<DeviceSnapshot, VenueError> {
        let mut record = self.require_device(device_id).await?;

        if let Some(name) = request.name {
            record.name = name;
        }
        if let Some(location) = request.location {
            record.location = Some(location);
        }
        if let Some(assignment) = request.assignment {
            record.assignment = assignment;
        }
        if let Some(shared) = request.shared_terminal {
            record.shared_terminal = shared;
        }
        if let Some(can_refund) = request.can_refund {
            record.can_refund = can_refund;
        }
        if let Some(can_discount) = request.can_discount {
            record.can_discount = can_discount;
        }
        self.state.db.update_device(&record).await?;

        if let Some(pin) = request.pin {
            let pin_hash = hash_pin(&pin)?;
            self.state.db.set_device_pin(device_id, &pin_hash).await?;
        }

        let record = self.require_device(device_id).await?;
        Ok(record.snapshot())
    }

    /// Revoke a device. Its credential dies on the next authenticated
    /// request; its queue stays intact on the terminal until re-activation.
    pub async fn revoke_device(&self, device_id: &str) -> Result<(), VenueError> {
        self.require_device(device_id).await?;
        self.state.db.set_device_active(device_id, false).await?;
        self.state
            .db
            .record_event(device_id, "revoked", None)
            .await?;

        info!(device_id = %device_id, "Device revoked");
        Ok(())
    }

    // =========================================================================
    // Terminal Operations
    // =========================================================================

    /// PIN login. Deliberately vague on failure: the caller cannot tell an
    /// unknown device from a wrong PIN.
    pub async fn login_with_pin(
        &self,
        request: &DeviceLoginRequest,
    ) -> Result<DeviceLoginResponse, VenueError> {
        let rejected = || VenueError::AuthFailed("Invalid device or PIN".to_string());

        let device = self
            .state
            .db
            .get_device(&request.device_id)
            .await?
            .ok_or_else(rejected)?;

        if !device.is_active {
            return Err(rejected());
        }

        let pin_hash = device.pin_hash.as_deref().ok_or_else(rejected)?;
        if !verify_pin(&request.pin, pin_hash) {
            warn!(device_id = %device.id, "PIN login failed");
            self.state
                .db
                .record_event(&device.id, "login_failed", None)
                .await?;
            return Err(rejected());
        }

        let credential = self.jwt_manager.generate_device_token(&device.id)?;
        self.state.db.record_event(&device.id, "login", None).await?;
        info!(device_id = %device.id, "PIN login succeeded");

        let config = self.build_snapshot(&device).await?;
        Ok(DeviceLoginResponse {
            device_credential: credential,
            device: device.snapshot(),
            config,
        })
    }

    /// Config snapshot for an authenticated device.
    pub async fn config_snapshot(
        &self,
        device_id: &str,
    ) -> Result<DeviceConfigSnapshot, VenueError> {
        let device = self.require_device(device_id).await?;
        self.build_snapshot(&device).await
    }

    async fn build_snapshot(
        &self,
        device: &DeviceRecord,
    ) -> Result<DeviceConfigSnapshot, VenueError> {
        let catalog_version = self.state.db.catalog_version().await?;

        // Only shared terminals see the roster; a permanent terminal's
        // operator is fixed out-of-band
        let operators = if device.shared_terminal {
            self.state
                .db
                .list_active_operators()
                .await?
                .into_iter()
                .map(|op| OperatorSummary {
                    id: op.id,
                    name: op.name,
                })
                .collect()
        } else {
            Vec::new()
        };

        Ok(DeviceConfigSnapshot {
            device: device.snapshot(),
            catalog_version,
            operators,
            permissions: DevicePermissions {
                can_refund: device.can_refund,
                can_discount: device.can_discount,
            },
        })
    }

    async fn require_device(&self, device_id: &str) -> Result<DeviceRecord, VenueError> {
        self.state
            .db
            .get_device(device_id)
            .await?
            .ok_or_else(|| VenueError::NotFound(format!("Device {}", device_id)))
    }
}

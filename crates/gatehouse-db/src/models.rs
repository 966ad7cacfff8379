//! Internal Rust models matching the database schema.

use chrono::{DateTime, Utc};
use gatehouse_common::{ResourceId, UserId, VideoId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Subscription status as maintained by the billing side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    None,
    Active,
    Expired,
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Active => write!(f, "active"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            _ => Err(format!("Invalid subscription status: {}", s)),
        }
    }
}

/// User account model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub is_admin: bool,
    pub subscription_status: SubscriptionStatus,
    pub subscription_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Whether this user currently holds an active, unexpired subscription.
    pub fn is_entitled(&self, now: DateTime<Utc>) -> bool {
        self.subscription_status == SubscriptionStatus::Active
            && self.subscription_expires_at.map_or(true, |exp| exp > now)
    }
}

/// Login session token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthToken {
    pub token: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Paginated document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    pub title: String,
    pub total_units: u32,
    pub is_premium: bool,
    pub preview_units: u32,
    pub is_active: bool,
    pub storage_path: String,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a video's streaming package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageState {
    Pending,
    Processing,
    Segmented,
    Passthrough,
    Failed,
}

impl PackageState {
    /// Whether a package exists on disk and can be served.
    pub fn is_servable(self) -> bool {
        matches!(self, Self::Segmented | Self::Passthrough)
    }
}

impl std::fmt::Display for PackageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Segmented => write!(f, "segmented"),
            Self::Passthrough => write!(f, "passthrough"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for PackageState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "segmented" => Ok(Self::Segmented),
            "passthrough" => Ok(Self::Passthrough),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid package state: {}", s)),
        }
    }
}

/// Video asset model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Video {
    pub id: VideoId,
    pub title: String,
    pub source_format: String,
    pub is_premium: bool,
    pub preview_seconds: u32,
    pub duration_seconds: Option<f64>,
    pub watermark_text: Option<String>,
    pub package_state: PackageState,
    /// Package last swapped onto disk. Survives a rebuild and a failed rerun.
    pub served_package: Option<PackageState>,
    pub encrypted: bool,
    pub has_thumbnail: bool,
    pub error_message: Option<String>,
    pub is_active: bool,
    pub storage_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Video {
    /// Whether a built package is on disk, whatever the current run is doing.
    pub fn is_servable(&self) -> bool {
        self.served_package.is_some_and(PackageState::is_servable)
    }
}

/// Category of a detected circumvention attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Screenshot or screen-capture shortcut.
    Screenshot,
    /// Developer tools shortcut or docked inspector.
    #[serde(alias = "devtools")]
    DevTools,
    /// Rapid tab/window visibility cycling.
    VisibilityCycling,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Screenshot => write!(f, "screenshot"),
            Self::DevTools => write!(f, "dev_tools"),
            Self::VisibilityCycling => write!(f, "visibility_cycling"),
        }
    }
}

impl std::str::FromStr for ViolationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "screenshot" => Ok(Self::Screenshot),
            "dev_tools" | "devtools" => Ok(Self::DevTools),
            "visibility_cycling" => Ok(Self::VisibilityCycling),
            _ => Err(format!("Invalid violation kind: {}", s)),
        }
    }
}

/// Ledger entry for one detected violation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub id: i64,
    pub user_id: UserId,
    pub resource_id: Uuid,
    pub session_id: String,
    pub kind: ViolationKind,
    pub sequence_number: u32,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub notified: bool,
}

/// Admin listing filter for the violation ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationFilter {
    #[default]
    All,
    Unnotified,
    /// Entries whose sequence number reached the lockout threshold.
    Critical,
}

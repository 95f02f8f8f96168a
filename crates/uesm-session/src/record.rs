//! UE session record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registration/connection state of the UE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UeState {
    /// Registered with the network (assigned on create when unset).
    #[default]
    Registered,
    /// Deregistered but the context is still held.
    Deregistered,
    /// Registered with an active signalling connection.
    Connected,
    /// Registered without a signalling connection.
    Idle,
}

impl std::fmt::Display for UeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UeState::Registered => write!(f, "REGISTERED"),
            UeState::Deregistered => write!(f, "DEREGISTERED"),
            UeState::Connected => write!(f, "CONNECTED"),
            UeState::Idle => write!(f, "IDLE"),
        }
    }
}

/// Security context attached to a session.
///
/// Opaque to the store: it is written and read back verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityContext {
    /// Key material label (K_AMF).
    pub kamf: Option<String>,
    /// Ciphering/integrity algorithm label.
    pub algorithm: Option<String>,
    /// Key set identifier.
    pub keyset_id: Option<String>,
    /// Next-hop chaining counter.
    pub next_hop_chaining_count: u8,
}

/// A UE session record, keyed by TMSI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Temporary identifier; primary key.
    pub tmsi: String,

    /// Subscriber identity.
    pub imsi: String,

    /// Subscriber number.
    pub msisdn: String,

    /// When the session was first stored. Set once, preserved by updates.
    #[serde(default)]
    pub attach_time: Option<DateTime<Utc>>,

    /// When the session was last written.
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,

    /// Serving base station.
    #[serde(default)]
    pub gnb_id: Option<String>,

    /// Tracking area identity.
    #[serde(default)]
    pub tai: Option<String>,

    #[serde(default)]
    pub ue_state: UeState,

    /// Capability tags advertised by the UE.
    #[serde(default)]
    pub capabilities: Vec<String>,

    #[serde(default)]
    pub security_context: SecurityContext,
}

impl SessionRecord {
    /// Create a record with the three identifiers and defaults elsewhere.
    pub fn new(
        tmsi: impl Into<String>,
        imsi: impl Into<String>,
        msisdn: impl Into<String>,
    ) -> Self {
        Self {
            tmsi: tmsi.into(),
            imsi: imsi.into(),
            msisdn: msisdn.into(),
            attach_time: None,
            last_update: None,
            gnb_id: None,
            tai: None,
            ue_state: UeState::default(),
            capabilities: Vec::new(),
            security_context: SecurityContext::default(),
        }
    }

    /// Set the serving base station.
    pub fn with_gnb_id(mut self, gnb_id: impl Into<String>) -> Self {
        self.gnb_id = Some(gnb_id.into());
        self
    }

    /// Set the tracking area.
    pub fn with_tai(mut self, tai: impl Into<String>) -> Self {
        self.tai = Some(tai.into());
        self
    }

    /// Set the UE state.
    pub fn with_state(mut self, state: UeState) -> Self {
        self.ue_state = state;
        self
    }

    /// Set the capability tags.
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Set the security context.
    pub fn with_security_context(mut self, security_context: SecurityContext) -> Self {
        self.security_context = security_context;
        self
    }

    /// Set the attach time explicitly.
    pub fn with_attach_time(mut self, ts: DateTime<Utc>) -> Self {
        self.attach_time = Some(ts);
        self
    }

    /// Compare everything except the store-assigned timestamps.
    pub fn same_content(&self, other: &SessionRecord) -> bool {
        self.tmsi == other.tmsi
            && self.imsi == other.imsi
            && self.msisdn == other.msisdn
            && self.gnb_id == other.gnb_id
            && self.tai == other.tai
            && self.ue_state == other.ue_state
            && self.capabilities == other.capabilities
            && self.security_context == other.security_context
    }
}

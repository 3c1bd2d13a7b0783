//! Resource ledger
//!
//! Append-only record of every principal, work unit and role a chain
//! creates. The ledger is owned by the process driving one chain and handed
//! to components as `&mut`, so a chain instance has exactly one writer.
//! Concurrent chains each get their own ledger.
//!
//! Two persisted forms:
//! - `TeardownRecord` (pretty JSON) for the external cleanup collaborator
//! - flat `name,access_key_id` lines for manual audit

use crate::error::LedgerError;
use crate::types::{CredentialPair, PrincipalKind, UnitState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use ulid::Ulid;

/// Unique ledger entry identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub Ulid);

impl EntryId {
    /// Generate new entry ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

/// Kind of recorded resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Principal,
    WorkUnit,
    Role,
}

impl ResourceKind {
    fn label(self) -> &'static str {
        match self {
            Self::Principal => "principal",
            Self::WorkUnit => "work unit",
            Self::Role => "role",
        }
    }
}

/// Attributes recorded for a principal
#[derive(Debug, Clone, PartialEq)]
pub struct PrincipalRecord {
    /// Principal name
    pub name: String,
    /// User or role
    pub kind: PrincipalKind,
    /// Hop that created it (1-based)
    pub hop: u32,
    /// Issued credentials, if issuance succeeded; kept in memory only
    pub credentials: Option<CredentialPair>,
    /// Policies successfully attached
    pub policies: Vec<String>,
}

/// Attributes recorded for a work unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnitRecord {
    /// Unit name
    pub name: String,
    /// Role it executes under
    pub role_name: String,
    /// State at the time of submission
    pub state: UnitState,
}

/// Attributes recorded for an execution role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRecord {
    /// Role name
    pub name: String,
    /// Backend identifier
    pub id: String,
    /// Policies attached at creation
    pub policies: Vec<String>,
}

/// Recorded resource attributes, one variant per kind
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceAttributes {
    Principal(PrincipalRecord),
    WorkUnit(WorkUnitRecord),
    Role(RoleRecord),
}

impl ResourceAttributes {
    /// Kind of the recorded resource
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Principal(_) => ResourceKind::Principal,
            Self::WorkUnit(_) => ResourceKind::WorkUnit,
            Self::Role(_) => ResourceKind::Role,
        }
    }

    /// Name of the recorded resource
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Principal(p) => &p.name,
            Self::WorkUnit(u) => &u.name,
            Self::Role(r) => &r.name,
        }
    }
}

/// One ledger entry
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    /// Entry id
    pub id: EntryId,
    /// Position in the ledger
    pub seq: usize,
    /// Wall-clock time of the append
    pub recorded_at: DateTime<Utc>,
    /// What was recorded
    pub attributes: ResourceAttributes,
}

/// Append-only resource ledger
#[derive(Debug, Default)]
pub struct ResourceLedger {
    entries: Vec<LedgerEntry>,
}

impl ResourceLedger {
    /// Create empty ledger
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record
    ///
    /// # Errors
    /// `LedgerError::Duplicate` if a resource of the same kind and name is
    /// already recorded.
    pub fn record(
        &mut self,
        kind: ResourceKind,
        attributes: ResourceAttributes,
    ) -> Result<EntryId, LedgerError> {
        debug_assert_eq!(kind, attributes.kind());
        if self.contains(kind, attributes.name()) {
            return Err(LedgerError::Duplicate {
                kind: kind.label(),
                name: attributes.name().to_string(),
            });
        }

        let entry = LedgerEntry {
            id: EntryId::new(),
            seq: self.entries.len(),
            recorded_at: Utc::now(),
            attributes,
        };
        let id = entry.id;
        tracing::debug!(seq = entry.seq, kind = kind.label(), name = entry.attributes.name(), "ledger append");
        self.entries.push(entry);
        Ok(id)
    }

    /// Record a principal
    pub fn record_principal(&mut self, record: PrincipalRecord) -> Result<EntryId, LedgerError> {
        self.record(ResourceKind::Principal, ResourceAttributes::Principal(record))
    }

    /// Record a work unit
    pub fn record_work_unit(&mut self, record: WorkUnitRecord) -> Result<EntryId, LedgerError> {
        self.record(ResourceKind::WorkUnit, ResourceAttributes::WorkUnit(record))
    }

    /// Record an execution role
    pub fn record_role(&mut self, record: RoleRecord) -> Result<EntryId, LedgerError> {
        self.record(ResourceKind::Role, ResourceAttributes::Role(record))
    }

    /// Check if a resource is recorded
    #[must_use]
    pub fn contains(&self, kind: ResourceKind, name: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.attributes.kind() == kind && e.attributes.name() == name)
    }

    /// All entries in append order
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing was recorded
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Principal records in hop order
    pub fn principals(&self) -> impl Iterator<Item = &PrincipalRecord> {
        self.entries.iter().filter_map(|e| match &e.attributes {
            ResourceAttributes::Principal(p) => Some(p),
            _ => None,
        })
    }

    /// Look up a principal record by name
    #[must_use]
    pub fn principal(&self, name: &str) -> Option<&PrincipalRecord> {
        self.principals().find(|p| p.name == name)
    }

    /// Build the persisted teardown record
    #[must_use]
    pub fn to_teardown_record(&self) -> TeardownRecord {
        let mut record = TeardownRecord::default();
        for entry in &self.entries {
            match &entry.attributes {
                ResourceAttributes::Principal(p) => record.principals.push(PrincipalEntry {
                    name: p.name.clone(),
                    kind: p.kind,
                    hop: p.hop,
                    access_key_id: p.credentials.as_ref().map(|c| c.access_key_id.clone()),
                    policies: p.policies.clone(),
                }),
                ResourceAttributes::WorkUnit(u) => record.work_units.push(WorkUnitEntry {
                    unit_name: u.name.clone(),
                    role_name: u.role_name.clone(),
                    state: u.state,
                }),
                ResourceAttributes::Role(r) => record.roles.push(RoleEntry {
                    role_name: r.name.clone(),
                    role_id: r.id.clone(),
                    policies: r.policies.clone(),
                }),
            }
        }
        record
    }

    /// Write the teardown record as pretty JSON
    pub fn write_teardown_json(&self, path: impl AsRef<Path>) -> Result<(), LedgerError> {
        let path = path.as_ref();
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), &self.to_teardown_record())?;
        tracing::info!(path = %path.display(), entries = self.len(), "teardown record written");
        Ok(())
    }

    /// Write the flat audit text
    pub fn write_audit_text(&self, path: impl AsRef<Path>) -> Result<(), LedgerError> {
        let path = path.as_ref();
        let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);
        out.write_all(self.to_teardown_record().audit_text().as_bytes())?;
        out.flush()?;
        tracing::info!(path = %path.display(), "audit text written");
        Ok(())
    }
}

/// Persisted principal entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalEntry {
    pub name: String,
    pub kind: PrincipalKind,
    pub hop: u32,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub policies: Vec<String>,
}

/// Persisted work-unit entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnitEntry {
    pub unit_name: String,
    pub role_name: String,
    pub state: UnitState,
}

/// Persisted role entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleEntry {
    pub role_name: String,
    pub role_id: String,
    #[serde(default)]
    pub policies: Vec<String>,
}

/// Structured record consumed by teardown tooling
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownRecord {
    #[serde(default)]
    pub roles: Vec<RoleEntry>,
    #[serde(default)]
    pub work_units: Vec<WorkUnitEntry>,
    #[serde(default)]
    pub principals: Vec<PrincipalEntry>,
}

impl TeardownRecord {
    /// Read a record written by `ResourceLedger::write_teardown_json`
    pub fn read_json(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }

    /// `name,access_key_id` per principal, hop order
    #[must_use]
    pub fn audit_text(&self) -> String {
        let mut principals: Vec<&PrincipalEntry> = self.principals.iter().collect();
        principals.sort_by_key(|p| p.hop);
        principals
            .into_iter()
            .map(|p| format!("{},{}\n", p.name, p.access_key_id.as_deref().unwrap_or("")))
            .collect()
    }

    /// Ordered steps for the external cleanup collaborator
    ///
    /// Policies come off a principal before it is deleted; principals go
    /// before the units that minted them; roles go last.
    #[must_use]
    pub fn plan(&self) -> Vec<TeardownStep> {
        let mut steps = Vec::new();

        // Newest first so a later hop never outlives its parent
        let mut principals: Vec<&PrincipalEntry> = self.principals.iter().collect();
        principals.sort_by_key(|p| std::cmp::Reverse(p.hop));
        for p in principals {
            for policy in &p.policies {
                steps.push(TeardownStep::DetachPrincipalPolicy {
                    principal: p.name.clone(),
                    kind: p.kind,
                    policy: policy.clone(),
                });
            }
            if let Some(key) = &p.access_key_id {
                steps.push(TeardownStep::DeleteCredentials {
                    principal: p.name.clone(),
                    access_key_id: key.clone(),
                });
            }
            steps.push(TeardownStep::DeletePrincipal {
                principal: p.name.clone(),
                kind: p.kind,
            });
        }

        for unit in &self.work_units {
            steps.push(TeardownStep::DeleteWorkUnit {
                unit: unit.unit_name.clone(),
            });
        }

        for role in &self.roles {
            for policy in &role.policies {
                steps.push(TeardownStep::DetachRolePolicy {
                    role: role.role_name.clone(),
                    policy: policy.clone(),
                });
            }
            steps.push(TeardownStep::DeleteRole {
                role: role.role_name.clone(),
            });
        }

        steps
    }
}

/// One teardown action; executed by external tooling, never here
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum TeardownStep {
    DetachPrincipalPolicy {
        principal: String,
        kind: PrincipalKind,
        policy: String,
    },
    DeleteCredentials {
        principal: String,
        access_key_id: String,
    },
    DeletePrincipal {
        principal: String,
        kind: PrincipalKind,
    },
    DeleteWorkUnit {
        unit: String,
    },
    DetachRolePolicy {
        role: String,
        policy: String,
    },
    DeleteRole {
        role: String,
    },
}

impl std::fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DetachPrincipalPolicy {
                principal,
                kind,
                policy,
            } => write!(f, "detach {policy} from {kind} {principal}"),
            Self::DeleteCredentials {
                principal,
                access_key_id,
            } => write!(f, "delete credential {access_key_id} of {principal}"),
            Self::DeletePrincipal { principal, kind } => write!(f, "delete {kind} {principal}"),
            Self::DeleteWorkUnit { unit } => write!(f, "delete work unit {unit}"),
            Self::DetachRolePolicy { role, policy } => {
                write!(f, "detach {policy} from execution role {role}")
            }
            Self::DeleteRole { role } => write!(f, "delete execution role {role}"),
        }
    }
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Seller identifier (the identity provider's subject for the account owner).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SellerId(pub String);

impl fmt::Display for SellerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SellerAccountKind {
    Company,
    Customer,
}

/// Connected account at the payment processor that receives a seller's share.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PayoutAccountId(pub String);

const PAYOUT_ACCOUNT_PREFIX: &str = "acct_";

impl PayoutAccountId {
    /// Only identifiers of the processor's account shape count as onboarded.
    /// Placeholders such as empty strings or legacy ids are treated as absent.
    pub fn is_well_formed(&self) -> bool {
        self.0.len() > PAYOUT_ACCOUNT_PREFIX.len()
            && self.0.starts_with(PAYOUT_ACCOUNT_PREFIX)
            && self.0.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}

impl fmt::Display for PayoutAccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerAccount {
    pub id: SellerId,
    pub account_kind: SellerAccountKind,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    /// ISO 3166 country code used when opening the payout account.
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default)]
    pub payout_account_id: Option<PayoutAccountId>,
    pub approval_status: ApprovalStatus,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub approved_by: Option<String>,
    #[serde(default)]
    pub locked: bool,
    pub created_at: DateTime<Utc>,
}

fn default_country() -> String {
    "US".to_string()
}

impl SellerAccount {
    /// A fresh signup: pending approval, no payout destination yet.
    pub fn signup(id: SellerId, account_kind: SellerAccountKind, now: DateTime<Utc>) -> Self {
        Self {
            id,
            account_kind,
            display_name: String::new(),
            email: None,
            country: default_country(),
            payout_account_id: None,
            approval_status: ApprovalStatus::Pending,
            approved_at: None,
            approved_by: None,
            locked: false,
            created_at: now,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.approval_status == ApprovalStatus::Approved
    }

    /// The payout destination, if one of the expected shape has been stored.
    pub fn payout_account(&self) -> Option<&PayoutAccountId> {
        self.payout_account_id
            .as_ref()
            .filter(|id| id.is_well_formed())
    }

    /// Approve the seller. Approving twice keeps the first stamp.
    pub fn approve(&mut self, approver: &str, now: DateTime<Utc>) -> ApprovalOutcome {
        if self.is_approved() {
            return ApprovalOutcome::AlreadyApproved;
        }
        self.approval_status = ApprovalStatus::Approved;
        self.approved_at = Some(now);
        self.approved_by = Some(approver.to_string());
        ApprovalOutcome::Approved
    }

    /// Lock a seller still awaiting approval. Approval dominates locking.
    pub fn lock(&mut self) -> LockOutcome {
        if self.is_approved() {
            return LockOutcome::Skipped;
        }
        if self.locked {
            return LockOutcome::AlreadyLocked;
        }
        self.locked = true;
        LockOutcome::Locked
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApprovalOutcome {
    Approved,
    AlreadyApproved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LockOutcome {
    Locked,
    AlreadyLocked,
    Skipped,
}

/// Role a caller can hold in the marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    SuperAdmin,
    Admin,
    Company,
    Customer,
}

impl RoleKind {
    pub fn is_privileged(self) -> bool {
        matches!(self, RoleKind::SuperAdmin | RoleKind::Admin)
    }

    /// Parse a role claim. Unknown strings are ignored rather than trusted.
    pub fn from_claim(claim: &str) -> Option<Self> {
        match claim.trim().to_ascii_lowercase().as_str() {
            "superadmin" => Some(RoleKind::SuperAdmin),
            "admin" => Some(RoleKind::Admin),
            "company" => Some(RoleKind::Company),
            "customer" => Some(RoleKind::Customer),
            _ => None,
        }
    }
}

/// Effective role of an authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRole {
    pub kind: RoleKind,
    pub approved: bool,
}

/// Resolve a caller's role.
///
/// Precedence: an explicit role claim, then the linked seller-account record,
/// then a plain approved customer.
pub fn resolve_role(claim: Option<&str>, account: Option<&SellerAccount>) -> ResolvedRole {
    if let Some(kind) = claim.and_then(RoleKind::from_claim) {
        let approved = match (kind, account) {
            (RoleKind::Company, Some(acc)) => acc.is_approved(),
            (RoleKind::Company, None) => false,
            _ => true,
        };
        return ResolvedRole { kind, approved };
    }
    if let Some(acc) = account {
        let kind = match acc.account_kind {
            SellerAccountKind::Company => RoleKind::Company,
            SellerAccountKind::Customer => RoleKind::Customer,
        };
        return ResolvedRole {
            kind,
            approved: acc.is_approved(),
        };
    }
    ResolvedRole {
        kind: RoleKind::Customer,
        approved: true,
    }
}

use std::{collections::BTreeMap, fmt};

use anyhow::Result;
use clap::ValueEnum;
use getset::Getters;
use serde::Serialize;
use tracing::{debug, info};

use crate::{errors::ReportError, source::Table};

/// The semantic meaning a source column can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    UserId,
    ReceiverId,
    Name,
    Referrer,
    Symbol,
    Currency,
    Commission,
    Deposit,
    Withdraw,
    Volume,
    Amount,
}

impl Role {
    /// Resolution order inside a tier. Generic roles come last so that
    /// `deposit amount` is claimed as a deposit before `amount` sees it.
    pub const ALL: [Role; 11] = [
        Role::UserId,
        Role::ReceiverId,
        Role::Name,
        Role::Referrer,
        Role::Symbol,
        Role::Currency,
        Role::Commission,
        Role::Deposit,
        Role::Withdraw,
        Role::Volume,
        Role::Amount,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Role::UserId => "user id",
            Role::ReceiverId => "receiver_id",
            Role::Name => "name",
            Role::Referrer => "referrer",
            Role::Symbol => "symbol",
            Role::Currency => "currency",
            Role::Commission => "commission",
            Role::Deposit => "deposit",
            Role::Withdraw => "withdraw",
            Role::Volume => "volume",
            Role::Amount => "amount",
        }
    }

    fn exact_aliases(self) -> &'static [&'static str] {
        match self {
            Role::UserId => &["user id", "user_id"],
            Role::ReceiverId => &["receiver_id", "receiver id"],
            Role::Name => &["name"],
            Role::Referrer => &["referrer", "referral"],
            Role::Symbol => &["symbol"],
            Role::Currency => &["currency"],
            Role::Commission => &["commission"],
            Role::Deposit => &["deposit"],
            Role::Withdraw => &["withdraw", "withdrawal"],
            Role::Volume => &["volume"],
            Role::Amount => &["amount"],
        }
    }

    fn compact_aliases(self) -> &'static [&'static str] {
        match self {
            Role::UserId => &["userid", "clientid", "accountid"],
            Role::ReceiverId => &["receiverid", "receiver"],
            Role::Name => &["name", "clientname", "customername", "accountname", "fullname"],
            Role::Referrer => &["referrer", "referral", "referrerid", "referralid"],
            Role::Symbol => &["symbol", "instrument"],
            Role::Currency => &["currency", "ccy"],
            Role::Commission => &["commission", "commissions", "comm"],
            Role::Deposit => &["deposit", "deposits"],
            Role::Withdraw => &["withdraw", "withdrawal", "withdrawals"],
            Role::Volume => &["volume", "lots"],
            Role::Amount => &["amount", "amt"],
        }
    }

    /// Substring searched for in the compact form of a near-miss header.
    /// `Name` has none: too many unrelated headers contain it.
    fn fuzzy_token(self) -> Option<&'static str> {
        match self {
            Role::UserId => Some("userid"),
            Role::ReceiverId => Some("receiver"),
            Role::Name => None,
            Role::Referrer => Some("referr"),
            Role::Symbol => Some("symbol"),
            Role::Currency => Some("currency"),
            Role::Commission => Some("commission"),
            Role::Deposit => Some("deposit"),
            Role::Withdraw => Some("withdraw"),
            Role::Volume => Some("volume"),
            Role::Amount => Some("amount"),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Trims a header, drops a leading byte order mark and lower-cases it.
pub fn normalize(name: &str) -> String {
    name.trim_start_matches('\u{feff}').trim().to_lowercase()
}

/// The normalized header with everything but letters and digits removed.
pub fn compact(name: &str) -> String {
    normalize(name)
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Exact,
    Compact,
    Fuzzy,
}

impl Tier {
    fn matches(self, role: Role, normalized: &str, compacted: &str) -> bool {
        match self {
            Tier::Exact => role.exact_aliases().contains(&normalized),
            Tier::Compact => role.compact_aliases().contains(&compacted),
            Tier::Fuzzy => role
                .fuzzy_token()
                .is_some_and(|token| compacted.contains(token)),
        }
    }
}

/// Assignment of roles to column positions for one source table.
#[derive(Debug, Clone, PartialEq, Getters)]
pub struct ColumnMap {
    #[getset(get = "pub")]
    headers: Vec<String>,
    roles: BTreeMap<Role, usize>,
}

impl ColumnMap {
    /// Resolves roles tier by tier. Every role gets a chance at a tier
    /// before any role falls back to the next one, and a claimed column is
    /// never handed to a second role.
    pub fn resolve<S: AsRef<str>>(headers: &[S]) -> Self {
        let names: Vec<(String, String)> = headers
            .iter()
            .map(|h| (normalize(h.as_ref()), compact(h.as_ref())))
            .collect();
        let mut claimed = vec![false; names.len()];
        let mut roles = BTreeMap::new();

        for tier in [Tier::Exact, Tier::Compact, Tier::Fuzzy] {
            for role in Role::ALL {
                if roles.contains_key(&role) {
                    continue;
                }
                let found = names.iter().enumerate().position(|(idx, (norm, comp))| {
                    !claimed[idx] && tier.matches(role, norm, comp)
                });
                if let Some(idx) = found {
                    claimed[idx] = true;
                    roles.insert(role, idx);
                    if tier != Tier::Exact {
                        debug!(%role, column = headers[idx].as_ref(), ?tier, "near-miss column accepted");
                    }
                }
            }
        }

        ColumnMap {
            headers: headers.iter().map(|h| h.as_ref().to_string()).collect(),
            roles,
        }
    }

    pub fn index(&self, role: Role) -> Option<usize> {
        self.roles.get(&role).copied()
    }

    pub fn contains(&self, role: Role) -> bool {
        self.roles.contains_key(&role)
    }

    /// Original header text of the column bound to `role`.
    pub fn column_name(&self, role: Role) -> Option<&str> {
        self.index(role)
            .and_then(|idx| self.headers.get(idx))
            .map(String::as_str)
    }

    pub fn roles(&self) -> impl Iterator<Item = (Role, usize)> + '_ {
        self.roles.iter().map(|(role, idx)| (*role, *idx))
    }
}

/// Known export layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    /// IB commission report keyed by `receiver_id`.
    Commission,
    /// Transaction ledger keyed by `user id`.
    Ledger,
    /// Trading volume sheet keyed by client name.
    Volume,
}

const LEDGER_MEASURES: [Role; 4] = [Role::Amount, Role::Deposit, Role::Withdraw, Role::Commission];

impl SchemaKind {
    const DETECTION_ORDER: [SchemaKind; 3] =
        [SchemaKind::Commission, SchemaKind::Ledger, SchemaKind::Volume];

    pub fn required(self) -> &'static [Role] {
        match self {
            SchemaKind::Commission => &[Role::ReceiverId, Role::Commission],
            SchemaKind::Ledger => &[Role::UserId],
            SchemaKind::Volume => &[Role::Name, Role::Volume],
        }
    }

    fn missing(self, columns: &ColumnMap) -> Vec<String> {
        let mut missing: Vec<String> = self
            .required()
            .iter()
            .filter(|role| !columns.contains(**role))
            .map(|role| role.label().to_string())
            .collect();
        if self == SchemaKind::Ledger && !LEDGER_MEASURES.iter().any(|r| columns.contains(*r)) {
            missing.push("amount|deposit|withdraw|commission".to_string());
        }
        missing
    }

    pub fn matches(self, columns: &ColumnMap) -> bool {
        self.missing(columns).is_empty()
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SchemaKind::Commission => "commission",
            SchemaKind::Ledger => "ledger",
            SchemaKind::Volume => "volume",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Getters)]
pub struct Detection {
    #[getset(get = "pub")]
    origin: String,
    #[getset(get = "pub")]
    kind: SchemaKind,
    #[getset(get = "pub")]
    columns: ColumnMap,
}

/// Decides which export layout `headers` belong to.
///
/// # Arguments
/// * `origin` - Name of the input, used in error messages.
/// * `headers` - Raw header row.
/// * `forced` - Skip fingerprinting and only check the required columns.
///
/// # Returns
/// The detected kind with its column mapping.
pub fn detect<S: AsRef<str>>(
    origin: &str,
    headers: &[S],
    forced: Option<SchemaKind>,
) -> Result<Detection> {
    let columns = ColumnMap::resolve(headers);

    let kind = match forced {
        Some(kind) => {
            let missing = kind.missing(&columns);
            if !missing.is_empty() {
                return Err(ReportError::MissingColumns {
                    kind,
                    origin: origin.to_string(),
                    missing,
                })?;
            }
            kind
        }
        None => SchemaKind::DETECTION_ORDER
            .into_iter()
            .find(|kind| kind.matches(&columns))
            .ok_or_else(|| ReportError::UnrecognizedSchema {
                columns: columns.headers().clone(),
            })?,
    };

    info!(origin, %kind, "schema detected");
    Ok(Detection {
        origin: origin.to_string(),
        kind,
        columns,
    })
}

/// Detects every table and requires them all to share one layout.
pub fn detect_all(tables: &[Table], forced: Option<SchemaKind>) -> Result<Vec<Detection>> {
    let mut detections: Vec<Detection> = Vec::with_capacity(tables.len());
    for table in tables {
        let detection = detect(table.origin(), table.headers().as_slice(), forced)?;
        if let Some(first) = detections.first() {
            if first.kind != detection.kind {
                return Err(ReportError::SchemaMismatch {
                    origin: detection.origin,
                    expected: first.kind,
                    found: detection.kind,
                })?;
            }
        }
        detections.push(detection);
    }
    if detections.is_empty() {
        return Err(ReportError::NoInput)?;
    }
    Ok(detections)
}

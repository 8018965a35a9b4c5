//! Subscription descriptor builder
//!
//! Pure assembly of the filter maps the protocol client sends upstream:
//! which program's transactions and which accounts to watch. Stateless;
//! the connection manager calls it once per connect attempt.

use serde::Serialize;
use std::collections::HashMap;

/// Commitment level requested from the upstream source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl Commitment {
    /// Parse from config text, defaulting to Confirmed on junk input
    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "processed" => Commitment::Processed,
            "confirmed" => Commitment::Confirmed,
            "finalized" => Commitment::Finalized,
            other => {
                log::warn!("Invalid commitment '{}', defaulting to Confirmed", other);
                Commitment::Confirmed
            }
        }
    }
}

/// Transaction-scope filter descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransactionFilter {
    pub vote: Option<bool>,
    pub failed: Option<bool>,
    pub account_include: Vec<String>,
    pub account_exclude: Vec<String>,
    pub account_required: Vec<String>,
}

/// Account-scope filter descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccountFilter {
    pub account: Vec<String>,
    pub owner: Vec<String>,
}

/// Named filter maps handed to the transport on connect
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubscriptionFilters {
    pub transactions: HashMap<String, TransactionFilter>,
    pub accounts: HashMap<String, AccountFilter>,
    pub commitment: Commitment,
}

#[derive(Debug)]
pub enum SubscriptionError {
    MissingProgramId,
    InvalidProgramId(String),
}

impl std::fmt::Display for SubscriptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionError::MissingProgramId => write!(f, "Missing subscription program id"),
            SubscriptionError::InvalidProgramId(id) => write!(
                f,
                "program id must be 32-44 characters (base58 Pubkey), got {}",
                id.len()
            ),
        }
    }
}

impl std::error::Error for SubscriptionError {}

/// Build the filter descriptors for one tracked program
///
/// Subscribes to non-vote, non-failed transactions touching the program
/// (covers inner instructions too, since inner program ids appear in the
/// transaction account list) and to accounts the program owns, plus any
/// explicitly listed curve accounts.
pub fn build_program_filters(
    program_id: &str,
    extra_accounts: &[String],
    commitment: Commitment,
) -> Result<SubscriptionFilters, SubscriptionError> {
    if program_id.is_empty() {
        return Err(SubscriptionError::MissingProgramId);
    }
    if program_id.len() < 32 || program_id.len() > 44 {
        return Err(SubscriptionError::InvalidProgramId(program_id.to_string()));
    }

    let mut transactions = HashMap::new();
    transactions.insert(
        "program_txns".to_string(),
        TransactionFilter {
            vote: Some(false),
            failed: Some(false),
            account_include: vec![],
            account_exclude: vec![],
            account_required: vec![program_id.to_string()],
        },
    );

    let mut accounts = HashMap::new();
    accounts.insert(
        "program_accounts".to_string(),
        AccountFilter {
            account: extra_accounts.to_vec(),
            owner: vec![program_id.to_string()],
        },
    );

    Ok(SubscriptionFilters {
        transactions,
        accounts,
        commitment,
    })
}

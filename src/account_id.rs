use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
#[serde(try_from = "u64", into = "u64")]
/// AccountID identifies the logical account a worker process is supervised for.
/// It is the numeric account number and must be non-zero.
pub struct AccountID(u64);

#[derive(Error, Debug, PartialEq)]
pub enum AccountIDError {
    #[error("AccountID must be a positive number")]
    Zero,
    #[error("AccountID '{0}' is not a number")]
    NotANumber(String),
}

impl AccountID {
    pub fn new(id: u64) -> Result<Self, AccountIDError> {
        Self::try_from(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// Directory holding this account's worker data, below `accounts_data_dir`.
    pub fn data_dir(&self, accounts_data_dir: &std::path::Path) -> PathBuf {
        accounts_data_dir.join(self.0.to_string())
    }
}

impl TryFrom<u64> for AccountID {
    type Error = AccountIDError;
    fn try_from(id: u64) -> Result<Self, Self::Error> {
        if id == 0 {
            return Err(AccountIDError::Zero);
        }
        Ok(AccountID(id))
    }
}

impl From<AccountID> for u64 {
    fn from(value: AccountID) -> Self {
        value.0
    }
}

impl FromStr for AccountID {
    type Err = AccountIDError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s
            .trim()
            .parse::<u64>()
            .map_err(|_| AccountIDError::NotANumber(s.to_string()))?;
        Self::try_from(id)
    }
}

impl Display for AccountID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::CarbotaxError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    Inchikey,
    Smiles,
}

impl IdentifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::Inchikey => "inchikey",
            IdentifierKind::Smiles => "smiles",
        }
    }

    /// Guesses the kind from a single identifier: an InChIKey has exactly
    /// three dash-separated blocks.
    pub fn detect(identifier: &str) -> Self {
        if looks_like_inchikey(identifier) {
            IdentifierKind::Inchikey
        } else {
            IdentifierKind::Smiles
        }
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IdentifierKind {
    type Err = CarbotaxError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "inchikey" => Ok(IdentifierKind::Inchikey),
            "smiles" => Ok(IdentifierKind::Smiles),
            _ => Err(CarbotaxError::InvalidIdentifierKind(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum KindSelector {
    #[default]
    Auto,
    Inchikey,
    Smiles,
}

impl KindSelector {
    pub fn resolve(self, identifiers: &[String]) -> Result<IdentifierKind, CarbotaxError> {
        let kind = match self {
            KindSelector::Inchikey => IdentifierKind::Inchikey,
            KindSelector::Smiles => IdentifierKind::Smiles,
            KindSelector::Auto => identifiers
                .first()
                .map(|first| IdentifierKind::detect(first))
                .unwrap_or(IdentifierKind::Inchikey),
        };
        validate_batch(identifiers, kind)?;
        Ok(kind)
    }
}

pub fn validate_batch(identifiers: &[String], kind: IdentifierKind) -> Result<(), CarbotaxError> {
    for (index, identifier) in identifiers.iter().enumerate() {
        let is_inchikey = looks_like_inchikey(identifier);
        match kind {
            IdentifierKind::Inchikey if !is_inchikey => {
                return Err(CarbotaxError::InvalidIdentifier {
                    index,
                    message: format!("'{identifier}' is not a valid InChIKey"),
                });
            }
            IdentifierKind::Smiles if is_inchikey => {
                return Err(CarbotaxError::InvalidIdentifier {
                    index,
                    message: format!("'{identifier}' looks like an InChIKey but SMILES was expected"),
                });
            }
            _ => {}
        }
    }
    Ok(())
}

fn looks_like_inchikey(value: &str) -> bool {
    value.contains('-') && value.split('-').count() == 3
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn detect_kind() {
        assert_eq!(
            IdentifierKind::detect("WQZGKKKJIJFFOK-GASJEMHNSA-N"),
            IdentifierKind::Inchikey
        );
        assert_eq!(
            IdentifierKind::detect("C(C1C(C(C(C(O1)O)O)O)O)O"),
            IdentifierKind::Smiles
        );
    }

    #[test]
    fn parse_kind() {
        assert_eq!("InChIKey".parse::<IdentifierKind>().unwrap(), IdentifierKind::Inchikey);
        let err = "cas".parse::<IdentifierKind>().unwrap_err();
        assert_matches!(err, CarbotaxError::InvalidIdentifierKind(_));
    }
}

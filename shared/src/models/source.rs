//! Source attribution for ledger and price history records

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

/// The business event that caused a stock movement or a price change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum SourceKind {
    Provider(Uuid),
    Sale(Uuid),
    Return(Uuid),
    Transfer(Uuid),
    Adjustment(Uuid),
    Creation,
}

impl SourceKind {
    /// Column value stored in `source_type`
    pub fn type_name(&self) -> &'static str {
        match self {
            SourceKind::Provider(_) => "provider",
            SourceKind::Sale(_) => "sale",
            SourceKind::Return(_) => "return",
            SourceKind::Transfer(_) => "transfer",
            SourceKind::Adjustment(_) => "adjustment",
            SourceKind::Creation => "creation",
        }
    }

    /// Column value stored in `source_id`
    pub fn id(&self) -> Option<Uuid> {
        match self {
            SourceKind::Provider(id)
            | SourceKind::Sale(id)
            | SourceKind::Return(id)
            | SourceKind::Transfer(id)
            | SourceKind::Adjustment(id) => Some(*id),
            SourceKind::Creation => None,
        }
    }

    /// Rebuild a source from its `source_type` / `source_id` columns
    pub fn from_columns(type_name: &str, id: Option<Uuid>) -> DomainResult<Self> {
        let missing_id = || DomainError::validation("source_id", format!("source type '{type_name}' requires an id"));
        match type_name {
            "provider" => id.map(SourceKind::Provider).ok_or_else(missing_id),
            "sale" => id.map(SourceKind::Sale).ok_or_else(missing_id),
            "return" => id.map(SourceKind::Return).ok_or_else(missing_id),
            "transfer" => id.map(SourceKind::Transfer).ok_or_else(missing_id),
            "adjustment" => id.map(SourceKind::Adjustment).ok_or_else(missing_id),
            "creation" => Ok(SourceKind::Creation),
            other => Err(DomainError::validation(
                "source_type",
                format!("unknown source type '{other}'"),
            )),
        }
    }
}

/// A source plus the free-text reference shown to users (invoice number, etc.)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub kind: SourceKind,
    pub reference: Option<String>,
}

impl SourceRef {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            reference: None,
        }
    }

    pub fn with_reference(kind: SourceKind, reference: impl Into<String>) -> Self {
        Self {
            kind,
            reference: Some(reference.into()),
        }
    }

    /// Rebuild from the three nullable attribution columns
    pub fn from_columns(
        type_name: Option<&str>,
        id: Option<Uuid>,
        reference: Option<String>,
    ) -> DomainResult<Option<Self>> {
        match type_name {
            Some(name) => Ok(Some(Self {
                kind: SourceKind::from_columns(name, id)?,
                reference,
            })),
            None => Ok(None),
        }
    }
}

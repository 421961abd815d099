use crate::model::item::ItemId;
use crate::model::stage::InvalidStage;
use std::fmt;

/// Machine-readable error codes for hosts and operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    InvalidStage,
    ItemNotFound,
    InvalidMove,
    DuplicateItem,
    MalformedMove,
    AmbiguousMove,
    BoardInvariantViolation,
    PersistenceRejected,
    PersistenceTransport,
    StorageFailure,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::InvalidStage => "E2001",
            Self::ItemNotFound => "E2002",
            Self::InvalidMove => "E2003",
            Self::DuplicateItem => "E2004",
            Self::MalformedMove => "E2005",
            Self::AmbiguousMove => "E3001",
            Self::BoardInvariantViolation => "E3002",
            Self::PersistenceRejected => "E4001",
            Self::PersistenceTransport => "E4002",
            Self::StorageFailure => "E5001",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Project not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidStage => "Unknown pipeline stage",
            Self::ItemNotFound => "Item not found",
            Self::InvalidMove => "Move does not change stage",
            Self::DuplicateItem => "Item already exists",
            Self::MalformedMove => "Malformed move argument",
            Self::AmbiguousMove => "More than one item changed stage",
            Self::BoardInvariantViolation => "Board snapshot is inconsistent",
            Self::PersistenceRejected => "Stage move rejected by storage",
            Self::PersistenceTransport => "Stage move could not reach storage",
            Self::StorageFailure => "SQLite storage failure",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `dealflow init` to initialize this directory."),
            Self::ConfigParseError => Some("Fix syntax in .dealflow/config.toml and retry."),
            Self::InvalidStage => Some("Use one of the stages listed in [pipeline] stages."),
            Self::ItemNotFound | Self::PersistenceRejected => None,
            Self::InvalidMove => Some("Pick a target stage different from the current one."),
            Self::DuplicateItem => Some("Pick an unused item ID."),
            Self::MalformedMove => Some("Write each move as ID=STAGE, e.g. d1=Proposal."),
            Self::AmbiguousMove => Some("Submit one drag gesture per diff."),
            Self::BoardInvariantViolation => {
                Some("Discard the board snapshot and reload it from storage.")
            }
            Self::PersistenceTransport => Some("Drag the item again once storage is reachable."),
            Self::StorageFailure => Some("Check the database file and its permissions."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Failure reported by a persistence collaborator for a stage move.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistError {
    #[error("item not found: {0}")]
    NotFound(ItemId),

    #[error("stage move rejected: {0}")]
    Validation(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

impl PersistError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::ItemNotFound,
            Self::Validation(_) => ErrorCode::PersistenceRejected,
            Self::Transport(_) => ErrorCode::PersistenceTransport,
        }
    }
}

/// Errors raised by the board engine and its stores.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A stage identifier is not part of the configured stage set.
    #[error("invalid stage: '{stage}'")]
    InvalidStage { stage: String },

    /// A move whose source and target stage are the same.
    #[error("invalid move for {item}: already in {stage}")]
    InvalidMove { item: ItemId, stage: String },

    /// A diff saw more than one item change stage membership.
    #[error("ambiguous move: {} items changed stage ({})", .items.len(), join_ids(.items))]
    AmbiguousMove { items: Vec<ItemId> },

    /// A board snapshot lost, duplicated, or invented an item.
    #[error("board invariant violated for {item}: {detail}")]
    BoardInvariantViolation { item: ItemId, detail: String },

    /// An item with this ID already exists.
    #[error("item already exists: {0}")]
    DuplicateItem(ItemId),

    /// A move referenced an item that does not exist.
    #[error("item not found: {0}")]
    ItemNotFound(ItemId),

    #[error(transparent)]
    Persistence(#[from] PersistError),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl PipelineError {
    pub(crate) fn invalid_stage(stage: impl Into<String>) -> Self {
        Self::InvalidStage {
            stage: stage.into(),
        }
    }

    pub(crate) fn invariant(item: &ItemId, detail: impl Into<String>) -> Self {
        Self::BoardInvariantViolation {
            item: item.clone(),
            detail: detail.into(),
        }
    }

    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidStage { .. } => ErrorCode::InvalidStage,
            Self::InvalidMove { .. } => ErrorCode::InvalidMove,
            Self::AmbiguousMove { .. } => ErrorCode::AmbiguousMove,
            Self::BoardInvariantViolation { .. } => ErrorCode::BoardInvariantViolation,
            Self::ItemNotFound(_) => ErrorCode::ItemNotFound,
            Self::DuplicateItem(_) => ErrorCode::DuplicateItem,
            Self::Persistence(err) => err.code(),
            Self::Storage(_) => ErrorCode::StorageFailure,
            Self::Serialization(_) => ErrorCode::InternalUnexpected,
            Self::Config(_) => ErrorCode::ConfigParseError,
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }

    /// Collapse into the error shape a persistence collaborator reports.
    #[must_use]
    pub fn into_persist_error(self) -> PersistError {
        match self {
            Self::Persistence(err) => err,
            Self::ItemNotFound(id) => PersistError::NotFound(id),
            Self::Storage(err) => PersistError::Transport(err.to_string()),
            other => PersistError::Validation(other.to_string()),
        }
    }
}

impl From<InvalidStage> for PipelineError {
    fn from(err: InvalidStage) -> Self {
        Self::InvalidStage { stage: err.0 }
    }
}

fn join_ids(items: &[ItemId]) -> String {
    items
        .iter()
        .map(ItemId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

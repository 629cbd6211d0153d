use crate::validation::ValidationReport;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Dataset,
    ChangeRequest,
    Table,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Dataset => write!(f, "dataset"),
            ResourceType::ChangeRequest => write!(f, "change request"),
            ResourceType::Table => write!(f, "table"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateErrorCode {
    Forbidden,
    NotAssigned,
    NotPending,
    ValidationFailed,
    WarningsNotAcknowledged,
    StoreUnavailable,
    MergeAborted,
    MergeInProgress,
    Conflict,
    DatasetNotFound,
    ChangeRequestNotFound,
    TableNotFound,
    DatasetAlreadyExists,
    ChangeRequestAlreadyExists,
    TableAlreadyExists,
    InvalidRequest,
    InvalidConfig,
    IntegrityError,
    Io,
    Encode,
    Decode,
}

impl GateErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            GateErrorCode::Forbidden => "forbidden",
            GateErrorCode::NotAssigned => "not_assigned",
            GateErrorCode::NotPending => "not_pending",
            GateErrorCode::ValidationFailed => "validation_failed",
            GateErrorCode::WarningsNotAcknowledged => "warnings_not_acknowledged",
            GateErrorCode::StoreUnavailable => "store_unavailable",
            GateErrorCode::MergeAborted => "merge_aborted",
            GateErrorCode::MergeInProgress => "merge_in_progress",
            GateErrorCode::Conflict => "conflict",
            GateErrorCode::DatasetNotFound => "dataset_not_found",
            GateErrorCode::ChangeRequestNotFound => "change_request_not_found",
            GateErrorCode::TableNotFound => "table_not_found",
            GateErrorCode::DatasetAlreadyExists => "dataset_already_exists",
            GateErrorCode::ChangeRequestAlreadyExists => "change_request_already_exists",
            GateErrorCode::TableAlreadyExists => "table_already_exists",
            GateErrorCode::InvalidRequest => "invalid_request",
            GateErrorCode::InvalidConfig => "invalid_config",
            GateErrorCode::IntegrityError => "integrity_error",
            GateErrorCode::Io => "io",
            GateErrorCode::Encode => "encode",
            GateErrorCode::Decode => "decode",
        }
    }
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("actor '{actor_id}' is not an assigned reviewer")]
    NotAssigned { actor_id: String },
    #[error("change request '{request_id}' is no longer pending")]
    NotPending { request_id: String },
    #[error("validation failed: {}", .report.summary())]
    ValidationFailed { report: Box<ValidationReport> },
    #[error("validation warnings were not acknowledged by an approver: {}", .report.summary())]
    WarningsNotAcknowledged { report: Box<ValidationReport> },
    #[error("store unavailable: {message}")]
    StoreUnavailable { message: String },
    #[error("merge aborted: {reason}")]
    MergeAborted {
        reason: String,
        report: Option<Box<ValidationReport>>,
    },
    #[error("merge already in progress for change request '{request_id}'")]
    MergeInProgress { request_id: String },
    #[error("conflict error: {0}")]
    Conflict(String),
    #[error("{resource_type} '{resource_id}' not found")]
    NotFound {
        resource_type: ResourceType,
        resource_id: String,
    },
    #[error("{resource_type} '{resource_id}' already exists")]
    AlreadyExists {
        resource_type: ResourceType,
        resource_id: String,
    },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("integrity error: {message}")]
    IntegrityError { message: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl GateError {
    pub fn code(&self) -> GateErrorCode {
        match self {
            GateError::Forbidden(_) => GateErrorCode::Forbidden,
            GateError::NotAssigned { .. } => GateErrorCode::NotAssigned,
            GateError::NotPending { .. } => GateErrorCode::NotPending,
            GateError::ValidationFailed { .. } => GateErrorCode::ValidationFailed,
            GateError::WarningsNotAcknowledged { .. } => GateErrorCode::WarningsNotAcknowledged,
            GateError::StoreUnavailable { .. } => GateErrorCode::StoreUnavailable,
            GateError::MergeAborted { .. } => GateErrorCode::MergeAborted,
            GateError::MergeInProgress { .. } => GateErrorCode::MergeInProgress,
            GateError::Conflict(_) => GateErrorCode::Conflict,
            GateError::NotFound { resource_type, .. } => match resource_type {
                ResourceType::Dataset => GateErrorCode::DatasetNotFound,
                ResourceType::ChangeRequest => GateErrorCode::ChangeRequestNotFound,
                ResourceType::Table => GateErrorCode::TableNotFound,
            },
            GateError::AlreadyExists { resource_type, .. } => match resource_type {
                ResourceType::Dataset => GateErrorCode::DatasetAlreadyExists,
                ResourceType::ChangeRequest => GateErrorCode::ChangeRequestAlreadyExists,
                ResourceType::Table => GateErrorCode::TableAlreadyExists,
            },
            GateError::InvalidRequest(_) => GateErrorCode::InvalidRequest,
            GateError::InvalidConfig { .. } => GateErrorCode::InvalidConfig,
            GateError::IntegrityError { .. } => GateErrorCode::IntegrityError,
            GateError::Io(_) => GateErrorCode::Io,
            GateError::Encode(_) => GateErrorCode::Encode,
            GateError::Decode(_) => GateErrorCode::Decode,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    /// Operational failures that leave the change request untouched; the
    /// caller may retry the same call later without re-collecting approvals.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GateError::StoreUnavailable { .. }
                | GateError::MergeAborted { .. }
                | GateError::MergeInProgress { .. }
                | GateError::Conflict(_)
        )
    }

    /// Validation report carried by gate failures, if any.
    pub fn report(&self) -> Option<&ValidationReport> {
        match self {
            GateError::ValidationFailed { report }
            | GateError::WarningsNotAcknowledged { report } => Some(report),
            GateError::MergeAborted { report, .. } => report.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn unavailable(message: impl Into<String>) -> Self {
        GateError::StoreUnavailable {
            message: message.into(),
        }
    }

    pub(crate) fn dataset_not_found(dataset_id: &str) -> Self {
        GateError::NotFound {
            resource_type: ResourceType::Dataset,
            resource_id: dataset_id.to_string(),
        }
    }

    pub(crate) fn request_not_found(request_id: impl std::fmt::Display) -> Self {
        GateError::NotFound {
            resource_type: ResourceType::ChangeRequest,
            resource_id: request_id.to_string(),
        }
    }
}

/// Machine-consumable error discriminator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    #[error("missing_parameter({0})")]
    MissingParameter(String),
    #[error("input_parameter({0})")]
    InputParameter(String),
    #[error("not_found({class}, {reference})")]
    NotFound { class: String, reference: String },
    #[error("resource_busy({0})")]
    ResourceBusy(String),
    #[error("invalid_status({current}, {required})")]
    InvalidStatus { current: String, required: String },
    #[error("not_empty({0})")]
    NotEmpty(String),
    #[error("out_of_quota({resource}, {limit})")]
    OutOfQuota { resource: String, limit: i64 },
    #[error("conflict({0})")]
    Conflict(String),
    #[error("forbidden({0})")]
    Forbidden(String),
    #[error("not_supported({0})")]
    NotSupported(String),
    #[error("general({0})")]
    General(String),
}

impl ErrorKind {
    /// Stable wire code for the kind.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::MissingParameter(_) => "missing_parameter",
            ErrorKind::InputParameter(_) => "input_parameter",
            ErrorKind::NotFound { .. } => "not_found",
            ErrorKind::ResourceBusy(_) => "resource_busy",
            ErrorKind::InvalidStatus { .. } => "invalid_status",
            ErrorKind::NotEmpty(_) => "not_empty",
            ErrorKind::OutOfQuota { .. } => "out_of_quota",
            ErrorKind::Conflict(_) => "conflict",
            ErrorKind::Forbidden(_) => "forbidden",
            ErrorKind::NotSupported(_) => "not_supported",
            ErrorKind::General(_) => "general",
        }
    }
}

/// Engine error: a kind, plus the trail of context messages collected while
/// the error travelled up the call stack.
#[derive(Debug, thiserror::Error)]
#[error("{}{}", .kind, render_trail(.trail))]
pub struct CloudError {
    kind: ErrorKind,
    trail: Vec<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

pub type Result<T> = std::result::Result<T, CloudError>;

impl CloudError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            trail: Vec::new(),
            source: None,
        }
    }

    pub fn missing_parameter(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingParameter(name.into()))
    }

    pub fn input_parameter(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InputParameter(detail.into()))
    }

    pub fn not_found(class: impl Into<String>, reference: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound {
            class: class.into(),
            reference: reference.into(),
        })
    }

    pub fn resource_busy(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceBusy(detail.into()))
    }

    pub fn invalid_status(current: impl Into<String>, required: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidStatus {
            current: current.into(),
            required: required.into(),
        })
    }

    pub fn not_empty(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotEmpty(detail.into()))
    }

    pub fn out_of_quota(resource: impl Into<String>, limit: i64) -> Self {
        Self::new(ErrorKind::OutOfQuota {
            resource: resource.into(),
            limit,
        })
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict(detail.into()))
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden(detail.into()))
    }

    pub fn not_supported(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotSupported(detail.into()))
    }

    pub fn general(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::General(detail.into()))
    }

    /// Attach the underlying error that caused this one.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Context messages, innermost first.
    pub fn trail(&self) -> &[String] {
        &self.trail
    }

    pub fn push_context(mut self, msg: impl Into<String>) -> Self {
        self.trail.push(msg.into());
        self
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::NotFound { .. })
    }
}

fn render_trail(trail: &[String]) -> String {
    trail.iter().rev().map(|msg| format!(": {}", msg)).collect()
}

impl From<rusqlite::Error> for CloudError {
    fn from(e: rusqlite::Error) -> Self {
        CloudError::general(format!("database: {}", e)).with_source(e)
    }
}

impl From<serde_json::Error> for CloudError {
    fn from(e: serde_json::Error) -> Self {
        CloudError::general(format!("json: {}", e)).with_source(e)
    }
}

impl From<anyhow::Error> for CloudError {
    fn from(e: anyhow::Error) -> Self {
        CloudError::general(format!("{:#}", e))
    }
}

/// Append human-readable context to an engine error without changing its kind.
pub trait ResultExt<T> {
    fn context(self, msg: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<CloudError>,
{
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().push_context(msg))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.into().push_context(f()))
    }
}

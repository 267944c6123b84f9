use thiserror::Error;

/// Missing or invalid configuration. Fatal to the request that triggered it and
/// never retried automatically.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("a source url is required")]
    MissingSourceUrl,
    #[error("source {0} is not configured")]
    UnknownSource(String),
    #[error("no sources are configured")]
    NoSources,
    #[error("invalid source list entry: {0}")]
    InvalidSourceEntry(String),
    #[error("failed to build http client: {0}")]
    HttpClient(reqwest::Error),
}

/// Errors fetching a remote collection. Any of these aborts the whole page walk.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} failed: {error}")]
    RequestError { url: String, error: reqwest::Error },
    #[error("{url} responded with status {status}")]
    StatusError {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("{url} returned a body that is not valid json: {error}")]
    DecodeError {
        url: String,
        error: serde_json::Error,
    },
    #[error("{url} returned a body that is not a collection")]
    UnexpectedShape { url: String },
}

/// Enumeration of errors for operations against a `Store`.
/// Errors can originate from sqlx and are wrapped by us to provide additional context.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("migrations failed with: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
    #[error("{0} is not a valid EventStatus")]
    ParseEventStatusError(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Reasons a single record is skipped. Never fatal to a batch: they are counted
/// and logged, and double as the `reason` label of the skip metrics.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("record has no external identifier")]
    MissingIdentifier,
    #[error("event {external_id} has no parseable start date")]
    MissingStartDate { external_id: String },
    #[error("booking {booking_id} references no event")]
    MissingEventReference { booking_id: String },
    #[error("booking {booking_id} attendee {index} has an invalid email")]
    InvalidEmail { booking_id: String, index: u32 },
    #[error("booking {booking_id} references unknown event {external_event_id}")]
    UnresolvedEvent {
        booking_id: String,
        external_event_id: String,
    },
    #[error("booking {booking_id} describes {attendees} attendees, more than the limit of {limit}")]
    TooManyTickets {
        booking_id: String,
        attendees: u64,
        limit: u32,
    },
    #[error("booking {booking_id} attendee index {index} is out of range")]
    IndexOutOfRange { booking_id: String, index: u32 },
    #[error("record is not a json object")]
    NotAnObject,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RecordError {
    pub fn reason(&self) -> &'static str {
        match self {
            RecordError::MissingIdentifier => "missing_identifier",
            RecordError::MissingStartDate { .. } => "missing_start_date",
            RecordError::MissingEventReference { .. } => "missing_event_reference",
            RecordError::InvalidEmail { .. } => "invalid_email",
            RecordError::UnresolvedEvent { .. } => "unresolved_event",
            RecordError::TooManyTickets { .. } => "too_many_tickets",
            RecordError::IndexOutOfRange { .. } => "index_out_of_range",
            RecordError::NotAnObject => "not_an_object",
            RecordError::Store(_) => "store",
        }
    }
}

/// Hard failures of a sync run: the source could not be reached or configured.
/// Partial failures are reported through `SyncReport` instead.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("sync of {source_key} did not finish within {seconds}s")]
    Timeout { source_key: String, seconds: u64 },
}

/// Errors rejecting a webhook delivery before any processing happens.
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("webhook signature is missing")]
    MissingSignature,
    #[error("webhook signature does not match payload")]
    InvalidSignature,
    #[error("webhook payload is not a valid envelope: {0}")]
    InvalidEnvelope(serde_json::Error),
    #[error("webhook data is missing {0}")]
    MissingField(&'static str),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

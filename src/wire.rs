//! Wire messages exchanged with clients
//!
//! Requests and responses are protocol-buffer messages; the structs below
//! are the published schema with field numbers fixed, so any conforming
//! client can talk to the server. All timestamps and durations on the wire
//! are in seconds; conversion to the nanosecond timestamps used internally
//! happens in the request handlers.
//!
//! `Request` and `Response` are the batch envelopes: each carries at most
//! one populated sub-message, and a `ResBatch` is positionally aligned
//! with the `ReqBatch` that produced it.

/// Creates or reconfigures a named database
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OpenReq {
    /// Database name, also its subdirectory under the data path
    #[prost(string, tag = "1")]
    pub database: String,
    /// Bucket width in seconds
    #[prost(uint32, tag = "2")]
    pub resolution: u32,
    /// How long data is kept, in seconds
    #[prost(uint32, tag = "3")]
    pub retention: u32,
    /// Epoch length in seconds
    #[prost(uint32, tag = "4")]
    pub epoch_time: u32,
    /// Maximum number of read-only epochs kept open
    #[prost(uint32, tag = "5")]
    pub max_ro_epochs: u32,
    /// Maximum number of read-write epochs kept open
    #[prost(uint32, tag = "6")]
    pub max_rw_epochs: u32,
}

/// Empty acknowledgement of an `OpenReq`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OpenRes {}

/// Updates the epoch caps of an existing database
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EditReq {
    /// Name of a registered database
    #[prost(string, tag = "1")]
    pub database: String,
    /// New read-only epoch cap
    #[prost(uint32, tag = "2")]
    pub max_ro_epochs: u32,
    /// New read-write epoch cap
    #[prost(uint32, tag = "3")]
    pub max_rw_epochs: u32,
}

/// Empty acknowledgement of an `EditReq`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EditRes {}

/// Asks for the list of registered databases
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InfoReq {}

/// One registered database in an `InfoRes`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DbInfo {
    /// Database name
    #[prost(string, tag = "1")]
    pub database: String,
    /// Storage resolution in whole seconds
    #[prost(uint32, tag = "2")]
    pub resolution: u32,
}

/// The registered databases
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InfoRes {
    /// One entry per registered database, in no particular order
    #[prost(message, repeated, tag = "1")]
    pub databases: Vec<DbInfo>,
}

/// Writes one sample, replacing the addressed bucket
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PutReq {
    /// Name of a registered database
    #[prost(string, tag = "1")]
    pub database: String,
    /// Tag tuple the sample is keyed by
    #[prost(string, repeated, tag = "2")]
    pub fields: Vec<String>,
    /// Bucket timestamp in seconds
    #[prost(uint32, tag = "3")]
    pub timestamp: u32,
    /// Sum (or raw reading) for the bucket
    #[prost(double, tag = "4")]
    pub value: f64,
    /// Number of raw events aggregated into the bucket
    #[prost(uint32, tag = "5")]
    pub count: u32,
}

/// Empty acknowledgement of a `PutReq`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PutRes {}

/// Adds to the addressed bucket instead of replacing it
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IncReq {
    /// Name of a registered database
    #[prost(string, tag = "1")]
    pub database: String,
    /// Tag tuple the sample is keyed by
    #[prost(string, repeated, tag = "2")]
    pub fields: Vec<String>,
    /// Bucket timestamp in seconds
    #[prost(uint32, tag = "3")]
    pub timestamp: u32,
    /// Amount added to the bucket value
    #[prost(double, tag = "4")]
    pub value: f64,
    /// Amount added to the bucket count
    #[prost(uint32, tag = "5")]
    pub count: u32,
}

/// Empty acknowledgement of an `IncReq`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IncRes {}

/// Range query with server-side grouping and down-sampling
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetReq {
    /// Name of a registered database
    #[prost(string, tag = "1")]
    pub database: String,
    /// Tag pattern; an empty string at position i matches any value
    #[prost(string, repeated, tag = "2")]
    pub fields: Vec<String>,
    /// Group-by mask over tag positions; `false` collapses the position
    #[prost(bool, repeated, tag = "3")]
    pub group_by: Vec<bool>,
    /// Window start in seconds, inclusive
    #[prost(uint32, tag = "4")]
    pub start_time: u32,
    /// Window end in seconds, exclusive
    #[prost(uint32, tag = "5")]
    pub end_time: u32,
    /// Output resolution in seconds; 0 means storage resolution
    #[prost(uint32, tag = "6")]
    pub resolution: u32,
}

/// One down-sampled bucket in a result series
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResPoint {
    /// Summed bucket value
    #[prost(double, tag = "1")]
    pub value: f64,
    /// Summed bucket count
    #[prost(uint32, tag = "2")]
    pub count: u32,
}

/// One merged group in a `GetRes`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResSeries {
    /// Tag tuple after group-by rewriting
    #[prost(string, repeated, tag = "1")]
    pub fields: Vec<String>,
    /// One point per output bucket, oldest first
    #[prost(message, repeated, tag = "2")]
    pub points: Vec<ResPoint>,
}

/// The merged result groups of a `GetReq`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetRes {
    /// Merged series in insertion order; treat as a set
    #[prost(message, repeated, tag = "1")]
    pub groups: Vec<ResSeries>,
}

/// Batch envelope: at most one sub-request is populated
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Request {
    /// Set when this member is an `info` operation
    #[prost(message, optional, tag = "1")]
    pub info_req: Option<InfoReq>,
    /// Set when this member is an `open` operation
    #[prost(message, optional, tag = "2")]
    pub open_req: Option<OpenReq>,
    /// Set when this member is an `edit` operation
    #[prost(message, optional, tag = "3")]
    pub edit_req: Option<EditReq>,
    /// Set when this member is an `put` operation
    #[prost(message, optional, tag = "4")]
    pub put_req: Option<PutReq>,
    /// Set when this member is an `inc` operation
    #[prost(message, optional, tag = "5")]
    pub inc_req: Option<IncReq>,
    /// Set when this member is an `get` operation
    #[prost(message, optional, tag = "6")]
    pub get_req: Option<GetReq>,
}

/// Batch response envelope: the sub-response matching the request is set
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Response {
    /// Set when the matching member was an `info` operation
    #[prost(message, optional, tag = "1")]
    pub info_res: Option<InfoRes>,
    /// Set when the matching member was an `open` operation
    #[prost(message, optional, tag = "2")]
    pub open_res: Option<OpenRes>,
    /// Set when the matching member was an `edit` operation
    #[prost(message, optional, tag = "3")]
    pub edit_res: Option<EditRes>,
    /// Set when the matching member was an `put` operation
    #[prost(message, optional, tag = "4")]
    pub put_res: Option<PutRes>,
    /// Set when the matching member was an `inc` operation
    #[prost(message, optional, tag = "5")]
    pub inc_res: Option<IncRes>,
    /// Set when the matching member was an `get` operation
    #[prost(message, optional, tag = "6")]
    pub get_res: Option<GetRes>,
}

/// A vector of tagged requests handled in order
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReqBatch {
    /// Sub-requests, handled first to last
    #[prost(message, repeated, tag = "1")]
    pub batch: Vec<Request>,
}

/// Responses positionally aligned with the request batch
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResBatch {
    /// Sub-responses, one per sub-request
    #[prost(message, repeated, tag = "1")]
    pub batch: Vec<Response>,
}

pub mod client;
pub mod codec;
pub mod commands;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod reload;
pub mod script;
pub mod store;
pub mod value;

pub use client::TimeSeries;
pub use codec::{Aggregation, AggregationKind, Bucket, Filter, Format, KvArg, Limit, Options, Storage};
pub use error::Error;
pub use pipeline::Pipeline;
pub use reload::ReloadCoordinator;
pub use script::{ScriptRecord, ScriptRegistry};
pub use store::{Store, StoreBatch, StoreError, StoreEvent};
pub use value::{Timestamp, Value};

pub type Result<T> = std::result::Result<T, Error>;

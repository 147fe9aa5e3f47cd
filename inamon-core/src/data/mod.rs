//! Sample data types, persistence sinks, and input validation

mod persistence;
mod types;
mod validation;

pub use persistence::{MemorySink, SampleSink, SqliteSink};
pub use types::{unix_seconds, SampleReading, SampleRecord};
pub use validation::{
    validate_address, validate_file_size, validate_finite, validate_name, validate_table_name,
};

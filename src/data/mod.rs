//! Persistence module
//!
//! Appends market samples and closed trades to CSV for the external
//! training collaborator

mod recorder;

pub use recorder::CsvRecorder;

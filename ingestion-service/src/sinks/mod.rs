pub mod atomic;
pub mod csv_file;

pub use atomic::write_atomic;
pub use csv_file::CsvFileSink;

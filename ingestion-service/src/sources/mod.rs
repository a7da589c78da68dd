pub mod delimited_file;

pub use delimited_file::DelimitedFileSource;

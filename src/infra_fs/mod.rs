mod storage_file;

pub use storage_file::*;

mod storage_redis;

pub use storage_redis::*;

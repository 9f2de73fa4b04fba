//! Client-side connection pooling

mod builder;
pub mod conn;
pub mod pool;

pub use self::builder::{NeedsDialer, PoolBuilder};
pub use self::pool::Config as PoolConfig;
pub use self::pool::{Clock, Error, ErrorKind, Pool, Pooled, ReapOrder, SystemClock};

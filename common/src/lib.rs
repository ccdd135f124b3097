#[cfg(feature = "env")]
pub mod env;
#[cfg(feature = "logger")]
pub mod logger;
#[cfg(feature = "runtime")]
pub mod runtime;

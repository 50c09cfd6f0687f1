mod browser_loopback;

pub use browser_loopback::*;

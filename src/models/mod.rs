mod keys;

pub use keys::{ClientKey, RouteKey};

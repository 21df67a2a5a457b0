//! Static shared-credential middleware.

mod middleware;

pub use middleware::{TokenAuthLayer, TokenAuthService};

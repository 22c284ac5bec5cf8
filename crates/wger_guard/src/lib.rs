pub mod ranges;
pub mod resolver;
pub mod validator;

pub use resolver::{DnsResolver, ResolveError, StaticResolver, SystemResolver};
pub use validator::{validate_sync, UrlRejected, UrlValidator, ValidateOptions, ValidationResult};

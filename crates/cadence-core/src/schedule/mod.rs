//! Send-time resolution against temporal and cultural constraints.

pub mod resolver;

pub use self::resolver::{Resolution, ResolveOptions, Resolver, ResolverLimits};

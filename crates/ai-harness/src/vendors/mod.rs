//! Vendor-specific integrations and their `RunBuilder` extension traits.
pub mod proxy;

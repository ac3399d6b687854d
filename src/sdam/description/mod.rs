//! Descriptor types: the per-server snapshot ([`server`]) and the aggregate cluster view built
//! from them ([`topology`]).

pub(crate) mod server;
pub(crate) mod topology;

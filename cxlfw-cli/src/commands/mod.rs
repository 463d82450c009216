//! Command implementations.

pub(crate) mod activate;
pub(crate) mod completions;
pub(crate) mod info;
pub(crate) mod update;

#[macro_use]
extern crate slog;

pub mod bootstrap;
pub mod cluster;
pub mod etcd;
pub mod flags;
pub mod inventory;
pub mod logging;
pub mod membership;

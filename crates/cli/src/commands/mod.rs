//! CLI command implementations

mod admin;
mod bank;
mod detect;
mod listen;
mod reactor;

pub use admin::{cmd_completions, cmd_config_init, cmd_config_show};
pub use bank::cmd_bank;
pub use detect::cmd_detect;
pub use listen::cmd_listen;
pub use reactor::cmd_reactor;

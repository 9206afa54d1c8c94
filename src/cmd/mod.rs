//! CLI command implementations.
//!
//! | Module     | Commands handled          |
//! |------------|---------------------------|
//! | `serve`    | `Serve`                   |
//! | `exec`     | `Exec`                    |
//! | `run`      | `Run`, `Runs`             |
//! | `engines`  | `Engines`                 |
//! | `config`   | `Config`                  |

pub mod config;
pub mod engines;
pub mod exec;
pub mod run;
pub mod serve;

pub use config::cmd_config;
pub use engines::cmd_engines;
pub use exec::cmd_exec;
pub use run::{cmd_run, cmd_runs};
pub use serve::cmd_serve;

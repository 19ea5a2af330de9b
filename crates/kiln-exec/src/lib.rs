//! Kiln Exec
//!
//! Runs external tool invocations inside an already-running execution
//! environment (a Docker or Podman container, or the local host).
//!
//! # Example
//!
//! ```rust,no_run
//! use kiln_exec::{CommandSpec, EnvironmentConfig, EnvironmentFactory, ExecMode};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let env = EnvironmentFactory::create(&EnvironmentConfig::docker("kiln"));
//! if !env.is_running().await? {
//!     return Err("environment is not running".into());
//! }
//!
//! let output = env
//!     .execute(&CommandSpec::new("nvidia-smi"), ExecMode::Capture)
//!     .await?;
//! println!("{}", output.stdout);
//! # Ok(())
//! # }
//! ```

mod command;
mod config;
mod container;
mod environment;
mod error;
mod process;

pub use command::{CommandSpec, ExecMode, ExecOutput};
pub use config::{EnvironmentConfig, EnvironmentKind};
pub use container::ContainerEnvironment;
pub use environment::{Environment, EnvironmentFactory, LocalEnvironment};
pub use error::{ExecError, ExecResult};
pub use process::STREAM_TAIL_BYTES;

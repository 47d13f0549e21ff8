//! # Portly
//!
//! Gives a long-running application a stable TCP port and keeps it reserved.
//!
//! ## Features
//!
//! - **Stable Assignment**: The last port is persisted as `export PORT=N` and preferred on restart
//! - **Race Narrowing**: Ports are held by a bound listener from the moment they are chosen
//! - **Owner Check**: A port still bound by the app's own pm2 process is recognised and logged
//! - **Config Rendering**: `{{DOMAIN}}`/`{{PORT}}` placeholders in an nginx template
//! - **Signal-Driven Release**: SIGTERM/SIGINT/SIGHUP release the port exactly once
//!
//! ## Quick Start
//!
//! ```no_run
//! use portly::{Controller, Settings};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let work_dir = std::path::PathBuf::from(".");
//! let settings = Settings::from_env(&work_dir, Default::default())?;
//!
//! let shutdown = CancellationToken::new();
//! portly::lifecycle::cancel_on_signals(shutdown.clone())?;
//!
//! // Blocks until a termination signal, then releases the port
//! Controller::new(settings, work_dir).run(shutdown).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod markers;
pub mod port;
pub mod template;

// Re-export commonly used types
pub use config::Settings;
pub use error::{Error, Result};
pub use lifecycle::{Controller, Running};
pub use port::{PortAllocator, PortRange, Reservation};

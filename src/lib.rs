//! # Wheelhouse - actor runtime for concurrent network services
//!
//! Independent *modules* each drain their own mailbox on a single logical
//! thread while many modules run in parallel:
//! - Module runtime: mailbox, dispatch loop, handler tables, panic recovery
//! - Worker pools: named groups of modules routed by slot, key or round-robin
//! - Hierarchical timer wheels: O(1) scheduling, cascaded firing
//! - Dynamic-value codec: the tagged binary format for RPC arguments
//!
//! ## Architecture
//!
//! ```text
//!   network / other modules / timers
//!                 │  post, rpc_call, await_rpc_call
//!                 ▼
//!   ┌──────────────────────────────┐
//!   │ Module                       │
//!   │  mailbox ─► dispatch loop    │
//!   │             │    ▲           │
//!   │  handlers ◄─┘    │ execute   │
//!   │             timer manager    │
//!   └──────────────────────────────┘
//!          × N, grouped by the Registry and WorkerPools
//! ```
//!
//! ```no_run
//! use wheelhouse::{args, Config, Registry};
//!
//! # async fn run() -> wheelhouse::Result<()> {
//! let registry = Registry::new(Config::default())?;
//! let echo = registry.module("echo")?;
//! echo.register_rpc_handler("echo", |_ctx, args| args.to_vec())?;
//! registry.start()?;
//!
//! let reply = echo.await_rpc_call("echo", args![1, "a"]).await?;
//! assert_eq!(reply, args![1, "a"]);
//! registry.close().await;
//! # Ok(())
//! # }
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod codec;
pub mod module;
pub mod registry;
pub mod timer;
pub mod types;
pub mod worker_pool;

// Internal utilities
pub mod observability;

pub use codec::{RpcPacket, Value};
pub use module::{ModuleContext, ModuleHandle};
pub use registry::Registry;
pub use timer::TimerId;
pub use types::{Config, Error, Result};
pub use worker_pool::WorkerPool;

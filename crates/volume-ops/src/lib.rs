//! Operations for manually exercising a Kubernetes volume plugin against real
//! cloud infrastructure.
//!
//! The crate drives two external command-line tools and nothing else:
//!
//! * `gcloud`, to create, attach, detach and delete persistent disks and to run
//!   shell commands on the instances they are attached to (see [`exec::Gcloud`],
//!   [`disk`] and [`mount`]).
//! * `kubectl`, to list pods and resolve persistent volume claims when
//!   reporting which volume types a cluster uses (see [`usage`]).
//!
//! Every external invocation goes through the [`exec::CommandRunner`] trait so
//! the orchestration logic can be driven by a scripted runner in tests.
//!
//! # Example
//! ```rust,no_run
//! use volume_ops::config::GceConfig;
//! use volume_ops::exec::{Gcloud, ProcessRunner};
//! use volume_ops::{disk, scenario};
//!
//! let config = GceConfig::default();
//! let gcloud = Gcloud::new(ProcessRunner, &config);
//! let report = scenario::run(&gcloud, &config, &disk::timestamped_disk_name())
//!     .expect("disk could not be created");
//! assert!(!report.is_fatal());
//! ```

#![warn(missing_docs)]
#![cfg_attr(feature = "docs", feature(doc_cfg))]

pub mod backoff;
pub mod config;
pub mod disk;
mod error;
pub mod exec;
mod file;
pub mod mount;
pub mod scenario;
pub mod usage;

#[doc(inline)]
pub use error::Error;
#[doc(inline)]
pub use exec::CommandError;

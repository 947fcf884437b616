//! # hashcrf
//!
//! Online linear-chain Conditional Random Fields with feature hashing,
//! trained one instance at a time by AdaGrad with L1 regularization.
//!
//! All instances, optimizer state and working buffers of a [`Session`] live
//! in one arena allocated at construction and partitioned into fixed
//! sub-regions. Appending beyond a sub-region fails with
//! [`HashCrfError::StoreExhausted`] instead of growing it.
//!
//! ## Examples
//!
//! ```rust
//! use hashcrf::{parse_instances, InstanceKind, Session};
//!
//! let mut session = Session::new(1 << 24)?;
//!
//! // Train:
//! // A w=1
//! // B w=1
//! for items in parse_instances("A w=1\nB w=1\n\n")? {
//!     session.append_instance(&items, InstanceKind::Train)?;
//! }
//! let first = session.train_online(0)?;
//! for _ in 0..99 {
//!     session.train_online(0)?;
//! }
//! assert!(session.last_loss() < first);
//!
//! // Evaluate on the same sequence
//! let dev = parse_instances("A w=1\nB w=1\n")?;
//! session.append_instance(&dev[0], InstanceKind::Dev)?;
//! session.test_dev_start(1);
//! while session.predict_dev()? {}
//!
//! assert_eq!(&[0, 1], session.prediction().0);
//! assert_eq!(Some(1.0), session.confusion().accuracy());
//! # Ok::<(), hashcrf::HashCrfError>(())
//! ```
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod errors;

mod arena;
mod evaluation;
mod forward_backward;
mod hashing;
mod math;
mod optimizers;
mod parse;
mod session;
mod store;
mod trainer;
mod vector;
mod viterbi;

#[cfg(feature = "train")]
mod objective;

#[cfg(test)]
mod test_utils;

pub use errors::{HashCrfError, Result};
pub use evaluation::{ConfusionMatrix, SizeEstimator};
pub use optimizers::HyperParams;
pub use parse::{parse_field, parse_instances};
pub use session::{
    InspectedInstance, Session, SessionConfig, MAX_NUMBER_OF_STATES, MIN_HEAP_SIZE,
};
pub use store::{InstanceHeader, InstanceKind, Item, RegionUsage};
pub use trainer::{EpochReport, Trainer};

#[cfg(feature = "train")]
pub use objective::InstanceObjective;

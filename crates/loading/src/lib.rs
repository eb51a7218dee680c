//! Global busy indicator that doesn't flicker.
//!
//! Operations bracket themselves with [`LoadingCoordinator::enter`], which
//! hands back a [`LoadingGuard`]. The indicator appears only once work has
//! been outstanding for the show delay, stays up through short gaps between
//! chained operations, and once visible remains so for a minimum time.
//!
//! ```
//! use moim_loading::{LoadingCoordinator, NoIndicator, Timings};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let loading = LoadingCoordinator::new(Timings::default(), Arc::new(NoIndicator));
//! {
//!     let _guard = loading.enter();
//!     assert_eq!(loading.active(), 1);
//! }
//! assert_eq!(loading.active(), 0);
//! # }
//! ```

mod coordinator;
mod indicator;
pub mod machine;

pub use crate::coordinator::{LoadingCoordinator, LoadingGuard};
pub use crate::indicator::{Indicator, LogIndicator, NoIndicator};
pub use crate::machine::Timings;

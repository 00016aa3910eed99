//! Live collection views.
//!
//! - [`LiveView`]: latest snapshot of one collection plus its subscribers
//! - [`ViewRegistry`]: at most one view per collection key, created
//!   single-flight on first access
//!
//! # Example
//!
//! ```ignore
//! let registry = ViewRegistry::new();
//! let view = registry.resolve(&key, || load_snapshot(&key))?;
//!
//! let subscription = view.subscribe();
//! let current = subscription.recv()?; // replayed immediately
//! let next = subscription.recv()?;    // after the next publish
//! ```

mod live;
mod registry;

pub use live::{LiveView, Subscription, SubscriptionId};
pub use registry::ViewRegistry;

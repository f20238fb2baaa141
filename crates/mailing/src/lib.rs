//! Customer segments, scheduled newsletters and per-recipient delivery
//! tracking.
//!
//! The dispatch core is split into a pure [`segment`] matcher, the
//! [`membership`] synchronizer operating on the [`directory`], the one-shot
//! [`runs`] scheduler and the [`dispatch`] engine that fans a run out into
//! [`delivery`] records through a [`transport`].

pub mod delivery;
pub mod directory;
pub mod dispatch;
pub mod membership;
pub mod model;
mod persist;
pub mod runs;
pub mod segment;
pub mod service;
pub mod stats;
pub mod transport;
pub mod validation;

pub use delivery::{DeliveryError, DeliveryEvent, DeliveryStore};
pub use directory::{Directory, DirectoryStore};
pub use dispatch::{Clock, DispatchEngine, DispatchReport};
pub use model::{Customer, Delivery, DeliveryStatus, Newsletter, Run};
pub use runs::RunStore;
pub use service::{MailingService, ServiceError};
pub use stats::{DeliveryStats, NewsletterStats};
pub use transport::{HttpTransport, MessageTransport};

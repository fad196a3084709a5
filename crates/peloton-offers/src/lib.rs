//! Offer manager: holds unused offers keyed by agent, enforces hold
//! timeouts, and tracks every offer to exactly one terminal disposition
//! (launched, declined, or rescinded).

pub mod convert;
pub mod error;
pub mod pool;
pub mod reaper;

pub use convert::held_offer_from_wire;
pub use error::{OfferError, OfferResult};
pub use pool::{AgentOffers, HeldOffer, OfferPool, RescindOutcome};
pub use reaper::{DeclineFn, OfferReaper};

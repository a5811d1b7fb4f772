//! Event-reacting systems. Each one handles a single [crate::clock::EventKind]
//! for the session named in the event subject.

pub mod candidate_cancel;
pub(crate) mod lifecycle;
pub mod respond;
pub mod rider_cancel;
pub mod search;
pub mod search_deadline;
pub mod trip;

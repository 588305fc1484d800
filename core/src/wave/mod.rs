//! Wave discovery engine
//!
//! - **advertiser**: peripheral role serving the local session identity
//! - **scanner**: central role reading the identity of nearby peers
//! - **dedup**: per-activation record of reported peers
//! - **controller**: session lifecycle tying both roles to the backend
pub mod advertiser;
pub mod controller;
pub mod dedup;
pub mod scanner;

pub use advertiser::{Advertiser, AdvertiserNotice, AdvertiserState};
pub use controller::{Session, SessionController, SessionObserver};
pub use dedup::{DedupSet, DedupState};
pub use scanner::{DiscoveryRecord, HandshakeStart, Scanner, ScannerNotice, ScannerState};

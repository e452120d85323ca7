pub mod client_repo;
pub mod key_repo;
pub mod referral_repo;

pub use client_repo::{ClientRepository, ClientStore};
pub use key_repo::{KeyRepository, KeyStore};
pub use referral_repo::{ReferralRepository, ReferralStore};

pub mod key_service;
pub mod notification_service;
pub mod pay_service;
pub mod pending;
pub mod referral_service;
pub mod sweeper;

#[cfg(test)]
pub mod testing;

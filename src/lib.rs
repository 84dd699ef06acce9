pub mod appsettings;
pub mod delivery;
pub mod dispatch;
pub mod reminder;
pub mod scheduling;
pub mod server;
pub mod storage;

#[cfg(test)]
mod test_utils;

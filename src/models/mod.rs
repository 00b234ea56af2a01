pub mod driver;
pub mod event;
pub mod parcel;
pub mod status_log;
pub mod user;

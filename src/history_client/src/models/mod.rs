pub mod reading;
pub mod request;

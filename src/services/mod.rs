pub mod audit;
pub mod booking;
pub mod busy;
pub mod caller;
pub mod providers;
pub mod resolve;
pub mod slots;
pub mod timezone;

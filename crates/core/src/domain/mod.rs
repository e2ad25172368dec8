pub mod booking;
pub mod catalog;
pub mod customer;
pub mod quote;

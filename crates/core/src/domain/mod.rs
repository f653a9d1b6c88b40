pub mod employee;
pub mod nomination;
pub mod period;

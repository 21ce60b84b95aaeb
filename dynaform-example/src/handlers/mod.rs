pub mod notify_customer;
pub mod tally_orders;

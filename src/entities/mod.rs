//! Persistent entities of the receiving back office.

pub mod grn;
pub mod grn_item;
pub mod inventory_transaction;
pub mod outward_entry;
pub mod outward_item;
pub mod product;
pub mod purchase_order;
pub mod purchase_order_line;
pub mod return_request;
pub mod stock_batch;
pub mod supplier;

pub mod allocation;
pub mod allocator;
pub mod slips;

pub mod courier;
pub mod event;
pub mod settings;
pub mod slip;

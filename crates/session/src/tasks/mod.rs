#![forbid(unsafe_code)]

mod actions;
mod detail;
mod edit;
mod load;
